//! Retention pruner.
//!
//! The set of archives is re-derived from the archive directory on every
//! prune; there is no index. Pruning is never safety-critical: per-file
//! failures are logged and skipped, and callers downgrade `PruneError` to a
//! warning.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::is_archive_name;

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Exactly one active retention rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep everything.
    #[default]
    Disabled,

    /// Keep the newest N archives (by modification time).
    KeepLast(usize),

    /// Delete archives older than N days.
    MaxAgeDays(u32),
}

impl RetentionPolicy {
    /// Pick the active rule from the two settings. Zero means "unset".
    ///
    /// When both are set, the count rule wins and the conflict is logged.
    pub fn resolve(days: u32, count: usize) -> Self {
        match (days, count) {
            (0, 0) => RetentionPolicy::Disabled,
            (0, n) => RetentionPolicy::KeepLast(n),
            (d, 0) => RetentionPolicy::MaxAgeDays(d),
            (d, n) => {
                warn!(
                    prune_backups_days = d,
                    prune_backups_count = n,
                    "both retention rules are set, using PRUNE_BACKUPS_COUNT"
                );
                RetentionPolicy::KeepLast(n)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum PruneError {
    #[error("failed to list archives in {path}: {source}")]
    List {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// What a prune pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub matched: usize,
    pub deleted: Vec<PathBuf>,
    pub failed: usize,
}

/// Apply `policy` to the archives named `{base_name}_*.tar.gz.enc` in `dir`.
pub fn prune(
    dir: &Path,
    base_name: &str,
    policy: RetentionPolicy,
    now: SystemTime,
) -> Result<PruneReport, PruneError> {
    if policy == RetentionPolicy::Disabled {
        return Ok(PruneReport::default());
    }

    let mut archives = list_archives(dir, base_name)?;
    debug!(found = archives.len(), "scanned archive directory");

    let mut report = PruneReport {
        matched: archives.len(),
        ..PruneReport::default()
    };

    let doomed: Vec<PathBuf> = match policy {
        RetentionPolicy::Disabled => Vec::new(),
        RetentionPolicy::KeepLast(keep) => {
            // oldest first
            archives.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
            let excess = archives.len().saturating_sub(keep);
            archives.into_iter().take(excess).map(|(p, _)| p).collect()
        }
        RetentionPolicy::MaxAgeDays(days) => {
            let max_age = Duration::from_secs(u64::from(days) * SECS_PER_DAY);
            let cutoff = now.checked_sub(max_age).unwrap_or(SystemTime::UNIX_EPOCH);
            archives
                .into_iter()
                .filter(|(_, modified)| *modified < cutoff)
                .map(|(p, _)| p)
                .collect()
        }
    };

    for path in doomed {
        match fs::remove_file(&path) {
            Ok(()) => report.deleted.push(path),
            Err(e) => {
                warn!(file = %path.display(), error = %e, "failed to delete archive");
                report.failed += 1;
            }
        }
    }

    if !report.deleted.is_empty() {
        info!(deleted = report.deleted.len(), ?policy, "pruned old archives");
    }
    Ok(report)
}

/// Archives for `base_name` with their modification times.
///
/// Files whose metadata cannot be read are logged and skipped.
pub fn list_archives(
    dir: &Path,
    base_name: &str,
) -> Result<Vec<(PathBuf, SystemTime)>, PruneError> {
    let list_err = |source| PruneError::List {
        path: dir.to_path_buf(),
        source,
    };

    let mut out = Vec::new();
    for entry in fs::read_dir(dir).map_err(list_err)? {
        let entry = entry.map_err(list_err)?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !is_archive_name(base_name, name) {
            continue;
        }
        let path = entry.path();
        match entry.metadata().and_then(|m| {
            if m.is_file() {
                m.modified().map(Some)
            } else {
                Ok(None)
            }
        }) {
            Ok(Some(modified)) => out.push((path, modified)),
            Ok(None) => {}
            Err(e) => warn!(
                file = %path.display(),
                error = %e,
                "cannot read archive metadata, skipping"
            ),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::archive_file_name;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use std::fs::File;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(SECS_PER_DAY);

    /// Create an archive-named file whose mtime is `age` before `now`.
    fn archive_aged(dir: &Path, index: u32, now: SystemTime, age: Duration) -> PathBuf {
        let stamp = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
            + chrono::Duration::seconds(i64::from(index));
        let path = dir.join(archive_file_name("vault", &stamp));
        let f = File::create(&path).unwrap();
        f.set_modified(now - age).unwrap();
        path
    }

    #[rstest]
    #[case::none(0, 0, RetentionPolicy::Disabled)]
    #[case::days(30, 0, RetentionPolicy::MaxAgeDays(30))]
    #[case::count(0, 5, RetentionPolicy::KeepLast(5))]
    #[case::both_count_wins(30, 5, RetentionPolicy::KeepLast(5))]
    fn resolve_picks_one_rule(
        #[case] days: u32,
        #[case] count: usize,
        #[case] expected: RetentionPolicy,
    ) {
        assert_eq!(RetentionPolicy::resolve(days, count), expected);
    }

    #[test]
    fn keep_last_keeps_newest_by_mtime() {
        let tmp = TempDir::new().unwrap();
        let now = SystemTime::now();
        // names ascend with index, mtimes run the other way
        let paths: Vec<PathBuf> = (0..10)
            .map(|i| archive_aged(tmp.path(), i, now, DAY * i))
            .collect();

        let report = prune(tmp.path(), "vault", RetentionPolicy::KeepLast(3), now).unwrap();

        assert_eq!(report.matched, 10);
        assert_eq!(report.deleted.len(), 7);
        let mut remaining: Vec<PathBuf> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        remaining.sort();
        assert_eq!(remaining, vec![paths[0].clone(), paths[1].clone(), paths[2].clone()]);
    }

    #[test]
    fn keep_last_with_fewer_archives_deletes_nothing() {
        let tmp = TempDir::new().unwrap();
        let now = SystemTime::now();
        archive_aged(tmp.path(), 0, now, DAY);
        archive_aged(tmp.path(), 1, now, DAY * 2);

        let report = prune(tmp.path(), "vault", RetentionPolicy::KeepLast(3), now).unwrap();
        assert!(report.deleted.is_empty());
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 2);
    }

    #[test]
    fn max_age_removes_only_older_archives() {
        let tmp = TempDir::new().unwrap();
        let now = SystemTime::now();
        let one = archive_aged(tmp.path(), 0, now, DAY);
        let ten = archive_aged(tmp.path(), 1, now, DAY * 10);
        let forty = archive_aged(tmp.path(), 2, now, DAY * 40);

        let report = prune(tmp.path(), "vault", RetentionPolicy::MaxAgeDays(30), now).unwrap();

        assert_eq!(report.deleted, vec![forty.clone()]);
        assert!(one.exists());
        assert!(ten.exists());
        assert!(!forty.exists());
    }

    #[test]
    fn unrelated_files_are_never_touched() {
        let tmp = TempDir::new().unwrap();
        let now = SystemTime::now();
        archive_aged(tmp.path(), 0, now, DAY * 100);
        let foreign = tmp.path().join("other_20240101_000000.tar.gz.enc");
        File::create(&foreign).unwrap().set_modified(now - DAY * 100).unwrap();
        let notes = tmp.path().join("notes.txt");
        File::create(&notes).unwrap().set_modified(now - DAY * 100).unwrap();

        let report = prune(tmp.path(), "vault", RetentionPolicy::MaxAgeDays(1), now).unwrap();

        assert_eq!(report.matched, 1);
        assert_eq!(report.deleted.len(), 1);
        assert!(foreign.exists());
        assert!(notes.exists());
    }

    #[test]
    fn disabled_policy_does_not_even_list() {
        let tmp = TempDir::new().unwrap();
        let report = prune(
            &tmp.path().join("missing"),
            "vault",
            RetentionPolicy::Disabled,
            SystemTime::now(),
        )
        .unwrap();
        assert_eq!(report, PruneReport::default());
    }

    #[test]
    fn missing_directory_is_prune_error() {
        let tmp = TempDir::new().unwrap();
        let err = prune(
            &tmp.path().join("missing"),
            "vault",
            RetentionPolicy::KeepLast(1),
            SystemTime::now(),
        )
        .unwrap_err();
        assert!(matches!(err, PruneError::List { .. }));
    }
}
