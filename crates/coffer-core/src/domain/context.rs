//! RunContext - one run の設定スナップショット
//!
//! Scheduler が所有し、各 task には `&RunContext` として渡す。
//! run の間は immutable。

use std::fmt;
use std::path::PathBuf;
use std::sync::OnceLock;

use chrono::{DateTime, Local};
use ulid::Ulid;

use super::naming;
use crate::config::Config;
use crate::retention::RetentionPolicy;
use crate::verify::Fingerprint;

/// Identifier of one run, used to correlate log lines.
pub type RunId = Ulid;

/// Backup passphrase. Never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct Passphrase(String);

impl Passphrase {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for Passphrase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Passphrase(***)")
    }
}

/// Configuration snapshot for one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: RunId,

    /// Application data directory being backed up.
    pub source_dir: PathBuf,

    /// Temporary staging directory, removed when the run ends.
    pub work_dir: PathBuf,

    /// Where archives are written and pruned.
    pub archive_dir: PathBuf,

    pub base_name: String,
    pub passphrase: Passphrase,
    pub started_at: DateTime<Local>,
    pub retention: RetentionPolicy,

    /// Upper bound on workers within one stage (always >= 1).
    pub max_concurrency: usize,

    /// Set once by the archive task after a successful round trip.
    pub verified: OnceLock<Fingerprint>,
}

impl RunContext {
    pub fn new(config: &Config, work_dir: PathBuf, started_at: DateTime<Local>) -> Self {
        Self {
            run_id: Ulid::new(),
            source_dir: config.data_dir.clone(),
            work_dir,
            archive_dir: config.backup_dir.clone(),
            base_name: config.backup_name.clone(),
            passphrase: config.passphrase.clone(),
            started_at,
            retention: config.retention,
            max_concurrency: config.max_concurrency.max(1),
            verified: OnceLock::new(),
        }
    }

    /// `{base}_{YYYYMMDD_HHMMSS}.tar.gz.enc` inside the archive directory.
    pub fn archive_path(&self) -> PathBuf {
        self.archive_dir
            .join(naming::archive_file_name(&self.base_name, &self.started_at))
    }
}

#[cfg(test)]
impl RunContext {
    /// Context rooted at `root`: `root/data`, `root/work`, `root/archives`.
    pub(crate) fn for_tests(root: &std::path::Path, max_concurrency: usize) -> Self {
        Self {
            run_id: Ulid::new(),
            source_dir: root.join("data"),
            work_dir: root.join("work"),
            archive_dir: root.join("archives"),
            base_name: "vault".to_string(),
            passphrase: Passphrase::new("correct horse battery staple"),
            started_at: Local::now(),
            retention: RetentionPolicy::Disabled,
            max_concurrency: max_concurrency.max(1),
            verified: OnceLock::new(),
        }
    }
}
