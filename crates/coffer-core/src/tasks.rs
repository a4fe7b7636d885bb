//! Backup task catalog.
//!
//! Each constructor returns a [`Task`] whose action reads everything it needs
//! from the [`RunContext`]. Staging tasks write into `ctx.work_dir` only.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info};

use crate::archive::create_encrypted_archive;
use crate::domain::{RunContext, Task};
use crate::error::TaskError;
use crate::fsutil::{self, format_bytes};
use crate::ports::Snapshotter;
use crate::retention;
use crate::verify::verify_archive;

pub const DATABASE_FILE: &str = "db.sqlite3";
pub const RSA_KEY_PREFIX: &str = "rsa_key";

/// Files and directories copied when present, skipped when absent.
pub const OPTIONAL_ITEMS: [&str; 4] = ["config.json", ".env", "attachments", "sends"];

/// The source directory must exist, be a directory and be readable.
pub fn check_data_dir() -> Task {
    Task::new("check data directory", |ctx: &RunContext| {
        let dir = &ctx.source_dir;
        let meta = match fs::metadata(dir) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(TaskError::Validation(format!(
                    "data directory does not exist: {}",
                    dir.display()
                )));
            }
            Err(e) => {
                return Err(TaskError::Validation(format!(
                    "cannot access data directory {}: {e}",
                    dir.display()
                )));
            }
        };
        if !meta.is_dir() {
            return Err(TaskError::Validation(format!(
                "data path is not a directory: {}",
                dir.display()
            )));
        }
        fs::read_dir(dir).map_err(|e| {
            TaskError::Validation(format!("cannot read data directory {}: {e}", dir.display()))
        })?;
        Ok(())
    })
}

/// Require twice the data size to be free in the archive directory
/// (staging copy + archive).
pub fn check_disk_space() -> Task {
    Task::new("check disk space", |ctx: &RunContext| {
        let data_size = fsutil::dir_size(&ctx.source_dir)
            .map_err(|e| TaskError::io("failed to measure data directory", e))?;
        let available = fsutil::available_space(&ctx.archive_dir)
            .map_err(|e| TaskError::io("failed to query free space", e))?;
        let required = data_size.saturating_mul(2);

        debug!(
            required = %format_bytes(required),
            available = %format_bytes(available),
            "disk space check"
        );
        if available < required {
            return Err(TaskError::Validation(format!(
                "insufficient disk space: need {}, available {}",
                format_bytes(required),
                format_bytes(available)
            )));
        }
        Ok(())
    })
}

/// Snapshot `db.sqlite3` into the working directory. The database is required.
pub fn snapshot_database(snapshotter: Arc<dyn Snapshotter>) -> Task {
    Task::new("backup database", move |ctx: &RunContext| {
        snapshotter.snapshot(
            &ctx.source_dir.join(DATABASE_FILE),
            &ctx.work_dir.join(DATABASE_FILE),
        )?;
        Ok(())
    })
}

/// Copy every `rsa_key*` file. At least one must exist.
pub fn copy_rsa_keys() -> Task {
    Task::new("backup rsa keys", |ctx: &RunContext| {
        let entries = fs::read_dir(&ctx.source_dir)
            .map_err(|e| TaskError::io("failed to list data directory", e))?;

        let mut copied = 0;
        for entry in entries {
            let entry = entry.map_err(|e| TaskError::io("failed to list data directory", e))?;
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(RSA_KEY_PREFIX) || !entry.path().is_file() {
                continue;
            }
            fsutil::copy_file(&entry.path(), &ctx.work_dir.join(&name)).map_err(|e| {
                TaskError::io(format!("failed to copy {}", entry.path().display()), e)
            })?;
            copied += 1;
        }

        if copied == 0 {
            return Err(TaskError::Missing(format!(
                "no RSA key files ({RSA_KEY_PREFIX}*) in {}",
                ctx.source_dir.display()
            )));
        }
        debug!(copied, "rsa keys copied");
        Ok(())
    })
}

/// Copy `name` (file or directory) if it exists.
pub fn copy_optional(name: &'static str) -> Task {
    Task::new(format!("backup {name}"), move |ctx: &RunContext| {
        copy_item(&ctx.source_dir.join(name), &ctx.work_dir.join(name), name)
    })
}

fn copy_item(src: &Path, dst: &Path, name: &str) -> Result<(), TaskError> {
    let meta = match fs::metadata(src) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = name, "skipping missing item");
            return Ok(());
        }
        Err(e) => return Err(TaskError::io(format!("failed to stat {name}"), e)),
    };
    let copied = if meta.is_dir() {
        fsutil::copy_dir(src, dst)
    } else {
        fsutil::copy_file(src, dst).map(|_| 1)
    };
    copied.map_err(|e| TaskError::io(format!("failed to back up {name}"), e))?;
    Ok(())
}

/// Build the encrypted archive from the working directory and accept it only
/// after a verified round trip.
pub fn archive_and_verify() -> Task {
    Task::new("archive, compress and encrypt", |ctx: &RunContext| {
        let target = ctx.archive_path();
        info!(file = %target.display(), "creating encrypted archive");
        let archive = create_encrypted_archive(&ctx.work_dir, &target, ctx.passphrase.expose())?;

        let fingerprint = verify_archive(
            &archive,
            ctx.passphrase.expose(),
            &ctx.work_dir,
            &ctx.archive_dir,
        )?;
        info!(file = %archive.display(), %fingerprint, "archive verified");
        let _ = ctx.verified.set(fingerprint);
        Ok(())
    })
}

/// Apply the retention policy to the archive directory.
pub fn prune_archives() -> Task {
    Task::new("prune old archives", |ctx: &RunContext| {
        retention::prune(
            &ctx.archive_dir,
            &ctx.base_name,
            ctx.retention,
            SystemTime::now(),
        )?;
        Ok(())
    })
}
