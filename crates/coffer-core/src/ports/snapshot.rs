//! Snapshotter - "snapshot a source file to a destination file"
//!
//! The backup pipeline only needs this one operation from the database side.
//! The default implementation drives the `sqlite3` command-line tool.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot source {0} is unavailable")]
    SourceUnavailable(PathBuf),

    #[error("{tool} failed: {message}")]
    ToolError { tool: String, message: String },
}

/// Produce a consistent copy of a live database file.
pub trait Snapshotter: Send + Sync {
    fn snapshot(&self, source: &Path, dest: &Path) -> Result<(), SnapshotError>;
}

/// Snapshots through `sqlite3 <src> ".backup '<dest>'"`, then checks the copy
/// with `PRAGMA integrity_check`.
#[derive(Debug, Clone)]
pub struct Sqlite3Cli {
    binary: PathBuf,
}

impl Sqlite3Cli {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn tool_name(&self) -> String {
        self.binary.display().to_string()
    }

    fn run(&self, db: &Path, command: &str) -> Result<String, SnapshotError> {
        let output = Command::new(&self.binary)
            .arg(db)
            .arg(command)
            .output()
            .map_err(|e| SnapshotError::ToolError {
                tool: self.tool_name(),
                message: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(SnapshotError::ToolError {
                tool: self.tool_name(),
                message: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn check_integrity(&self, db: &Path) -> Result<(), SnapshotError> {
        let result = self.run(db, "PRAGMA integrity_check;")?;
        if result != "ok" {
            return Err(SnapshotError::ToolError {
                tool: self.tool_name(),
                message: format!("integrity check reported problems:\n{result}"),
            });
        }
        Ok(())
    }
}

impl Default for Sqlite3Cli {
    fn default() -> Self {
        Self::new("sqlite3")
    }
}

impl Snapshotter for Sqlite3Cli {
    fn snapshot(&self, source: &Path, dest: &Path) -> Result<(), SnapshotError> {
        if !source.is_file() {
            return Err(SnapshotError::SourceUnavailable(source.to_path_buf()));
        }
        debug!(src = %source.display(), dest = %dest.display(), "sqlite backup");
        self.run(source, &backup_command(dest))?;
        self.check_integrity(dest)
    }
}

/// `.backup '<dest>'` with single quotes doubled.
fn backup_command(dest: &Path) -> String {
    let quoted = dest.display().to_string().replace('\'', "''");
    format!(".backup '{quoted}'")
}
