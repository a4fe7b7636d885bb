use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::config::ConfigError;
use crate::ports::SnapshotError;
use crate::retention::PruneError;
use crate::scheduler::SchedulerError;
use crate::verify::VerifyError;

/// Failure of a single backup step.
///
/// Every variant aborts the run, except when it is raised inside a
/// best-effort stage (pruning).
#[derive(Debug, Error)]
pub enum TaskError {
    /// Source directory missing / not a directory, or not enough free space.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Verify(#[from] VerifyError),

    #[error(transparent)]
    Prune(#[from] PruneError),

    /// A required input is absent (e.g. RSA key files).
    #[error("{0}")]
    Missing(String),

    #[error("task panicked: {0}")]
    Panicked(String),
}

impl TaskError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Top-level error of one backup run.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to prepare working directory in {path}: {source}")]
    WorkingDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

impl BackupError {
    /// The task error that aborted the run, if any.
    pub fn task_error(&self) -> Option<&TaskError> {
        match self {
            BackupError::Scheduler(SchedulerError::TaskFailed { source, .. }) => Some(source),
            _ => None,
        }
    }
}
