//! coffer-core
//!
//! Core building blocks for scheduled, verified, encrypted backups.
//!
//! # モジュール構成
//! - **domain**: RunContext, Task / Stage, TaskResult, archive naming
//! - **scheduler**: staged execution (stage は直列、stage 内の task は並列)
//! - **archive**: tar+gzip ⇄ encryption streaming pipeline
//! - **crypto**: PBKDF2 key derivation + AES-256-GCM framing
//! - **verify**: directory fingerprint + round-trip verification
//! - **retention**: pruning of old archives
//! - **ports**: external collaborators (SQLite snapshot)
//! - **tasks**: the backup task catalog
//! - **app**: BackupApp (one run) and the daemon service loop

pub mod app;
pub mod archive;
pub mod config;
pub mod crypto;
pub mod domain;
pub mod error;
pub mod fsutil;
pub mod ports;
pub mod retention;
pub mod scheduler;
pub mod tasks;
pub mod verify;

pub use app::{BackupApp, BackupJob, Daemon, RunReport, RunState};
pub use config::{Config, ConfigError};
pub use domain::{Passphrase, RunContext, Stage, Task, TaskResult};
pub use error::{BackupError, TaskError};
pub use retention::RetentionPolicy;
pub use scheduler::{Scheduler, SchedulerError};
