//! Ports - external collaborators behind traits.
//!
//! # 主要な trait
//! - **Snapshotter**: copy a live database file to a consistent snapshot

pub mod snapshot;

pub use self::snapshot::{SnapshotError, Snapshotter, Sqlite3Cli};
