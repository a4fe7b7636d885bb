//! Domain model (run context, tasks, stages, archive naming).

pub mod context;
pub mod naming;
pub mod task;

pub use context::{Passphrase, RunContext, RunId};
pub use naming::{ARCHIVE_SUFFIX, TIMESTAMP_FORMAT, archive_file_name, is_archive_name};
pub use task::{Stage, StageKind, Task, TaskResult};
