//! Task / Stage / TaskResult.
//!
//! - Task: 名前 + action (closure)。closure が捕捉したパラメータ以外の状態は持たない
//! - Stage: 並列に実行される task の集合。stage 同士は登録順に直列実行
//! - TaskResult: 実行された task ごとに 1 つ。ログと集計にのみ使う

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Serialize, Serializer};

use super::context::RunContext;
use crate::error::TaskError;

type Action = dyn Fn(&RunContext) -> Result<(), TaskError> + Send + Sync;

/// A named backup step.
///
/// Cloning is cheap: the action is shared.
#[derive(Clone)]
pub struct Task {
    name: Arc<str>,
    action: Arc<Action>,
}

impl Task {
    pub fn new<F>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&RunContext) -> Result<(), TaskError> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name.into()),
            action: Arc::new(action),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the action once. The action may block on file I/O.
    pub fn run(&self, ctx: &RunContext) -> Result<(), TaskError> {
        (self.action)(ctx)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("name", &self.name).finish()
    }
}

/// How a failing stage affects the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Any task failure aborts the run.
    Critical,

    /// Failures are logged as warnings and the run continues.
    BestEffort,
}

/// A group of independent tasks executed concurrently.
#[derive(Debug, Clone)]
pub struct Stage {
    tasks: Vec<Task>,
    kind: StageKind,
}

impl Stage {
    pub fn new(tasks: Vec<Task>, kind: StageKind) -> Self {
        Self { tasks, kind }
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn kind(&self) -> StageKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Outcome record of one executed task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskResult {
    pub task: String,
    pub error: Option<String>,
    #[serde(rename = "duration_ms", serialize_with = "as_millis")]
    pub duration: Duration,
}

impl TaskResult {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

fn as_millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis().min(u64::MAX as u128) as u64)
}
