//! Scheduler - staged task execution
//!
//! # フロー
//! 1. stage を登録順に直列実行
//! 2. task が 1 つの stage はワーカープールを使わずにそのまま実行
//! 3. 複数 task の stage は `min(max_concurrency, stage_size)` 本のワーカーで並列実行
//! 4. 最初に観測されたエラーで stage を打ち切り、run 全体を失敗させる
//!    (best-effort stage は warning のみ)
//!
//! 同時に複数の task が失敗した場合、どのエラーが返るかは決定的ではない。
//! 返るのは常にちょうど 1 つ。

mod worker;

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use self::worker::WorkerPool;
use crate::domain::{RunContext, Stage, StageKind, Task, TaskResult};
use crate::error::TaskError;

/// How long a failed stage waits for in-flight tasks before returning.
pub const CANCEL_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task [{task}] failed: {source}")]
    TaskFailed {
        task: String,
        #[source]
        source: TaskError,
    },

    #[error("task [{task}] could not be joined: {message}")]
    Join { task: String, message: String },
}

impl SchedulerError {
    pub fn task(&self) -> &str {
        match self {
            SchedulerError::TaskFailed { task, .. } | SchedulerError::Join { task, .. } => task,
        }
    }
}

/// Result of one task execution, as passed from workers to the coordinator.
pub(crate) struct TaskOutcome {
    result: TaskResult,
    error: Option<TaskError>,
}

/// Runs registered stages in order.
#[derive(Debug, Default)]
pub struct Scheduler {
    stages: Vec<Stage>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Append a stage whose failure aborts the run.
    pub fn register(&mut self, tasks: Vec<Task>) -> &mut Self {
        self.stages.push(Stage::new(tasks, StageKind::Critical));
        self
    }

    /// Append a stage whose failure is only logged.
    pub fn register_best_effort(&mut self, tasks: Vec<Task>) -> &mut Self {
        self.stages.push(Stage::new(tasks, StageKind::BestEffort));
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Execute every stage in registration order.
    ///
    /// Returns the results of all executed tasks, or the first task error of a
    /// critical stage. Stages after a failing critical stage never start.
    pub async fn run(&self, ctx: Arc<RunContext>) -> Result<Vec<TaskResult>, SchedulerError> {
        let mut results = Vec::new();
        for (index, stage) in self.stages.iter().enumerate() {
            debug!(stage = index, tasks = stage.len(), "stage started");
            match run_stage(stage, &ctx).await {
                Ok(mut stage_results) => results.append(&mut stage_results),
                Err(err) if stage.kind() == StageKind::BestEffort => {
                    warn!(stage = index, error = %err, "best-effort stage failed, continuing");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(results)
    }
}

async fn run_stage(
    stage: &Stage,
    ctx: &Arc<RunContext>,
) -> Result<Vec<TaskResult>, SchedulerError> {
    match stage.tasks() {
        [] => Ok(Vec::new()),
        [task] => run_single(task, ctx).await.map(|r| vec![r]),
        tasks => run_parallel(tasks, ctx).await,
    }
}

async fn run_single(task: &Task, ctx: &Arc<RunContext>) -> Result<TaskResult, SchedulerError> {
    let t = task.clone();
    let c = Arc::clone(ctx);
    let outcome = tokio::task::spawn_blocking(move || execute(&t, &c))
        .await
        .map_err(|e| SchedulerError::Join {
            task: task.name().to_string(),
            message: e.to_string(),
        })?;
    into_result(outcome)
}

async fn run_parallel(
    tasks: &[Task],
    ctx: &Arc<RunContext>,
) -> Result<Vec<TaskResult>, SchedulerError> {
    let total = tasks.len();
    let workers = ctx.max_concurrency.min(total);
    info!(concurrency = workers, total, "running stage in parallel");

    let queue: VecDeque<Task> = tasks.iter().cloned().collect();
    let (result_tx, mut result_rx) = mpsc::unbounded_channel();
    let pool = WorkerPool::spawn(workers, queue, Arc::clone(ctx), result_tx);

    let mut results = Vec::with_capacity(total);
    while let Some(outcome) = result_rx.recv().await {
        if outcome.error.is_some() {
            error!(
                task = %outcome.result.task,
                completed = results.len(),
                total,
                "stage aborted"
            );
            if !pool.cancel_and_join(CANCEL_GRACE).await {
                warn!("in-flight tasks still running after grace period, discarding their results");
            }
            return into_result(outcome).map(|_| results);
        }

        results.push(outcome.result);
        debug!(progress = %format!("{}/{}", results.len(), total), "stage progress");
    }

    // every sender is gone: all workers have exited
    pool.join().await.map_err(|e| SchedulerError::Join {
        task: "<worker>".to_string(),
        message: e.to_string(),
    })?;
    Ok(results)
}

fn into_result(outcome: TaskOutcome) -> Result<TaskResult, SchedulerError> {
    match outcome.error {
        None => Ok(outcome.result),
        Some(source) => Err(SchedulerError::TaskFailed {
            task: outcome.result.task,
            source,
        }),
    }
}

/// Run one task, timing it and turning a panic into `TaskError::Panicked`.
pub(crate) fn execute(task: &Task, ctx: &RunContext) -> TaskOutcome {
    debug!(task = task.name(), "task started");
    let start = Instant::now();
    let res = panic::catch_unwind(AssertUnwindSafe(|| task.run(ctx)))
        .unwrap_or_else(|payload| Err(TaskError::Panicked(panic_message(payload.as_ref()))));
    let duration = start.elapsed();

    match &res {
        Ok(()) => info!(task = task.name(), ?duration, "task succeeded"),
        Err(err) => error!(task = task.name(), error = %err, "task failed"),
    }

    TaskOutcome {
        result: TaskResult {
            task: task.name().to_string(),
            error: res.as_ref().err().map(ToString::to_string),
            duration,
        },
        error: res.err(),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
