use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::debug;

use super::{TaskOutcome, execute};
use crate::domain::{RunContext, Task};

/// Bounded pool of blocking workers draining one stage's task queue.
/// - `cancel_and_join()` で新しい task の取得を止め、猶予期間だけ待つ
/// - 実行中の task は中断しない (preemption はしない)
pub(crate) struct WorkerPool {
    cancel_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `n` workers on the blocking thread pool.
    pub fn spawn(
        n: usize,
        queue: VecDeque<Task>,
        ctx: Arc<RunContext>,
        results: mpsc::UnboundedSender<TaskOutcome>,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let queue = Arc::new(Mutex::new(queue));

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let queue = Arc::clone(&queue);
            let ctx = Arc::clone(&ctx);
            let results = results.clone();
            let cancel_rx = cancel_rx.clone();

            let join = tokio::task::spawn_blocking(move || {
                worker_loop(worker_id, &queue, &ctx, &results, &cancel_rx);
            });
            joins.push(join);
        }

        Self { cancel_tx, joins }
    }

    /// Stop handing out queued tasks.
    pub fn request_cancel(&self) {
        // receivers may already be gone when every worker has exited
        let _ = self.cancel_tx.send(true);
    }

    /// Cancel, then wait up to `grace` for in-flight tasks.
    /// Returns false if some worker was still busy when the grace period ran out.
    pub async fn cancel_and_join(self, grace: Duration) -> bool {
        self.request_cancel();
        let joins = self.joins;
        tokio::time::timeout(grace, async move {
            for j in joins {
                let _ = j.await;
            }
        })
        .await
        .is_ok()
    }

    /// Wait for every worker after the queue has drained.
    pub async fn join(self) -> Result<(), JoinError> {
        for j in self.joins {
            j.await?;
        }
        Ok(())
    }
}

fn worker_loop(
    worker_id: usize,
    queue: &Mutex<VecDeque<Task>>,
    ctx: &RunContext,
    results: &mpsc::UnboundedSender<TaskOutcome>,
    cancel_rx: &watch::Receiver<bool>,
) {
    loop {
        if *cancel_rx.borrow() {
            debug!(worker = worker_id, "worker cancelled");
            break;
        }

        // lock is released before the task runs
        let next = queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let Some(task) = next else {
            break;
        };

        debug!(worker = worker_id, task = task.name(), "worker picked task");
        let outcome = execute(&task, ctx);

        if results.send(outcome).is_err() {
            // coordinator has already returned
            break;
        }
    }
}
