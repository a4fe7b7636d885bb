//! Daemon - interval-driven backup service
//!
//! # フロー
//! 1. 起動直後に 1 回、その後は interval ごとに backup を起動
//! 2. 前回の run が実行中なら、その tick はスキップ (run は重ならない)
//! 3. shutdown シグナルで新規起動を止め、実行中の run を
//!    `shutdown_timeout` まで待ってから終了

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::backup::BackupJob;

pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared "is a backup running" flag.
#[derive(Debug, Clone)]
pub struct RunState {
    active: Arc<watch::Sender<bool>>,
}

/// Marks a run as active until dropped.
#[derive(Debug)]
pub struct ActiveRun {
    active: Arc<watch::Sender<bool>>,
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.active.send_replace(false);
    }
}

impl RunState {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            active: Arc::new(tx),
        }
    }

    /// Mark a run as started. `None` if one is already active.
    pub fn try_begin(&self) -> Option<ActiveRun> {
        let acquired = self.active.send_if_modified(|active| {
            if *active {
                false
            } else {
                *active = true;
                true
            }
        });
        acquired.then(|| ActiveRun {
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    /// Wait until no run is active. Returns `false` on timeout.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let mut rx = self.active.subscribe();
        let idle = async { rx.wait_for(|active| !*active).await.is_ok() };
        matches!(tokio::time::timeout(timeout, idle).await, Ok(true))
    }
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Daemon {
    job: Arc<dyn BackupJob>,
    interval: Duration,
    state: RunState,
    shutdown_timeout: Duration,
}

impl Daemon {
    pub fn new(job: Arc<dyn BackupJob>, interval: Duration) -> Self {
        Self {
            job,
            interval,
            state: RunState::new(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Run the schedule until `shutdown` resolves.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(interval = ?self.interval, "backup service started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.trigger(),
            }
        }

        info!("shutdown requested, no new backups will start");
        if self.state.is_active() {
            info!(timeout = ?self.shutdown_timeout, "waiting for the running backup");
            if !self.state.wait_idle(self.shutdown_timeout).await {
                warn!("backup still running after shutdown timeout, exiting anyway");
            }
        }
        info!("backup service stopped");
    }

    fn trigger(&self) {
        let Some(guard) = self.state.try_begin() else {
            warn!("previous backup still running, skipping this tick");
            return;
        };
        let job = Arc::clone(&self.job);
        tokio::spawn(async move {
            let _guard = guard;
            match job.run_backup().await {
                Ok(report) => info!(
                    file = %report.archive.display(),
                    elapsed_ms = report.elapsed_ms,
                    "scheduled backup finished"
                ),
                Err(e) => error!(error = %e, "scheduled backup failed"),
            }
        });
    }
}
