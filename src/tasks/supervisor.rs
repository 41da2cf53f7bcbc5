use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

/// Owns every background job the bot spawns (extractions, graders, update
/// handlers) so shutdown can wait for them instead of dropping them mid-write.
#[derive(Debug, Default)]
pub(crate) struct TaskSupervisor {
    tracker: TaskTracker,
}

impl TaskSupervisor {
    pub(crate) fn new() -> Self {
        Self { tracker: TaskTracker::new() }
    }

    pub(crate) fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        self.tracker.spawn(task)
    }

    pub(crate) fn running(&self) -> usize {
        self.tracker.len()
    }

    /// Stops accepting work and waits up to `grace` for running jobs.
    pub(crate) async fn shutdown(&self, grace: Duration) {
        self.tracker.close();
        let pending = self.tracker.len();
        if pending > 0 {
            tracing::info!(pending, "Waiting for background tasks to finish");
        }
        if tokio::time::timeout(grace, self.tracker.wait()).await.is_err() {
            tracing::warn!(
                pending = self.tracker.len(),
                "Background tasks still running after shutdown grace period"
            );
        }
    }

    /// Waits for everything spawned so far, then accepts new work again.
    #[cfg(test)]
    pub(crate) async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}
