//! Tracked pool for detached side effects (audit writes, deferred usage
//! increments, delayed file cleanup).

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

#[derive(Clone, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self {
            tracker: TaskTracker::new(),
        }
    }

    /// Run `task` detached from the caller. Nothing awaits its result.
    pub fn spawn<F>(&self, name: &'static str, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        debug!(
            target = "designmypdf::background",
            task = name,
            in_flight = self.tracker.len(),
            "spawning background task"
        );
        self.tracker.spawn(task);
    }

    /// Run `task` on the pool and hand back its handle. Dropping the handle
    /// detaches the task without cancelling it.
    pub fn spawn_joinable<F>(&self, name: &'static str, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        debug!(
            target = "designmypdf::background",
            task = name,
            in_flight = self.tracker.len(),
            "spawning joinable task"
        );
        self.tracker.spawn(task)
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every task spawned so far has finished, then accept new work
    /// again.
    pub async fn settle(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Stop accepting work and wait up to `grace` for in-flight tasks.
    /// Returns `false` when tasks were still running at the deadline.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.tracker.close();
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                warn!(
                    target = "designmypdf::background",
                    remaining = self.tracker.len(),
                    grace_ms = grace.as_millis() as u64,
                    "background tasks still running at shutdown deadline"
                );
                false
            }
        }
    }
}
