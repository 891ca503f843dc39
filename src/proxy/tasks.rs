//! Detached background work that must outlive the request that started it.

use std::future::Future;
use std::time::Duration;
use tokio_util::task::TaskTracker;

/// Tracks usage-capture tasks so shutdown can wait for them.
///
/// Handlers spawn here instead of awaiting: the response goes back to the
/// caller while the task keeps reading the upstream stream to its end.
#[derive(Clone, Default)]
pub struct BackgroundTasks {
    tracker: TaskTracker,
}

impl BackgroundTasks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task the request scope does not await.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tracker.spawn(task);
    }

    /// Number of tasks still running.
    pub fn len(&self) -> usize {
        self.tracker.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracker.is_empty()
    }

    /// Wait for every tracked task to finish, for at most `grace`.
    ///
    /// Returns `true` when all tasks completed in time. The tracker accepts
    /// new tasks again afterwards.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tracker.close();
        let finished = tokio::time::timeout(grace, self.tracker.wait())
            .await
            .is_ok();
        self.tracker.reopen();

        if !finished {
            tracing::warn!(
                remaining = self.tracker.len(),
                grace_secs = grace.as_secs(),
                "Background usage tasks still running after grace period"
            );
        }
        finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_drain_waits_for_tasks() {
        let tasks = BackgroundTasks::new();
        let done = Arc::new(AtomicBool::new(false));
        let flag = done.clone();
        tasks.spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            flag.store(true, Ordering::SeqCst);
        });

        assert!(tasks.drain(Duration::from_secs(5)).await);
        assert!(done.load(Ordering::SeqCst));
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_grace() {
        let tasks = BackgroundTasks::new();
        tasks.spawn(async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        });

        assert!(!tasks.drain(Duration::from_millis(20)).await);
        assert_eq!(tasks.len(), 1);
    }
}
