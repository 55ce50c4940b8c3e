// Task registry: one tracked background task per job

use crate::domain::JobId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::warn;

/// Tracks spawned job tasks so shutdown (or future admission control) has
/// something to wait on.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    handles: Arc<Mutex<HashMap<JobId, JoinHandle<()>>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `handle`; finished tasks are reaped on the way
    pub fn register(&self, job_id: &str, handle: JoinHandle<()>) {
        let mut handles = self.lock();
        handles.retain(|_, h| !h.is_finished());
        handles.insert(job_id.to_string(), handle);
    }

    pub fn active_count(&self) -> usize {
        self.lock().values().filter(|h| !h.is_finished()).count()
    }

    pub fn is_active(&self, job_id: &str) -> bool {
        self.lock().get(job_id).is_some_and(|h| !h.is_finished())
    }

    /// Wait for every tracked task, up to `timeout`.
    ///
    /// # Returns
    /// Number of tasks still running when the wait gave up (they keep running detached)
    pub async fn wait_all(&self, timeout: Duration) -> usize {
        let handles: Vec<JoinHandle<()>> = self.lock().drain().map(|(_, h)| h).collect();
        let pending = handles.iter().filter(|h| !h.is_finished()).count();
        if pending == 0 {
            return 0;
        }

        match tokio::time::timeout(timeout, futures::future::join_all(handles)).await {
            Ok(_) => 0,
            Err(_) => {
                warn!(pending = pending, "Timed out waiting for job tasks");
                pending
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_wait_all_joins_finished_tasks() {
        let registry = TaskRegistry::new();
        registry.register("a", tokio::spawn(async {}));
        registry.register(
            "b",
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }),
        );

        assert_eq!(registry.wait_all(Duration::from_secs(1)).await, 0);
        assert_eq!(registry.active_count(), 0);
    }

    #[tokio::test]
    async fn test_wait_all_reports_stragglers() {
        let registry = TaskRegistry::new();
        registry.register(
            "slow",
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
            }),
        );
        assert!(registry.is_active("slow"));

        assert_eq!(registry.wait_all(Duration::from_millis(20)).await, 1);
    }
}
