// Cleanup Scheduler
// Periodic retention sweep over the job registry

use crate::application::orchestrator::JobOrchestrator;
use crate::error::Result;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cleanup scheduler
///
/// Removes non-running jobs older than the retention window every `interval`.
pub struct CleanupScheduler {
    orchestrator: JobOrchestrator,
    retention_ms: i64,
    interval: Duration,
}

impl CleanupScheduler {
    /// # Arguments
    /// * `orchestrator` - Orchestrator whose store is swept
    /// * `retention_ms` - Age after which a non-running job is removed
    /// * `interval` - Time between sweeps
    pub fn new(orchestrator: JobOrchestrator, retention_ms: i64, interval: Duration) -> Self {
        Self {
            orchestrator,
            retention_ms,
            interval,
        }
    }

    /// Run the sweep loop until `cancel` fires
    ///
    /// Should be spawned in tokio::spawn
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            retention_ms = self.retention_ms,
            "Cleanup scheduler started"
        );

        let mut tick = interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately; the first sweep waits one interval
        tick.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Cleanup scheduler stopped");
                    return;
                }
                _ = tick.tick() => {
                    if let Err(e) = self.run_now().await {
                        error!(error = ?e, "Scheduled cleanup failed");
                    }
                }
            }
        }
    }

    /// Run one sweep immediately
    pub async fn run_now(&self) -> Result<usize> {
        self.orchestrator.cleanup(self.retention_ms).await
    }
}
