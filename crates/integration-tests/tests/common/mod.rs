//! Shared wiring for the integration tests

#![allow(dead_code)]

use agent_runner_core::application::{JobOrchestrator, OrchestratorConfig};
use agent_runner_core::domain::{Job, JobStatus};
use agent_runner_core::port::id_provider::mocks::SequentialIdProvider;
use agent_runner_core::port::{ProcessAdapter, SystemTimeProvider, TimeProvider};
use agent_runner_infra_memory::{InMemoryJobStore, StoreLimits};
use agent_runner_infra_process::SimulatedProcessAdapter;
use std::sync::Arc;
use std::time::Duration;

pub const CHUNK_DELAY: Duration = Duration::from_millis(5);
const POLL: Duration = Duration::from_millis(10);
const WAIT_LIMIT: Duration = Duration::from_secs(5);

pub fn orchestrator_with(
    adapter: Arc<dyn ProcessAdapter>,
    config: OrchestratorConfig,
) -> JobOrchestrator {
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store = Arc::new(InMemoryJobStore::new(
        StoreLimits::default(),
        time_provider.clone(),
    ));
    JobOrchestrator::new(
        store,
        adapter,
        Arc::new(SequentialIdProvider::new("job")),
        time_provider,
        config,
    )
}

pub fn simulated_orchestrator() -> JobOrchestrator {
    let adapter = Arc::new(SimulatedProcessAdapter::new(
        CHUNK_DELAY,
        Arc::new(SystemTimeProvider),
    ));
    orchestrator_with(adapter, OrchestratorConfig::default())
}

/// Poll until the job reaches a terminal status
pub async fn wait_terminal(orchestrator: &JobOrchestrator, id: &str) -> Job {
    let id = id.to_string();
    tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            if let Some(job) = orchestrator.get_job(&id).await.unwrap() {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(POLL).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job {} did not finish in time", id))
}

/// Poll until the job is running and has produced output (its process is attached)
pub async fn wait_running_with_output(orchestrator: &JobOrchestrator, id: &str) {
    let id = id.to_string();
    tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            let job = orchestrator.get_job(&id).await.unwrap().unwrap();
            if job.status == JobStatus::Running && !job.output_history.is_empty() {
                return;
            }
            tokio::time::sleep(POLL).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("job {} never started producing output", id))
}
