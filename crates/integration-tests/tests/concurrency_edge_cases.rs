//! Concurrency & Failure Edge Case Tests
//!
//! Terminate races, kill failures, panics and timeouts, driven by the mock
//! process adapter so every outcome is deterministic.

mod common;

use agent_runner_core::application::{
    BatchCoordinator, DeleteOptions, OrchestratorConfig, TerminateOptions,
};
use agent_runner_core::domain::{ChunkKind, JobOptions, JobStatus};
use agent_runner_core::error::AppError;
use agent_runner_core::port::process::mocks::{
    assistant_line, MockBehavior, MockProcessAdapter, LINE_AFTER_STREAM_ERROR,
};
use agent_runner_core::domain::{Job, JobFilter, JobId, JobUpdate, OutputChunk, OutputStream};
use agent_runner_core::port::id_provider::mocks::SequentialIdProvider;
use agent_runner_core::port::{JobStore, StoreStats, SystemTimeProvider, TimeProvider};
use agent_runner_infra_memory::{InMemoryJobStore, StoreLimits};
use async_trait::async_trait;
use common::{orchestrator_with, wait_running_with_output, wait_terminal};
use std::sync::Arc;
use std::time::Duration;

/// In-memory store whose lookups of one id fail
struct FailingLookupStore {
    inner: InMemoryJobStore,
    broken_id: JobId,
}

#[async_trait]
impl JobStore for FailingLookupStore {
    async fn create_job(&self, job: Job) -> agent_runner_core::error::Result<Job> {
        self.inner.create_job(job).await
    }

    async fn get_job(&self, id: &JobId) -> agent_runner_core::error::Result<Option<Job>> {
        if *id == self.broken_id {
            return Err(AppError::Internal("registry unavailable".to_string()));
        }
        self.inner.get_job(id).await
    }

    async fn update_job(
        &self,
        id: &JobId,
        update: JobUpdate,
    ) -> agent_runner_core::error::Result<Job> {
        self.inner.update_job(id, update).await
    }

    async fn compare_and_set_status(
        &self,
        id: &JobId,
        expected: JobStatus,
        next: JobStatus,
    ) -> agent_runner_core::error::Result<Option<Job>> {
        self.inner.compare_and_set_status(id, expected, next).await
    }

    async fn finish_job(
        &self,
        id: &JobId,
        expected: JobStatus,
        update: JobUpdate,
        banner: OutputChunk,
    ) -> agent_runner_core::error::Result<Option<Job>> {
        self.inner.finish_job(id, expected, update, banner).await
    }

    async fn delete_job(&self, id: &JobId) -> agent_runner_core::error::Result<bool> {
        self.inner.delete_job(id).await
    }

    async fn list_jobs(&self, filter: JobFilter) -> agent_runner_core::error::Result<Vec<Job>> {
        self.inner.list_jobs(filter).await
    }

    async fn create_output_stream(&self, id: &JobId) -> agent_runner_core::error::Result<()> {
        self.inner.create_output_stream(id).await
    }

    async fn add_output_chunk(
        &self,
        id: &JobId,
        chunk: OutputChunk,
    ) -> agent_runner_core::error::Result<()> {
        self.inner.add_output_chunk(id, chunk).await
    }

    async fn get_output_stream(
        &self,
        id: &JobId,
        since: i64,
    ) -> agent_runner_core::error::Result<Option<OutputStream>> {
        self.inner.get_output_stream(id, since).await
    }

    async fn delete_output_stream(&self, id: &JobId) -> agent_runner_core::error::Result<bool> {
        self.inner.delete_output_stream(id).await
    }

    async fn cleanup(&self, retention_ms: i64) -> agent_runner_core::error::Result<usize> {
        self.inner.cleanup(retention_ms).await
    }

    async fn get_stats(&self) -> agent_runner_core::error::Result<StoreStats> {
        self.inner.get_stats().await
    }
}

fn until_killed(fail_kill: bool) -> Arc<MockProcessAdapter> {
    Arc::new(MockProcessAdapter::new(MockBehavior::UntilKilled {
        stdout: vec![assistant_line("working")],
        fail_kill,
    }))
}

/// Five concurrent terminates: exactly one wins
#[tokio::test]
async fn test_concurrent_terminate_single_winner() {
    let orchestrator = orchestrator_with(until_killed(false), OrchestratorConfig::default());

    let job = orchestrator
        .create_job("hang around", JobOptions::default(), None)
        .await
        .unwrap();
    wait_running_with_output(&orchestrator, &job.id).await;

    let mut handles = Vec::new();
    for _ in 0..5 {
        let orchestrator = orchestrator.clone();
        let id = job.id.clone();
        handles.push(tokio::spawn(
            async move { orchestrator.terminate_job(&id).await },
        ));
    }

    let mut wins = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(job) => {
                assert_eq!(job.status, JobStatus::Terminated);
                wins += 1;
            }
            Err(AppError::InvalidState(_)) => rejected += 1,
            Err(e) => panic!("unexpected terminate error: {}", e),
        }
    }
    assert_eq!(wins, 1, "exactly one terminate must succeed");
    assert_eq!(rejected, 4);

    let job = wait_terminal(&orchestrator, &job.id).await;
    assert_eq!(job.status, JobStatus::Terminated);
    assert_eq!(job.complete_message.as_deref(), Some("Job terminated by user"));

    // The job task's own exit must not overwrite the terminated status
    tokio::time::sleep(Duration::from_millis(100)).await;
    let job = orchestrator.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Terminated);
    let banners = job
        .output_history
        .iter()
        .filter(|c| c.kind == ChunkKind::System)
        .count();
    assert_eq!(banners, 1);

    println!("✅ Concurrent terminate: one winner, four rejected");
}

/// A fast exit racing a terminate finishes the job once, banner matching status
#[tokio::test]
async fn test_exit_racing_terminate_finishes_once() {
    let adapter = Arc::new(MockProcessAdapter::new(MockBehavior::Exit {
        stdout: vec![assistant_line("quick")],
        stderr: vec![],
        code: 0,
    }));
    let orchestrator = orchestrator_with(adapter, OrchestratorConfig::default());

    for round in 0..20 {
        let job = orchestrator
            .create_job(format!("race {}", round), JobOptions::default(), None)
            .await
            .unwrap();

        let terminator = {
            let orchestrator = orchestrator.clone();
            let id = job.id.clone();
            tokio::spawn(async move {
                for _ in 0..50 {
                    if orchestrator.terminate_job(&id).await.is_ok() {
                        return;
                    }
                    tokio::task::yield_now().await;
                }
            })
        };

        let finished = wait_terminal(&orchestrator, &job.id).await;
        terminator.await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let job = orchestrator.get_job(&job.id).await.unwrap().unwrap();
        assert_eq!(job.status, finished.status, "round {}", round);
        assert!(matches!(
            job.status,
            JobStatus::Completed | JobStatus::Terminated
        ));

        let banners: Vec<&str> = job
            .output_history
            .iter()
            .filter(|c| c.kind == ChunkKind::System)
            .map(|c| c.text.as_str())
            .collect();
        let expected = format!("[{}]", job.complete_message.as_deref().unwrap());
        assert_eq!(banners, vec![expected.as_str()], "round {}", round);
    }

    println!("✅ Exit vs terminate: one banner, consistent with final status");
}

/// Kill failure reverts the job to running and surfaces the error
#[tokio::test]
async fn test_terminate_reverts_when_kill_fails() {
    let adapter = until_killed(true);
    let orchestrator = orchestrator_with(adapter.clone(), OrchestratorConfig::default());

    let job = orchestrator
        .create_job("stubborn", JobOptions::default(), None)
        .await
        .unwrap();
    wait_running_with_output(&orchestrator, &job.id).await;

    let err = orchestrator.terminate_job(&job.id).await.unwrap_err();
    assert!(matches!(err, AppError::Process(_)), "got {}", err);

    let current = orchestrator.get_job(&job.id).await.unwrap().unwrap();
    assert_eq!(current.status, JobStatus::Running);

    // Still attached: a second attempt reaches the killer again
    let err = orchestrator.terminate_job(&job.id).await.unwrap_err();
    assert!(matches!(err, AppError::Process(_)));
    assert_eq!(orchestrator.get_stats().await.unwrap().attached_processes, 1);

    println!("✅ Terminate: kill failure reverted to running");
}

/// Terminating finished or absent jobs is rejected
#[tokio::test]
async fn test_terminate_requires_running() {
    let adapter = Arc::new(MockProcessAdapter::new_success(&["done"]));
    let orchestrator = orchestrator_with(adapter, OrchestratorConfig::default());

    let job = orchestrator
        .create_job("fast", JobOptions::default(), None)
        .await
        .unwrap();
    let job = wait_terminal(&orchestrator, &job.id).await;
    assert_eq!(job.status, JobStatus::Completed);

    assert!(matches!(
        orchestrator.terminate_job(&job.id).await,
        Err(AppError::InvalidState(_))
    ));
    assert!(matches!(
        orchestrator.terminate_job(&"ghost".to_string()).await,
        Err(AppError::NotFound(_))
    ));

    println!("✅ Terminate: finished and absent jobs rejected");
}

/// Running jobs cannot be deleted
#[tokio::test]
async fn test_delete_running_rejected() {
    let orchestrator = orchestrator_with(until_killed(false), OrchestratorConfig::default());

    let job = orchestrator
        .create_job("busy", JobOptions::default(), None)
        .await
        .unwrap();
    wait_running_with_output(&orchestrator, &job.id).await;

    assert!(matches!(
        orchestrator.delete_job(&job.id).await,
        Err(AppError::InvalidState(_))
    ));
    assert!(orchestrator.get_job(&job.id).await.unwrap().is_some());

    orchestrator.terminate_job(&job.id).await.unwrap();
    assert!(orchestrator.delete_job(&job.id).await.unwrap());

    println!("✅ Delete: running job rejected, terminated job removed");
}

/// A panicking adapter fails its job without taking down anything else
#[tokio::test]
async fn test_panic_isolated_to_job() {
    let adapter = Arc::new(MockProcessAdapter::new(MockBehavior::Panic(
        "adapter exploded".to_string(),
    )));
    let orchestrator = orchestrator_with(adapter.clone(), OrchestratorConfig::default());

    let job = orchestrator
        .create_job("boom", JobOptions::default(), None)
        .await
        .unwrap();
    let job = wait_terminal(&orchestrator, &job.id).await;
    assert_eq!(job.status, JobStatus::Failed);
    let message = job.complete_message.unwrap();
    assert!(message.contains("job task panicked"), "got {}", message);
    assert!(message.contains("adapter exploded"));

    // The orchestrator keeps working afterwards
    adapter.set_behavior(MockBehavior::Exit {
        stdout: vec![assistant_line("fine")],
        stderr: vec![],
        code: 0,
    });
    let next = orchestrator
        .create_job("calm", JobOptions::default(), None)
        .await
        .unwrap();
    let next = wait_terminal(&orchestrator, &next.id).await;
    assert_eq!(next.status, JobStatus::Completed);
    assert_eq!(adapter.call_count(), 2);

    println!("✅ Panic isolation: failed job, orchestrator still healthy");
}

/// Spawn failure marks the job failed with the adapter's reason
#[tokio::test]
async fn test_spawn_failure_fails_job() {
    let adapter = Arc::new(MockProcessAdapter::new(MockBehavior::FailToStart(
        "no such executable".to_string(),
    )));
    let orchestrator = orchestrator_with(adapter, OrchestratorConfig::default());

    let job = orchestrator
        .create_job("anything", JobOptions::default(), None)
        .await
        .unwrap();
    let job = wait_terminal(&orchestrator, &job.id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job
        .complete_message
        .unwrap()
        .contains("no such executable"));

    println!("✅ Spawn failure: job failed");
}

/// Non-zero exit fails the job with the exit code
#[tokio::test]
async fn test_nonzero_exit_fails_job() {
    let adapter = Arc::new(MockProcessAdapter::new_exit(3, "bad things\n"));
    let orchestrator = orchestrator_with(adapter, OrchestratorConfig::default());

    let job = orchestrator
        .create_job("exit three", JobOptions::default(), None)
        .await
        .unwrap();
    let job = wait_terminal(&orchestrator, &job.id).await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.complete_message.as_deref(),
        Some("Job failed: Process exited with code 3")
    );
    assert!(job
        .output_history
        .iter()
        .any(|c| c.kind == ChunkKind::Stderr && c.text.contains("bad things")));

    println!("✅ Non-zero exit: job failed with code");
}

/// A failing stdout stream is recorded; stderr still drains and the exit code decides
#[tokio::test]
async fn test_stream_error_recorded_and_exit_code_decides() {
    let adapter = Arc::new(MockProcessAdapter::new(MockBehavior::StreamError {
        stdout: vec![assistant_line("before the break")],
        error: "pipe closed".to_string(),
        stderr: vec![b"warning one\n".to_vec(), b"warning two\n".to_vec()],
        code: 0,
    }));
    let orchestrator = orchestrator_with(adapter, OrchestratorConfig::default());

    let job = orchestrator
        .create_job("broken pipe", JobOptions::default(), None)
        .await
        .unwrap();
    let job = wait_terminal(&orchestrator, &job.id).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(
        job.complete_message.as_deref(),
        Some("Job completed successfully")
    );

    let errors: Vec<&str> = job
        .output_history
        .iter()
        .filter(|c| c.kind == ChunkKind::Error)
        .map(|c| c.text.as_str())
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].starts_with("stdout stream error:"), "got {}", errors[0]);
    assert!(errors[0].contains("pipe closed"));

    let stdout: Vec<&str> = job
        .output_history
        .iter()
        .filter(|c| c.kind == ChunkKind::Stdout)
        .map(|c| c.text.as_str())
        .collect();
    assert_eq!(stdout, vec!["before the break"]);
    assert!(!job.progress.contains(LINE_AFTER_STREAM_ERROR));

    let stderr: String = job
        .output_history
        .iter()
        .filter(|c| c.kind == ChunkKind::Stderr)
        .map(|c| c.text.as_str())
        .collect();
    assert_eq!(stderr, "warning one\nwarning two\n");

    println!("✅ Stream error: error chunk, stderr drained, exit code decided");
}

/// The watchdog kills jobs that outlive the configured timeout
#[tokio::test]
async fn test_job_timeout_watchdog() {
    let config = OrchestratorConfig {
        job_timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let orchestrator = orchestrator_with(until_killed(false), config);

    let job = orchestrator
        .create_job("never ends", JobOptions::default(), None)
        .await
        .unwrap();
    let job = wait_terminal(&orchestrator, &job.id).await;

    assert_eq!(job.status, JobStatus::Failed);
    let message = job.complete_message.unwrap();
    assert!(message.contains("timeout after 100ms"), "got {}", message);
    assert_eq!(orchestrator.get_stats().await.unwrap().attached_processes, 0);

    println!("✅ Timeout: watchdog failed the job");
}

/// One failing lookup is reported on its own item; the rest of the batch still answers
#[tokio::test]
async fn test_batch_status_isolates_lookup_errors() {
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let store = Arc::new(FailingLookupStore {
        inner: InMemoryJobStore::new(StoreLimits::default(), time_provider.clone()),
        broken_id: "broken".to_string(),
    });
    let orchestrator = agent_runner_core::application::JobOrchestrator::new(
        store,
        Arc::new(MockProcessAdapter::new_exit(0, "")),
        Arc::new(SequentialIdProvider::new("job")),
        time_provider,
        OrchestratorConfig::default(),
    );

    let healthy = orchestrator
        .create_job("fine", JobOptions::default(), None)
        .await
        .unwrap();
    let healthy = wait_terminal(&orchestrator, &healthy.id).await;

    let ids = vec![
        healthy.id.clone(),
        "broken".to_string(),
        "absent".to_string(),
    ];
    let report = BatchCoordinator::new(orchestrator.clone())
        .batch_status(&ids)
        .await
        .unwrap();

    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.succeeded, 1);
    assert_eq!(report.summary.failed, 2);

    let ok = report.result(&healthy.id).unwrap();
    assert!(ok.success);
    assert_eq!(ok.status, Some(healthy.status));

    let broken = report.result("broken").unwrap();
    assert!(!broken.success);
    assert!(broken
        .error
        .as_deref()
        .unwrap()
        .contains("registry unavailable"));

    assert_eq!(
        report.result("absent").unwrap().error.as_deref(),
        Some("Job not found")
    );

    println!("✅ Batch status: lookup error confined to its item");
}

/// Batch terminate/delete honour force, wait and verify
#[tokio::test]
async fn test_batch_terminate_and_delete_options() {
    let adapter = until_killed(false);
    let orchestrator = orchestrator_with(adapter.clone(), OrchestratorConfig::default());
    let batch = BatchCoordinator::new(orchestrator.clone()).with_grace(Duration::from_millis(50));

    let running = orchestrator
        .create_job("runner", JobOptions::default(), None)
        .await
        .unwrap();
    wait_running_with_output(&orchestrator, &running.id).await;

    adapter.set_behavior(MockBehavior::Exit {
        stdout: vec![assistant_line("done")],
        stderr: vec![],
        code: 0,
    });
    let finished = orchestrator
        .create_job("finisher", JobOptions::default(), None)
        .await
        .unwrap();
    wait_terminal(&orchestrator, &finished.id).await;

    let ids = vec![running.id.clone(), finished.id.clone(), "ghost".to_string()];

    let report = batch.batch_status(&ids).await.unwrap();
    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(report.summary.failed, 1);

    // Without force the finished job counts as a failure
    let report = batch
        .batch_terminate(&[finished.id.clone()], TerminateOptions::default())
        .await
        .unwrap();
    assert_eq!(report.summary.failed, 1);
    assert_eq!(
        report.result(&finished.id).unwrap().status,
        Some(JobStatus::Completed)
    );

    let report = batch
        .batch_terminate(
            &ids,
            TerminateOptions {
                force: true,
                wait: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(report.summary.total, 3);
    assert_eq!(report.summary.succeeded, 2);
    let running_result = report.result(&running.id).unwrap();
    assert!(running_result.success);
    assert_eq!(running_result.status, Some(JobStatus::Terminated));
    let finished_result = report.result(&finished.id).unwrap();
    assert!(finished_result.success);
    assert_eq!(finished_result.detail.as_deref(), Some("already finished"));
    assert!(!report.result("ghost").unwrap().success);

    let report = batch
        .batch_delete(
            &ids,
            DeleteOptions {
                force: true,
                verify: true,
            },
        )
        .await
        .unwrap();
    assert_eq!(report.summary.succeeded, 2);
    assert_eq!(report.summary.failed, 1);
    assert!(orchestrator.get_job(&running.id).await.unwrap().is_none());
    assert!(orchestrator.get_job(&finished.id).await.unwrap().is_none());

    println!("✅ Batch: force/wait terminate and verified delete");
}

/// Batch delete with force terminates running jobs first
#[tokio::test]
async fn test_batch_force_delete_running() {
    let orchestrator = orchestrator_with(until_killed(false), OrchestratorConfig::default());
    let batch = BatchCoordinator::new(orchestrator.clone());

    let job = orchestrator
        .create_job("to be removed", JobOptions::default(), None)
        .await
        .unwrap();
    wait_running_with_output(&orchestrator, &job.id).await;

    let ids = vec![job.id.clone()];
    let report = batch
        .batch_delete(&ids, DeleteOptions::default())
        .await
        .unwrap();
    assert_eq!(report.summary.failed, 1);

    let report = batch
        .batch_delete(
            &ids,
            DeleteOptions {
                force: true,
                verify: false,
            },
        )
        .await
        .unwrap();
    assert_eq!(report.summary.succeeded, 1);
    assert!(orchestrator.get_job(&job.id).await.unwrap().is_none());

    println!("✅ Batch: force delete of a running job");
}
