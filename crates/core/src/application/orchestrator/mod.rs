// Job Lifecycle Orchestrator
//
// pending -> running -> terminating -> {completed | failed | terminated}

mod process_table;
mod task_registry;

pub use process_table::ProcessTable;
pub use task_registry::TaskRegistry;

use crate::application::constants::{TERMINATE_SETTLE_POLL, TERMINATE_SETTLE_TIMEOUT};
use crate::application::output::OutputPipeline;
use crate::domain::{
    ChunkKind, Job, JobFilter, JobId, JobOptions, JobStatus, JobUpdate, OutputChunk,
};
use crate::error::{AppError, Result};
use crate::port::{
    IdProvider, JobStore, KillSignal, ProcessAdapter, ProcessError, ProcessHandle, StoreStats,
    TimeProvider,
};
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Orchestrator tuning
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Hard limit on a job's runtime. `None` leaves jobs unbounded.
    pub job_timeout: Option<Duration>,

    /// Signal sent by `terminate_job`
    pub terminate_signal: KillSignal,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            job_timeout: None,
            terminate_signal: KillSignal::Terminate,
        }
    }
}

/// Stream-oriented read of a job's output
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStreamView {
    pub job_id: JobId,
    pub status: JobStatus,
    pub chunks: Vec<OutputChunk>,
    pub last_update: i64,
}

/// Registry stats plus orchestrator-side counters
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStats {
    #[serde(flatten)]
    pub store: StoreStats,
    pub active_tasks: usize,
    pub attached_processes: usize,
    pub adapter: &'static str,
    pub adapter_available: bool,
}

/// Job orchestrator
///
/// Owns job creation and the lifecycle state machine. Each job runs in its own
/// background task (tracked in a [`TaskRegistry`]) that wires the process adapter,
/// the output pipeline and the store together. Cheap to clone.
#[derive(Clone)]
pub struct JobOrchestrator {
    store: Arc<dyn JobStore>,
    adapter: Arc<dyn ProcessAdapter>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
    pipeline: Arc<OutputPipeline>,
    processes: ProcessTable,
    tasks: TaskRegistry,
    config: OrchestratorConfig,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn JobStore>,
        adapter: Arc<dyn ProcessAdapter>,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
        config: OrchestratorConfig,
    ) -> Self {
        let pipeline = Arc::new(OutputPipeline::new(
            Arc::clone(&store),
            Arc::clone(&time_provider),
        ));
        Self {
            store,
            adapter,
            id_provider,
            time_provider,
            pipeline,
            processes: ProcessTable::new(),
            tasks: TaskRegistry::new(),
            config,
        }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn adapter_name(&self) -> &'static str {
        self.adapter.name()
    }

    /// Create a job and start it in the background
    ///
    /// Only synchronous validation fails here (empty/duplicate id, capacity);
    /// later process problems end up in the job's status.
    pub async fn create_job(
        &self,
        prompt: impl Into<String>,
        options: JobOptions,
        id: Option<String>,
    ) -> Result<Job> {
        let id = match id {
            Some(id) if id.trim().is_empty() => {
                return Err(AppError::Validation("Job id must not be empty".into()))
            }
            Some(id) => {
                if self.store.get_job(&id).await?.is_some() {
                    return Err(AppError::Conflict(format!("Job {} already exists", id)));
                }
                id
            }
            None => self.id_provider.generate_id(),
        };

        let job = Job::new(id, prompt, options, self.time_provider.now_millis());
        let job = self.store.create_job(job).await?;
        self.store.create_output_stream(&job.id).await?;

        info!(job_id = %job.id, adapter = self.adapter.name(), "Job created");

        self.spawn_job_task(&job);
        Ok(job)
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        self.store.get_job(id).await
    }

    pub async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>> {
        self.store.list_jobs(filter).await
    }

    /// Job-oriented output read (the job's own history)
    pub async fn get_job_output(&self, id: &JobId) -> Result<Vec<OutputChunk>> {
        let job = self.require_job(id).await?;
        Ok(job.output_history.into_iter().collect())
    }

    /// Stream-oriented output read: chunks strictly newer than `since` (all when 0)
    pub async fn get_job_stream(&self, id: &JobId, since: i64) -> Result<JobStreamView> {
        let job = self.require_job(id).await?;
        let stream = self.store.get_output_stream(id, since).await?;
        let (chunks, last_update) = match stream {
            Some(stream) => (stream.chunks.into_iter().collect(), stream.last_update),
            None => (Vec::new(), job.started_at),
        };
        Ok(JobStreamView {
            job_id: job.id,
            status: job.status,
            chunks,
            last_update,
        })
    }

    /// Terminate a running job
    ///
    /// The `running -> terminating` write happens before the process is signalled,
    /// so concurrent callers cannot both succeed. If signalling fails the job goes
    /// back to `running` and the error is returned.
    ///
    /// # Errors
    /// - `AppError::NotFound` if absent
    /// - `AppError::InvalidState` unless the job is exactly `running`, or when no
    ///   process is attached
    /// - `AppError::Process` if the signal could not be delivered
    pub async fn terminate_job(&self, id: &JobId) -> Result<Job> {
        let job = self.require_job(id).await?;
        if job.status != JobStatus::Running {
            return Err(not_running(id, job.status));
        }

        let Some(_) = self
            .store
            .compare_and_set_status(id, JobStatus::Running, JobStatus::Terminating)
            .await?
        else {
            let current = self.require_job(id).await?.status;
            return Err(not_running(id, current));
        };

        let Some(killer) = self.processes.take(id) else {
            self.revert_to_running(id).await;
            return Err(AppError::InvalidState(format!(
                "No active process to terminate for job {}",
                id
            )));
        };

        match killer.kill(self.config.terminate_signal) {
            Ok(delivered) => {
                info!(job_id = %id, delivered = delivered, "Job process signalled");
                self.finish(id, JobStatus::Terminating, JobStatus::Terminated, None)
                    .await?;
                self.require_job(id).await
            }
            Err(e) => {
                error!(job_id = %id, error = %e, "Failed to signal job process");
                self.processes.insert(id, killer);
                self.revert_to_running(id).await;
                Err(e.into())
            }
        }
    }

    /// Delete a job and its output stream
    ///
    /// # Returns
    /// Whether the job existed (absent ids are not an error)
    ///
    /// # Errors
    /// - `AppError::InvalidState` if the job is running or terminating
    pub async fn delete_job(&self, id: &JobId) -> Result<bool> {
        let Some(job) = self.store.get_job(id).await? else {
            return Ok(false);
        };
        if job.status.is_active() {
            return Err(AppError::InvalidState(format!(
                "Cannot delete job {} while it is {}; terminate it first",
                id, job.status
            )));
        }

        let existed = self.store.delete_job(id).await?;
        self.processes.take(id);
        info!(job_id = %id, "Job deleted");
        Ok(existed)
    }

    /// Finalize a job: status, completion message, `finished_at` and the system
    /// banner chunk, written in one step against the job's current status.
    ///
    /// No-op if the job no longer exists or has already finished.
    pub async fn complete_job(
        &self,
        id: &JobId,
        status: JobStatus,
        detail: Option<String>,
    ) -> Result<()> {
        loop {
            let Some(job) = self.store.get_job(id).await? else {
                return Ok(());
            };
            if job.status.is_terminal() {
                self.processes.take(id);
                return Ok(());
            }
            if self.finish(id, job.status, status, detail.as_deref()).await? {
                return Ok(());
            }
        }
    }

    /// Write the terminal state if the job is still `expected`; returns whether it landed
    async fn finish(
        &self,
        id: &JobId,
        expected: JobStatus,
        status: JobStatus,
        detail: Option<&str>,
    ) -> Result<bool> {
        let now = self.time_provider.now_millis();
        let message = completion_message(status, detail);
        let banner = OutputChunk::new(id.clone(), ChunkKind::System, format!("[{}]", message), now);
        let update = JobUpdate {
            status: Some(status),
            complete_message: Some(message),
            finished_at: Some(now),
            ..Default::default()
        };

        if self
            .store
            .finish_job(id, expected, update, banner)
            .await?
            .is_none()
        {
            debug!(job_id = %id, expected = %expected, "Job status moved, finish skipped");
            return Ok(false);
        }
        self.processes.take(id);

        match status {
            JobStatus::Failed => warn!(job_id = %id, detail = ?detail, "Job failed"),
            _ => info!(job_id = %id, status = %status, "Job finished"),
        }
        Ok(true)
    }

    pub async fn get_stats(&self) -> Result<OrchestratorStats> {
        Ok(OrchestratorStats {
            store: self.store.get_stats().await?,
            active_tasks: self.tasks.active_count(),
            attached_processes: self.processes.len(),
            adapter: self.adapter.name(),
            adapter_available: self.adapter.is_available().await,
        })
    }

    /// Cleanup sweep: remove non-running jobs older than `retention_ms`
    pub async fn cleanup(&self, retention_ms: i64) -> Result<usize> {
        let removed = self.store.cleanup(retention_ms).await?;
        if removed > 0 {
            info!(removed = removed, retention_ms = retention_ms, "Cleaned up old jobs");
        }
        Ok(removed)
    }

    /// Terminate every running job, then wait (bounded) for all job tasks
    ///
    /// # Returns
    /// Number of tasks that were still running when the wait gave up
    pub async fn shutdown(&self, grace: Duration) -> Result<usize> {
        let running = self
            .store
            .list_jobs(JobFilter {
                status: Some(JobStatus::Running),
                ..Default::default()
            })
            .await?;

        info!(running = running.len(), "Shutting down job orchestrator");
        for job in running {
            if let Err(e) = self.terminate_job(&job.id).await {
                warn!(job_id = %job.id, error = %e, "Failed to terminate job during shutdown");
            }
        }

        Ok(self.tasks.wait_all(grace).await)
    }

    // ------------------------------------------------------------------------
    // Background job task
    // ------------------------------------------------------------------------

    fn spawn_job_task(&self, job: &Job) {
        let supervisor = self.clone();
        let job_id = job.id.clone();
        let prompt = job.prompt.clone();
        let options = job.options.clone();

        let handle = tokio::spawn(async move {
            // Inner task isolates panics: the JoinHandle reports them instead of
            // tearing down the supervisor.
            let worker = supervisor.clone();
            let id = job_id.clone();
            let outcome =
                tokio::spawn(async move { worker.run_job(&id, &prompt, &options).await }).await;

            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => supervisor.fail_if_present(&job_id, e.to_string()).await,
                Err(join_err) if join_err.is_panic() => {
                    let reason = panic_message(join_err.into_panic());
                    error!(job_id = %job_id, panic = %reason, "Job task panicked");
                    supervisor
                        .fail_if_present(&job_id, format!("job task panicked: {}", reason))
                        .await;
                }
                Err(join_err) => {
                    error!(job_id = %job_id, error = ?join_err, "Job task cancelled");
                    supervisor
                        .fail_if_present(&job_id, "job task cancelled".to_string())
                        .await;
                }
            }
        });

        self.tasks.register(&job.id, handle);
    }

    async fn run_job(&self, id: &JobId, prompt: &str, options: &JobOptions) -> Result<()> {
        if self
            .store
            .compare_and_set_status(id, JobStatus::Pending, JobStatus::Running)
            .await?
            .is_none()
        {
            debug!(job_id = %id, "Job left pending before start, skipping");
            return Ok(());
        }

        let ProcessHandle {
            stdout,
            stderr,
            exited,
            killer,
            metadata,
        } = self.adapter.start(prompt, options).await?;

        info!(
            job_id = %id,
            adapter = metadata.adapter,
            pid = ?metadata.pid,
            command = %metadata.command,
            "Job process started"
        );
        self.processes.insert(id, Arc::clone(&killer));

        let work = async {
            self.pipeline.run(id, stdout, stderr).await;
            exited.await
        };
        let exit = match self.config.job_timeout {
            None => work.await,
            Some(limit) => match tokio::time::timeout(limit, work).await {
                Ok(exit) => exit,
                Err(_) => {
                    warn!(job_id = %id, timeout_ms = limit.as_millis() as u64, "Job timed out, killing process");
                    if let Err(e) = killer.kill(KillSignal::Kill) {
                        error!(job_id = %id, error = %e, "Failed to kill timed out process");
                    }
                    Err(ProcessError::Timeout(limit.as_millis() as u64))
                }
            },
        };

        if self.store.get_job(id).await?.is_none() {
            self.processes.take(id);
            debug!(job_id = %id, "Job deleted while running, dropping result");
            return Ok(());
        }

        let code = exit?;
        if code == 0 {
            self.finalize_from_task(id, JobStatus::Completed, None).await
        } else {
            let detail = format!("Process exited with code {}", code);
            self.finalize_from_task(id, JobStatus::Failed, Some(detail))
                .await
        }
    }

    /// Finalize from the job's own task, deferring to an in-flight terminate
    async fn finalize_from_task(
        &self,
        id: &JobId,
        status: JobStatus,
        detail: Option<String>,
    ) -> Result<()> {
        let deadline = Instant::now() + TERMINATE_SETTLE_TIMEOUT;
        loop {
            let Some(job) = self.store.get_job(id).await? else {
                return Ok(());
            };
            match job.status {
                JobStatus::Pending | JobStatus::Running => {
                    // A terminate that claimed the job first wins; re-read and defer to it
                    if self.finish(id, job.status, status, detail.as_deref()).await? {
                        return Ok(());
                    }
                }
                JobStatus::Terminating if Instant::now() < deadline => {
                    tokio::time::sleep(TERMINATE_SETTLE_POLL).await;
                }
                JobStatus::Terminating => {
                    warn!(job_id = %id, "Terminate did not settle, failing job");
                    let reason = detail
                        .clone()
                        .unwrap_or_else(|| "termination did not settle".into());
                    if self
                        .finish(id, JobStatus::Terminating, JobStatus::Failed, Some(&reason))
                        .await?
                    {
                        return Ok(());
                    }
                }
                JobStatus::Completed | JobStatus::Failed | JobStatus::Terminated => {
                    self.processes.take(id);
                    return Ok(());
                }
            }
        }
    }

    async fn fail_if_present(&self, id: &JobId, reason: String) {
        self.processes.take(id);
        if let Err(e) = self
            .finalize_from_task(id, JobStatus::Failed, Some(reason))
            .await
        {
            if !e.is_stale_write() {
                error!(job_id = %id, error = %e, "Failed to record job failure");
            }
        }
    }

    async fn revert_to_running(&self, id: &JobId) {
        if let Err(e) = self
            .store
            .compare_and_set_status(id, JobStatus::Terminating, JobStatus::Running)
            .await
        {
            error!(job_id = %id, error = %e, "Failed to revert job to running");
        }
    }

    async fn require_job(&self, id: &JobId) -> Result<Job> {
        self.store
            .get_job(id)
            .await?
            .ok_or_else(|| AppError::job_not_found(id))
    }
}

fn not_running(id: &str, status: JobStatus) -> AppError {
    AppError::InvalidState(format!("Job {} is not running (status: {})", id, status))
}

fn completion_message(status: JobStatus, detail: Option<&str>) -> String {
    match (status, detail) {
        (JobStatus::Completed, _) => "Job completed successfully".to_string(),
        (JobStatus::Terminated, _) => "Job terminated by user".to_string(),
        (JobStatus::Failed, Some(detail)) => format!("Job failed: {}", detail),
        (JobStatus::Failed, None) => "Job failed".to_string(),
        (other, _) => format!("Job finished with status {}", other),
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}
