//! RPC Method Handlers
//!
//! Validates requests and forwards them to the orchestrator / batch coordinator.

use crate::error::to_rpc_error;
use crate::types::{
    BatchCreateRequest, BatchDeleteRequest, BatchIdsRequest, BatchTerminateRequest,
    CleanupRequest, CleanupResponse, CreateJobRequest, CreateJobResponse, DeleteJobResponse,
    HealthRequest, HealthResponse, JobIdRequest, JobOutputResponse, JobStreamRequest,
    JobSummary, ListJobsRequest, ListJobsResponse, StatsRequest, StatsResponse,
    TerminateJobResponse,
};
use agent_runner_core::application::{
    BatchCoordinator, BatchCreated, BatchReport, JobOrchestrator, JobStreamView,
};
use agent_runner_core::application::constants::DEFAULT_RETENTION_MS;
use agent_runner_core::domain::{Job, JobId};
use agent_runner_core::error::AppError;
use jsonrpsee::types::ErrorObjectOwned;
use std::time::Instant;
use tracing::debug;

/// Request size limits enforced at the RPC boundary
#[derive(Debug, Clone, Copy)]
pub struct RpcLimits {
    pub max_prompt_length: usize,
    pub max_batch_size: usize,
    /// Retention used by admin.cleanup.v1 when the request does not name one
    pub retention_ms: i64,
}

impl Default for RpcLimits {
    fn default() -> Self {
        Self {
            max_prompt_length: 100_000,
            max_batch_size: 10,
            retention_ms: DEFAULT_RETENTION_MS,
        }
    }
}

type RpcResult<T> = Result<T, ErrorObjectOwned>;

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    orchestrator: JobOrchestrator,
    batch: BatchCoordinator,
    limits: RpcLimits,
    start_time: Instant,
}

impl RpcHandler {
    pub fn new(orchestrator: JobOrchestrator, limits: RpcLimits) -> Self {
        Self {
            batch: BatchCoordinator::new(orchestrator.clone()),
            orchestrator,
            limits,
            start_time: Instant::now(),
        }
    }

    /// jobs.create.v1
    pub async fn create_job(&self, params: CreateJobRequest) -> RpcResult<CreateJobResponse> {
        self.validate_prompt(&params.prompt).map_err(to_rpc_error)?;

        let job = self
            .orchestrator
            .create_job(params.prompt, params.options, params.id)
            .await
            .map_err(to_rpc_error)?;

        Ok(job.into())
    }

    /// jobs.get.v1
    pub async fn get_job(&self, params: JobIdRequest) -> RpcResult<Job> {
        self.require_job(&params.job_id).await
    }

    /// jobs.list.v1
    pub async fn list_jobs(&self, params: ListJobsRequest) -> RpcResult<ListJobsResponse> {
        let jobs: Vec<JobSummary> = self
            .orchestrator
            .list_jobs(params.filter)
            .await
            .map_err(to_rpc_error)?
            .into_iter()
            .map(JobSummary::from)
            .collect();

        Ok(ListJobsResponse {
            count: jobs.len(),
            jobs,
        })
    }

    /// jobs.terminate.v1
    pub async fn terminate_job(&self, params: JobIdRequest) -> RpcResult<TerminateJobResponse> {
        let job = self
            .orchestrator
            .terminate_job(&params.job_id)
            .await
            .map_err(to_rpc_error)?;

        Ok(TerminateJobResponse {
            job_id: job.id,
            status: job.status,
            terminated: true,
        })
    }

    /// jobs.delete.v1 (absent ids succeed with `deleted: false`)
    pub async fn delete_job(&self, params: JobIdRequest) -> RpcResult<DeleteJobResponse> {
        let deleted = self
            .orchestrator
            .delete_job(&params.job_id)
            .await
            .map_err(to_rpc_error)?;

        Ok(DeleteJobResponse {
            job_id: params.job_id,
            deleted,
        })
    }

    /// jobs.output.v1
    pub async fn job_output(&self, params: JobIdRequest) -> RpcResult<JobOutputResponse> {
        let chunks = self
            .orchestrator
            .get_job_output(&params.job_id)
            .await
            .map_err(to_rpc_error)?;

        Ok(JobOutputResponse {
            job_id: params.job_id,
            chunks,
        })
    }

    /// jobs.stream.v1
    pub async fn job_stream(&self, params: JobStreamRequest) -> RpcResult<JobStreamView> {
        if params.since < 0 {
            return Err(to_rpc_error(AppError::Validation(
                "since must not be negative".to_string(),
            )));
        }

        self.orchestrator
            .get_job_stream(&params.job_id, params.since)
            .await
            .map_err(to_rpc_error)
    }

    /// batch.create.v1
    pub async fn batch_create(&self, params: BatchCreateRequest) -> RpcResult<BatchCreated> {
        if params.prompts.is_empty() || params.prompts.len() > self.limits.max_batch_size {
            return Err(to_rpc_error(AppError::Validation(format!(
                "prompts must contain between 1 and {} entries (got {})",
                self.limits.max_batch_size,
                params.prompts.len()
            ))));
        }
        for (index, prompt) in params.prompts.iter().enumerate() {
            self.validate_prompt(prompt).map_err(|e| {
                to_rpc_error(AppError::Validation(format!("prompts[{}]: {}", index, e)))
            })?;
        }

        self.batch
            .create_batch(params.prompts, params.options)
            .await
            .map_err(to_rpc_error)
    }

    /// batch.status.v1
    pub async fn batch_status(&self, params: BatchIdsRequest) -> RpcResult<BatchReport> {
        validate_ids(&params.job_ids)?;
        self.batch
            .batch_status(&params.job_ids)
            .await
            .map_err(to_rpc_error)
    }

    /// batch.terminate.v1
    pub async fn batch_terminate(&self, params: BatchTerminateRequest) -> RpcResult<BatchReport> {
        validate_ids(&params.job_ids)?;
        self.batch
            .batch_terminate(&params.job_ids, params.options)
            .await
            .map_err(to_rpc_error)
    }

    /// batch.delete.v1
    pub async fn batch_delete(&self, params: BatchDeleteRequest) -> RpcResult<BatchReport> {
        validate_ids(&params.job_ids)?;
        self.batch
            .batch_delete(&params.job_ids, params.options)
            .await
            .map_err(to_rpc_error)
    }

    /// admin.stats.v1
    pub async fn stats(&self, _params: StatsRequest) -> RpcResult<StatsResponse> {
        let stats = self.orchestrator.get_stats().await.map_err(to_rpc_error)?;

        Ok(StatsResponse {
            stats,
            uptime_seconds: self.start_time.elapsed().as_secs(),
        })
    }

    /// admin.cleanup.v1
    pub async fn cleanup(&self, params: CleanupRequest) -> RpcResult<CleanupResponse> {
        let retention_ms = params.retention_ms.unwrap_or(self.limits.retention_ms);
        if retention_ms < 0 {
            return Err(to_rpc_error(AppError::Validation(
                "retentionMs must not be negative".to_string(),
            )));
        }

        let removed = self
            .orchestrator
            .cleanup(retention_ms)
            .await
            .map_err(to_rpc_error)?;

        Ok(CleanupResponse {
            removed,
            retention_ms,
        })
    }

    /// admin.health.v1
    pub async fn health(&self, _params: HealthRequest) -> RpcResult<HealthResponse> {
        let stats = self.orchestrator.get_stats().await.map_err(to_rpc_error)?;

        Ok(HealthResponse {
            status: "ok".to_string(),
            version: agent_runner_core::VERSION.to_string(),
            adapter: stats.adapter.to_string(),
            adapter_available: stats.adapter_available,
            uptime_seconds: self.start_time.elapsed().as_secs(),
        })
    }

    fn validate_prompt(&self, prompt: &str) -> Result<(), AppError> {
        if prompt.trim().is_empty() {
            return Err(AppError::Validation("prompt must not be empty".to_string()));
        }
        let length = prompt.chars().count();
        if length > self.limits.max_prompt_length {
            debug!(length = length, "Rejecting oversized prompt");
            return Err(AppError::Validation(format!(
                "prompt exceeds {} characters",
                self.limits.max_prompt_length
            )));
        }
        Ok(())
    }

    async fn require_job(&self, id: &JobId) -> RpcResult<Job> {
        self.orchestrator
            .get_job(id)
            .await
            .map_err(to_rpc_error)?
            .ok_or_else(|| to_rpc_error(AppError::job_not_found(id)))
    }
}

fn validate_ids(ids: &[JobId]) -> RpcResult<()> {
    if ids.is_empty() {
        return Err(to_rpc_error(AppError::Validation(
            "jobIds must not be empty".to_string(),
        )));
    }
    if ids.iter().any(|id| id.trim().is_empty()) {
        return Err(to_rpc_error(AppError::Validation(
            "jobIds must not contain empty ids".to_string(),
        )));
    }
    Ok(())
}
