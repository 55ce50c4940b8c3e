//! RPC Request/Response Types
//!
//! JSON-RPC method parameters and results (camelCase on the wire).

use agent_runner_core::application::{DeleteOptions, OrchestratorStats, TerminateOptions};
use agent_runner_core::domain::{Job, JobFilter, JobId, JobOptions, JobStatus, OutputChunk};
use serde::{Deserialize, Serialize};

/// jobs.create.v1 - Create and start a job
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobRequest {
    pub prompt: String,
    #[serde(default)]
    pub options: JobOptions,
    /// Caller-supplied id (kept verbatim); generated when absent
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateJobResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub color: String,
    pub started_at: i64,
}

impl From<Job> for CreateJobResponse {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            status: job.status,
            color: job.color,
            started_at: job.started_at,
        }
    }
}

/// jobs.get.v1 / jobs.terminate.v1 / jobs.delete.v1 / jobs.output.v1
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobIdRequest {
    pub job_id: JobId,
}

/// Job without its output history
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: JobId,
    pub prompt: String,
    pub status: JobStatus,
    pub progress: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete_message: Option<String>,
    pub started_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<i64>,
    pub color: String,
    pub output_chunks: usize,
}

impl From<Job> for JobSummary {
    fn from(job: Job) -> Self {
        Self {
            output_chunks: job.output_history.len(),
            id: job.id,
            prompt: job.prompt,
            status: job.status,
            progress: job.progress,
            complete_message: job.complete_message,
            started_at: job.started_at,
            finished_at: job.finished_at,
            color: job.color,
        }
    }
}

/// jobs.list.v1
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListJobsRequest {
    #[serde(flatten)]
    pub filter: JobFilter,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListJobsResponse {
    pub jobs: Vec<JobSummary>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminateJobResponse {
    pub job_id: JobId,
    pub status: JobStatus,
    pub terminated: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteJobResponse {
    pub job_id: JobId,
    pub deleted: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutputResponse {
    pub job_id: JobId,
    pub chunks: Vec<OutputChunk>,
}

/// jobs.stream.v1 - chunks strictly newer than `since` (all when 0)
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobStreamRequest {
    pub job_id: JobId,
    #[serde(default)]
    pub since: i64,
}

/// batch.create.v1
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCreateRequest {
    pub prompts: Vec<String>,
    #[serde(default)]
    pub options: JobOptions,
}

/// batch.status.v1
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchIdsRequest {
    pub job_ids: Vec<JobId>,
}

/// batch.terminate.v1
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTerminateRequest {
    pub job_ids: Vec<JobId>,
    #[serde(flatten)]
    pub options: TerminateOptions,
}

/// batch.delete.v1
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchDeleteRequest {
    pub job_ids: Vec<JobId>,
    #[serde(flatten)]
    pub options: DeleteOptions,
}

/// admin.stats.v1
#[derive(Debug, Default, Deserialize)]
pub struct StatsRequest {
    // No parameters needed
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: OrchestratorStats,
    pub uptime_seconds: u64,
}

/// admin.cleanup.v1 - run a retention sweep now
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupRequest {
    /// Overrides the configured retention window
    #[serde(default)]
    pub retention_ms: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub removed: usize,
    pub retention_ms: i64,
}

/// admin.health.v1
#[derive(Debug, Default, Deserialize)]
pub struct HealthRequest {}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub adapter: String,
    pub adapter_available: bool,
    pub uptime_seconds: u64,
}
