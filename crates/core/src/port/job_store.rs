// Job Store Port (Interface)

use crate::domain::{Job, JobFilter, JobId, JobStatus, JobUpdate, OutputChunk, OutputStream};
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

/// Registry occupancy snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total_jobs: usize,
    pub by_status: BTreeMap<JobStatus, usize>,
    pub output_streams: usize,
    pub max_jobs: usize,
    pub usage_percent: f64,
}

impl StoreStats {
    pub fn count(&self, status: JobStatus) -> usize {
        self.by_status.get(&status).copied().unwrap_or(0)
    }
}

/// Storage interface for jobs and their output streams.
///
/// A job and its output stream occupy one slot together: they are created,
/// evicted and deleted as a pair.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job, evicting the oldest completed/failed job when at capacity
    ///
    /// # Errors
    /// - `AppError::Conflict` if the id is already present
    /// - `AppError::Capacity` if full and nothing is evictable
    async fn create_job(&self, job: Job) -> Result<Job>;

    /// Find job by ID (missing is `None`, never an error)
    async fn get_job(&self, id: &JobId) -> Result<Option<Job>>;

    /// Shallow-merge `update` onto the stored job
    ///
    /// # Errors
    /// - `AppError::NotFound` if absent
    /// - `AppError::Domain` if the status change is not a lifecycle edge
    async fn update_job(&self, id: &JobId, update: JobUpdate) -> Result<Job>;

    /// Atomically move `expected -> next`.
    ///
    /// Returns `Ok(None)` when the current status is not `expected` (nothing written),
    /// `Ok(Some(job))` with the updated job otherwise.
    async fn compare_and_set_status(
        &self,
        id: &JobId,
        expected: JobStatus,
        next: JobStatus,
    ) -> Result<Option<Job>>;

    /// Atomically finish a job that is still `expected`: apply `update` (carrying
    /// the terminal status) and append the closing `banner` chunk.
    ///
    /// Returns `Ok(None)` when the job is absent or its status is no longer
    /// `expected` (nothing written).
    async fn finish_job(
        &self,
        id: &JobId,
        expected: JobStatus,
        update: JobUpdate,
        banner: OutputChunk,
    ) -> Result<Option<Job>>;

    /// Remove job and its output stream; returns whether the job existed
    async fn delete_job(&self, id: &JobId) -> Result<bool>;

    /// Jobs matching every supplied predicate, newest `started_at` first
    async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>>;

    async fn create_output_stream(&self, id: &JobId) -> Result<()>;

    /// Append to both the output stream (created on demand) and the job's history
    ///
    /// # Errors
    /// - `AppError::NotFound` if the job no longer exists
    /// - `AppError::InvalidState` if the job is already terminal
    async fn add_output_chunk(&self, id: &JobId, chunk: OutputChunk) -> Result<()>;

    /// Snapshot of the stream holding only chunks newer than `since` (all when 0)
    async fn get_output_stream(&self, id: &JobId, since: i64) -> Result<Option<OutputStream>>;

    async fn delete_output_stream(&self, id: &JobId) -> Result<bool>;

    /// Remove finished (terminal) jobs whose effective timestamp is older than `now - retention_ms`
    ///
    /// # Returns
    /// Number of jobs removed
    async fn cleanup(&self, retention_ms: i64) -> Result<usize>;

    async fn get_stats(&self) -> Result<StoreStats>;
}
