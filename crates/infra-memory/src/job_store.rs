// In-Memory JobStore Implementation

use agent_runner_core::application::constants::{DEFAULT_MAX_JOBS, DEFAULT_MAX_OUTPUT_CHUNKS};
use agent_runner_core::domain::{
    Job, JobFilter, JobId, JobStatus, JobUpdate, OutputChunk, OutputStream,
};
use agent_runner_core::error::{AppError, Result};
use agent_runner_core::port::{JobStore, StoreStats, TimeProvider};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Registry bounds
#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    /// Maximum jobs held at once (job + stream count as one slot)
    pub max_jobs: usize,
    /// Maximum chunks kept per stream and per job history
    pub max_output_chunks: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            max_jobs: DEFAULT_MAX_JOBS,
            max_output_chunks: DEFAULT_MAX_OUTPUT_CHUNKS,
        }
    }
}

#[derive(Default)]
struct Registry {
    jobs: HashMap<JobId, Job>,
    streams: HashMap<JobId, OutputStream>,
}

impl Registry {
    fn remove(&mut self, id: &str) -> bool {
        self.streams.remove(id);
        self.jobs.remove(id).is_some()
    }

    /// Oldest completed/failed job by effective timestamp
    fn eviction_candidate(&self) -> Option<JobId> {
        self.jobs
            .values()
            .filter(|job| job.status.is_evictable())
            .min_by_key(|job| job.effective_timestamp())
            .map(|job| job.id.clone())
    }
}

/// Bounded in-memory job registry
///
/// Jobs and output streams live behind one lock so every operation, including
/// eviction and compare-and-set, is atomic with respect to the others.
pub struct InMemoryJobStore {
    registry: RwLock<Registry>,
    limits: StoreLimits,
    time_provider: Arc<dyn TimeProvider>,
}

impl InMemoryJobStore {
    pub fn new(limits: StoreLimits, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            registry: RwLock::new(Registry::default()),
            limits,
            time_provider,
        }
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create_job(&self, job: Job) -> Result<Job> {
        let mut registry = self.registry.write().await;

        if registry.jobs.contains_key(&job.id) {
            return Err(AppError::Conflict(format!("Job {} already exists", job.id)));
        }

        if registry.jobs.len() >= self.limits.max_jobs {
            let Some(victim) = registry.eviction_candidate() else {
                return Err(AppError::Capacity(format!(
                    "Job registry is full ({} jobs) and no finished job can be evicted",
                    self.limits.max_jobs
                )));
            };
            registry.remove(&victim);
            info!(evicted = %victim, "Evicted oldest finished job to make room");
        }

        registry.jobs.insert(job.id.clone(), job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: &JobId) -> Result<Option<Job>> {
        let registry = self.registry.read().await;
        Ok(registry.jobs.get(id).cloned())
    }

    async fn update_job(&self, id: &JobId, update: JobUpdate) -> Result<Job> {
        let mut registry = self.registry.write().await;
        let job = registry
            .jobs
            .get_mut(id)
            .ok_or_else(|| AppError::job_not_found(id))?;

        job.apply(update)?;
        Ok(job.clone())
    }

    async fn compare_and_set_status(
        &self,
        id: &JobId,
        expected: JobStatus,
        next: JobStatus,
    ) -> Result<Option<Job>> {
        let mut registry = self.registry.write().await;
        let job = registry
            .jobs
            .get_mut(id)
            .ok_or_else(|| AppError::job_not_found(id))?;

        if job.status != expected {
            debug!(job_id = %id, expected = %expected, actual = %job.status, "Status CAS missed");
            return Ok(None);
        }

        job.apply(JobUpdate::status(next))?;
        Ok(Some(job.clone()))
    }

    async fn finish_job(
        &self,
        id: &JobId,
        expected: JobStatus,
        update: JobUpdate,
        banner: OutputChunk,
    ) -> Result<Option<Job>> {
        let now = self.time_provider.now_millis();
        let max = self.limits.max_output_chunks;
        let mut registry = self.registry.write().await;

        let Some(job) = registry.jobs.get_mut(id) else {
            return Ok(None);
        };
        if job.status != expected {
            debug!(job_id = %id, expected = %expected, actual = %job.status, "Finish CAS missed");
            return Ok(None);
        }

        job.apply(update)?;
        job.push_output(banner.clone(), max);
        let finished = job.clone();

        registry
            .streams
            .entry(id.clone())
            .or_insert_with(|| OutputStream::new(id.clone(), now))
            .push(banner, max, now);
        Ok(Some(finished))
    }

    async fn delete_job(&self, id: &JobId) -> Result<bool> {
        let mut registry = self.registry.write().await;
        Ok(registry.remove(id))
    }

    async fn list_jobs(&self, filter: JobFilter) -> Result<Vec<Job>> {
        let registry = self.registry.read().await;
        let mut jobs: Vec<Job> = registry
            .jobs
            .values()
            .filter(|job| filter.matches(job))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| b.id.cmp(&a.id)));
        Ok(jobs)
    }

    async fn create_output_stream(&self, id: &JobId) -> Result<()> {
        let now = self.time_provider.now_millis();
        let mut registry = self.registry.write().await;
        registry
            .streams
            .insert(id.clone(), OutputStream::new(id.clone(), now));
        Ok(())
    }

    async fn add_output_chunk(&self, id: &JobId, chunk: OutputChunk) -> Result<()> {
        let now = self.time_provider.now_millis();
        let max = self.limits.max_output_chunks;
        let mut registry = self.registry.write().await;

        let job = registry
            .jobs
            .get_mut(id)
            .ok_or_else(|| AppError::job_not_found(id))?;
        if job.status.is_terminal() {
            return Err(AppError::InvalidState(format!(
                "Job {} is {}; output is closed",
                id, job.status
            )));
        }
        job.push_output(chunk.clone(), max);

        registry
            .streams
            .entry(id.clone())
            .or_insert_with(|| OutputStream::new(id.clone(), now))
            .push(chunk, max, now);
        Ok(())
    }

    async fn get_output_stream(&self, id: &JobId, since: i64) -> Result<Option<OutputStream>> {
        let registry = self.registry.read().await;
        Ok(registry.streams.get(id).map(|stream| OutputStream {
            job_id: stream.job_id.clone(),
            chunks: stream.since(since).into(),
            last_update: stream.last_update,
        }))
    }

    async fn delete_output_stream(&self, id: &JobId) -> Result<bool> {
        let mut registry = self.registry.write().await;
        Ok(registry.streams.remove(id).is_some())
    }

    async fn cleanup(&self, retention_ms: i64) -> Result<usize> {
        let cutoff = self.time_provider.now_millis() - retention_ms;
        let mut registry = self.registry.write().await;

        let expired: Vec<JobId> = registry
            .jobs
            .values()
            .filter(|job| job.status.is_terminal() && job.effective_timestamp() < cutoff)
            .map(|job| job.id.clone())
            .collect();

        for id in &expired {
            registry.remove(id);
        }
        if !expired.is_empty() {
            debug!(removed = expired.len(), cutoff = cutoff, "Expired jobs removed");
        }
        Ok(expired.len())
    }

    async fn get_stats(&self) -> Result<StoreStats> {
        let registry = self.registry.read().await;

        let mut by_status: BTreeMap<JobStatus, usize> =
            JobStatus::ALL.iter().map(|status| (*status, 0)).collect();
        for job in registry.jobs.values() {
            *by_status.entry(job.status).or_insert(0) += 1;
        }

        let total_jobs = registry.jobs.len();
        let usage_percent = if self.limits.max_jobs == 0 {
            100.0
        } else {
            total_jobs as f64 / self.limits.max_jobs as f64 * 100.0
        };

        Ok(StoreStats {
            total_jobs,
            by_status,
            output_streams: registry.streams.len(),
            max_jobs: self.limits.max_jobs,
            usage_percent,
        })
    }
}
