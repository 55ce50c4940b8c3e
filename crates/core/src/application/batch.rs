// Batch Coordinator - fan-out of orchestrator operations over many jobs

use crate::application::constants::BATCH_VERIFY_GRACE;
use crate::application::orchestrator::JobOrchestrator;
use crate::domain::{JobId, JobOptions, JobStatus};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{info, warn};

/// Options for [`BatchCoordinator::batch_terminate`]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminateOptions {
    /// Report already-finished jobs as successes instead of errors
    pub force: bool,
    /// Re-read each job after a grace period and flag ones that did not settle
    pub wait: bool,
}

/// Options for [`BatchCoordinator::batch_delete`]
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeleteOptions {
    /// Terminate running jobs before deleting them
    pub force: bool,
    /// Confirm each job is gone afterwards
    pub verify: bool,
}

/// Per-job outcome of a batch operation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItemResult {
    pub job_id: JobId,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl BatchItemResult {
    fn ok(job_id: &JobId, status: Option<JobStatus>) -> Self {
        Self {
            job_id: job_id.clone(),
            success: true,
            status,
            error: None,
            detail: None,
        }
    }

    fn failed(job_id: &JobId, status: Option<JobStatus>, error: impl Into<String>) -> Self {
        Self {
            job_id: job_id.clone(),
            success: false,
            status,
            error: Some(error.into()),
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Aggregate counts for a batch report
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub by_status: BTreeMap<JobStatus, usize>,
}

/// Per-job results plus summary
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub results: Vec<BatchItemResult>,
    pub summary: BatchSummary,
}

impl BatchReport {
    fn new(results: Vec<BatchItemResult>) -> Self {
        let mut summary = BatchSummary {
            total: results.len(),
            ..Default::default()
        };
        for result in &results {
            if result.success {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            if let Some(status) = result.status {
                *summary.by_status.entry(status).or_insert(0) += 1;
            }
        }
        Self { results, summary }
    }

    pub fn result(&self, job_id: &str) -> Option<&BatchItemResult> {
        self.results.iter().find(|r| r.job_id == job_id)
    }
}

/// A prompt that could not become a job
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub index: usize,
    pub prompt: String,
    pub error: String,
}

/// Result of [`BatchCoordinator::create_batch`]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchCreated {
    /// Created job ids, in input order
    pub job_ids: Vec<JobId>,
    pub count: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<BatchFailure>,
}

/// Batch coordinator
///
/// Every operation runs sequentially in input order; a failing item never aborts
/// the rest of the batch.
#[derive(Clone)]
pub struct BatchCoordinator {
    orchestrator: JobOrchestrator,
    grace: Duration,
}

impl BatchCoordinator {
    pub fn new(orchestrator: JobOrchestrator) -> Self {
        Self {
            orchestrator,
            grace: BATCH_VERIFY_GRACE,
        }
    }

    /// Override the settle delay used by `wait`
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Create one job per prompt with shared options
    ///
    /// # Errors
    /// - `AppError::Validation` if `prompts` is empty
    pub async fn create_batch(
        &self,
        prompts: Vec<String>,
        options: JobOptions,
    ) -> Result<BatchCreated> {
        if prompts.is_empty() {
            return Err(AppError::Validation("Batch must contain at least one prompt".into()));
        }

        let mut job_ids = Vec::with_capacity(prompts.len());
        let mut failures = Vec::new();
        for (index, prompt) in prompts.into_iter().enumerate() {
            match self
                .orchestrator
                .create_job(prompt.clone(), options.clone(), None)
                .await
            {
                Ok(job) => job_ids.push(job.id),
                Err(e) => {
                    warn!(index = index, error = %e, "Batch item could not be created");
                    failures.push(BatchFailure {
                        index,
                        prompt,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(created = job_ids.len(), failed = failures.len(), "Batch created");
        Ok(BatchCreated {
            count: job_ids.len(),
            job_ids,
            failures,
        })
    }

    /// Current status of each job; unknown ids and lookup errors are reported per item
    pub async fn batch_status(&self, ids: &[JobId]) -> Result<BatchReport> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            let result = match self.orchestrator.get_job(id).await {
                Ok(Some(job)) => BatchItemResult::ok(id, Some(job.status)),
                Ok(None) => BatchItemResult::failed(id, None, "Job not found"),
                Err(e) => {
                    warn!(job_id = %id, error = %e, "Batch status lookup failed");
                    BatchItemResult::failed(id, None, e.to_string())
                }
            };
            results.push(result);
        }
        Ok(BatchReport::new(results))
    }

    pub async fn batch_terminate(
        &self,
        ids: &[JobId],
        options: TerminateOptions,
    ) -> Result<BatchReport> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            results.push(self.terminate_one(id, options).await);
        }

        if options.wait {
            tokio::time::sleep(self.grace).await;
            for result in results.iter_mut().filter(|r| r.success) {
                self.confirm_settled(result).await;
            }
        }

        let report = BatchReport::new(results);
        info!(
            total = report.summary.total,
            succeeded = report.summary.succeeded,
            "Batch terminate finished"
        );
        Ok(report)
    }

    pub async fn batch_delete(&self, ids: &[JobId], options: DeleteOptions) -> Result<BatchReport> {
        let mut results = Vec::with_capacity(ids.len());
        for id in ids {
            results.push(self.delete_one(id, options).await);
        }

        if options.verify {
            for result in results.iter_mut().filter(|r| r.success) {
                if let Ok(Some(job)) = self.orchestrator.get_job(&result.job_id).await {
                    result.success = false;
                    result.status = Some(job.status);
                    result.error = Some("Job still present after delete".into());
                }
            }
        }

        let report = BatchReport::new(results);
        info!(
            total = report.summary.total,
            succeeded = report.summary.succeeded,
            "Batch delete finished"
        );
        Ok(report)
    }

    async fn terminate_one(&self, id: &JobId, options: TerminateOptions) -> BatchItemResult {
        let job = match self.orchestrator.get_job(id).await {
            Ok(Some(job)) => job,
            Ok(None) => return BatchItemResult::failed(id, None, "Job not found"),
            Err(e) => return BatchItemResult::failed(id, None, e.to_string()),
        };

        if options.force && job.status.is_terminal() {
            return BatchItemResult::ok(id, Some(job.status)).with_detail("already finished");
        }

        match self.orchestrator.terminate_job(id).await {
            Ok(job) => BatchItemResult::ok(id, Some(job.status)),
            Err(e) => BatchItemResult::failed(id, Some(job.status), e.to_string()),
        }
    }

    async fn delete_one(&self, id: &JobId, options: DeleteOptions) -> BatchItemResult {
        let job = match self.orchestrator.get_job(id).await {
            Ok(Some(job)) => job,
            Ok(None) => return BatchItemResult::failed(id, None, "Job not found"),
            Err(e) => return BatchItemResult::failed(id, None, e.to_string()),
        };

        if options.force && job.status == JobStatus::Running {
            if let Err(e) = self.orchestrator.terminate_job(id).await {
                return BatchItemResult::failed(id, Some(job.status), e.to_string())
                    .with_detail("terminate before delete failed");
            }
        }

        match self.orchestrator.delete_job(id).await {
            Ok(true) => BatchItemResult::ok(id, None),
            Ok(false) => BatchItemResult::failed(id, None, "Job not found"),
            Err(e) => BatchItemResult::failed(id, Some(job.status), e.to_string()),
        }
    }

    async fn confirm_settled(&self, result: &mut BatchItemResult) {
        match self.orchestrator.get_job(&result.job_id).await {
            Ok(Some(job)) if job.status.is_terminal() => result.status = Some(job.status),
            Ok(Some(job)) => {
                result.success = false;
                result.status = Some(job.status);
                result.error = Some(format!("Job did not settle (status: {})", job.status));
            }
            Ok(None) => result.detail = Some("deleted before verification".into()),
            Err(e) => {
                result.success = false;
                result.error = Some(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, success: bool, status: Option<JobStatus>) -> BatchItemResult {
        BatchItemResult {
            job_id: id.to_string(),
            success,
            status,
            error: None,
            detail: None,
        }
    }

    #[test]
    fn test_summary_counts() {
        let report = BatchReport::new(vec![
            item("a", true, Some(JobStatus::Terminated)),
            item("b", true, Some(JobStatus::Terminated)),
            item("c", false, Some(JobStatus::Completed)),
            item("d", false, None),
        ]);

        assert_eq!(report.summary.total, 4);
        assert_eq!(report.summary.succeeded, 2);
        assert_eq!(report.summary.failed, 2);
        assert_eq!(report.summary.by_status.get(&JobStatus::Terminated), Some(&2));
        assert_eq!(report.summary.by_status.get(&JobStatus::Completed), Some(&1));
        assert!(report.result("d").is_some_and(|r| !r.success));
    }

    #[test]
    fn test_item_serialization_skips_empty_fields() {
        let json = serde_json::to_value(item("job_1", true, None)).unwrap();
        assert_eq!(json, serde_json::json!({"jobId": "job_1", "success": true}));
    }
}
