// Job Domain Model

use super::chunk::{push_bounded, OutputChunk};
use super::error::{DomainError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

/// Job ID (`job_<unix-ms>_<suffix>` when generated, opaque when caller-supplied)
pub type JobId = String;

/// Job lifecycle status
///
/// `pending` and `terminating` are transient; `completed`, `failed` and
/// `terminated` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Terminating,
    Completed,
    Failed,
    Terminated,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Terminating,
        JobStatus::Completed,
        JobStatus::Failed,
        JobStatus::Terminated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Terminating => "terminating",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Terminated => "terminated",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Terminated
        )
    }

    /// Running or in the middle of being terminated (a process may be attached)
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Running | JobStatus::Terminating)
    }

    /// Candidates for capacity eviction. Terminated jobs are only removed by cleanup.
    pub fn is_evictable(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Allowed edges of the lifecycle state machine.
    ///
    /// `terminating -> running` is the revert taken when signalling the process fails.
    /// `pending -> failed` is only taken when the job task dies before it claims the
    /// job for its process (task panic, cancellation or a store error on the claim);
    /// a spawn failure happens after the claim and fails the job from `running`.
    /// Writing the current status again is always accepted.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        if self == next {
            return true;
        }
        match self {
            Pending => matches!(next, Running | Failed),
            Running => matches!(next, Terminating | Completed | Failed),
            Terminating => matches!(next, Terminated | Running | Failed),
            Completed | Failed | Terminated => false,
        }
    }

    pub fn ensure_transition(self, next: JobStatus) -> Result<()> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(DomainError::InvalidStateTransition {
                from: self.to_string(),
                to: next.to_string(),
            })
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::UnknownStatus(s.to_string()))
    }
}

/// Options forwarded to the process adapter.
///
/// Known keys are typed; anything else rides along in `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disallowed_tools: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add_dirs: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_format: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verbose: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Job Entity
///
/// `output_history` duplicates the job's output stream on purpose: job-oriented
/// and stream-oriented readers see the same chunks through two access paths.
/// The live process handle is NOT part of this record (see the orchestrator's
/// process table).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: JobId,
    pub prompt: String,
    pub options: JobOptions,
    pub status: JobStatus,

    /// All extracted stdout text, concatenated
    pub progress: String,
    pub complete_message: Option<String>,

    pub started_at: i64, // epoch ms
    pub finished_at: Option<i64>,

    pub color: String,
    pub output_history: VecDeque<OutputChunk>,
}

impl Job {
    /// Create a new pending job
    ///
    /// # Arguments
    ///
    /// * `id` - Unique job ID (injected, not generated)
    /// * `prompt` - Prompt text handed to the agent
    /// * `options` - Adapter options
    /// * `started_at` - Creation timestamp in epoch ms (injected, not system time)
    pub fn new(
        id: impl Into<String>,
        prompt: impl Into<String>,
        options: JobOptions,
        started_at: i64,
    ) -> Self {
        let id = id.into();
        let color = label_color(&id);
        Self {
            id,
            prompt: prompt.into(),
            options,
            status: JobStatus::Pending,
            progress: String::new(),
            complete_message: None,
            started_at,
            finished_at: None,
            color,
            output_history: VecDeque::new(),
        }
    }

    /// Timestamp used for retention decisions: `finished_at` if set, else `started_at`
    pub fn effective_timestamp(&self) -> i64 {
        self.finished_at.unwrap_or(self.started_at)
    }

    /// Append a chunk to the bounded history (oldest dropped first)
    pub fn push_output(&mut self, chunk: OutputChunk, max_chunks: usize) {
        push_bounded(&mut self.output_history, chunk, max_chunks);
    }

    /// Shallow-merge a partial update, validating any status change
    pub fn apply(&mut self, update: JobUpdate) -> Result<()> {
        if let Some(next) = update.status {
            self.status.ensure_transition(next)?;
            self.status = next;
        }
        if let Some(progress) = update.progress {
            self.progress = progress;
        }
        if let Some(message) = update.complete_message {
            self.complete_message = Some(message);
        }
        if let Some(finished_at) = update.finished_at {
            self.finished_at = Some(finished_at);
        }
        Ok(())
    }
}

/// Partial job update (only `Some` fields are written)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobUpdate {
    pub status: Option<JobStatus>,
    pub progress: Option<String>,
    pub complete_message: Option<String>,
    pub finished_at: Option<i64>,
}

impl JobUpdate {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: impl Into<String>) -> Self {
        Self {
            progress: Some(progress.into()),
            ..Default::default()
        }
    }
}

/// List filter; every supplied field must match (bounds are inclusive on `started_at`)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFilter {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default)]
    pub since: Option<i64>,
    #[serde(default)]
    pub before: Option<i64>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        self.status.map_or(true, |s| job.status == s)
            && self.since.map_or(true, |since| job.started_at >= since)
            && self.before.map_or(true, |before| job.started_at <= before)
    }
}

/// Stable `hsl(..)` label for UI grouping, derived from the job id
pub fn label_color(id: &str) -> String {
    // FNV-1a
    let hash = id.bytes().fold(0x811c_9dc5_u32, |acc, b| {
        (acc ^ u32::from(b)).wrapping_mul(0x0100_0193)
    });
    format!("hsl({}, 70%, 50%)", hash % 360)
}
