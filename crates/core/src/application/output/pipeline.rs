// Output Pipeline - drains a process's stdout/stderr into the job store

use super::decoder::{LineFramer, Utf8StreamDecoder};
use super::protocol::extract_text;
use crate::domain::{ChunkKind, JobId, OutputChunk};
use crate::error::Result;
use crate::port::{ByteStream, JobStore, TimeProvider};
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Tracing target for the console mirror of job output
pub const CONSOLE_TARGET: &str = "agent_output";

/// Length of the job-id-derived console tag
const CONSOLE_TAG_LEN: usize = 8;

/// Short console prefix for a job (its last characters)
pub fn console_tag(job_id: &str) -> String {
    let chars: Vec<char> = job_id.chars().collect();
    let start = chars.len().saturating_sub(CONSOLE_TAG_LEN);
    chars[start..].iter().collect()
}

/// Output pipeline
///
/// Per extracted stdout line: a `stdout` chunk goes to both store paths, the text
/// is appended to the job's `progress`, and the line is mirrored to the console
/// target. Stderr is stored verbatim per decoded chunk. Writes that land after the
/// job was deleted or finished are dropped.
pub struct OutputPipeline {
    store: Arc<dyn JobStore>,
    time_provider: Arc<dyn TimeProvider>,
}

impl OutputPipeline {
    pub fn new(store: Arc<dyn JobStore>, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            store,
            time_provider,
        }
    }

    /// Drain both streams concurrently; returns once both have ended
    pub async fn run(&self, job_id: &JobId, stdout: ByteStream, stderr: ByteStream) {
        tokio::join!(
            self.drain_stdout(job_id, stdout),
            self.drain_stderr(job_id, stderr)
        );
        debug!(job_id = %job_id, "Output streams drained");
    }

    async fn drain_stdout(&self, job_id: &JobId, mut stream: ByteStream) {
        let tag = console_tag(job_id);
        let mut framer = LineFramer::new();

        while let Some(next) = stream.next().await {
            match next {
                Ok(bytes) => {
                    for line in framer.push(&bytes) {
                        self.handle_stdout_line(job_id, &tag, &line).await;
                    }
                }
                Err(e) => {
                    self.record_stream_failure(job_id, "stdout", &e).await;
                    return;
                }
            }
        }

        if let Some(line) = framer.finish() {
            self.handle_stdout_line(job_id, &tag, &line).await;
        }
    }

    async fn drain_stderr(&self, job_id: &JobId, mut stream: ByteStream) {
        let tag = console_tag(job_id);
        let mut decoder = Utf8StreamDecoder::new();

        while let Some(next) = stream.next().await {
            match next {
                Ok(bytes) => {
                    let text = decoder.decode(&bytes);
                    self.handle_stderr_text(job_id, &tag, text).await;
                }
                Err(e) => {
                    self.record_stream_failure(job_id, "stderr", &e).await;
                    return;
                }
            }
        }

        let rest = decoder.finish();
        self.handle_stderr_text(job_id, &tag, rest).await;
    }

    async fn handle_stdout_line(&self, job_id: &JobId, tag: &str, line: &str) {
        let Some(text) = extract_text(line) else {
            return;
        };

        info!(target: CONSOLE_TARGET, "[{}] {}", tag, text);

        let chunk = self.chunk(job_id, ChunkKind::Stdout, text.clone());
        if self.write(job_id, self.store.add_output_chunk(job_id, chunk).await) {
            let appended = self.append_progress(job_id, &text).await;
            self.write(job_id, appended);
        }
    }

    async fn handle_stderr_text(&self, job_id: &JobId, tag: &str, text: String) {
        if text.is_empty() {
            return;
        }

        warn!(target: CONSOLE_TARGET, "[{}] ERROR: {}", tag, text.trim_end());

        let chunk = self.chunk(job_id, ChunkKind::Stderr, text);
        let stored = self.store.add_output_chunk(job_id, chunk).await;
        self.write(job_id, stored);
    }

    /// Stream iteration failed: record it as an `error` chunk (the exit code decides the job)
    async fn record_stream_failure(&self, job_id: &JobId, stream: &str, e: &std::io::Error) {
        error!(job_id = %job_id, stream = stream, error = %e, "Output stream failed");

        let text = format!("{} stream error: {}", stream, e);
        let chunk = self.chunk(job_id, ChunkKind::Error, text);
        let stored = self.store.add_output_chunk(job_id, chunk).await;
        self.write(job_id, stored);
    }

    async fn append_progress(&self, job_id: &JobId, text: &str) -> Result<()> {
        let Some(job) = self.store.get_job(job_id).await? else {
            return Ok(());
        };
        if job.status.is_terminal() {
            return Ok(());
        }

        let mut progress = job.progress;
        progress.push_str(text);
        self.store
            .update_job(job_id, crate::domain::JobUpdate::progress(progress))
            .await?;
        Ok(())
    }

    fn chunk(&self, job_id: &JobId, kind: ChunkKind, text: String) -> OutputChunk {
        OutputChunk::new(job_id.clone(), kind, text, self.time_provider.now_millis())
    }

    /// Returns whether the write landed; stale writes are logged at debug and dropped
    fn write(&self, job_id: &JobId, result: Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) if e.is_stale_write() => {
                debug!(job_id = %job_id, reason = %e, "Dropping late output write");
                false
            }
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to store job output");
                false
            }
        }
    }
}
