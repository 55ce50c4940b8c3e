// Output Chunk & Stream Domain Model

use super::job::JobId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Origin of a captured output fragment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    Stdout,
    Stderr,
    Error,
    System,
}

/// One typed, timestamped fragment of captured output.
///
/// Wire shape: `{"text": .., "type": .., "timestamp": <ms>, "jobId": ..}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputChunk {
    pub text: String,
    #[serde(rename = "type")]
    pub kind: ChunkKind,
    pub timestamp: i64,
    #[serde(rename = "jobId")]
    pub job_id: JobId,
}

impl OutputChunk {
    pub fn new(
        job_id: impl Into<String>,
        kind: ChunkKind,
        text: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            text: text.into(),
            kind,
            timestamp,
            job_id: job_id.into(),
        }
    }
}

/// Per-job output stream, independent of the job's own `output_history`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputStream {
    pub job_id: JobId,
    pub chunks: VecDeque<OutputChunk>,
    pub last_update: i64,
}

impl OutputStream {
    pub fn new(job_id: impl Into<String>, now_millis: i64) -> Self {
        Self {
            job_id: job_id.into(),
            chunks: VecDeque::new(),
            last_update: now_millis,
        }
    }

    pub fn push(&mut self, chunk: OutputChunk, max_chunks: usize, now_millis: i64) {
        push_bounded(&mut self.chunks, chunk, max_chunks);
        self.last_update = now_millis;
    }

    /// Chunks strictly newer than `since`; `since == 0` returns everything
    pub fn since(&self, since: i64) -> Vec<OutputChunk> {
        if since == 0 {
            return self.chunks.iter().cloned().collect();
        }
        self.chunks
            .iter()
            .filter(|chunk| chunk.timestamp > since)
            .cloned()
            .collect()
    }
}

/// Push onto a FIFO-bounded buffer, evicting the oldest entries past `max`
pub(crate) fn push_bounded(buf: &mut VecDeque<OutputChunk>, chunk: OutputChunk, max: usize) {
    buf.push_back(chunk);
    while buf.len() > max {
        buf.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_wire_shape() {
        let chunk = OutputChunk::new("job_1_abc", ChunkKind::Stderr, "boom", 42);
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"text": "boom", "type": "stderr", "timestamp": 42, "jobId": "job_1_abc"})
        );
        assert_eq!(
            serde_json::to_string(&chunk).unwrap(),
            r#"{"text":"boom","type":"stderr","timestamp":42,"jobId":"job_1_abc"}"#
        );
    }

    #[test]
    fn test_stream_since_is_strict() {
        let mut stream = OutputStream::new("j", 0);
        for ts in [10, 20, 30] {
            stream.push(OutputChunk::new("j", ChunkKind::Stdout, ts.to_string(), ts), 10, ts);
        }
        assert_eq!(stream.since(0).len(), 3);
        let newer: Vec<_> = stream.since(20).into_iter().map(|c| c.timestamp).collect();
        assert_eq!(newer, vec![30]);
        assert_eq!(stream.last_update, 30);
    }

    #[test]
    fn test_stream_keeps_most_recent_in_order() {
        let mut stream = OutputStream::new("j", 0);
        for ts in 1..=6 {
            stream.push(OutputChunk::new("j", ChunkKind::Stdout, "x", ts), 4, ts);
        }
        let kept: Vec<_> = stream.chunks.iter().map(|c| c.timestamp).collect();
        assert_eq!(kept, vec![3, 4, 5, 6]);
    }
}
