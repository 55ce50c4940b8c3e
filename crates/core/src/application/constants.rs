// Orchestration constants (No magic values)
use std::time::Duration;

/// Default job slots in the registry
pub const DEFAULT_MAX_JOBS: usize = 100;

/// Default bound on `output_history` and each output stream
pub const DEFAULT_MAX_OUTPUT_CHUNKS: usize = 1000;

/// Default retention for finished jobs before a cleanup sweep removes them (1 hour)
pub const DEFAULT_RETENTION_MS: i64 = 60 * 60 * 1000;

/// Default interval between periodic cleanup sweeps (5 minutes)
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// How long a finishing job task waits for an in-flight terminate to settle
pub const TERMINATE_SETTLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Poll interval while waiting for a terminate to settle
pub const TERMINATE_SETTLE_POLL: Duration = Duration::from_millis(20);

/// Grace period before batch terminate/delete re-reads job state
pub const BATCH_VERIFY_GRACE: Duration = Duration::from_millis(500);

/// Bounded wait for background job tasks on shutdown (5 seconds)
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
