// Process Adapter Port
// Abstraction for starting one unit of agent work (real subprocess or simulated)

use crate::domain::JobOptions;
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Raw output of a started process, chunked as it arrives
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Resolves with the process exit code
pub type ExitFuture = BoxFuture<'static, Result<i32, ProcessError>>;

/// Process adapter errors
#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Process adapter unavailable: {0}")]
    Unavailable(String),

    #[error("Signal failed: {0}")]
    SignalFailed(String),

    #[error("Process timeout after {0}ms")]
    Timeout(u64),

    #[error("IO error: {0}")]
    Io(String),
}

/// Signals understood by every adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KillSignal {
    #[serde(rename = "SIGINT")]
    Interrupt,
    #[serde(rename = "SIGTERM")]
    Terminate,
    #[serde(rename = "SIGKILL")]
    Kill,
}

impl KillSignal {
    pub fn number(self) -> i32 {
        match self {
            KillSignal::Interrupt => 2,
            KillSignal::Terminate => 15,
            KillSignal::Kill => 9,
        }
    }

    /// Shell convention for a process ended by this signal
    pub fn exit_code(self) -> i32 {
        128 + self.number()
    }
}

/// Kill capability of a started process.
///
/// Lives in the orchestrator's process table while the job is running.
pub trait ProcessKiller: Send + Sync {
    /// Send `signal`. `Ok(false)` means the process had already exited.
    fn kill(&self, signal: KillSignal) -> Result<bool, ProcessError>;
}

/// Descriptive data about a started process
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessMetadata {
    pub adapter: &'static str,
    pub pid: Option<u32>,
    pub command: String,
    pub args: Vec<String>,
    pub started_at: i64,
}

/// Handle returned by [`ProcessAdapter::start`], identical for every variant
pub struct ProcessHandle {
    pub stdout: ByteStream,
    pub stderr: ByteStream,
    pub exited: ExitFuture,
    pub killer: Arc<dyn ProcessKiller>,
    pub metadata: ProcessMetadata,
}

/// Process Adapter trait
///
/// Implementations:
/// - CliProcessAdapter: spawns the external agent CLI
/// - SimulatedProcessAdapter: replays canned scripts
#[async_trait]
pub trait ProcessAdapter: Send + Sync {
    /// Short variant name ("cli", "simulated", ...)
    fn name(&self) -> &'static str;

    /// Start work for `prompt`
    ///
    /// # Errors
    /// - ProcessError::SpawnFailed if the process cannot be launched
    async fn start(&self, prompt: &str, options: &JobOptions)
        -> Result<ProcessHandle, ProcessError>;

    /// Cheap liveness probe
    async fn is_available(&self) -> bool;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use futures::{FutureExt, StreamExt};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::oneshot;

    /// One stdout protocol line carrying `text`
    pub fn assistant_line(text: &str) -> Vec<u8> {
        let mut line = serde_json::json!({
            "type": "assistant",
            "message": {"content": [{"type": "text", "text": text}]}
        })
        .to_string()
        .into_bytes();
        line.push(b'\n');
        line
    }

    /// Stdout line queued behind a `StreamError`; never read
    pub const LINE_AFTER_STREAM_ERROR: &str = "after stream error";

    /// Mock process behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Emit the chunks, then exit with `code`
        Exit {
            stdout: Vec<Vec<u8>>,
            stderr: Vec<Vec<u8>>,
            code: i32,
        },
        /// Emit the chunks, then stay alive until killed
        UntilKilled {
            stdout: Vec<Vec<u8>>,
            fail_kill: bool,
        },
        /// Stdout emits its chunks then fails with `error`; stderr drains
        /// normally; the process exits with `code`
        StreamError {
            stdout: Vec<Vec<u8>>,
            error: String,
            stderr: Vec<Vec<u8>>,
            code: i32,
        },
        /// `start` fails
        FailToStart(String),
        /// `start` panics (for panic isolation testing)
        Panic(String),
    }

    /// Mock Process Adapter for testing
    pub struct MockProcessAdapter {
        behavior: Mutex<MockBehavior>,
        call_count: AtomicUsize,
    }

    impl MockProcessAdapter {
        pub fn new(behavior: MockBehavior) -> Self {
            Self {
                behavior: Mutex::new(behavior),
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn new_success(lines: &[&str]) -> Self {
            Self::new(MockBehavior::Exit {
                stdout: lines.iter().map(|l| assistant_line(l)).collect(),
                stderr: vec![],
                code: 0,
            })
        }

        pub fn new_exit(code: i32, stderr: &str) -> Self {
            Self::new(MockBehavior::Exit {
                stdout: vec![],
                stderr: vec![stderr.as_bytes().to_vec()],
                code,
            })
        }

        pub fn new_until_killed() -> Self {
            Self::new(MockBehavior::UntilKilled {
                stdout: vec![assistant_line("working")],
                fail_kill: false,
            })
        }

        pub fn set_behavior(&self, behavior: MockBehavior) {
            *self.behavior.lock().unwrap() = behavior;
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    fn byte_stream(chunks: Vec<Vec<u8>>) -> ByteStream {
        futures::stream::iter(chunks.into_iter().map(|c| Ok(Bytes::from(c)))).boxed()
    }

    fn failing_stream(chunks: Vec<Vec<u8>>, error: String) -> ByteStream {
        let mut items: Vec<std::io::Result<Bytes>> =
            chunks.into_iter().map(|c| Ok(Bytes::from(c))).collect();
        items.push(Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, error)));
        items.push(Ok(Bytes::from(assistant_line(LINE_AFTER_STREAM_ERROR))));
        futures::stream::iter(items).boxed()
    }

    fn exited_killer() -> Arc<MockKiller> {
        Arc::new(MockKiller {
            exit_tx: Mutex::new(None),
            fail_kill: false,
            killed: AtomicBool::new(false),
        })
    }

    /// Killer whose process exits only when signalled
    struct MockKiller {
        exit_tx: Mutex<Option<oneshot::Sender<i32>>>,
        fail_kill: bool,
        killed: AtomicBool,
    }

    impl ProcessKiller for MockKiller {
        fn kill(&self, signal: KillSignal) -> Result<bool, ProcessError> {
            if self.fail_kill {
                return Err(ProcessError::SignalFailed("mock refuses to die".into()));
            }
            match self.exit_tx.lock().unwrap().take() {
                Some(tx) => {
                    self.killed.store(true, Ordering::SeqCst);
                    let _ = tx.send(signal.exit_code());
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }

    #[async_trait]
    impl ProcessAdapter for MockProcessAdapter {
        fn name(&self) -> &'static str {
            "mock"
        }

        async fn start(
            &self,
            prompt: &str,
            _options: &JobOptions,
        ) -> Result<ProcessHandle, ProcessError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let behavior = self.behavior.lock().unwrap().clone();
            let metadata = ProcessMetadata {
                adapter: "mock",
                pid: None,
                command: "mock".into(),
                args: vec![prompt.to_string()],
                started_at: 0,
            };

            match behavior {
                MockBehavior::Exit {
                    stdout,
                    stderr,
                    code,
                } => Ok(ProcessHandle {
                    stdout: byte_stream(stdout),
                    stderr: byte_stream(stderr),
                    exited: futures::future::ready(Ok(code)).boxed(),
                    killer: exited_killer(),
                    metadata,
                }),
                MockBehavior::StreamError {
                    stdout,
                    error,
                    stderr,
                    code,
                } => Ok(ProcessHandle {
                    stdout: failing_stream(stdout, error),
                    stderr: byte_stream(stderr),
                    exited: futures::future::ready(Ok(code)).boxed(),
                    killer: exited_killer(),
                    metadata,
                }),
                MockBehavior::UntilKilled { stdout, fail_kill } => {
                    let (tx, rx) = oneshot::channel();
                    let killer = MockKiller {
                        exit_tx: Mutex::new(Some(tx)),
                        fail_kill,
                        killed: AtomicBool::new(false),
                    };
                    Ok(ProcessHandle {
                        stdout: byte_stream(stdout),
                        stderr: byte_stream(vec![]),
                        exited: async move {
                            rx.await
                                .map_err(|_| ProcessError::Io("exit channel closed".into()))
                        }
                        .boxed(),
                        killer: Arc::new(killer),
                        metadata,
                    })
                }
                MockBehavior::FailToStart(msg) => Err(ProcessError::SpawnFailed(msg)),
                MockBehavior::Panic(msg) => panic!("{}", msg),
            }
        }

        async fn is_available(&self) -> bool {
            true
        }
    }
}
