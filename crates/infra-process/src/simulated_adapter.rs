// Simulated process adapter
// Replays canned agent scripts selected by prompt keywords
use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::{FutureExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use agent_runner_core::domain::JobOptions;
use agent_runner_core::port::{
    KillSignal, ProcessAdapter, ProcessError, ProcessHandle, ProcessKiller, ProcessMetadata,
    TimeProvider,
};

/// Stderr text emitted by the error script
pub const SIMULATED_ERROR_MESSAGE: &str = "Error: simulated agent failure while processing prompt";

/// Steps replayed by the multi-step script
const LONG_SCRIPT_STEPS: usize = 5;

/// Longest prompt excerpt echoed back by the default script
const ECHO_PREVIEW_CHARS: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScriptKind {
    Error,
    MultiStep,
    Success,
}

impl ScriptKind {
    fn for_prompt(prompt: &str) -> Self {
        let prompt = prompt.to_lowercase();
        if prompt.contains("error") || prompt.contains("fail") {
            ScriptKind::Error
        } else if prompt.contains("long") || prompt.contains("complex") {
            ScriptKind::MultiStep
        } else {
            ScriptKind::Success
        }
    }

    fn name(self) -> &'static str {
        match self {
            ScriptKind::Error => "error",
            ScriptKind::MultiStep => "multi-step",
            ScriptKind::Success => "success",
        }
    }
}

/// One canned run
#[derive(Debug, Clone)]
struct Script {
    stdout: Vec<Bytes>,
    stderr: Vec<Bytes>,
    exit_code: i32,
}

impl Script {
    fn build(kind: ScriptKind, prompt: &str) -> Self {
        match kind {
            ScriptKind::Error => Script {
                stdout: vec![assistant_line("Analyzing the request...")],
                stderr: vec![Bytes::from(format!("{}\n", SIMULATED_ERROR_MESSAGE))],
                exit_code: 1,
            },
            ScriptKind::MultiStep => {
                let mut stdout: Vec<Bytes> = (1..=LONG_SCRIPT_STEPS)
                    .map(|step| {
                        assistant_line(&format!(
                            "Step {}/{}: working through the task",
                            step, LONG_SCRIPT_STEPS
                        ))
                    })
                    .collect();
                stdout.push(assistant_line("All steps completed successfully."));
                Script {
                    stdout,
                    stderr: vec![],
                    exit_code: 0,
                }
            }
            ScriptKind::Success => {
                let preview: String = prompt.chars().take(ECHO_PREVIEW_CHARS).collect();
                Script {
                    stdout: vec![
                        Bytes::from_static(b"{\"type\":\"system\",\"subtype\":\"init\"}\n"),
                        assistant_line(&format!("Received prompt: {}", preview)),
                        assistant_line("Task completed successfully."),
                    ],
                    stderr: vec![],
                    exit_code: 0,
                }
            }
        }
    }

    fn chunk_count(&self) -> usize {
        self.stdout.len() + self.stderr.len()
    }
}

fn assistant_line(text: &str) -> Bytes {
    let mut line = serde_json::json!({
        "type": "assistant",
        "message": {"content": [{"type": "text", "text": text}]}
    })
    .to_string();
    line.push('\n');
    Bytes::from(line)
}

/// Deterministic stand-in for the agent CLI
///
/// Every chunk is delayed by `chunk_delay`; the exit code resolves one more delay
/// after the last chunk.
pub struct SimulatedProcessAdapter {
    chunk_delay: Duration,
    time_provider: Arc<dyn TimeProvider>,
}

impl SimulatedProcessAdapter {
    pub fn new(chunk_delay: Duration, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            chunk_delay,
            time_provider,
        }
    }
}

#[async_trait]
impl ProcessAdapter for SimulatedProcessAdapter {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn start(
        &self,
        prompt: &str,
        options: &JobOptions,
    ) -> Result<ProcessHandle, ProcessError> {
        let kind = ScriptKind::for_prompt(prompt);
        let script = Script::build(kind, prompt);
        debug!(
            script = kind.name(),
            chunks = script.chunk_count(),
            exit_code = script.exit_code,
            "Starting simulated run"
        );

        let (stdout_tx, stdout_rx) = mpsc::unbounded::<std::io::Result<Bytes>>();
        let (stderr_tx, stderr_rx) = mpsc::unbounded::<std::io::Result<Bytes>>();
        let (exit_tx, exit_rx) = oneshot::channel();

        let cancel = CancellationToken::new();
        let killed_code = Arc::new(AtomicI32::new(0));
        let finished = Arc::new(AtomicBool::new(false));

        {
            let cancel = cancel.clone();
            let killed_code = Arc::clone(&killed_code);
            let finished = Arc::clone(&finished);
            let delay = self.chunk_delay;
            tokio::spawn(async move {
                let code = tokio::select! {
                    _ = cancel.cancelled() => killed_code.load(Ordering::SeqCst),
                    code = replay(script, delay, stdout_tx, stderr_tx) => code,
                };
                finished.store(true, Ordering::SeqCst);
                let _ = exit_tx.send(code);
            });
        }

        let mut args = vec![prompt.to_string()];
        if let Some(model) = &options.model {
            args.push(model.clone());
        }

        Ok(ProcessHandle {
            stdout: stdout_rx.boxed(),
            stderr: stderr_rx.boxed(),
            exited: async move {
                exit_rx
                    .await
                    .map_err(|_| ProcessError::Io("simulated run dropped".to_string()))
            }
            .boxed(),
            killer: Arc::new(SimulatedKiller {
                cancel,
                killed_code,
                finished,
            }),
            metadata: ProcessMetadata {
                adapter: "simulated",
                pid: None,
                command: format!("simulated:{}", kind.name()),
                args,
                started_at: self.time_provider.now_millis(),
            },
        })
    }

    async fn is_available(&self) -> bool {
        true
    }
}

/// Emits the script and returns its exit code; dropping the senders ends both streams
async fn replay(
    script: Script,
    delay: Duration,
    stdout: mpsc::UnboundedSender<std::io::Result<Bytes>>,
    stderr: mpsc::UnboundedSender<std::io::Result<Bytes>>,
) -> i32 {
    for chunk in script.stdout {
        tokio::time::sleep(delay).await;
        let _ = stdout.unbounded_send(Ok(chunk));
    }
    drop(stdout);

    for chunk in script.stderr {
        tokio::time::sleep(delay).await;
        let _ = stderr.unbounded_send(Ok(chunk));
    }
    drop(stderr);

    tokio::time::sleep(delay).await;
    script.exit_code
}

struct SimulatedKiller {
    cancel: CancellationToken,
    killed_code: Arc<AtomicI32>,
    finished: Arc<AtomicBool>,
}

impl ProcessKiller for SimulatedKiller {
    fn kill(&self, signal: KillSignal) -> Result<bool, ProcessError> {
        if self.finished.load(Ordering::SeqCst) || self.cancel.is_cancelled() {
            return Ok(false);
        }
        self.killed_code.store(signal.exit_code(), Ordering::SeqCst);
        self.cancel.cancel();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_runner_core::port::SystemTimeProvider;
    use agent_runner_core::port::ByteStream;

    fn adapter(delay_ms: u64) -> SimulatedProcessAdapter {
        SimulatedProcessAdapter::new(
            Duration::from_millis(delay_ms),
            Arc::new(SystemTimeProvider),
        )
    }

    async fn collect(stream: ByteStream) -> String {
        let bytes: Vec<u8> = stream.map(|chunk| chunk.unwrap().to_vec()).concat().await;
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_script_selection() {
        assert_eq!(ScriptKind::for_prompt("please FAIL now"), ScriptKind::Error);
        assert_eq!(ScriptKind::for_prompt("an error case"), ScriptKind::Error);
        assert_eq!(ScriptKind::for_prompt("a long task"), ScriptKind::MultiStep);
        assert_eq!(ScriptKind::for_prompt("Complex refactor"), ScriptKind::MultiStep);
        assert_eq!(ScriptKind::for_prompt("hello"), ScriptKind::Success);
    }

    #[tokio::test]
    async fn test_error_script() {
        let handle = adapter(0).start("trigger an error", &JobOptions::default()).await.unwrap();

        let (stdout, stderr) = tokio::join!(collect(handle.stdout), collect(handle.stderr));
        assert!(stdout.contains("Analyzing"));
        assert_eq!(stderr.trim_end(), SIMULATED_ERROR_MESSAGE);
        assert_eq!(handle.exited.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_multi_step_script_order() {
        let handle = adapter(0).start("long job", &JobOptions::default()).await.unwrap();

        let stdout = collect(handle.stdout).await;
        let positions: Vec<usize> = (1..=LONG_SCRIPT_STEPS)
            .map(|step| stdout.find(&format!("Step {}/", step)).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert!(stdout.rfind("All steps completed").unwrap() > positions[LONG_SCRIPT_STEPS - 1]);
        assert_eq!(handle.exited.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_kill_ends_run_with_signal_code() {
        let handle = adapter(10_000).start("hello", &JobOptions::default()).await.unwrap();

        assert!(handle.killer.kill(KillSignal::Terminate).unwrap());
        assert!(!handle.killer.kill(KillSignal::Kill).unwrap());

        assert_eq!(collect(handle.stdout).await, "");
        assert_eq!(handle.exited.await.unwrap(), 143);
    }

    #[tokio::test]
    async fn test_kill_after_exit_reports_not_delivered() {
        let handle = adapter(0).start("hello", &JobOptions::default()).await.unwrap();
        let _ = collect(handle.stdout).await;
        assert_eq!(handle.exited.await.unwrap(), 0);

        assert!(!handle.killer.kill(KillSignal::Terminate).unwrap());
        assert_eq!(handle.metadata.adapter, "simulated");
    }
}
