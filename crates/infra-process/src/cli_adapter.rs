// Agent CLI subprocess adapter
// Spawns the external agent executable with stdout/stderr captured as byte streams
use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};

use agent_runner_core::domain::JobOptions;
use agent_runner_core::port::{
    KillSignal, ProcessAdapter, ProcessError, ProcessHandle, ProcessKiller, ProcessMetadata,
    TimeProvider,
};

/// Output format requested when the job does not name one
const DEFAULT_OUTPUT_FORMAT: &str = "stream-json";

/// Variables a job may override unless configured otherwise
pub const DEFAULT_ENV_ALLOWLIST: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "TERM",
    "TMPDIR",
    "ANTHROPIC_API_KEY",
    "ANTHROPIC_BASE_URL",
    "ANTHROPIC_MODEL",
];

#[derive(Debug, Clone)]
pub struct CliAdapterConfig {
    /// Executable name or path
    pub cli_path: String,
    /// Working directory when the job does not set one
    pub working_dir: Option<PathBuf>,
    /// Model passed when the job does not set one
    pub default_model: Option<String>,
    /// Per-job env overrides outside this list are dropped
    pub env_allowlist: Vec<String>,
    /// Bound on the `--version` availability probe
    pub probe_timeout: Duration,
}

impl Default for CliAdapterConfig {
    fn default() -> Self {
        Self {
            cli_path: "claude".to_string(),
            working_dir: None,
            default_model: None,
            env_allowlist: DEFAULT_ENV_ALLOWLIST.iter().map(|v| v.to_string()).collect(),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

/// Real agent CLI adapter
///
/// The child inherits the daemon's environment; per-job `env` entries are
/// applied on top after allowlist filtering.
pub struct CliProcessAdapter {
    config: CliAdapterConfig,
    time_provider: Arc<dyn TimeProvider>,
}

impl CliProcessAdapter {
    /// # Example
    /// ```ignore
    /// let adapter = CliProcessAdapter::new(
    ///     CliAdapterConfig::default(),
    ///     Arc::new(SystemTimeProvider),
    /// );
    /// ```
    pub fn new(config: CliAdapterConfig, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            config,
            time_provider,
        }
    }

    /// Argument vector for one prompt
    pub fn build_args(&self, prompt: &str, options: &JobOptions) -> Vec<String> {
        let output_format = options
            .output_format
            .as_deref()
            .unwrap_or(DEFAULT_OUTPUT_FORMAT);

        let mut args = vec![
            "--dangerously-skip-permissions".to_string(),
            "-p".to_string(),
            prompt.to_string(),
            "--output-format".to_string(),
            output_format.to_string(),
        ];

        // stream-json in print mode requires --verbose
        if options
            .verbose
            .unwrap_or(output_format == DEFAULT_OUTPUT_FORMAT)
        {
            args.push("--verbose".to_string());
        }

        if let Some(model) = options.model.as_ref().or(self.config.default_model.as_ref()) {
            args.push("--model".to_string());
            args.push(model.clone());
        }

        for tool in &options.allowed_tools {
            args.push("--allowedTools".to_string());
            args.push(tool.clone());
        }
        for tool in &options.disallowed_tools {
            args.push("--disallowedTools".to_string());
            args.push(tool.clone());
        }
        for dir in &options.add_dirs {
            args.push("--add-dir".to_string());
            args.push(dir.clone());
        }

        args
    }

    /// Filter per-job environment overrides to the allowlist
    fn filter_env(&self, env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        env.iter()
            .filter(|(k, _)| {
                let allowed = self.config.env_allowlist.contains(k);
                if !allowed {
                    debug!(var = %k, "Dropping env override outside allowlist");
                }
                allowed
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn working_dir(&self, options: &JobOptions) -> Option<PathBuf> {
        options
            .working_dir
            .as_deref()
            .map(|dir| PathBuf::from(shellexpand::tilde(dir).into_owned()))
            .or_else(|| self.config.working_dir.clone())
    }
}

#[async_trait]
impl ProcessAdapter for CliProcessAdapter {
    fn name(&self) -> &'static str {
        "cli"
    }

    async fn start(
        &self,
        prompt: &str,
        options: &JobOptions,
    ) -> Result<ProcessHandle, ProcessError> {
        let args = self.build_args(prompt, options);
        let working_dir = self.working_dir(options);

        let mut command = Command::new(&self.config.cli_path);
        command
            .args(&args)
            .envs(self.filter_env(&options.env))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = &working_dir {
            command.current_dir(dir);
        }

        let mut child = command
            .spawn()
            .map_err(|e| ProcessError::SpawnFailed(format!("{}: {}", self.config.cli_path, e)))?;

        let pid = child.id();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProcessError::Io("stdout was not captured".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ProcessError::Io("stderr was not captured".to_string()))?;

        info!(
            command = %self.config.cli_path,
            pid = ?pid,
            working_dir = ?working_dir,
            "Spawned agent CLI"
        );

        let exited_flag = Arc::new(AtomicBool::new(false));
        let exited = {
            let exited_flag = Arc::clone(&exited_flag);
            async move {
                let status = child
                    .wait()
                    .await
                    .map_err(|e| ProcessError::Io(e.to_string()));
                exited_flag.store(true, Ordering::SeqCst);
                let code = exit_code(status?);
                debug!(pid = ?pid, exit_code = code, "Agent CLI exited");
                Ok::<i32, ProcessError>(code)
            }
            .boxed()
        };

        Ok(ProcessHandle {
            stdout: ReaderStream::new(stdout).boxed(),
            stderr: ReaderStream::new(stderr).boxed(),
            exited,
            killer: Arc::new(PidKiller {
                pid,
                exited: exited_flag,
            }),
            metadata: ProcessMetadata {
                adapter: "cli",
                pid,
                command: self.config.cli_path.clone(),
                args,
                started_at: self.time_provider.now_millis(),
            },
        })
    }

    async fn is_available(&self) -> bool {
        let mut probe = Command::new(&self.config.cli_path);
        probe
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match timeout(self.config.probe_timeout, probe.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                debug!(command = %self.config.cli_path, error = %e, "Agent CLI probe failed");
                false
            }
            Err(_) => {
                warn!(command = %self.config.cli_path, "Agent CLI probe timed out");
                false
            }
        }
    }
}

/// Exit code, with signal deaths mapped to `128 + signal`
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    -1
}

/// Signals the child by pid until its exit has been observed
struct PidKiller {
    pid: Option<u32>,
    exited: Arc<AtomicBool>,
}

impl ProcessKiller for PidKiller {
    fn kill(&self, signal: KillSignal) -> Result<bool, ProcessError> {
        // pid may be reused once the child has been reaped
        if self.exited.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let Some(pid) = self.pid else {
            return Ok(false);
        };

        info!(pid = pid, signal = ?signal, "Signalling agent CLI");
        send_signal(pid, signal)
    }
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: KillSignal) -> Result<bool, ProcessError> {
    use nix::errno::Errno;
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid)
        .map_err(|_| ProcessError::SignalFailed(format!("pid {} out of range", pid)))?;
    let sig = match signal {
        KillSignal::Interrupt => Signal::SIGINT,
        KillSignal::Terminate => Signal::SIGTERM,
        KillSignal::Kill => Signal::SIGKILL,
    };

    match kill(Pid::from_raw(raw), sig) {
        Ok(()) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(e) => Err(ProcessError::SignalFailed(format!(
            "{:?} to pid {} failed: {}",
            sig, pid, e
        ))),
    }
}

#[cfg(not(unix))]
fn send_signal(pid: u32, _signal: KillSignal) -> Result<bool, ProcessError> {
    // taskkill has no graceful variant for console processes
    let output = std::process::Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .output()
        .map_err(|e| ProcessError::SignalFailed(e.to_string()))?;

    if !output.status.success() {
        return Err(ProcessError::SignalFailed(format!(
            "taskkill failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(true)
}
