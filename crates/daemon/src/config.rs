//! Daemon configuration (flags with `AGENT_RUNNER_*` environment fallbacks)

use agent_runner_api_rpc::{RpcLimits, RpcServerConfig};
use agent_runner_core::application::OrchestratorConfig;
use agent_runner_infra_memory::StoreLimits;
use agent_runner_infra_process::{CliAdapterConfig, DEFAULT_ENV_ALLOWLIST};
use anyhow::{bail, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProcessMode {
    /// Spawn the real agent CLI
    Cli,
    /// Replay canned scripts
    Simulated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Parser)]
#[command(name = "agent-runner")]
#[command(about = "Agent Runner daemon: runs agent CLI jobs behind a JSON-RPC API", long_about = None)]
#[command(version)]
pub struct DaemonConfig {
    /// Host the RPC server binds to
    #[arg(long, env = "AGENT_RUNNER_RPC_HOST", default_value = "127.0.0.1")]
    pub rpc_host: String,

    /// RPC server port
    #[arg(long, env = "AGENT_RUNNER_RPC_PORT", default_value_t = 9527)]
    pub rpc_port: u16,

    /// Job registry backend (only "memory" is implemented)
    #[arg(long, env = "AGENT_RUNNER_STORAGE_BACKEND", default_value = "memory")]
    pub storage_backend: String,

    /// Maximum jobs held by the registry
    #[arg(long, env = "AGENT_RUNNER_MAX_JOBS", default_value_t = 100)]
    pub max_jobs: usize,

    /// Maximum output chunks kept per job
    #[arg(long, env = "AGENT_RUNNER_MAX_OUTPUT_CHUNKS", default_value_t = 1000)]
    pub max_output_chunks: usize,

    #[arg(long, env = "AGENT_RUNNER_PROCESS_MODE", value_enum, default_value_t = ProcessMode::Simulated)]
    pub process_mode: ProcessMode,

    /// Agent CLI executable
    #[arg(long, env = "AGENT_RUNNER_CLI_PATH", default_value = "claude")]
    pub cli_path: String,

    /// Default working directory for agent runs (`~` is expanded)
    #[arg(long, env = "AGENT_RUNNER_WORKDIR")]
    pub workdir: Option<String>,

    /// Model used when a job does not name one
    #[arg(long, env = "AGENT_RUNNER_DEFAULT_MODEL")]
    pub default_model: Option<String>,

    /// Comma-separated env variables a job may override
    #[arg(long, env = "AGENT_RUNNER_ENV_ALLOWLIST", value_delimiter = ',')]
    pub env_allowlist: Option<Vec<String>>,

    /// Delay between simulated output chunks
    #[arg(long, env = "AGENT_RUNNER_SIMULATED_CHUNK_DELAY_MS", default_value_t = 100)]
    pub simulated_chunk_delay_ms: u64,

    /// Kill and fail jobs running longer than this (unset: no limit)
    #[arg(long, env = "AGENT_RUNNER_JOB_TIMEOUT_MS")]
    pub job_timeout_ms: Option<u64>,

    #[arg(long, env = "AGENT_RUNNER_CLEANUP_INTERVAL_SECS", default_value_t = 300)]
    pub cleanup_interval_secs: u64,

    /// Age after which finished jobs are swept
    #[arg(long, env = "AGENT_RUNNER_RETENTION_MS", default_value_t = 3_600_000)]
    pub retention_ms: i64,

    #[arg(long, env = "AGENT_RUNNER_MAX_BATCH_SIZE", default_value_t = 10)]
    pub max_batch_size: usize,

    #[arg(long, env = "AGENT_RUNNER_MAX_PROMPT_LENGTH", default_value_t = 100_000)]
    pub max_prompt_length: usize,

    #[arg(long, env = "AGENT_RUNNER_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,

    /// Also write daily rolling log files here
    #[arg(long, env = "AGENT_RUNNER_LOG_DIR")]
    pub log_dir: Option<String>,
}

impl DaemonConfig {
    /// Reject combinations the daemon cannot serve
    pub fn validate(&self) -> Result<()> {
        if self.storage_backend != "memory" {
            bail!(
                "Unsupported storage backend '{}': only 'memory' is available",
                self.storage_backend
            );
        }
        if self.max_jobs == 0 {
            bail!("max-jobs must be at least 1");
        }
        if self.max_output_chunks == 0 {
            bail!("max-output-chunks must be at least 1");
        }
        if self.max_batch_size == 0 {
            bail!("max-batch-size must be at least 1");
        }
        if self.retention_ms < 0 {
            bail!("retention-ms must not be negative");
        }
        if self.cleanup_interval_secs == 0 {
            bail!("cleanup-interval-secs must be at least 1");
        }
        Ok(())
    }

    pub fn store_limits(&self) -> StoreLimits {
        StoreLimits {
            max_jobs: self.max_jobs,
            max_output_chunks: self.max_output_chunks,
        }
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            job_timeout: self.job_timeout_ms.map(Duration::from_millis),
            ..Default::default()
        }
    }

    pub fn cli_adapter_config(&self) -> CliAdapterConfig {
        let env_allowlist = self.env_allowlist.clone().unwrap_or_else(|| {
            DEFAULT_ENV_ALLOWLIST
                .iter()
                .map(|v| v.to_string())
                .collect()
        });

        CliAdapterConfig {
            cli_path: self.cli_path.clone(),
            working_dir: self.workdir_path(),
            default_model: self.default_model.clone(),
            env_allowlist,
            ..Default::default()
        }
    }

    pub fn rpc_config(&self) -> RpcServerConfig {
        RpcServerConfig {
            host: self.rpc_host.clone(),
            port: self.rpc_port,
            limits: RpcLimits {
                max_prompt_length: self.max_prompt_length,
                max_batch_size: self.max_batch_size,
                retention_ms: self.retention_ms,
            },
        }
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.simulated_chunk_delay_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn workdir_path(&self) -> Option<PathBuf> {
        self.workdir
            .as_deref()
            .map(|dir| PathBuf::from(shellexpand::tilde(dir).into_owned()))
    }

    pub fn log_dir_path(&self) -> Option<PathBuf> {
        self.log_dir
            .as_deref()
            .map(|dir| PathBuf::from(shellexpand::tilde(dir).into_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> DaemonConfig {
        let mut argv = vec!["agent-runner"];
        argv.extend_from_slice(args);
        DaemonConfig::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = parse(&[]);
        assert_eq!(config.rpc_port, 9527);
        assert_eq!(config.max_jobs, 100);
        assert_eq!(config.process_mode, ProcessMode::Simulated);
        assert!(config.validate().is_ok());
        assert!(config.orchestrator_config().job_timeout.is_none());
    }

    #[test]
    fn test_unknown_storage_backend_rejected() {
        let config = parse(&["--storage-backend", "redis"]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_allowlist_and_timeout() {
        let config = parse(&[
            "--env-allowlist",
            "PATH,HOME",
            "--job-timeout-ms",
            "1500",
            "--process-mode",
            "cli",
        ]);
        assert_eq!(config.cli_adapter_config().env_allowlist, vec!["PATH", "HOME"]);
        assert_eq!(
            config.orchestrator_config().job_timeout,
            Some(Duration::from_millis(1500))
        );
        assert_eq!(config.process_mode, ProcessMode::Cli);
    }
}
