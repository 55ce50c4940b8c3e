//! Agent Runner - Main Entry Point
//! Composition root: config, logging, wiring, periodic cleanup, graceful shutdown

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use agent_runner_api_rpc::RpcServer;
use agent_runner_core::application::constants::SHUTDOWN_GRACE;
use agent_runner_core::application::{CleanupScheduler, JobOrchestrator};
use agent_runner_core::port::{JobIdProvider, ProcessAdapter, SystemTimeProvider, TimeProvider};
use agent_runner_infra_memory::InMemoryJobStore;
use agent_runner_infra_process::{CliProcessAdapter, SimulatedProcessAdapter};
use config::{DaemonConfig, LogFormat, ProcessMode};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_LOG_FILTER: &str = "agent_runner=info,agent_output=info";
const LOG_FILE_PREFIX: &str = "agent-runner.log";

type BoxedLayer = Box<dyn Layer<tracing_subscriber::Registry> + Send + Sync>;

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must outlive the daemon.
fn init_logging(config: &DaemonConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))
        .context("Failed to create env filter")?;

    let mut layers: Vec<BoxedLayer> = Vec::new();
    layers.push(match config.log_format {
        // Production: JSON structured logging
        LogFormat::Json => fmt::layer().json().boxed(),
        // Development: Pretty formatting with colors
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
    });

    let guard = match config.log_dir_path() {
        Some(dir) => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(
                fmt::layer()
                    .json()
                    .with_ansi(false)
                    .with_writer(writer)
                    .boxed(),
            );
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(env_filter)
        .init();

    Ok(guard)
}

fn build_adapter(
    config: &DaemonConfig,
    time_provider: Arc<dyn TimeProvider>,
) -> Arc<dyn ProcessAdapter> {
    match config.process_mode {
        ProcessMode::Cli => Arc::new(CliProcessAdapter::new(
            config.cli_adapter_config(),
            time_provider,
        )),
        ProcessMode::Simulated => Arc::new(SimulatedProcessAdapter::new(
            config.chunk_delay(),
            time_provider,
        )),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration + logging
    let config = DaemonConfig::parse();
    let _log_guard = init_logging(&config)?;

    info!("Agent Runner v{} starting...", VERSION);
    config.validate()?;

    // 2. Setup dependencies (DI wiring)
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let id_provider = Arc::new(JobIdProvider::new(time_provider.clone()));
    let store = Arc::new(InMemoryJobStore::new(
        config.store_limits(),
        time_provider.clone(),
    ));
    let adapter = build_adapter(&config, time_provider.clone());

    info!(
        storage = %config.storage_backend,
        max_jobs = config.max_jobs,
        max_output_chunks = config.max_output_chunks,
        adapter = adapter.name(),
        job_timeout_ms = ?config.job_timeout_ms,
        "Configuration loaded"
    );

    // 3. Availability probe (jobs still run; they fail at spawn if the CLI is missing)
    if adapter.is_available().await {
        info!(adapter = adapter.name(), "Process adapter available");
    } else {
        warn!(
            adapter = adapter.name(),
            cli_path = %config.cli_path,
            "Process adapter is not available; jobs will fail to start"
        );
    }

    let orchestrator = JobOrchestrator::new(
        store,
        adapter,
        id_provider,
        time_provider,
        config.orchestrator_config(),
    );

    // 4. Periodic cleanup
    let cancel = CancellationToken::new();
    let cleanup = CleanupScheduler::new(
        orchestrator.clone(),
        config.retention_ms,
        config.cleanup_interval(),
    );
    let cleanup_handle = tokio::spawn(cleanup.run(cancel.clone()));

    // 5. JSON-RPC server
    let (addr, rpc_handle) = RpcServer::new(config.rpc_config(), orchestrator.clone())
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("RPC server start failed: {}", e))?;

    info!(addr = %addr, "System ready. Waiting for jobs...");
    info!("Press Ctrl+C to shutdown");

    // 6. Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutdown signal received. Exiting gracefully...");

    // 7. Graceful shutdown: stop intake, stop sweeps, then drain jobs
    if let Err(e) = rpc_handle.stop() {
        warn!(error = ?e, "RPC server was already stopped");
    }
    rpc_handle.stopped().await;
    cancel.cancel();

    match orchestrator.shutdown(SHUTDOWN_GRACE).await {
        Ok(0) => info!("All job tasks finished"),
        Ok(stragglers) => warn!(stragglers = stragglers, "Job tasks still running at exit"),
        Err(e) => error!(error = %e, "Orchestrator shutdown failed"),
    }
    let _ = tokio::time::timeout(Duration::from_secs(1), cleanup_handle).await;

    info!("Shutdown complete.");

    Ok(())
}
