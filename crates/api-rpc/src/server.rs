//! JSON-RPC Server
//!
//! Serves the job API over HTTP on localhost.

use crate::handler::{RpcHandler, RpcLimits};
use crate::types::{
    BatchCreateRequest, BatchDeleteRequest, BatchIdsRequest, BatchTerminateRequest,
    CleanupRequest, CreateJobRequest, HealthRequest, JobIdRequest, JobStreamRequest,
    ListJobsRequest, StatsRequest,
};
use agent_runner_core::application::JobOrchestrator;
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

const DEFAULT_RPC_HOST: &str = "127.0.0.1";
const DEFAULT_RPC_PORT: u16 = 9527;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    /// 0 picks a free port (see the address returned by `start`)
    pub port: u16,
    pub limits: RpcLimits,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
            limits: RpcLimits::default(),
        }
    }
}

/// Registers one method: parse params, call the handler.
/// `optional` methods also accept a call without params.
macro_rules! register {
    ($module:expr, $handler:expr, $name:literal, optional $req:ty, $method:ident) => {{
        let handler = Arc::clone($handler);
        $module
            .register_async_method($name, move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: Option<$req> = params.parse()?;
                    handler.$method(req.unwrap_or_default()).await
                }
            })
            .map_err(|e| e.to_string())?;
    }};
    ($module:expr, $handler:expr, $name:literal, $req:ty, $method:ident) => {{
        let handler = Arc::clone($handler);
        $module
            .register_async_method($name, move |params, _, _| {
                let handler = handler.clone();
                async move {
                    let req: $req = params.parse()?;
                    handler.$method(req).await
                }
            })
            .map_err(|e| e.to_string())?;
    }};
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(config: RpcServerConfig, orchestrator: JobOrchestrator) -> Self {
        Self {
            handler: Arc::new(RpcHandler::new(orchestrator, config.limits)),
            config,
        }
    }

    /// All method names served, in registration order
    pub const METHODS: &'static [&'static str] = &[
        "jobs.create.v1",
        "jobs.get.v1",
        "jobs.list.v1",
        "jobs.terminate.v1",
        "jobs.delete.v1",
        "jobs.output.v1",
        "jobs.stream.v1",
        "batch.create.v1",
        "batch.status.v1",
        "batch.terminate.v1",
        "batch.delete.v1",
        "admin.stats.v1",
        "admin.cleanup.v1",
        "admin.health.v1",
    ];

    /// Start the JSON-RPC server
    ///
    /// # Returns
    /// Bound address and the handle used to stop the server
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!(
            host = %self.config.host,
            port = %self.config.port,
            "Starting JSON-RPC server"
        );

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let module = self.build_module()?;
        info!(addr = %local_addr, methods = Self::METHODS.len(), "JSON-RPC server started");

        let handle = server.start(module);
        Ok((local_addr, handle))
    }

    fn build_module(&self) -> Result<RpcModule<()>, String> {
        let mut module = RpcModule::new(());
        let handler = &self.handler;

        // Jobs
        register!(module, handler, "jobs.create.v1", CreateJobRequest, create_job);
        register!(module, handler, "jobs.get.v1", JobIdRequest, get_job);
        register!(module, handler, "jobs.list.v1", optional ListJobsRequest, list_jobs);
        register!(module, handler, "jobs.terminate.v1", JobIdRequest, terminate_job);
        register!(module, handler, "jobs.delete.v1", JobIdRequest, delete_job);
        register!(module, handler, "jobs.output.v1", JobIdRequest, job_output);
        register!(module, handler, "jobs.stream.v1", JobStreamRequest, job_stream);

        // Batches
        register!(module, handler, "batch.create.v1", BatchCreateRequest, batch_create);
        register!(module, handler, "batch.status.v1", BatchIdsRequest, batch_status);
        register!(module, handler, "batch.terminate.v1", BatchTerminateRequest, batch_terminate);
        register!(module, handler, "batch.delete.v1", BatchDeleteRequest, batch_delete);

        // Admin
        register!(module, handler, "admin.stats.v1", optional StatsRequest, stats);
        register!(module, handler, "admin.cleanup.v1", optional CleanupRequest, cleanup);
        register!(module, handler, "admin.health.v1", optional HealthRequest, health);

        Ok(module)
    }
}
