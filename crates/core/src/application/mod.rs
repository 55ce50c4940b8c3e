// Application Layer - Use Cases and Job Orchestration

pub mod batch;
pub mod cleanup;
pub mod constants;
pub mod orchestrator;
pub mod output;

// Re-exports
pub use batch::{
    BatchCoordinator, BatchCreated, BatchItemResult, BatchReport, BatchSummary, DeleteOptions,
    TerminateOptions,
};
pub use cleanup::CleanupScheduler;
pub use orchestrator::{JobOrchestrator, JobStreamView, OrchestratorConfig, OrchestratorStats};
pub use output::OutputPipeline;
