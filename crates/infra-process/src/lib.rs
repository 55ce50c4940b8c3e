// Agent Runner Infrastructure - Process Adapters
// Implements: ProcessAdapter (real CLI subprocess, simulated scripts)

pub mod cli_adapter;
pub mod simulated_adapter;

pub use cli_adapter::{CliAdapterConfig, CliProcessAdapter, DEFAULT_ENV_ALLOWLIST};
pub use simulated_adapter::{SimulatedProcessAdapter, SIMULATED_ERROR_MESSAGE};
