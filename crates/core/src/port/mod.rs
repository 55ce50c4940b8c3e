// Port Layer - Interfaces for external dependencies

pub mod id_provider; // For deterministic testing
pub mod job_store;
pub mod process;
pub mod time_provider;

// Re-exports
pub use id_provider::{IdProvider, JobIdProvider};
pub use job_store::{JobStore, StoreStats};
pub use process::{
    ByteStream, ExitFuture, KillSignal, ProcessAdapter, ProcessError, ProcessHandle,
    ProcessKiller, ProcessMetadata,
};
pub use time_provider::{SystemTimeProvider, TimeProvider};
