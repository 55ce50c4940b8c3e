// Domain Layer - Pure business logic and entities

pub mod chunk;
pub mod error;
pub mod job;

// Re-exports
pub use chunk::{ChunkKind, OutputChunk, OutputStream};
pub use error::DomainError;
pub use job::{label_color, Job, JobFilter, JobId, JobOptions, JobStatus, JobUpdate};
