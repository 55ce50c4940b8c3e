// Agent Runner Infrastructure - In-Memory Adapter
// Implements: JobStore

mod job_store;

pub use job_store::{InMemoryJobStore, StoreLimits};
