// Process side-table: live kill handles keyed by job id
//
// Kept out of the Job record so the stored job stays a plain value.

use crate::domain::JobId;
use crate::port::ProcessKiller;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Clone, Default)]
pub struct ProcessTable {
    entries: Arc<Mutex<HashMap<JobId, Arc<dyn ProcessKiller>>>>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job_id: &str, killer: Arc<dyn ProcessKiller>) {
        self.lock().insert(job_id.to_string(), killer);
    }

    /// Remove and return the handle; `None` if nothing is attached
    pub fn take(&self, job_id: &str) -> Option<Arc<dyn ProcessKiller>> {
        self.lock().remove(job_id)
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.lock().contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<JobId, Arc<dyn ProcessKiller>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
