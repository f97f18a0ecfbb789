//! Job registry
//!
//! Process-local map from job name to its behavior. Owned by one `JobService`, so several
//! services in one process stay isolated.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::runnable::JobRunnable;

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, JobRunnable>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a runnable under its definition's name
    ///
    /// Returns true if the name was not registered before; otherwise the previous runnable
    /// is replaced.
    pub fn register(&self, runnable: JobRunnable) -> bool {
        let mut jobs = self.jobs.write().unwrap_or_else(PoisonError::into_inner);
        jobs.insert(runnable.name().to_string(), runnable).is_none()
    }

    pub fn get(&self, name: &str) -> Option<JobRunnable> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.contains_key(name)
    }

    /// Registered names in lexical order
    pub fn names(&self) -> Vec<String> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = jobs.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn remote_jobs(&self) -> Vec<JobRunnable> {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        let mut remote: Vec<JobRunnable> = jobs
            .values()
            .filter(|runnable| runnable.is_remote())
            .cloned()
            .collect();
        remote.sort_by(|a, b| a.name().cmp(b.name()));
        remote
    }

    pub fn is_empty(&self) -> bool {
        let jobs = self.jobs.read().unwrap_or_else(PoisonError::into_inner);
        jobs.is_empty()
    }
}
