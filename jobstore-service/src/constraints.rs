//! Running constraints
//!
//! Sets of job names that must never be RUNNING at the same time.

use std::collections::BTreeSet;
use std::sync::{PoisonError, RwLock};

use crate::error::JobError;
use crate::registry::JobRegistry;
use crate::repository::JobInfoRepository;
use jobstore_core::domain::job::RunningState;

#[derive(Debug, Default)]
pub struct RunningConstraints {
    constraints: RwLock<Vec<BTreeSet<String>>>,
}

impl RunningConstraints {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a mutual-exclusion set
    ///
    /// Every member must be registered. Returns false if an equal set already exists.
    pub fn add(&self, names: BTreeSet<String>, registry: &JobRegistry) -> Result<bool, JobError> {
        if let Some(unknown) = names.iter().find(|name| !registry.contains(name)) {
            return Err(JobError::NotRegistered(unknown.clone()));
        }

        let mut constraints = self
            .constraints
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if constraints.contains(&names) {
            return Ok(false);
        }
        constraints.push(names);
        Ok(true)
    }

    pub fn list(&self) -> Vec<BTreeSet<String>> {
        self.constraints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names that share a set with `name`, excluding `name` itself
    fn partners_of(&self, name: &str) -> BTreeSet<String> {
        let constraints = self
            .constraints
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        constraints
            .iter()
            .filter(|set| set.contains(name))
            .flat_map(|set| set.iter())
            .filter(|member| member.as_str() != name)
            .cloned()
            .collect()
    }

    /// True if another member of one of `name`'s sets currently has a RUNNING record
    pub async fn violates_running_constraints(
        &self,
        name: &str,
        jobs: &dyn JobInfoRepository,
    ) -> Result<bool, JobError> {
        for partner in self.partners_of(name) {
            if jobs.has_job(&partner, RunningState::Running).await? {
                tracing::debug!("Job {} is blocked by running job {}", name, partner);
                return Ok(true);
            }
        }
        Ok(false)
    }
}
