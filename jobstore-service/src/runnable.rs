//! Job behaviors
//!
//! A job is either executed in this process (`LocalJobRunnable`) or started on a remote
//! executor and tracked by polling (`RemoteJobRunnable`). `JobRunnable` is the tagged union
//! the registry stores.

use async_trait::async_trait;
use jobstore_client::RemoteJobExecutor;
use jobstore_core::domain::definition::JobDefinition;
use jobstore_core::domain::remote::RemoteJobResult;
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::JobExecutionContext;
use crate::error::JobExecutionError;

/// A job whose body runs in this process
#[async_trait]
pub trait LocalJobRunnable: Send + Sync {
    fn definition(&self) -> &JobDefinition;

    /// Consulted before a queued CHECK_PRECONDITIONS request is started
    async fn is_execution_necessary(&self) -> bool {
        true
    }

    /// Default parameters, overridden by the parameters of an execution request
    fn parameters(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    async fn on_start(&self, _context: &JobExecutionContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// The job body
    ///
    /// Long running bodies should call `context.check_for_abort()` regularly.
    async fn execute(&self, context: &JobExecutionContext) -> Result<(), JobExecutionError>;

    /// Runs after the record has been marked SUCCESSFUL
    async fn on_success(&self, _context: &JobExecutionContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// A job whose body runs on a remote executor
#[async_trait]
pub trait RemoteJobRunnable: Send + Sync {
    fn definition(&self) -> &JobDefinition;

    async fn is_execution_necessary(&self) -> bool {
        true
    }

    fn parameters(&self) -> HashMap<String, String> {
        HashMap::new()
    }

    /// Runs before the start request is sent
    async fn on_start(&self, _context: &JobExecutionContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Post-processing of a successful remote run, before the record is marked SUCCESSFUL
    ///
    /// An error finishes the record as FAILED instead.
    async fn after_execution(
        &self,
        _context: &JobExecutionContext,
        _result: &RemoteJobResult,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_success(&self, _context: &JobExecutionContext) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Registered behavior of a job name
#[derive(Clone)]
pub enum JobRunnable {
    Local(Arc<dyn LocalJobRunnable>),
    Remote {
        job: Arc<dyn RemoteJobRunnable>,
        executor: Arc<dyn RemoteJobExecutor>,
    },
}

impl JobRunnable {
    pub fn local(job: impl LocalJobRunnable + 'static) -> Self {
        Self::Local(Arc::new(job))
    }

    pub fn remote(
        job: impl RemoteJobRunnable + 'static,
        executor: Arc<dyn RemoteJobExecutor>,
    ) -> Self {
        Self::Remote {
            job: Arc::new(job),
            executor,
        }
    }

    pub fn definition(&self) -> &JobDefinition {
        match self {
            Self::Local(job) => job.definition(),
            Self::Remote { job, .. } => job.definition(),
        }
    }

    pub fn name(&self) -> &str {
        &self.definition().name
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote { .. })
    }

    pub fn is_abortable(&self) -> bool {
        self.definition().abortable
    }

    pub async fn is_execution_necessary(&self) -> bool {
        match self {
            Self::Local(job) => job.is_execution_necessary().await,
            Self::Remote { job, .. } => job.is_execution_necessary().await,
        }
    }

    /// Default parameters overlaid with the request's parameters
    pub fn parameters(&self, overrides: HashMap<String, String>) -> HashMap<String, String> {
        let mut parameters = match self {
            Self::Local(job) => job.parameters(),
            Self::Remote { job, .. } => job.parameters(),
        };
        parameters.extend(overrides);
        parameters
    }
}

impl std::fmt::Debug for JobRunnable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let variant = if self.is_remote() { "Remote" } else { "Local" };
        f.debug_struct(variant)
            .field("definition", self.definition())
            .finish()
    }
}
