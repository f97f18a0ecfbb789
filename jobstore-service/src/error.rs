//! Error types for the job engine

use jobstore_client::ClientError;
use thiserror::Error;
use uuid::Uuid;

/// Errors raised by a store adapter
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored value could not be mapped back onto the domain types
    #[error("Invalid stored record: {0}")]
    Serialization(String),
}

/// Errors returned by `JobService` operations
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Job '{0}' is not registered with this service instance")]
    NotRegistered(String),

    #[error("Job '{0}' is already queued for execution")]
    AlreadyQueued(String),

    #[error("Execution of job '{0}' was not necessary")]
    ExecutionNotNecessary(String),

    #[error("Execution of job '{0}' is disabled")]
    ExecutionDisabled(String),

    #[error("Job service is not active")]
    ServiceNotActive,

    #[error("Job record {0} not found")]
    NotFound(Uuid),

    #[error("Job '{0}' is not abortable")]
    NotAbortable(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Remote executor error: {0}")]
    Remote(#[from] ClientError),
}

impl JobError {
    /// Expected outcome of racing callers. Retrying later may succeed.
    pub fn is_contention(&self) -> bool {
        matches!(
            self,
            Self::AlreadyQueued(_) | Self::ExecutionNotNecessary(_)
        )
    }

    /// Configuration state of the fleet or of this instance
    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::ExecutionDisabled(_) | Self::ServiceNotActive)
    }

    /// Caller mistake that will never succeed on retry
    pub fn is_registration_error(&self) -> bool {
        matches!(self, Self::NotRegistered(_))
    }
}

impl From<sqlx::Error> for JobError {
    fn from(err: sqlx::Error) -> Self {
        JobError::Store(StoreError::Database(err))
    }
}

/// Outcome of a failed job body
///
/// Bodies return `Aborted` after observing the abort flag; anything else is `Failed`.
/// `?` on an `anyhow::Result` converts into `Failed`.
#[derive(Debug, Error)]
pub enum JobExecutionError {
    #[error("Job execution was aborted")]
    Aborted,

    #[error("Job execution failed: {0}")]
    Failed(#[from] anyhow::Error),
}

impl JobExecutionError {
    /// Text stored in the record's error message
    pub fn describe(&self) -> String {
        match self {
            Self::Aborted => self.to_string(),
            Self::Failed(e) => describe_failure(e),
        }
    }
}

/// Error description written into a failed record: the message plus the full cause chain
pub(crate) fn describe_failure(e: &anyhow::Error) -> String {
    format!("Problem: {}, Stack-Trace: {:?}", e, e)
}
