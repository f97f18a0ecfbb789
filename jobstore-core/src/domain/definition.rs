//! Job definition domain types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reserved definition name carrying the fleet-wide execution switch
pub const EXECUTION_SEMAPHORE: &str = "ALL_JOBS";

/// Upper bound applied to stored timeouts and intervals, roughly one hundred years
pub const MAX_STORED_DURATION: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

/// Static description of a job, supplied by its author
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    /// Unique name of the job
    pub name: String,
    /// Time after the last modification at which a running record is considered dead
    pub max_execution_time: Duration,
    /// Minimum age of a running remote record before its status is fetched again
    pub polling_interval: Duration,
    /// Whether the job body runs on a remote executor
    pub remote: bool,
    /// Whether a running instance may be aborted
    pub abortable: bool,
    /// How often a failed or timed out execution is restarted automatically
    pub max_retries: u32,
    /// Minimum age of the failed record before it is retried
    pub retry_interval: Duration,
}

impl JobDefinition {
    /// Definition of a job executed in this process
    pub fn local(name: impl Into<String>, max_execution_time: Duration) -> Self {
        Self {
            name: name.into(),
            max_execution_time,
            polling_interval: Duration::ZERO,
            remote: false,
            abortable: false,
            max_retries: 0,
            retry_interval: Duration::ZERO,
        }
    }

    /// Definition of a job executed by a remote executor
    pub fn remote(
        name: impl Into<String>,
        max_execution_time: Duration,
        polling_interval: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            max_execution_time,
            polling_interval,
            remote: true,
            abortable: false,
            max_retries: 0,
            retry_interval: Duration::ZERO,
        }
    }

    /// Marks the job as abortable
    pub fn abortable(mut self) -> Self {
        self.abortable = true;
        self
    }

    /// Retries failed executions up to `max_retries` times, each once the failed record is
    /// `retry_interval` old
    pub fn with_retries(mut self, max_retries: u32, retry_interval: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_interval = retry_interval;
        self
    }

    pub fn max_execution_time_ms(&self) -> i64 {
        stored_millis(self.max_execution_time)
    }
}

/// Milliseconds of a duration, clamped to `MAX_STORED_DURATION`
fn stored_millis(duration: Duration) -> i64 {
    i64::try_from(duration.min(MAX_STORED_DURATION).as_millis()).unwrap_or(i64::MAX)
}

/// Job definition as persisted in the shared store, plus its execution switch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredJobDefinition {
    pub name: String,
    pub max_execution_time_ms: i64,
    pub polling_interval_ms: i64,
    pub remote: bool,
    pub abortable: bool,
    pub max_retries: i64,
    pub retry_interval_ms: i64,
    pub disabled: bool,
}

impl StoredJobDefinition {
    /// Definition row backing the fleet-wide execution switch
    pub fn execution_semaphore() -> Self {
        Self {
            name: EXECUTION_SEMAPHORE.to_string(),
            max_execution_time_ms: 0,
            polling_interval_ms: 0,
            remote: false,
            abortable: false,
            max_retries: 0,
            retry_interval_ms: 0,
            disabled: false,
        }
    }
}

impl From<&JobDefinition> for StoredJobDefinition {
    fn from(definition: &JobDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            max_execution_time_ms: definition.max_execution_time_ms(),
            polling_interval_ms: stored_millis(definition.polling_interval),
            remote: definition.remote,
            abortable: definition.abortable,
            max_retries: i64::from(definition.max_retries),
            retry_interval_ms: stored_millis(definition.retry_interval),
            disabled: false,
        }
    }
}
