//! Execution context for job bodies
//!
//! One context exists per execution attempt. It carries the attempt's identity and
//! parameters, writes log lines and status into the job record, and answers abort checks
//! from a cache over the record's abort flag.

use jobstore_core::domain::definition::JobDefinition;
use jobstore_core::domain::job::JobExecutionPriority;
use jobstore_core::domain::log::LogLine;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

use crate::error::JobExecutionError;
use crate::repository::JobInfoRepository;

/// Appends log lines to one execution's record
///
/// Lines are dropped once the record is no longer RUNNING, so a worker that outlives its
/// timeout never writes into a successor's record.
#[derive(Clone)]
pub struct JobLogger {
    id: Uuid,
    name: String,
    jobs: Arc<dyn JobInfoRepository>,
}

impl JobLogger {
    pub fn new(id: Uuid, name: String, jobs: Arc<dyn JobInfoRepository>) -> Self {
        Self { id, name, jobs }
    }

    /// Appends a line. Store failures are logged and otherwise ignored.
    pub async fn log(&self, line: impl Into<String>) {
        let line = LogLine::new(line);
        tracing::debug!("[{}] {}", self.name, line.line);
        match self.jobs.add_log_line_by_id(self.id, &line).await {
            Ok(true) => {}
            Ok(false) => tracing::debug!("Job {} ({}) is no longer running", self.name, self.id),
            Err(e) => tracing::warn!("Failed to append log line for job {}: {}", self.name, e),
        }
    }
}

/// Read-through cache over a record's abort flag
///
/// The flag is read from the store at most once per `interval`, so an abort may go unnoticed
/// for up to that long.
pub struct AbortFlagCache {
    id: Uuid,
    jobs: Arc<dyn JobInfoRepository>,
    interval: Duration,
    cached: Mutex<Option<(Instant, bool)>>,
}

impl AbortFlagCache {
    pub fn new(id: Uuid, jobs: Arc<dyn JobInfoRepository>, interval: Duration) -> Self {
        Self {
            id,
            jobs,
            interval,
            cached: Mutex::new(None),
        }
    }

    pub async fn is_aborted(&self) -> bool {
        let mut cached = self.cached.lock().await;
        if let Some((read_at, aborted)) = *cached {
            if aborted || read_at.elapsed() < self.interval {
                return aborted;
            }
        }

        let previous = (*cached).is_some_and(|(_, aborted)| aborted);
        let aborted = match self.jobs.is_aborted(self.id).await {
            Ok(aborted) => aborted,
            Err(e) => {
                tracing::warn!("Failed to read abort flag of job {}: {}", self.id, e);
                previous
            }
        };
        *cached = Some((Instant::now(), aborted));
        aborted
    }
}

/// Context handed to job bodies and hooks
pub struct JobExecutionContext {
    id: Uuid,
    definition: JobDefinition,
    priority: JobExecutionPriority,
    parameters: HashMap<String, String>,
    logger: JobLogger,
    abort: AbortFlagCache,
    jobs: Arc<dyn JobInfoRepository>,
}

impl JobExecutionContext {
    /// Creates a context for one execution attempt
    ///
    /// # Arguments
    /// * `id` - Id of the RUNNING job record
    /// * `definition` - Definition of the job
    /// * `priority` - Priority the record was started with
    /// * `parameters` - Parameters stored on the record
    /// * `jobs` - Store the record lives in
    /// * `abort_check_interval` - Refresh interval of the abort flag cache
    pub fn new(
        id: Uuid,
        definition: JobDefinition,
        priority: JobExecutionPriority,
        parameters: HashMap<String, String>,
        jobs: Arc<dyn JobInfoRepository>,
        abort_check_interval: Duration,
    ) -> Self {
        Self {
            id,
            logger: JobLogger::new(id, definition.name.clone(), jobs.clone()),
            abort: AbortFlagCache::new(id, jobs.clone(), abort_check_interval),
            definition,
            priority,
            parameters,
            jobs,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &JobDefinition {
        &self.definition
    }

    pub fn priority(&self) -> JobExecutionPriority {
        self.priority
    }

    pub fn parameters(&self) -> &HashMap<String, String> {
        &self.parameters
    }

    pub fn parameter(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).map(String::as_str)
    }

    pub fn logger(&self) -> &JobLogger {
        &self.logger
    }

    pub async fn log(&self, line: impl Into<String>) {
        self.logger.log(line).await;
    }

    /// Sets the status message of this execution's record while it is RUNNING
    pub async fn set_status_message(&self, message: &str) -> anyhow::Result<()> {
        self.jobs.set_status_message_by_id(self.id, message).await?;
        Ok(())
    }

    pub async fn add_additional_data(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.jobs
            .add_additional_data_by_id(self.id, key, value)
            .await?;
        Ok(())
    }

    pub async fn is_aborted(&self) -> bool {
        self.abort.is_aborted().await
    }

    /// Returns `Err(JobExecutionError::Aborted)` once the record has been aborted
    pub async fn check_for_abort(&self) -> Result<(), JobExecutionError> {
        if self.is_aborted().await {
            return Err(JobExecutionError::Aborted);
        }
        Ok(())
    }
}
