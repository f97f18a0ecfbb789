//! Repository Module
//!
//! The store contract the engine relies on, with a PostgreSQL adapter and an in-process
//! adapter. Every operation is atomic on its own; there are no multi-call transactions.
//!
//! Field updates addressed by job name always target that name's RUNNING record and advance
//! its `last_modified_time`. They are no-ops when the name has no RUNNING record.

pub mod job_definition;
pub mod job_info;
pub mod lease;
pub mod memory;

pub use job_definition::PgJobDefinitionRepository;
pub use job_info::PgJobInfoRepository;
pub use lease::PgLeaseRepository;
pub use memory::InMemoryStore;

use async_trait::async_trait;
use jobstore_core::domain::definition::StoredJobDefinition;
use jobstore_core::domain::job::{JobExecutionPriority, JobInfo, ResultCode, RunningState};
use jobstore_core::domain::lease::Lease;
use jobstore_core::domain::log::LogLine;
use jobstore_core::dto::job::CreateJobInfo;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::StoreError;

/// Result type alias for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Persistent job records
#[async_trait]
pub trait JobInfoRepository: Send + Sync {
    /// Inserts a new record
    ///
    /// Returns `None` if the name already has a record in the requested state.
    async fn create(&self, job: CreateJobInfo) -> Result<Option<Uuid>>;

    /// Moves the name's QUEUED record to RUNNING
    ///
    /// Returns false if there is no QUEUED record or a RUNNING record already exists.
    async fn activate_queued_job(&self, name: &str) -> Result<bool>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<JobInfo>>;

    /// History of a job name, newest first
    async fn find_by_name(&self, name: &str, limit: i64) -> Result<Vec<JobInfo>>;

    async fn find_by_name_and_running_state(
        &self,
        name: &str,
        state: RunningState,
    ) -> Result<Option<JobInfo>>;

    /// All records in a state, oldest first
    async fn find_by_running_state(&self, state: RunningState) -> Result<Vec<JobInfo>>;

    async fn find_queued_jobs_sorted_asc_by_creation_time(&self) -> Result<Vec<JobInfo>> {
        self.find_by_running_state(RunningState::Queued).await
    }

    /// Most recently created records of any name
    async fn list_recent(&self, limit: i64) -> Result<Vec<JobInfo>>;

    async fn has_job(&self, name: &str, state: RunningState) -> Result<bool> {
        Ok(self
            .find_by_name_and_running_state(name, state)
            .await?
            .is_some())
    }

    async fn mark_running_as_finished(
        &self,
        name: &str,
        result_code: ResultCode,
        message: Option<&str>,
    ) -> Result<bool>;

    /// Finishes the name's RUNNING record as FAILED with the given error description
    async fn mark_running_as_finished_with_error(&self, name: &str, error: &str) -> Result<bool>;

    /// Finishes the record with the given id, only while it is still RUNNING
    async fn mark_as_finished(
        &self,
        id: Uuid,
        result_code: ResultCode,
        message: Option<&str>,
    ) -> Result<bool>;

    async fn mark_as_finished_with_error(&self, id: Uuid, error: &str) -> Result<bool>;

    /// Finishes the name's QUEUED record as NOT_EXECUTED
    async fn mark_queued_as_not_executed(&self, name: &str) -> Result<bool>;

    async fn remove(&self, id: Uuid) -> Result<bool>;

    /// Deletes the record with the given id, only while it is still QUEUED
    async fn remove_queued(&self, id: Uuid) -> Result<bool>;

    /// Raises the abort flag of a RUNNING record
    async fn abort_job(&self, id: Uuid) -> Result<bool>;

    async fn is_aborted(&self, id: Uuid) -> Result<bool>;

    /// Upserts one key of the additional data. Last write wins.
    async fn add_additional_data(&self, name: &str, key: &str, value: &str) -> Result<()>;

    /// Replaces the log lines
    async fn set_log_lines(&self, name: &str, lines: &[LogLine]) -> Result<()>;

    async fn add_log_line(&self, name: &str, line: &LogLine) -> Result<()>;

    async fn set_status_message(&self, name: &str, message: &str) -> Result<()>;

    /// Upserts one key of the additional data of the record with `id` while it is RUNNING
    async fn add_additional_data_by_id(&self, id: Uuid, key: &str, value: &str) -> Result<bool>;

    async fn add_log_line_by_id(&self, id: Uuid, line: &LogLine) -> Result<bool>;

    async fn set_status_message_by_id(&self, id: Uuid, message: &str) -> Result<bool>;

    async fn update_host_thread_information(&self, name: &str, host: &str, thread: &str)
    -> Result<()>;

    /// Finishes every RUNNING record whose expiry instant lies before `now` as TIMED_OUT
    async fn cleanup_timed_out_jobs(&self, now: chrono::DateTime<chrono::Utc>) -> Result<u64>;

    /// Deletes FINISHED records last modified before `before`
    async fn cleanup_old_jobs(&self, before: chrono::DateTime<chrono::Utc>) -> Result<u64>;

    /// Deletes NOT_EXECUTED records last modified before `before`
    async fn cleanup_not_executed_jobs(&self, before: chrono::DateTime<chrono::Utc>)
    -> Result<u64>;

    async fn distinct_job_names(&self) -> Result<Vec<String>>;

    async fn count(&self) -> Result<u64>;
}

/// Persistent job definitions and execution switches
#[async_trait]
pub trait JobDefinitionRepository: Send + Sync {
    /// Inserts or updates a definition, keeping its `disabled` flag
    async fn add_or_update(&self, definition: &StoredJobDefinition) -> Result<()>;

    async fn find(&self, name: &str) -> Result<Option<StoredJobDefinition>>;

    async fn find_all(&self) -> Result<Vec<StoredJobDefinition>>;

    /// Sets the switch of a name, creating a bare row if none exists
    async fn set_disabled(&self, name: &str, disabled: bool) -> Result<()>;

    /// A name without a stored definition is enabled
    async fn is_disabled(&self, name: &str) -> Result<bool> {
        Ok(self.find(name).await?.is_some_and(|d| d.disabled))
    }
}

/// Sweep leases
#[async_trait]
pub trait LeaseRepository: Send + Sync {
    /// Releases a lease still held past its expiry as TIMED_OUT
    async fn expire_stale_lease(&self, name: &str, now: chrono::DateTime<chrono::Utc>)
    -> Result<bool>;

    /// Claims the lease unless another holder currently owns it
    async fn acquire_lease(
        &self,
        name: &str,
        holder: &str,
        expires_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<Lease>>;

    /// Releases a lease owned by `holder`, recording the sweep outcome
    async fn release_lease(
        &self,
        name: &str,
        holder: &str,
        outcome: ResultCode,
        message: Option<&str>,
    ) -> Result<bool>;

    async fn find_lease(&self, name: &str) -> Result<Option<Lease>>;

    async fn find_all_leases(&self) -> Result<Vec<Lease>>;
}

/// The three repositories of one shared store
#[derive(Clone)]
pub struct Store {
    pub jobs: Arc<dyn JobInfoRepository>,
    pub definitions: Arc<dyn JobDefinitionRepository>,
    pub leases: Arc<dyn LeaseRepository>,
}

impl Store {
    /// Store backed by PostgreSQL
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            jobs: Arc::new(PgJobInfoRepository::new(pool.clone())),
            definitions: Arc::new(PgJobDefinitionRepository::new(pool.clone())),
            leases: Arc::new(PgLeaseRepository::new(pool)),
        }
    }

    /// Store kept in this process
    pub fn in_memory() -> Self {
        Self::from_memory(Arc::new(InMemoryStore::new()))
    }

    /// Store view over an existing in-process store, so several services can share it
    pub fn from_memory(store: Arc<InMemoryStore>) -> Self {
        Self {
            jobs: store.clone(),
            definitions: store.clone(),
            leases: store,
        }
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

pub(crate) fn running_state_to_string(state: RunningState) -> &'static str {
    match state {
        RunningState::Queued => "QUEUED",
        RunningState::Running => "RUNNING",
        RunningState::Finished => "FINISHED",
    }
}

pub(crate) fn string_to_running_state(s: &str) -> Result<RunningState> {
    match s {
        "QUEUED" => Ok(RunningState::Queued),
        "RUNNING" => Ok(RunningState::Running),
        "FINISHED" => Ok(RunningState::Finished),
        other => Err(StoreError::Serialization(format!(
            "unknown running state '{}'",
            other
        ))),
    }
}

pub(crate) fn result_code_to_string(code: ResultCode) -> &'static str {
    match code {
        ResultCode::Successful => "SUCCESSFUL",
        ResultCode::Failed => "FAILED",
        ResultCode::TimedOut => "TIMED_OUT",
        ResultCode::Aborted => "ABORTED",
        ResultCode::NotExecuted => "NOT_EXECUTED",
    }
}

pub(crate) fn string_to_result_code(s: &str) -> Result<ResultCode> {
    match s {
        "SUCCESSFUL" => Ok(ResultCode::Successful),
        "FAILED" => Ok(ResultCode::Failed),
        "TIMED_OUT" => Ok(ResultCode::TimedOut),
        "ABORTED" => Ok(ResultCode::Aborted),
        "NOT_EXECUTED" => Ok(ResultCode::NotExecuted),
        other => Err(StoreError::Serialization(format!(
            "unknown result code '{}'",
            other
        ))),
    }
}

pub(crate) fn priority_to_string(priority: JobExecutionPriority) -> &'static str {
    match priority {
        JobExecutionPriority::CheckPreconditions => "CHECK_PRECONDITIONS",
        JobExecutionPriority::IgnorePreconditions => "IGNORE_PRECONDITIONS",
        JobExecutionPriority::ForceExecution => "FORCE_EXECUTION",
    }
}

pub(crate) fn string_to_priority(s: &str) -> Result<JobExecutionPriority> {
    match s {
        "CHECK_PRECONDITIONS" => Ok(JobExecutionPriority::CheckPreconditions),
        "IGNORE_PRECONDITIONS" => Ok(JobExecutionPriority::IgnorePreconditions),
        "FORCE_EXECUTION" => Ok(JobExecutionPriority::ForceExecution),
        other => Err(StoreError::Serialization(format!(
            "unknown execution priority '{}'",
            other
        ))),
    }
}

/// Message recorded on records finished by the timeout sweep
pub(crate) const TIMED_OUT_MESSAGE: &str = "Job exceeded its max execution time";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_strings_round_trip() {
        for state in [
            RunningState::Queued,
            RunningState::Running,
            RunningState::Finished,
        ] {
            assert_eq!(
                string_to_running_state(running_state_to_string(state)).unwrap(),
                state
            );
        }
        assert!(string_to_running_state("Queued").is_err());
    }

    #[test]
    fn test_strings_match_serde_names() {
        assert_eq!(
            serde_json::to_value(ResultCode::TimedOut).unwrap(),
            result_code_to_string(ResultCode::TimedOut)
        );
        assert_eq!(
            serde_json::to_value(JobExecutionPriority::IgnorePreconditions).unwrap(),
            priority_to_string(JobExecutionPriority::IgnorePreconditions)
        );
        assert!(string_to_result_code("UNKNOWN").is_err());
        assert!(string_to_priority("").is_err());
    }
}
