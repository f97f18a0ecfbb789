//! Job record domain types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::log::LogLine;

/// Additional-data key holding the status URI of a remotely executed job
pub const REMOTE_JOB_URI: &str = "remoteJobUri";

/// Additional-data key set when a start request resumed an already running remote job
pub const RESUMED_ALREADY_RUNNING_JOB: &str = "resumedAlreadyRunningJob";

/// Additional-data key holding the exit code of a failed remote job
pub const EXIT_CODE: &str = "exitCode";

/// Persistent record of one job attempt
///
/// For a given name the store holds at most one record in `Queued` and at most one in
/// `Running`; any number of `Finished` records are kept as history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub id: Uuid,
    pub name: String,
    pub host: String,
    pub thread: String,
    pub execution_priority: JobExecutionPriority,
    pub running_state: RunningState,
    pub result_code: Option<ResultCode>,
    pub creation_time: chrono::DateTime<chrono::Utc>,
    pub start_time: Option<chrono::DateTime<chrono::Utc>>,
    pub finish_time: Option<chrono::DateTime<chrono::Utc>>,
    pub last_modified_time: chrono::DateTime<chrono::Utc>,
    pub max_execution_time_ms: i64,
    pub parameters: HashMap<String, String>,
    pub additional_data: HashMap<String, String>,
    pub log_lines: Vec<LogLine>,
    pub status_message: Option<String>,
    pub result_message: Option<String>,
    pub error_message: Option<String>,
    pub aborted: bool,
}

impl JobInfo {
    /// Instant after which a still running record is considered dead
    ///
    /// `None` when the timeout lies beyond the representable range; such a record never
    /// expires.
    pub fn expires_at(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        chrono::Duration::try_milliseconds(self.max_execution_time_ms)
            .and_then(|timeout| self.last_modified_time.checked_add_signed(timeout))
    }

    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.expires_at().is_some_and(|expires_at| expires_at < now)
    }

    /// True if a request at `priority` outranks this record
    pub fn has_lower_priority(&self, priority: JobExecutionPriority) -> bool {
        self.execution_priority.has_lower_priority(priority)
    }

    pub fn remote_job_uri(&self) -> Option<&str> {
        self.additional_data.get(REMOTE_JOB_URI).map(String::as_str)
    }

    pub fn is_finished(&self) -> bool {
        self.running_state == RunningState::Finished
    }
}

/// Lifecycle state of a job record. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunningState {
    Queued,
    Running,
    Finished,
}

/// Outcome of a finished job record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Successful,
    Failed,
    TimedOut,
    Aborted,
    NotExecuted,
}

/// Strength of an execution request
///
/// Variants are declared in ascending order so the derived `Ord` is the priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobExecutionPriority {
    /// Honor `is_execution_necessary` before running
    #[default]
    CheckPreconditions,
    /// Run even if the job reports it is not necessary
    IgnorePreconditions,
    /// Like `IgnorePreconditions`, and outranks it when replacing queued work
    ForceExecution,
}

impl JobExecutionPriority {
    pub fn has_lower_priority(self, other: JobExecutionPriority) -> bool {
        self < other
    }

    pub fn checks_preconditions(self) -> bool {
        self == JobExecutionPriority::CheckPreconditions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(max_execution_time_ms: i64) -> JobInfo {
        let now = chrono::Utc::now();
        JobInfo {
            id: Uuid::new_v4(),
            name: "import".to_string(),
            host: "localhost".to_string(),
            thread: "main".to_string(),
            execution_priority: JobExecutionPriority::CheckPreconditions,
            running_state: RunningState::Running,
            result_code: None,
            creation_time: now,
            start_time: Some(now),
            finish_time: None,
            last_modified_time: now,
            max_execution_time_ms,
            parameters: HashMap::new(),
            additional_data: HashMap::new(),
            log_lines: Vec::new(),
            status_message: None,
            result_message: None,
            error_message: None,
            aborted: false,
        }
    }

    #[test]
    fn test_priority_ordering() {
        use JobExecutionPriority::*;
        assert!(CheckPreconditions < IgnorePreconditions);
        assert!(IgnorePreconditions < ForceExecution);
        assert!(CheckPreconditions.has_lower_priority(ForceExecution));
        assert!(!ForceExecution.has_lower_priority(ForceExecution));
        assert!(!ForceExecution.has_lower_priority(CheckPreconditions));
    }

    #[test]
    fn test_expiry_uses_last_modified_time() {
        let job = record(1_000);
        assert_eq!(
            job.expires_at(),
            Some(job.last_modified_time + chrono::Duration::milliseconds(1_000))
        );
        assert!(!job.is_expired(job.last_modified_time));
        assert!(job.is_expired(job.last_modified_time + chrono::Duration::seconds(2)));
    }

    #[test]
    fn test_unbounded_timeout_never_expires() {
        let job = record(i64::MAX);
        assert_eq!(job.expires_at(), None);
        assert!(!job.is_expired(chrono::DateTime::<chrono::Utc>::MAX_UTC));
    }

    #[test]
    fn test_remote_job_uri_lookup() {
        let mut job = record(1_000);
        assert_eq!(job.remote_job_uri(), None);
        job.additional_data
            .insert(REMOTE_JOB_URI.to_string(), "http://executor/jobs/import/1".to_string());
        assert_eq!(job.remote_job_uri(), Some("http://executor/jobs/import/1"));
    }

    #[test]
    fn test_states_serialize_in_upper_case() {
        assert_eq!(
            serde_json::to_string(&RunningState::Queued).unwrap(),
            "\"QUEUED\""
        );
        assert_eq!(
            serde_json::to_string(&ResultCode::NotExecuted).unwrap(),
            "\"NOT_EXECUTED\""
        );
        assert_eq!(
            serde_json::to_string(&JobExecutionPriority::ForceExecution).unwrap(),
            "\"FORCE_EXECUTION\""
        );
    }
}
