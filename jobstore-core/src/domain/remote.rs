//! Remote executor status types
//!
//! Wire shape of `GET {jobUri}` on the remote job executor. Field names follow the
//! executor's snake_case JSON; camelCase aliases are accepted as well.

use serde::{Deserialize, Serialize};

/// Phase of a job on the remote executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RemotePhase {
    Running,
    Finished,
}

/// Final result reported by the remote executor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteJobResult {
    pub ok: bool,
    #[serde(alias = "exitCode")]
    pub exit_code: i32,
    #[serde(default)]
    pub message: Option<String>,
}

/// Status snapshot of a remote job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteJobStatus {
    pub status: RemotePhase,
    #[serde(default, alias = "logLines")]
    pub log_lines: Vec<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Present only once `status` is `Finished`
    #[serde(default)]
    pub result: Option<RemoteJobResult>,
    #[serde(default, alias = "finishTime")]
    pub finish_time: Option<String>,
}

impl RemoteJobStatus {
    pub fn running(log_lines: Vec<String>, message: Option<String>) -> Self {
        Self {
            status: RemotePhase::Running,
            log_lines,
            message,
            result: None,
            finish_time: None,
        }
    }

    pub fn finished(log_lines: Vec<String>, result: RemoteJobResult, finish_time: String) -> Self {
        Self {
            status: RemotePhase::Finished,
            log_lines,
            message: None,
            result: Some(result),
            finish_time: Some(finish_time),
        }
    }
}
