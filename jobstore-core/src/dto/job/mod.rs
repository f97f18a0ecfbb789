//! Job record DTOs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::job::{JobExecutionPriority, RunningState};

/// Request to insert a new job record
///
/// The store assigns id and timestamps. `running_state` must be `Queued` or `Running`;
/// a `Running` record also gets its start time set at insertion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobInfo {
    pub name: String,
    pub host: String,
    pub thread: String,
    pub max_execution_time_ms: i64,
    pub running_state: RunningState,
    pub execution_priority: JobExecutionPriority,
    pub parameters: HashMap<String, String>,
    pub additional_data: HashMap<String, String>,
}
