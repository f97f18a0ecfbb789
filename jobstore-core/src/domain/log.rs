//! Log line domain types

use serde::{Deserialize, Serialize};

/// A single line appended to a job record while it runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub line: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl LogLine {
    pub fn new(line: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            timestamp: chrono::Utc::now(),
        }
    }
}
