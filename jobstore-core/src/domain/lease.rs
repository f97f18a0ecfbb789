//! Sweep lease domain types

use serde::{Deserialize, Serialize};

use crate::domain::job::ResultCode;

/// Named, expiring claim on a periodic sweep
///
/// A lease is held while `released_at` is unset. Only one instance of the fleet can hold
/// a given lease at a time; a holder that disappears is healed once `expires_at` passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub name: String,
    pub holder: String,
    pub acquired_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub released_at: Option<chrono::DateTime<chrono::Utc>>,
    /// Outcome of the last completed sweep
    pub outcome: Option<ResultCode>,
    pub message: Option<String>,
}

impl Lease {
    pub fn is_held(&self) -> bool {
        self.released_at.is_none()
    }

    /// True if the lease is still held but its holder overran the lease lifetime
    pub fn is_stale(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        self.is_held() && self.expires_at < now
    }
}
