//! Timeout reaper and cleanup sweeps
//!
//! Every sweep runs under a named lease so that, across the whole fleet, at most one
//! instance executes a given sweep at a time. A lease whose holder vanished is released
//! as TIMED_OUT by the next instance that finds it expired.

use jobstore_core::domain::job::ResultCode;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::StoreError;
use crate::repository::{JobInfoRepository, LeaseRepository, Store};

/// Lease name of the timeout sweep
pub const TIMEOUT_SWEEP: &str = "JobInfo_TimedOut_Cleanup";

/// Lease name of the old-record cleanup
pub const CLEANUP_SWEEP: &str = "JobInfo_Cleanup";

/// Lease name of the NOT_EXECUTED cleanup
pub const NOT_EXECUTED_SWEEP: &str = "JobInfo_NotExecuted_Cleanup";

pub struct Reaper {
    jobs: Arc<dyn JobInfoRepository>,
    leases: Arc<dyn LeaseRepository>,
    host: String,
    lease_ttl: Duration,
    retention: Duration,
    not_executed_retention: Duration,
}

impl Reaper {
    pub fn new(store: &Store, config: &Config) -> Self {
        Self {
            jobs: store.jobs.clone(),
            leases: store.leases.clone(),
            host: config.host.clone(),
            lease_ttl: config.sweep_lease_ttl,
            retention: config.retention,
            not_executed_retention: config.not_executed_retention,
        }
    }

    /// Finishes every expired RUNNING record as TIMED_OUT
    ///
    /// Returns `None` if another instance currently holds the sweep.
    pub async fn cleanup_timed_out_jobs(&self) -> Result<Option<u64>, StoreError> {
        self.run_sweep(TIMEOUT_SWEEP, move || async move {
            let count = self.jobs.cleanup_timed_out_jobs(chrono::Utc::now()).await?;
            if count > 0 {
                warn!("Marked {} job(s) as timed out", count);
            }
            Ok::<_, StoreError>(count)
        })
        .await
    }

    /// Deletes finished records older than the retention window
    pub async fn cleanup_old_jobs(&self) -> Result<Option<u64>, StoreError> {
        let before = chrono::Utc::now() - to_chrono(self.retention);
        self.run_sweep(CLEANUP_SWEEP, move || async move {
            let count = self.jobs.cleanup_old_jobs(before).await?;
            info!("Deleted {} finished job record(s) older than {}", count, before);
            Ok::<_, StoreError>(count)
        })
        .await
    }

    /// Deletes NOT_EXECUTED records older than their retention window
    pub async fn cleanup_not_executed_jobs(&self) -> Result<Option<u64>, StoreError> {
        let before = chrono::Utc::now() - to_chrono(self.not_executed_retention);
        self.run_sweep(NOT_EXECUTED_SWEEP, move || async move {
            let count = self.jobs.cleanup_not_executed_jobs(before).await?;
            info!("Deleted {} not executed job record(s) older than {}", count, before);
            Ok::<_, StoreError>(count)
        })
        .await
    }

    async fn run_sweep<F, Fut>(&self, name: &str, sweep: F) -> Result<Option<u64>, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<u64, StoreError>>,
    {
        let now = chrono::Utc::now();
        if self.leases.expire_stale_lease(name, now).await? {
            warn!("Previous {} sweep overran its lease and was released as timed out", name);
        }

        let holder = format!("{}/{}", self.host, Uuid::new_v4());
        let expires_at = now + to_chrono(self.lease_ttl);
        if self
            .leases
            .acquire_lease(name, &holder, expires_at)
            .await?
            .is_none()
        {
            debug!("Sweep {} is held by another instance, skipping", name);
            return Ok(None);
        }

        let result = sweep().await;

        let (outcome, message) = match &result {
            Ok(count) => (ResultCode::Successful, format!("{} record(s)", count)),
            Err(e) => (ResultCode::Failed, e.to_string()),
        };
        match self
            .leases
            .release_lease(name, &holder, outcome, Some(&message))
            .await
        {
            Ok(true) => {}
            Ok(false) => warn!("Lease of sweep {} was taken away before release", name),
            Err(e) => warn!("Failed to release lease of sweep {}: {}", name, e),
        }

        result.map(Some)
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}
