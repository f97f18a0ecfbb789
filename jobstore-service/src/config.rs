//! Engine configuration
//!
//! Cadences of the periodic driver, retention windows of the cleanup sweeps and the
//! tuning knobs of the coordinator.

use std::time::Duration;

/// Job engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host name stamped on every record this instance creates or activates
    pub host: String,

    /// How long a job's cached abort flag is trusted before it is read again
    pub abort_check_interval: Duration,

    /// Upper bound of the random delay before drain and poll passes
    pub desynchronize_max: Duration,

    /// How long `shutdown_jobs` waits for local workers to finish
    pub await_termination: Duration,

    /// Cadence of `execute_queued_jobs`
    pub drain_interval: Duration,

    /// Cadence of `poll_remote_jobs`
    pub poll_interval: Duration,

    /// Cadence of `retry_failed_jobs`
    pub retry_failed_interval: Duration,

    /// Cadence of the timeout sweep
    pub timeout_sweep_interval: Duration,

    /// Cadence of the old-record and not-executed cleanup sweeps
    pub cleanup_interval: Duration,

    /// Age after which finished records are deleted
    pub retention: Duration,

    /// Age after which NOT_EXECUTED records are deleted
    pub not_executed_retention: Duration,

    /// Lifetime of a sweep lease before another instance may heal it
    pub sweep_lease_ttl: Duration,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(host: String) -> Self {
        Self {
            host,
            abort_check_interval: Duration::from_millis(10_000),
            desynchronize_max: Duration::from_millis(3_000),
            await_termination: Duration::from_secs(30),
            drain_interval: Duration::from_secs(60),
            poll_interval: Duration::from_secs(60),
            retry_failed_interval: Duration::from_secs(60),
            timeout_sweep_interval: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(3600),
            retention: Duration::from_secs(5 * 24 * 3600),
            not_executed_retention: Duration::from_secs(24 * 3600),
            sweep_lease_ttl: Duration::from_secs(600),
        }
    }

    /// Creates configuration from environment variables
    ///
    /// All variables are optional:
    /// - JOBSTORE_HOST (default: HOSTNAME, then "localhost")
    /// - JOBSTORE_ABORT_CHECK_INTERVAL_MS (default: 10000)
    /// - JOBSTORE_DESYNCHRONIZE_MAX_MS (default: 3000)
    /// - JOBSTORE_AWAIT_TERMINATION_SECS (default: 30)
    /// - JOBSTORE_DRAIN_INTERVAL_SECS (default: 60)
    /// - JOBSTORE_POLL_INTERVAL_SECS (default: 60)
    /// - JOBSTORE_RETRY_FAILED_INTERVAL_SECS (default: 60)
    /// - JOBSTORE_TIMEOUT_SWEEP_INTERVAL_SECS (default: 300)
    /// - JOBSTORE_CLEANUP_INTERVAL_SECS (default: 3600)
    /// - JOBSTORE_RETENTION_DAYS (default: 5)
    /// - JOBSTORE_NOT_EXECUTED_RETENTION_HOURS (default: 24)
    /// - JOBSTORE_SWEEP_LEASE_TTL_SECS (default: 600)
    pub fn from_env() -> anyhow::Result<Self> {
        let host = std::env::var("JOBSTORE_HOST")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_else(|_| "localhost".to_string());

        let defaults = Self::new(host);

        let config = Self {
            abort_check_interval: env_duration(
                "JOBSTORE_ABORT_CHECK_INTERVAL_MS",
                from_millis,
                defaults.abort_check_interval,
            ),
            desynchronize_max: env_duration(
                "JOBSTORE_DESYNCHRONIZE_MAX_MS",
                from_millis,
                defaults.desynchronize_max,
            ),
            await_termination: env_duration(
                "JOBSTORE_AWAIT_TERMINATION_SECS",
                from_secs,
                defaults.await_termination,
            ),
            drain_interval: env_duration(
                "JOBSTORE_DRAIN_INTERVAL_SECS",
                from_secs,
                defaults.drain_interval,
            ),
            poll_interval: env_duration(
                "JOBSTORE_POLL_INTERVAL_SECS",
                from_secs,
                defaults.poll_interval,
            ),
            retry_failed_interval: env_duration(
                "JOBSTORE_RETRY_FAILED_INTERVAL_SECS",
                from_secs,
                defaults.retry_failed_interval,
            ),
            timeout_sweep_interval: env_duration(
                "JOBSTORE_TIMEOUT_SWEEP_INTERVAL_SECS",
                from_secs,
                defaults.timeout_sweep_interval,
            ),
            cleanup_interval: env_duration(
                "JOBSTORE_CLEANUP_INTERVAL_SECS",
                from_secs,
                defaults.cleanup_interval,
            ),
            retention: env_duration(
                "JOBSTORE_RETENTION_DAYS",
                from_days,
                defaults.retention,
            ),
            not_executed_retention: env_duration(
                "JOBSTORE_NOT_EXECUTED_RETENTION_HOURS",
                from_hours,
                defaults.not_executed_retention,
            ),
            sweep_lease_ttl: env_duration(
                "JOBSTORE_SWEEP_LEASE_TTL_SECS",
                from_secs,
                defaults.sweep_lease_ttl,
            ),
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.host.is_empty() {
            anyhow::bail!("host cannot be empty");
        }

        if self.abort_check_interval.is_zero() {
            anyhow::bail!("abort_check_interval must be greater than 0");
        }

        for (name, interval) in [
            ("drain_interval", self.drain_interval),
            ("poll_interval", self.poll_interval),
            ("retry_failed_interval", self.retry_failed_interval),
            ("timeout_sweep_interval", self.timeout_sweep_interval),
            ("cleanup_interval", self.cleanup_interval),
        ] {
            if interval.is_zero() {
                anyhow::bail!("{} must be greater than 0", name);
            }
        }

        if self.sweep_lease_ttl.is_zero() {
            anyhow::bail!("sweep_lease_ttl must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new("localhost".to_string())
    }
}

fn from_millis(ms: u64) -> Option<Duration> {
    Some(Duration::from_millis(ms))
}

fn from_secs(secs: u64) -> Option<Duration> {
    Some(Duration::from_secs(secs))
}

fn from_days(days: u64) -> Option<Duration> {
    days.checked_mul(24 * 3600).map(Duration::from_secs)
}

fn from_hours(hours: u64) -> Option<Duration> {
    hours.checked_mul(3600).map(Duration::from_secs)
}

/// Reads a duration variable, falling back to `default` when it is unset, unparsable or
/// out of range
fn env_duration(
    key: &str,
    unit: impl Fn(u64) -> Option<Duration>,
    default: Duration,
) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .and_then(unit)
        .unwrap_or(default)
}
