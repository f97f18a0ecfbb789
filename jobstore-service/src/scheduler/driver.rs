//! Job scheduler
//!
//! One interval loop per periodic call. A failing tick is logged and the loop keeps going.

use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::service::job::JobService;
use crate::service::reaper::Reaper;

/// Drives the engine's periodic calls
pub struct JobScheduler {
    config: Config,
    reaper: Arc<Reaper>,
    service: Option<Arc<JobService>>,
}

/// Handle of the running loops
pub struct SchedulerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Stops all loops. Jobs already dispatched keep running.
    pub fn shutdown(self) {
        for task in &self.tasks {
            task.abort();
        }
        info!("Stopped {} scheduler loop(s)", self.tasks.len());
    }
}

impl JobScheduler {
    /// Creates a scheduler running only the reaper sweeps
    pub fn new(reaper: Arc<Reaper>, config: Config) -> Self {
        Self {
            config,
            reaper,
            service: None,
        }
    }

    /// Also drains queued jobs, polls remote jobs and retries failed jobs of the given service
    pub fn with_service(mut self, service: Arc<JobService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Spawns the loops
    pub fn start(&self) -> SchedulerHandle {
        let mut tasks = Vec::new();

        if let Some(service) = &self.service {
            let drain = Arc::clone(service);
            tasks.push(spawn_loop(
                "drain queued jobs",
                self.config.drain_interval,
                move || {
                    let service = Arc::clone(&drain);
                    async move {
                        let started = service.execute_queued_jobs().await?;
                        if started > 0 {
                            info!("Started {} queued job(s)", started);
                        }
                        anyhow::Ok(())
                    }
                },
            ));

            let poll = Arc::clone(service);
            tasks.push(spawn_loop(
                "poll remote jobs",
                self.config.poll_interval,
                move || {
                    let service = Arc::clone(&poll);
                    async move {
                        let polled = service.poll_remote_jobs().await?;
                        debug!("Polled {} remote job(s)", polled);
                        anyhow::Ok(())
                    }
                },
            ));

            let retry = Arc::clone(service);
            tasks.push(spawn_loop(
                "retry failed jobs",
                self.config.retry_failed_interval,
                move || {
                    let service = Arc::clone(&retry);
                    async move {
                        let retried = service.retry_failed_jobs().await?;
                        if retried > 0 {
                            info!("Retried {} failed job(s)", retried);
                        }
                        anyhow::Ok(())
                    }
                },
            ));
        }

        let reaper = Arc::clone(&self.reaper);
        tasks.push(spawn_loop(
            "timeout sweep",
            self.config.timeout_sweep_interval,
            move || {
                let reaper = Arc::clone(&reaper);
                async move {
                    reaper.cleanup_timed_out_jobs().await?;
                    anyhow::Ok(())
                }
            },
        ));

        let reaper = Arc::clone(&self.reaper);
        tasks.push(spawn_loop(
            "cleanup sweep",
            self.config.cleanup_interval,
            move || {
                let reaper = Arc::clone(&reaper);
                async move {
                    reaper.cleanup_old_jobs().await?;
                    reaper.cleanup_not_executed_jobs().await?;
                    anyhow::Ok(())
                }
            },
        ));

        info!(
            "Started job scheduler (drain: {:?}, poll: {:?}, retry: {:?}, timeout sweep: {:?}, cleanup: {:?})",
            self.config.drain_interval,
            self.config.poll_interval,
            self.config.retry_failed_interval,
            self.config.timeout_sweep_interval,
            self.config.cleanup_interval
        );

        SchedulerHandle { tasks }
    }
}

fn spawn_loop<F, Fut>(name: &'static str, period: Duration, mut tick: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            debug!("Running {}", name);

            if let Err(e) = tick().await {
                error!("Error during {}: {:#}", name, e);
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Store;

    fn fast_config() -> Config {
        let mut config = Config::new("scheduler-test".to_string());
        config.desynchronize_max = Duration::ZERO;
        config.drain_interval = Duration::from_millis(10);
        config.poll_interval = Duration::from_millis(10);
        config.retry_failed_interval = Duration::from_millis(10);
        config.timeout_sweep_interval = Duration::from_millis(10);
        config.cleanup_interval = Duration::from_millis(10);
        config
    }

    #[tokio::test]
    async fn test_reaper_only_scheduler_spawns_sweeps() {
        let config = fast_config();
        let store = Store::in_memory();
        let reaper = Arc::new(Reaper::new(&store, &config));

        let handle = JobScheduler::new(reaper, config).start();
        assert_eq!(handle.len(), 2);
        handle.shutdown();
    }

    #[tokio::test]
    async fn test_scheduler_with_service_spawns_all_loops() {
        let config = fast_config();
        let store = Store::in_memory();
        let reaper = Arc::new(Reaper::new(&store, &config));
        let service = Arc::new(JobService::new(store, config.clone()));

        let handle = JobScheduler::new(reaper, config)
            .with_service(service)
            .start();
        assert_eq!(handle.len(), 5);

        time::sleep(Duration::from_millis(50)).await;
        handle.shutdown();
    }
}
