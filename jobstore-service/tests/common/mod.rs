//! Shared fixtures for the engine tests

#![allow(dead_code)]

use async_trait::async_trait;
use jobstore_core::domain::definition::JobDefinition;
use jobstore_core::domain::job::{JobInfo, RunningState};
use jobstore_service::{
    Config, JobExecutionContext, JobExecutionError, JobRunnable, JobService, LocalJobRunnable,
    Store,
};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub const HOST: &str = "test-host";

/// Configuration without desynchronization delays and with an uncached abort flag
pub fn test_config() -> Config {
    let mut config = Config::new(HOST.to_string());
    config.desynchronize_max = Duration::ZERO;
    config.abort_check_interval = Duration::ZERO;
    config.await_termination = Duration::from_secs(2);
    config
}

/// Polls `condition` until it holds or two seconds have passed
pub async fn wait_until<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

/// Waits until the record with `id` is FINISHED and returns it
pub async fn wait_for_finish(store: &Store, id: Uuid) -> JobInfo {
    let finished = wait_until(|| async {
        matches!(
            store.jobs.find_by_id(id).await,
            Ok(Some(job)) if job.running_state == RunningState::Finished
        )
    })
    .await;
    assert!(finished, "job {} did not finish in time", id);
    store
        .jobs
        .find_by_id(id)
        .await
        .expect("Failed to read job")
        .expect("Job record vanished")
}

/// Service over `store` with `jobs` registered
pub async fn service_with(store: Store, jobs: &[&Arc<TestJob>]) -> Arc<JobService> {
    let service = JobService::new(store, test_config());
    for job in jobs {
        service
            .register_job(JobRunnable::Local((*job).clone()))
            .await
            .expect("Failed to register job");
    }
    Arc::new(service)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    Succeed,
    Fail,
    Panic,
    FailOnStart,
    /// Runs until released, observing the abort flag
    Block,
    /// Runs until released, never looking at the abort flag
    BlockIgnoringAbort,
}

/// Scriptable local job recording the hooks it went through
pub struct TestJob {
    definition: JobDefinition,
    behavior: Behavior,
    necessary: AtomicBool,
    released: AtomicBool,
    executions: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    events: Mutex<Vec<String>>,
}

impl TestJob {
    pub fn new(name: &str, behavior: Behavior) -> Arc<Self> {
        Self::with_definition(JobDefinition::local(name, Duration::from_secs(60)), behavior)
    }

    pub fn abortable(name: &str, behavior: Behavior) -> Arc<Self> {
        Self::with_definition(
            JobDefinition::local(name, Duration::from_secs(60)).abortable(),
            behavior,
        )
    }

    pub fn with_definition(definition: JobDefinition, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            definition,
            behavior,
            necessary: AtomicBool::new(true),
            released: AtomicBool::new(false),
            executions: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn set_necessary(&self, necessary: bool) {
        self.necessary.store(necessary, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }

    /// Highest number of bodies that were running at the same time
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    fn event(&self, event: &str) {
        self.events.lock().unwrap().push(event.to_string());
    }

    async fn block(
        &self,
        context: &JobExecutionContext,
        observe_abort: bool,
    ) -> Result<(), JobExecutionError> {
        while !self.released.load(Ordering::SeqCst) {
            if observe_abort {
                context.check_for_abort().await?;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }
}

#[async_trait]
impl LocalJobRunnable for TestJob {
    fn definition(&self) -> &JobDefinition {
        &self.definition
    }

    async fn is_execution_necessary(&self) -> bool {
        self.necessary.load(Ordering::SeqCst)
    }

    async fn on_start(&self, _context: &JobExecutionContext) -> anyhow::Result<()> {
        self.event("on_start");
        if self.behavior == Behavior::FailOnStart {
            anyhow::bail!("refusing to start");
        }
        Ok(())
    }

    async fn execute(&self, context: &JobExecutionContext) -> Result<(), JobExecutionError> {
        self.event("execute");
        self.executions.fetch_add(1, Ordering::SeqCst);
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        context.log("executing").await;
        let result = match self.behavior {
            Behavior::Succeed | Behavior::FailOnStart => Ok(()),
            Behavior::Fail => Err(JobExecutionError::Failed(anyhow::anyhow!("disk full"))),
            Behavior::Panic => {
                self.running.fetch_sub(1, Ordering::SeqCst);
                panic!("job exploded");
            }
            Behavior::Block => self.block(context, true).await,
            Behavior::BlockIgnoringAbort => self.block(context, false).await,
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn on_success(&self, _context: &JobExecutionContext) -> anyhow::Result<()> {
        self.event("on_success");
        Ok(())
    }
}
