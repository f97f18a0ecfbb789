//! Job Service
//!
//! The execution coordinator. Turns "run job X" requests into queue, run or reject
//! outcomes, drains queued records, polls remote jobs, and handles abort and shutdown.
//!
//! Nothing here locks across instances: exclusivity comes from the store's conditional
//! writes, and a lost race is logged rather than raised.

use jobstore_core::domain::definition::{EXECUTION_SEMAPHORE, JobDefinition, StoredJobDefinition};
use jobstore_core::domain::job::{JobExecutionPriority, JobInfo, ResultCode, RunningState};
use jobstore_core::dto::job::CreateJobInfo;
use rand::Rng;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::current_thread_name;
use super::remote::RemoteRunner;
use super::runner::LocalRunner;
use crate::config::Config;
use crate::constraints::RunningConstraints;
use crate::context::JobExecutionContext;
use crate::error::JobError;
use crate::registry::JobRegistry;
use crate::repository::Store;
use crate::runnable::JobRunnable;

/// Decides whether this instance may execute jobs at all (e.g. blue/green gating)
pub trait ActivityCheck: Send + Sync {
    fn is_active(&self) -> bool;
}

/// Activity check of an instance that is always active
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysActive;

impl ActivityCheck for AlwaysActive {
    fn is_active(&self) -> bool {
        true
    }
}

/// Result of one attempt to start a QUEUED record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The record was activated and dispatched under this id
    Started(Uuid),
    /// The name already has a RUNNING record; the record stays queued
    AlreadyRunning,
    /// A constraint partner is running; the record stays queued
    ConstraintViolated,
    /// The job reported execution unnecessary; the record was finished as NOT_EXECUTED
    NotExecuted,
    /// Another instance activated or removed the record first
    LostRace,
    /// The name is not registered with this instance
    NotRegistered,
}

pub struct JobService {
    store: Store,
    config: Config,
    registry: JobRegistry,
    constraints: RunningConstraints,
    activity: Arc<dyn ActivityCheck>,
    local_runner: LocalRunner,
    remote_runner: RemoteRunner,
    shutting_down: AtomicBool,
}

impl JobService {
    pub fn new(store: Store, config: Config) -> Self {
        Self {
            local_runner: LocalRunner::new(store.jobs.clone()),
            remote_runner: RemoteRunner::new(store.jobs.clone()),
            store,
            config,
            registry: JobRegistry::new(),
            constraints: RunningConstraints::new(),
            activity: Arc::new(AlwaysActive),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn with_activity_check(mut self, activity: Arc<dyn ActivityCheck>) -> Self {
        self.activity = activity;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    // =============================================================================
    // Registration
    // =============================================================================

    /// Registers a job and persists its definition
    ///
    /// Returns false if the name was already registered; the new runnable replaces it.
    pub async fn register_job(&self, runnable: JobRunnable) -> Result<bool, JobError> {
        let mut stored = StoredJobDefinition::from(runnable.definition());
        stored.remote = runnable.is_remote();
        self.store.definitions.add_or_update(&stored).await?;

        let name = runnable.name().to_string();
        let added = self.registry.register(runnable);
        info!("Registered job {}", name);
        Ok(added)
    }

    /// Adds a set of job names that must never run at the same time
    pub async fn add_running_constraint<I, S>(&self, names: I) -> Result<bool, JobError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        self.constraints.add(names, &self.registry)
    }

    pub fn list_job_names(&self) -> Vec<String> {
        self.registry.names()
    }

    pub fn list_running_constraints(&self) -> Vec<BTreeSet<String>> {
        self.constraints.list()
    }

    pub fn job_definition(&self, name: &str) -> Option<JobDefinition> {
        self.registry
            .get(name)
            .map(|runnable| runnable.definition().clone())
    }

    // =============================================================================
    // Execution Switches
    // =============================================================================

    pub async fn is_execution_enabled(&self) -> Result<bool, JobError> {
        Ok(!self.store.definitions.is_disabled(EXECUTION_SEMAPHORE).await?)
    }

    /// Turns job execution on or off for the whole fleet
    pub async fn set_execution_enabled(&self, enabled: bool) -> Result<(), JobError> {
        self.store
            .definitions
            .set_disabled(EXECUTION_SEMAPHORE, !enabled)
            .await?;
        info!("Job execution {}", if enabled { "enabled" } else { "disabled" });
        Ok(())
    }

    pub async fn is_job_execution_enabled(&self, name: &str) -> Result<bool, JobError> {
        self.require_registered(name)?;
        Ok(!self.store.definitions.is_disabled(name).await?)
    }

    pub async fn set_job_execution_enabled(&self, name: &str, enabled: bool) -> Result<(), JobError> {
        self.require_registered(name)?;
        self.store.definitions.set_disabled(name, !enabled).await?;
        info!(
            "Execution of job {} {}",
            name,
            if enabled { "enabled" } else { "disabled" }
        );
        Ok(())
    }

    // =============================================================================
    // Execution
    // =============================================================================

    pub async fn execute_job(
        &self,
        name: &str,
        priority: JobExecutionPriority,
    ) -> Result<Uuid, JobError> {
        self.execute_job_with_parameters(name, priority, HashMap::new())
            .await
    }

    /// Requests execution of a job
    ///
    /// Queues or replaces a queued record, or starts the job right away when nothing of the
    /// same name is running. Returns the id of the record created for this request.
    pub async fn execute_job_with_parameters(
        &self,
        name: &str,
        priority: JobExecutionPriority,
        parameters: HashMap<String, String>,
    ) -> Result<Uuid, JobError> {
        if !self.is_active() {
            return Err(JobError::ServiceNotActive);
        }
        if !self.is_execution_enabled().await? {
            return Err(JobError::ExecutionDisabled(EXECUTION_SEMAPHORE.to_string()));
        }
        let runnable = self.require_registered(name)?;
        if self.store.definitions.is_disabled(name).await? {
            return Err(JobError::ExecutionDisabled(name.to_string()));
        }

        let jobs = &self.store.jobs;

        if let Some(queued) = jobs
            .find_by_name_and_running_state(name, RunningState::Queued)
            .await?
        {
            if !queued.has_lower_priority(priority) {
                return Err(JobError::AlreadyQueued(name.to_string()));
            }
            if jobs.remove_queued(queued.id).await? {
                info!(
                    "Replaced queued job {} ({:?}) with a {:?} request",
                    name, queued.execution_priority, priority
                );
                let id = self.queue_job(&runnable, priority, parameters).await?;
                return self.drain_new_record(name, id).await;
            }
            info!(
                "Queued job {} ({}) left the queue before it could be replaced",
                name, queued.id
            );
        }

        match jobs
            .find_by_name_and_running_state(name, RunningState::Running)
            .await?
        {
            None => {
                let id = self.queue_job(&runnable, priority, parameters).await?;
                self.drain_new_record(name, id).await
            }
            Some(running) if running.has_lower_priority(priority) => {
                let id = self.queue_job(&runnable, priority, parameters).await?;
                info!(
                    "Job {} is running with {:?}, queued {:?} request {}",
                    name, running.execution_priority, priority, id
                );
                Ok(id)
            }
            Some(_) => Err(JobError::ExecutionNotNecessary(name.to_string())),
        }
    }

    /// Attempts to start a QUEUED record
    ///
    /// Leaves the record queued if the name is already running or a constraint partner is
    /// running. Records queued with `CheckPreconditions` whose job reports execution
    /// unnecessary are finished as NOT_EXECUTED.
    pub async fn drain_queued_job(&self, queued: &JobInfo) -> Result<DrainOutcome, JobError> {
        let name = queued.name.as_str();
        let Some(runnable) = self.registry.get(name) else {
            return Ok(DrainOutcome::NotRegistered);
        };
        let jobs = &self.store.jobs;

        if jobs.has_job(name, RunningState::Running).await? {
            debug!("Job {} is already running, leaving it queued", name);
            return Ok(DrainOutcome::AlreadyRunning);
        }

        if self
            .constraints
            .violates_running_constraints(name, jobs.as_ref())
            .await?
        {
            info!("Job {} violates a running constraint, leaving it queued", name);
            return Ok(DrainOutcome::ConstraintViolated);
        }

        if queued.execution_priority.checks_preconditions()
            && !runnable.is_execution_necessary().await
        {
            if jobs.mark_queued_as_not_executed(name).await? {
                info!("Execution of job {} ({}) was not necessary", name, queued.id);
                return Ok(DrainOutcome::NotExecuted);
            }
            return Ok(DrainOutcome::LostRace);
        }

        if !jobs.activate_queued_job(name).await? {
            info!("Could not activate queued job {}, another instance was faster", name);
            return Ok(DrainOutcome::LostRace);
        }

        jobs.update_host_thread_information(name, &self.config.host, &current_thread_name())
            .await?;

        // the activated record may be a replacement queued by a concurrent request
        let Some(running) = jobs
            .find_by_name_and_running_state(name, RunningState::Running)
            .await?
        else {
            warn!("Activated job {} vanished before dispatch", name);
            return Ok(DrainOutcome::LostRace);
        };

        info!("Starting job {} ({})", name, running.id);
        self.dispatch(runnable, &running);
        Ok(DrainOutcome::Started(running.id))
    }

    /// Drains all QUEUED records, oldest first
    ///
    /// Returns the number of jobs started.
    pub async fn execute_queued_jobs(&self) -> Result<usize, JobError> {
        if !self.is_active() {
            info!("Job service is not active, not executing queued jobs");
            return Ok(0);
        }
        if !self.is_execution_enabled().await? {
            info!("Job execution is disabled, not executing queued jobs");
            return Ok(0);
        }

        self.desynchronize().await;

        let mut started = 0;
        for queued in self
            .store
            .jobs
            .find_queued_jobs_sorted_asc_by_creation_time()
            .await?
        {
            if !self.registry.contains(&queued.name) {
                debug!("Queued job {} is not registered here, skipping", queued.name);
                continue;
            }
            if self.store.definitions.is_disabled(&queued.name).await? {
                info!("Queued job {} is disabled, skipping", queued.name);
                continue;
            }

            match self.drain_queued_job(&queued).await {
                Ok(DrainOutcome::Started(_)) => started += 1,
                Ok(outcome) => debug!("Queued job {} not started: {:?}", queued.name, outcome),
                Err(e) => error!("Failed to start queued job {}: {}", queued.name, e),
            }
        }

        Ok(started)
    }

    /// Reconciles RUNNING remote jobs whose record is at least one polling interval old
    ///
    /// Returns the number of remote status fetches made.
    pub async fn poll_remote_jobs(&self) -> Result<usize, JobError> {
        if !self.is_active() {
            info!("Job service is not active, not polling remote jobs");
            return Ok(0);
        }
        if !self.is_execution_enabled().await? {
            info!("Job execution is disabled, not polling remote jobs");
            return Ok(0);
        }

        self.desynchronize().await;

        let mut polled = 0;
        for runnable in self.registry.remote_jobs() {
            let JobRunnable::Remote { job, executor } = &runnable else {
                continue;
            };
            let definition = runnable.definition();

            let Some(running) = self
                .store
                .jobs
                .find_by_name_and_running_state(&definition.name, RunningState::Running)
                .await?
            else {
                debug!("Remote job {} has no running instance", definition.name);
                continue;
            };

            let age = chrono::Utc::now() - running.last_modified_time;
            let polling_interval = chrono::Duration::from_std(definition.polling_interval)
                .unwrap_or(chrono::Duration::MAX);
            if age < polling_interval {
                debug!("Remote job {} is still fresh", definition.name);
                continue;
            }
            if running.remote_job_uri().is_none() {
                debug!("Remote job {} has not been started yet", definition.name);
                continue;
            }

            let context = self.context_for(&runnable, &running);
            if let Err(e) = self
                .remote_runner
                .reconcile(job.as_ref(), executor.as_ref(), &running, &context)
                .await
            {
                error!("Failed to update remote job {}: {}", definition.name, e);
            }
            polled += 1;
        }

        Ok(polled)
    }

    /// Restarts jobs whose most recent execution failed or timed out
    ///
    /// A job is retried at the priority of its failed record once that record is at least
    /// `retry_interval` old, as long as fewer than `max_retries` failed retries followed its
    /// last other outcome. Returns the number of executions requested.
    pub async fn retry_failed_jobs(&self) -> Result<usize, JobError> {
        if !self.is_active() {
            info!("Job service is not active, not retrying failed jobs");
            return Ok(0);
        }

        self.desynchronize().await;

        let mut retried = 0;
        for name in self.registry.names() {
            let Some(definition) = self.job_definition(&name) else {
                continue;
            };
            if definition.max_retries == 0 {
                continue;
            }
            match self.retry_failed_job(&definition).await {
                Ok(true) => retried += 1,
                Ok(false) => {}
                Err(e) => error!("Failed to retry job {}: {}", definition.name, e),
            }
        }

        Ok(retried)
    }

    /// Aborts a RUNNING record
    ///
    /// Local jobs observe the abort flag cooperatively. Remote jobs are stopped on their
    /// executor and finished as ABORTED right away. Returns false if the record is not
    /// running.
    pub async fn abort_job(&self, id: Uuid) -> Result<bool, JobError> {
        let jobs = &self.store.jobs;
        let record = jobs.find_by_id(id).await?.ok_or(JobError::NotFound(id))?;
        if record.running_state != RunningState::Running {
            return Ok(false);
        }

        let runnable = self.require_registered(&record.name)?;
        if !runnable.is_abortable() {
            return Err(JobError::NotAbortable(record.name));
        }

        if !jobs.abort_job(id).await? {
            return Ok(false);
        }
        info!("Abort requested for job {} ({})", record.name, id);

        if let JobRunnable::Remote { executor, .. } = &runnable {
            if let Some(job_uri) = record.remote_job_uri() {
                match executor.stop_job(job_uri).await {
                    Ok(()) => info!("Stopped remote job {} at {}", record.name, job_uri),
                    Err(e) if e.is_not_running() => {
                        info!("Remote job {} at {} was not running", record.name, job_uri)
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            jobs.mark_as_finished(id, ResultCode::Aborted, Some("Job was aborted"))
                .await?;
        }

        Ok(true)
    }

    /// Finishes the QUEUED record of a job as NOT_EXECUTED
    pub async fn remove_job_from_queue(&self, name: &str) -> Result<bool, JobError> {
        let removed = self.store.jobs.mark_queued_as_not_executed(name).await?;
        if removed {
            info!("Removed job {} from the queue", name);
        }
        Ok(removed)
    }

    /// Stops this instance from executing jobs
    ///
    /// Raises the abort flag of every local job running on this host, waits for the local
    /// workers up to the configured budget, then finishes whatever is still running here
    /// as ABORTED. Returns the number of records finished that way.
    pub async fn shutdown_jobs(&self) -> Result<usize, JobError> {
        self.shutting_down.store(true, Ordering::SeqCst);
        info!("Shutting down jobs on host {}", self.config.host);

        for record in self.local_running_on_this_host().await? {
            self.store.jobs.abort_job(record.id).await?;
        }

        if !self
            .local_runner
            .await_termination(self.config.await_termination)
            .await
        {
            warn!("Local jobs did not terminate within {:?}", self.config.await_termination);
        }

        let mut aborted = 0;
        for record in self.local_running_on_this_host().await? {
            if self
                .store
                .jobs
                .mark_as_finished(
                    record.id,
                    ResultCode::Aborted,
                    Some("shutdownJobs called from executing host"),
                )
                .await?
            {
                aborted += 1;
            }
        }

        Ok(aborted)
    }

    /// Accepts work again after `shutdown_jobs`
    pub fn startup(&self) {
        self.shutting_down.store(false, Ordering::SeqCst);
    }

    // =============================================================================
    // Helper Functions
    // =============================================================================

    fn is_active(&self) -> bool {
        !self.shutting_down.load(Ordering::SeqCst) && self.activity.is_active()
    }

    async fn retry_failed_job(&self, definition: &JobDefinition) -> Result<bool, JobError> {
        let name = definition.name.as_str();
        let jobs = &self.store.jobs;

        if jobs.has_job(name, RunningState::Running).await? {
            debug!("Job {} is running, not retrying it", name);
            return Ok(false);
        }

        // room for a queued record plus one failure more than the retry budget
        let limit = i64::from(definition.max_retries) + 2;
        let finished: Vec<JobInfo> = jobs
            .find_by_name(name, limit)
            .await?
            .into_iter()
            .filter(JobInfo::is_finished)
            .collect();

        let Some(last) = finished.first() else {
            debug!("Job {} has no finished execution, not retrying it", name);
            return Ok(false);
        };
        let failures = finished
            .iter()
            .take_while(|job| is_retryable(job.result_code))
            .count();
        if failures == 0 {
            debug!("Job {} last finished as {:?}, not retrying it", name, last.result_code);
            return Ok(false);
        }
        if failures > definition.max_retries as usize {
            debug!("Job {} used up its {} retries", name, definition.max_retries);
            return Ok(false);
        }

        let retry_interval =
            chrono::Duration::from_std(definition.retry_interval).unwrap_or(chrono::Duration::MAX);
        if chrono::Utc::now() - last.last_modified_time < retry_interval {
            debug!("Failed job {} is younger than its retry interval", name);
            return Ok(false);
        }

        match self.execute_job(name, last.execution_priority).await {
            Ok(id) => {
                info!(
                    "Retrying job {} ({} of {}) as {}",
                    name, failures, definition.max_retries, id
                );
                Ok(true)
            }
            Err(e) if e.is_contention() || e.is_disabled() => {
                debug!("Retry of job {} was not started: {}", name, e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn require_registered(&self, name: &str) -> Result<JobRunnable, JobError> {
        self.registry
            .get(name)
            .ok_or_else(|| JobError::NotRegistered(name.to_string()))
    }

    async fn queue_job(
        &self,
        runnable: &JobRunnable,
        priority: JobExecutionPriority,
        parameters: HashMap<String, String>,
    ) -> Result<Uuid, JobError> {
        let definition = runnable.definition();
        self.store
            .jobs
            .create(CreateJobInfo {
                name: definition.name.clone(),
                host: self.config.host.clone(),
                thread: current_thread_name(),
                max_execution_time_ms: definition.max_execution_time_ms(),
                running_state: RunningState::Queued,
                execution_priority: priority,
                parameters: runnable.parameters(parameters),
                additional_data: HashMap::new(),
            })
            .await?
            .ok_or_else(|| JobError::AlreadyQueued(definition.name.clone()))
    }

    /// Drain attempt right after `execute_job` queued a record
    async fn drain_new_record(&self, name: &str, id: Uuid) -> Result<Uuid, JobError> {
        let Some(queued) = self.store.jobs.find_by_id(id).await? else {
            return Err(JobError::AlreadyQueued(name.to_string()));
        };
        if queued.running_state != RunningState::Queued {
            return Ok(id);
        }

        match self.drain_queued_job(&queued).await? {
            DrainOutcome::Started(started) => Ok(started),
            DrainOutcome::NotExecuted => Err(JobError::ExecutionNotNecessary(name.to_string())),
            outcome => {
                debug!("Job {} ({}) stays queued: {:?}", name, id, outcome);
                Ok(id)
            }
        }
    }

    fn dispatch(&self, runnable: JobRunnable, record: &JobInfo) {
        let context = self.context_for(&runnable, record);
        match runnable {
            JobRunnable::Local(job) => self.local_runner.dispatch(job, context),
            JobRunnable::Remote { job, executor } => {
                self.remote_runner.dispatch(job, executor, context)
            }
        }
    }

    fn context_for(&self, runnable: &JobRunnable, record: &JobInfo) -> JobExecutionContext {
        JobExecutionContext::new(
            record.id,
            runnable.definition().clone(),
            record.execution_priority,
            record.parameters.clone(),
            self.store.jobs.clone(),
            self.config.abort_check_interval,
        )
    }

    async fn local_running_on_this_host(&self) -> Result<Vec<JobInfo>, JobError> {
        let running = self
            .store
            .jobs
            .find_by_running_state(RunningState::Running)
            .await?;
        Ok(running
            .into_iter()
            .filter(|record| record.host == self.config.host)
            .filter(|record| {
                self.registry
                    .get(&record.name)
                    .is_some_and(|runnable| !runnable.is_remote())
            })
            .collect())
    }

    /// Sleeps a random delay so that instances driven by identical timers spread out
    async fn desynchronize(&self) {
        let max = u64::try_from(self.config.desynchronize_max.as_millis()).unwrap_or(u64::MAX);
        if max == 0 {
            return;
        }
        let delay = {
            let mut rng = rand::thread_rng();
            rng.gen_range(1..=max)
        };
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }
}

fn is_retryable(result_code: Option<ResultCode>) -> bool {
    matches!(result_code, Some(ResultCode::Failed | ResultCode::TimedOut))
}
