//! Local execution runner
//!
//! Runs job bodies on their own tokio tasks. Each execution gets a supervisor task that
//! awaits the body task and writes the outcome into the record, so a panicking body is
//! still recorded before the panic is resumed.

use jobstore_core::domain::job::ResultCode;
use std::any::Any;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::context::JobExecutionContext;
use crate::error::{JobExecutionError, StoreError};
use crate::repository::JobInfoRepository;
use crate::runnable::LocalJobRunnable;

/// Dispatches local job bodies and keeps track of their supervisors
pub struct LocalRunner {
    jobs: Arc<dyn JobInfoRepository>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl LocalRunner {
    pub fn new(jobs: Arc<dyn JobInfoRepository>) -> Self {
        Self {
            jobs,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Starts the body of a RUNNING record without waiting for it
    pub fn dispatch(&self, job: Arc<dyn LocalJobRunnable>, context: JobExecutionContext) {
        info!("Dispatching job {} ({})", context.name(), context.id());
        let handle = tokio::spawn(supervise(self.jobs.clone(), job, Arc::new(context)));

        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        workers.retain(|worker| !worker.is_finished());
        workers.push(handle);
    }

    /// Waits up to `timeout` for all dispatched executions to finish
    ///
    /// Returns false if some were still running when the timeout passed. Those keep
    /// running detached.
    pub async fn await_termination(&self, timeout: Duration) -> bool {
        let workers = {
            let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *workers)
        };
        let deadline = tokio::time::Instant::now() + timeout;

        let mut terminated = true;
        for worker in workers {
            if tokio::time::timeout_at(deadline, worker).await.is_err() {
                terminated = false;
            }
        }
        terminated
    }
}

async fn run_body(
    job: &dyn LocalJobRunnable,
    context: &JobExecutionContext,
) -> Result<(), JobExecutionError> {
    job.on_start(context).await?;
    job.execute(context).await
}

async fn supervise(
    jobs: Arc<dyn JobInfoRepository>,
    job: Arc<dyn LocalJobRunnable>,
    context: Arc<JobExecutionContext>,
) {
    let id = context.id();
    let name = context.name().to_string();

    let body = tokio::spawn({
        let job = job.clone();
        let context = context.clone();
        async move { run_body(job.as_ref(), &context).await }
    });

    match body.await {
        Ok(Ok(())) => {
            let marked = jobs.mark_as_finished(id, ResultCode::Successful, None).await;
            if record(&name, marked) {
                info!("Job {} ({}) finished successfully", name, id);
                if let Err(e) = job.on_success(&context).await {
                    warn!("on_success hook of job {} ({}) failed: {:#}", name, id, e);
                }
            }
        }
        Ok(Err(JobExecutionError::Aborted)) => {
            info!("Job {} ({}) was aborted", name, id);
            let marked = jobs
                .mark_as_finished(id, ResultCode::Aborted, Some("Job execution was aborted"))
                .await;
            record(&name, marked);
        }
        Ok(Err(e)) => {
            error!("Job {} ({}) failed: {:#}", name, id, e);
            let marked = jobs.mark_as_finished_with_error(id, &e.describe()).await;
            record(&name, marked);
        }
        Err(join_error) if join_error.is_panic() => {
            let payload = join_error.into_panic();
            let message = panic_message(payload.as_ref());
            error!("Job {} ({}) panicked: {}", name, id, message);
            let marked = jobs
                .mark_as_finished_with_error(id, &format!("Job panicked: {}", message))
                .await;
            record(&name, marked);
            std::panic::resume_unwind(payload);
        }
        Err(_) => {
            warn!("Job {} ({}) was cancelled", name, id);
            let marked = jobs
                .mark_as_finished(id, ResultCode::Aborted, Some("Job task was cancelled"))
                .await;
            record(&name, marked);
        }
    }
}

/// Logs the outcome of a final record update; true if the record was finished by it
fn record(name: &str, marked: Result<bool, StoreError>) -> bool {
    match marked {
        Ok(true) => true,
        Ok(false) => {
            warn!(
                "Job {} finished after its record was already closed (timed out or aborted)",
                name
            );
            false
        }
        Err(e) => {
            error!("Failed to record outcome of job {}: {}", name, e);
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
