//! Remote execution
//!
//! Starting a remote job only records the executor's job URI on the RUNNING record.
//! Completion is detected later by `reconcile`, driven by `JobService::poll_remote_jobs`.

use jobstore_client::{ClientError, RemoteJobExecutor};
use jobstore_core::domain::job::{
    EXIT_CODE, JobInfo, REMOTE_JOB_URI, RESUMED_ALREADY_RUNNING_JOB, ResultCode,
};
use jobstore_core::domain::log::LogLine;
use jobstore_core::domain::remote::RemotePhase;
use jobstore_core::dto::remote::RemoteJob;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::context::JobExecutionContext;
use crate::error::{StoreError, describe_failure};
use crate::repository::JobInfoRepository;
use crate::runnable::RemoteJobRunnable;

pub struct RemoteRunner {
    jobs: Arc<dyn JobInfoRepository>,
}

impl RemoteRunner {
    pub fn new(jobs: Arc<dyn JobInfoRepository>) -> Self {
        Self { jobs }
    }

    /// Starts a RUNNING record on its executor without waiting for the start request
    pub fn dispatch(
        &self,
        job: Arc<dyn RemoteJobRunnable>,
        executor: Arc<dyn RemoteJobExecutor>,
        context: JobExecutionContext,
    ) {
        let jobs = self.jobs.clone();
        tokio::spawn(async move {
            let name = context.name().to_string();
            if let Err(e) = start(jobs.as_ref(), job.as_ref(), executor.as_ref(), &context).await
            {
                error!("Failed to record start of remote job {}: {}", name, e);
            }
        });
    }

    /// Fetches the remote status of a RUNNING record and folds it into the store
    ///
    /// Failures to reach the executor are logged and leave the record untouched, so a
    /// later poll can retry.
    pub async fn reconcile(
        &self,
        job: &dyn RemoteJobRunnable,
        executor: &dyn RemoteJobExecutor,
        record: &JobInfo,
        context: &JobExecutionContext,
    ) -> Result<(), StoreError> {
        let Some(job_uri) = record.remote_job_uri() else {
            return Ok(());
        };
        let name = record.name.as_str();

        let status = match executor.get_status(job_uri).await {
            Ok(status) => status,
            Err(e) => {
                warn!("Failed to fetch status of remote job {} at {}: {}", name, job_uri, e);
                return Ok(());
            }
        };
        info!("Remote job {} ({}) is {:?}", name, record.id, status.status);

        let now = chrono::Utc::now();
        let lines: Vec<LogLine> = status
            .log_lines
            .iter()
            .map(|line| LogLine {
                line: line.clone(),
                timestamp: now,
            })
            .collect();
        self.jobs.set_log_lines(name, &lines).await?;

        if let Some(message) = status.message.as_deref().filter(|m| !m.is_empty()) {
            self.jobs.set_status_message(name, message).await?;
        }

        if status.status != RemotePhase::Finished {
            return Ok(());
        }

        let Some(result) = status.result else {
            warn!("Remote job {} finished without a result", name);
            self.jobs
                .mark_running_as_finished_with_error(name, "Remote job finished without a result")
                .await?;
            return Ok(());
        };

        if result.ok {
            match job.after_execution(context, &result).await {
                Ok(()) => {
                    self.jobs
                        .mark_running_as_finished(
                            name,
                            ResultCode::Successful,
                            result.message.as_deref(),
                        )
                        .await?;
                    info!("Remote job {} ({}) finished successfully", name, record.id);
                    if let Err(e) = job.on_success(context).await {
                        warn!("on_success hook of remote job {} failed: {:#}", name, e);
                    }
                }
                Err(e) => {
                    error!("after_execution hook of remote job {} failed: {:#}", name, e);
                    self.jobs
                        .mark_running_as_finished_with_error(
                            name,
                            &describe_failure(&e),
                        )
                        .await?;
                }
            }
        } else {
            warn!(
                "Remote job {} ({}) failed with exit code {}: {}",
                name,
                record.id,
                result.exit_code,
                result.message.as_deref().unwrap_or("")
            );
            self.jobs
                .add_additional_data(name, EXIT_CODE, &result.exit_code.to_string())
                .await?;
            self.jobs
                .mark_running_as_finished(name, ResultCode::Failed, result.message.as_deref())
                .await?;
        }

        Ok(())
    }
}

async fn start(
    jobs: &dyn JobInfoRepository,
    job: &dyn RemoteJobRunnable,
    executor: &dyn RemoteJobExecutor,
    context: &JobExecutionContext,
) -> Result<(), StoreError> {
    let name = context.name();

    if let Err(e) = job.on_start(context).await {
        error!("on_start hook of remote job {} failed: {:#}", name, e);
        jobs.mark_as_finished_with_error(context.id(), &describe_failure(&e))
            .await?;
        return Ok(());
    }

    let request = RemoteJob {
        name: name.to_string(),
        client_id: context.id().to_string(),
        parameters: context.parameters().clone(),
    };

    match executor.start_job(&request).await {
        Ok(job_uri) => {
            info!("Started remote job {} at {}", name, job_uri);
            jobs.add_additional_data(name, REMOTE_JOB_URI, &job_uri).await?;
        }
        Err(ClientError::AlreadyRunning { job_uri }) => {
            info!("Resuming already running remote job {} at {}", name, job_uri);
            jobs.add_additional_data(name, REMOTE_JOB_URI, &job_uri).await?;
            jobs.add_additional_data(name, RESUMED_ALREADY_RUNNING_JOB, "true")
                .await?;
        }
        Err(e) => {
            error!("Failed to start remote job {}: {}", name, e);
            jobs.mark_as_finished_with_error(
                context.id(),
                &format!("Failed to start remote job: {}", e),
            )
            .await?;
        }
    }

    Ok(())
}
