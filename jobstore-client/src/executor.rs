//! Remote job executor operations
//!
//! The `RemoteJobExecutor` trait is what the engine depends on; `RemoteExecutorClient`
//! is its HTTP implementation.

use async_trait::async_trait;
use jobstore_core::domain::remote::RemoteJobStatus;
use jobstore_core::dto::remote::RemoteJob;
use reqwest::StatusCode;

use crate::RemoteExecutorClient;
use crate::error::{ClientError, Result};

/// Operations offered by a remote job executor
#[async_trait]
pub trait RemoteJobExecutor: Send + Sync {
    /// Starts a job on the executor
    ///
    /// # Returns
    /// The status URI of the started job. If the executor reports the job as already
    /// running, fails with `ClientError::AlreadyRunning` carrying that job's URI.
    async fn start_job(&self, job: &RemoteJob) -> Result<String>;

    /// Stops a running job
    ///
    /// Fails with `ClientError::NotRunning` if the executor has no running job at `job_uri`.
    async fn stop_job(&self, job_uri: &str) -> Result<()>;

    /// Fetches the current status of a job
    async fn get_status(&self, job_uri: &str) -> Result<RemoteJobStatus>;

    /// Returns true if the executor answers on its base URI
    async fn is_alive(&self) -> bool;
}

#[async_trait]
impl RemoteJobExecutor for RemoteExecutorClient {
    async fn start_job(&self, job: &RemoteJob) -> Result<String> {
        let url = format!("{}/{}/start", self.base_url, job.name);
        tracing::debug!(job_name = %job.name, url = %url, "Starting remote job");

        let response = self.client.post(&url).json(job).send().await?;

        match response.status() {
            StatusCode::CREATED => self.job_uri_from(&response),
            StatusCode::SEE_OTHER => {
                let job_uri = self.job_uri_from(&response)?;
                tracing::info!(job_name = %job.name, job_uri = %job_uri, "Remote job is already running");
                Err(ClientError::AlreadyRunning { job_uri })
            }
            status => {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                Err(ClientError::api_error(status.as_u16(), error_text))
            }
        }
    }

    async fn stop_job(&self, job_uri: &str) -> Result<()> {
        let url = format!("{}/stop", job_uri.trim_end_matches('/'));
        let response = self.client.post(&url).send().await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::FORBIDDEN | StatusCode::NOT_FOUND | StatusCode::CONFLICT => {
                Err(ClientError::NotRunning(job_uri.to_string()))
            }
            status => {
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                Err(ClientError::api_error(status.as_u16(), error_text))
            }
        }
    }

    async fn get_status(&self, job_uri: &str) -> Result<RemoteJobStatus> {
        let response = self.client.get(job_uri).send().await?;

        self.handle_response(response).await
    }

    async fn is_alive(&self) -> bool {
        match self.client.get(&self.base_url).send().await {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(url = %self.base_url, error = %e, "Remote executor is not reachable");
                false
            }
        }
    }
}
