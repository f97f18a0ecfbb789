//! Jobstore Remote Executor Client
//!
//! A typed HTTP client for the remote job executor protocol. Remote jobs are started with
//! `POST {base}/{name}/start`, observed with `GET {jobUri}` and stopped with
//! `POST {jobUri}/stop`.
//!
//! # Example
//!
//! ```no_run
//! use jobstore_client::{RemoteExecutorClient, RemoteJobExecutor};
//! use jobstore_core::dto::remote::RemoteJob;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RemoteExecutorClient::new("http://executor:8080/jobs")?;
//!
//!     let job_uri = client.start_job(&RemoteJob {
//!         name: "import".to_string(),
//!         client_id: "9f0c3a52".to_string(),
//!         parameters: Default::default(),
//!     }).await?;
//!
//!     println!("Started remote job at {}", job_uri);
//!     Ok(())
//! }
//! ```

pub mod error;
mod executor;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use executor::RemoteJobExecutor;

use reqwest::{Client, Url, header::LINK, redirect::Policy};
use serde::de::DeserializeOwned;

/// HTTP client for a remote job executor
///
/// Redirects are never followed: a `303 See Other` on start carries the URI of an
/// already running job and has to be observed by the caller.
#[derive(Debug, Clone)]
pub struct RemoteExecutorClient {
    /// Base URL of the executor's job resources (e.g., "http://executor:8080/jobs")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl RemoteExecutorClient {
    /// Create a new executor client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the executor's job resources
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().redirect(Policy::none()).build()?;
        Self::with_client(base_url, client)
    }

    /// Create a new executor client with a custom HTTP client
    ///
    /// The client must not follow redirects, otherwise already running jobs can not be
    /// recognized on start.
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the executor's job resources
    /// * `client` - A configured reqwest Client
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Url::parse(&base_url).map_err(|e| ClientError::InvalidUri(format!("{}: {}", base_url, e)))?;
        Ok(Self { base_url, client })
    }

    /// Get the base URL of the executor
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Resolve the value of a `Link` header against the base URL
    ///
    /// Accepts a bare (absolute or relative) URI as well as the `<uri>; rel=...` form.
    pub fn resolve_link(&self, link: &str) -> Result<String> {
        let link = link.trim();
        let target = match link.strip_prefix('<') {
            Some(rest) => rest
                .split_once('>')
                .map(|(uri, _)| uri)
                .ok_or_else(|| ClientError::InvalidUri(link.to_string()))?,
            None => link.split(';').next().unwrap_or(link).trim(),
        };
        if target.is_empty() {
            return Err(ClientError::InvalidUri(link.to_string()));
        }

        let base = Url::parse(&format!("{}/", self.base_url))
            .map_err(|e| ClientError::InvalidUri(e.to_string()))?;
        base.join(target)
            .map(|url| url.to_string())
            .map_err(|e| ClientError::InvalidUri(format!("{}: {}", target, e)))
    }

    /// Extract and resolve the `Link` header of a response
    fn job_uri_from(&self, response: &reqwest::Response) -> Result<String> {
        let link = response
            .headers()
            .get(LINK)
            .ok_or_else(|| ClientError::ParseError("Missing Link header".to_string()))?
            .to_str()
            .map_err(|e| ClientError::ParseError(format!("Invalid Link header: {}", e)))?;
        self.resolve_link(link)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}
