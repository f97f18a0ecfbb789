//! Configuration module
//!
//! Connection settings of the CLI.

use anyhow::{Context, Result};
use jobstore_service::Store;
use jobstore_service::db;
use sqlx::PgPool;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Connection string of the shared job store
    pub database_url: String,
}

impl Config {
    pub async fn pool(&self) -> Result<PgPool> {
        db::create_pool(&self.database_url)
            .await
            .context("Failed to connect to the job store")
    }

    /// Store adapter over a fresh connection pool
    pub async fn store(&self) -> Result<Store> {
        Ok(Store::postgres(self.pool().await?))
    }
}
