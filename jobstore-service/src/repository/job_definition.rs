//! Job Definition Repository
//!
//! PostgreSQL adapter for stored job definitions and their execution switches.

use async_trait::async_trait;
use jobstore_core::domain::definition::StoredJobDefinition;
use sqlx::PgPool;

use super::{JobDefinitionRepository, Result};

/// Job definitions stored in PostgreSQL
#[derive(Debug, Clone)]
pub struct PgJobDefinitionRepository {
    pool: PgPool,
}

impl PgJobDefinitionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobDefinitionRepository for PgJobDefinitionRepository {
    async fn add_or_update(&self, definition: &StoredJobDefinition) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_definitions
                (name, max_execution_time_ms, polling_interval_ms, remote, abortable,
                 max_retries, retry_interval_ms, disabled)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (name) DO UPDATE
            SET max_execution_time_ms = EXCLUDED.max_execution_time_ms,
                polling_interval_ms = EXCLUDED.polling_interval_ms,
                remote = EXCLUDED.remote,
                abortable = EXCLUDED.abortable,
                max_retries = EXCLUDED.max_retries,
                retry_interval_ms = EXCLUDED.retry_interval_ms
            "#,
        )
        .bind(&definition.name)
        .bind(definition.max_execution_time_ms)
        .bind(definition.polling_interval_ms)
        .bind(definition.remote)
        .bind(definition.abortable)
        .bind(definition.max_retries)
        .bind(definition.retry_interval_ms)
        .bind(definition.disabled)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, name: &str) -> Result<Option<StoredJobDefinition>> {
        let row = sqlx::query_as::<_, JobDefinitionRow>(
            r#"
            SELECT name, max_execution_time_ms, polling_interval_ms, remote, abortable,
                   max_retries, retry_interval_ms, disabled
            FROM job_definitions
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.into()))
    }

    async fn find_all(&self) -> Result<Vec<StoredJobDefinition>> {
        let rows = sqlx::query_as::<_, JobDefinitionRow>(
            r#"
            SELECT name, max_execution_time_ms, polling_interval_ms, remote, abortable,
                   max_retries, retry_interval_ms, disabled
            FROM job_definitions
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    async fn set_disabled(&self, name: &str, disabled: bool) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_definitions (name, disabled)
            VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET disabled = EXCLUDED.disabled
            "#,
        )
        .bind(name)
        .bind(disabled)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn is_disabled(&self, name: &str) -> Result<bool> {
        let disabled: Option<bool> =
            sqlx::query_scalar("SELECT disabled FROM job_definitions WHERE name = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;

        Ok(disabled.unwrap_or(false))
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobDefinitionRow {
    name: String,
    max_execution_time_ms: i64,
    polling_interval_ms: i64,
    remote: bool,
    abortable: bool,
    max_retries: i64,
    retry_interval_ms: i64,
    disabled: bool,
}

impl From<JobDefinitionRow> for StoredJobDefinition {
    fn from(row: JobDefinitionRow) -> Self {
        StoredJobDefinition {
            name: row.name,
            max_execution_time_ms: row.max_execution_time_ms,
            polling_interval_ms: row.polling_interval_ms,
            remote: row.remote,
            abortable: row.abortable,
            max_retries: row.max_retries,
            retry_interval_ms: row.retry_interval_ms,
            disabled: row.disabled,
        }
    }
}
