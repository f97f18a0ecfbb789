//! Lease Repository
//!
//! PostgreSQL adapter for sweep leases. A lease row is held while `released_at` is NULL.

use async_trait::async_trait;
use jobstore_core::domain::job::ResultCode;
use jobstore_core::domain::lease::Lease;
use sqlx::PgPool;

use super::{LeaseRepository, Result, result_code_to_string, string_to_result_code};
use crate::error::StoreError;

/// Sweep leases stored in PostgreSQL
#[derive(Debug, Clone)]
pub struct PgLeaseRepository {
    pool: PgPool,
}

impl PgLeaseRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LeaseRepository for PgLeaseRepository {
    async fn expire_stale_lease(
        &self,
        name: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_leases
            SET released_at = $2, outcome = 'TIMED_OUT', message = 'Lease expired while held'
            WHERE name = $1 AND released_at IS NULL AND expires_at < $2
            "#,
        )
        .bind(name)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn acquire_lease(
        &self,
        name: &str,
        holder: &str,
        expires_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<Lease>> {
        let row = sqlx::query_as::<_, LeaseRow>(
            r#"
            INSERT INTO job_leases (name, holder, acquired_at, expires_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO UPDATE
            SET holder = EXCLUDED.holder,
                acquired_at = EXCLUDED.acquired_at,
                expires_at = EXCLUDED.expires_at,
                released_at = NULL,
                outcome = NULL,
                message = NULL
            WHERE job_leases.released_at IS NOT NULL
            RETURNING name, holder, acquired_at, expires_at, released_at, outcome, message
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(chrono::Utc::now())
        .bind(expires_at)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Lease::try_from).transpose()
    }

    async fn release_lease(
        &self,
        name: &str,
        holder: &str,
        outcome: ResultCode,
        message: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_leases
            SET released_at = $3, outcome = $4, message = $5
            WHERE name = $1 AND holder = $2 AND released_at IS NULL
            "#,
        )
        .bind(name)
        .bind(holder)
        .bind(chrono::Utc::now())
        .bind(result_code_to_string(outcome))
        .bind(message)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn find_lease(&self, name: &str) -> Result<Option<Lease>> {
        let row = sqlx::query_as::<_, LeaseRow>(
            r#"
            SELECT name, holder, acquired_at, expires_at, released_at, outcome, message
            FROM job_leases
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Lease::try_from).transpose()
    }

    async fn find_all_leases(&self) -> Result<Vec<Lease>> {
        let rows = sqlx::query_as::<_, LeaseRow>(
            r#"
            SELECT name, holder, acquired_at, expires_at, released_at, outcome, message
            FROM job_leases
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Lease::try_from).collect()
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct LeaseRow {
    name: String,
    holder: String,
    acquired_at: chrono::DateTime<chrono::Utc>,
    expires_at: chrono::DateTime<chrono::Utc>,
    released_at: Option<chrono::DateTime<chrono::Utc>>,
    outcome: Option<String>,
    message: Option<String>,
}

impl TryFrom<LeaseRow> for Lease {
    type Error = StoreError;

    fn try_from(row: LeaseRow) -> Result<Self> {
        Ok(Lease {
            name: row.name,
            holder: row.holder,
            acquired_at: row.acquired_at,
            expires_at: row.expires_at,
            released_at: row.released_at,
            outcome: row.outcome.as_deref().map(string_to_result_code).transpose()?,
            message: row.message,
        })
    }
}
