use sqlx::{PgPool, postgres::PgPoolOptions};
use std::time::Duration;

pub async fn create_pool(database_url: &str) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    // One row per job attempt
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_infos (
            id UUID PRIMARY KEY,
            name VARCHAR(255) NOT NULL,
            host VARCHAR(255) NOT NULL,
            thread VARCHAR(255) NOT NULL,
            execution_priority VARCHAR(50) NOT NULL,
            running_state VARCHAR(50) NOT NULL,
            result_code VARCHAR(50),
            creation_time TIMESTAMPTZ NOT NULL,
            start_time TIMESTAMPTZ,
            finish_time TIMESTAMPTZ,
            last_modified_time TIMESTAMPTZ NOT NULL,
            max_execution_time_ms BIGINT NOT NULL,
            parameters JSONB NOT NULL DEFAULT '{}',
            additional_data JSONB NOT NULL DEFAULT '{}',
            log_lines JSONB NOT NULL DEFAULT '[]',
            status_message TEXT,
            result_message TEXT,
            error_message TEXT,
            aborted BOOLEAN NOT NULL DEFAULT FALSE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // At most one queued and one running record per job name
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_job_infos_name_active
        ON job_infos(name, running_state)
        WHERE running_state IN ('QUEUED', 'RUNNING')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_infos_state_creation ON job_infos(running_state, creation_time)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_infos_name_creation ON job_infos(name, creation_time DESC)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_job_infos_last_modified ON job_infos(last_modified_time)",
    )
    .execute(pool)
    .await?;

    // Job definitions and their execution switches
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_definitions (
            name VARCHAR(255) PRIMARY KEY,
            max_execution_time_ms BIGINT NOT NULL DEFAULT 0,
            polling_interval_ms BIGINT NOT NULL DEFAULT 0,
            remote BOOLEAN NOT NULL DEFAULT FALSE,
            abortable BOOLEAN NOT NULL DEFAULT FALSE,
            max_retries BIGINT NOT NULL DEFAULT 0,
            retry_interval_ms BIGINT NOT NULL DEFAULT 0,
            disabled BOOLEAN NOT NULL DEFAULT FALSE
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Sweep leases
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_leases (
            name VARCHAR(255) PRIMARY KEY,
            holder VARCHAR(255) NOT NULL,
            acquired_at TIMESTAMPTZ NOT NULL,
            expires_at TIMESTAMPTZ NOT NULL,
            released_at TIMESTAMPTZ,
            outcome VARCHAR(50),
            message TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database migrations completed successfully");
    Ok(())
}
