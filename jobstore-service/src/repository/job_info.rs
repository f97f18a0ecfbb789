//! Job Info Repository
//!
//! PostgreSQL adapter for job records. The per-name uniqueness of QUEUED and RUNNING records
//! is enforced by the partial unique index `idx_job_infos_name_active`.

use async_trait::async_trait;
use jobstore_core::domain::job::{JobInfo, ResultCode, RunningState};
use jobstore_core::domain::log::LogLine;
use jobstore_core::dto::job::CreateJobInfo;
use sqlx::PgPool;
use sqlx::types::Json;
use std::collections::HashMap;
use uuid::Uuid;

use super::{
    JobInfoRepository, Result, TIMED_OUT_MESSAGE, priority_to_string, result_code_to_string,
    running_state_to_string, string_to_priority, string_to_result_code, string_to_running_state,
};
use crate::error::StoreError;

const JOB_INFO_COLUMNS: &str = r#"
    id, name, host, thread, execution_priority, running_state, result_code,
    creation_time, start_time, finish_time, last_modified_time, max_execution_time_ms,
    parameters, additional_data, log_lines, status_message, result_message,
    error_message, aborted
"#;

/// Job records stored in PostgreSQL
#[derive(Debug, Clone)]
pub struct PgJobInfoRepository {
    pool: PgPool,
}

impl PgJobInfoRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobInfoRepository for PgJobInfoRepository {
    async fn create(&self, job: CreateJobInfo) -> Result<Option<Uuid>> {
        let id = Uuid::new_v4();
        let now = chrono::Utc::now();
        let start_time = (job.running_state == RunningState::Running).then_some(now);

        let result = sqlx::query(
            r#"
            INSERT INTO job_infos (
                id, name, host, thread, execution_priority, running_state,
                creation_time, start_time, last_modified_time, max_execution_time_ms,
                parameters, additional_data
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $7, $9, $10, $11)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&job.name)
        .bind(&job.host)
        .bind(&job.thread)
        .bind(priority_to_string(job.execution_priority))
        .bind(running_state_to_string(job.running_state))
        .bind(now)
        .bind(start_time)
        .bind(job.max_execution_time_ms)
        .bind(Json(&job.parameters))
        .bind(Json(&job.additional_data))
        .execute(&self.pool)
        .await?;

        Ok((result.rows_affected() > 0).then_some(id))
    }

    async fn activate_queued_job(&self, name: &str) -> Result<bool> {
        let now = chrono::Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE job_infos
            SET running_state = 'RUNNING', start_time = $2, last_modified_time = $2
            WHERE name = $1 AND running_state = 'QUEUED'
            "#,
        )
        .bind(name)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(r) => Ok(r.rows_affected() > 0),
            // a RUNNING record for the name already exists
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<JobInfo>> {
        let row = sqlx::query_as::<_, JobInfoRow>(&format!(
            "SELECT {} FROM job_infos WHERE id = $1",
            JOB_INFO_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobInfo::try_from).transpose()
    }

    async fn find_by_name(&self, name: &str, limit: i64) -> Result<Vec<JobInfo>> {
        let rows = sqlx::query_as::<_, JobInfoRow>(&format!(
            "SELECT {} FROM job_infos WHERE name = $1 ORDER BY creation_time DESC LIMIT $2",
            JOB_INFO_COLUMNS
        ))
        .bind(name)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobInfo::try_from).collect()
    }

    async fn find_by_name_and_running_state(
        &self,
        name: &str,
        state: RunningState,
    ) -> Result<Option<JobInfo>> {
        let row = sqlx::query_as::<_, JobInfoRow>(&format!(
            r#"
            SELECT {} FROM job_infos
            WHERE name = $1 AND running_state = $2
            ORDER BY creation_time DESC
            LIMIT 1
            "#,
            JOB_INFO_COLUMNS
        ))
        .bind(name)
        .bind(running_state_to_string(state))
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobInfo::try_from).transpose()
    }

    async fn find_by_running_state(&self, state: RunningState) -> Result<Vec<JobInfo>> {
        let rows = sqlx::query_as::<_, JobInfoRow>(&format!(
            "SELECT {} FROM job_infos WHERE running_state = $1 ORDER BY creation_time ASC",
            JOB_INFO_COLUMNS
        ))
        .bind(running_state_to_string(state))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobInfo::try_from).collect()
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<JobInfo>> {
        let rows = sqlx::query_as::<_, JobInfoRow>(&format!(
            "SELECT {} FROM job_infos ORDER BY creation_time DESC LIMIT $1",
            JOB_INFO_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(JobInfo::try_from).collect()
    }

    async fn has_job(&self, name: &str, state: RunningState) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM job_infos WHERE name = $1 AND running_state = $2)",
        )
        .bind(name)
        .bind(running_state_to_string(state))
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn mark_running_as_finished(
        &self,
        name: &str,
        result_code: ResultCode,
        message: Option<&str>,
    ) -> Result<bool> {
        let now = chrono::Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE job_infos
            SET running_state = 'FINISHED', result_code = $2, result_message = $3,
                finish_time = $4, last_modified_time = $4
            WHERE name = $1 AND running_state = 'RUNNING'
            "#,
        )
        .bind(name)
        .bind(result_code_to_string(result_code))
        .bind(message)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_running_as_finished_with_error(&self, name: &str, error: &str) -> Result<bool> {
        let now = chrono::Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE job_infos
            SET running_state = 'FINISHED', result_code = 'FAILED', error_message = $2,
                finish_time = $3, last_modified_time = $3
            WHERE name = $1 AND running_state = 'RUNNING'
            "#,
        )
        .bind(name)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_as_finished(
        &self,
        id: Uuid,
        result_code: ResultCode,
        message: Option<&str>,
    ) -> Result<bool> {
        let now = chrono::Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE job_infos
            SET running_state = 'FINISHED', result_code = $2, result_message = $3,
                finish_time = $4, last_modified_time = $4
            WHERE id = $1 AND running_state = 'RUNNING'
            "#,
        )
        .bind(id)
        .bind(result_code_to_string(result_code))
        .bind(message)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_as_finished_with_error(&self, id: Uuid, error: &str) -> Result<bool> {
        let now = chrono::Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE job_infos
            SET running_state = 'FINISHED', result_code = 'FAILED', error_message = $2,
                finish_time = $3, last_modified_time = $3
            WHERE id = $1 AND running_state = 'RUNNING'
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_queued_as_not_executed(&self, name: &str) -> Result<bool> {
        let now = chrono::Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE job_infos
            SET running_state = 'FINISHED', result_code = 'NOT_EXECUTED',
                finish_time = $2, last_modified_time = $2
            WHERE name = $1 AND running_state = 'QUEUED'
            "#,
        )
        .bind(name)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM job_infos WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_queued(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM job_infos WHERE id = $1 AND running_state = 'QUEUED'")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn abort_job(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_infos
            SET aborted = TRUE, last_modified_time = $2
            WHERE id = $1 AND running_state = 'RUNNING'
            "#,
        )
        .bind(id)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn is_aborted(&self, id: Uuid) -> Result<bool> {
        let aborted: Option<bool> = sqlx::query_scalar("SELECT aborted FROM job_infos WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(aborted.unwrap_or(false))
    }

    async fn add_additional_data(&self, name: &str, key: &str, value: &str) -> Result<()> {
        let entry = HashMap::from([(key, value)]);

        sqlx::query(
            r#"
            UPDATE job_infos
            SET additional_data = additional_data || $2, last_modified_time = $3
            WHERE name = $1 AND running_state = 'RUNNING'
            "#,
        )
        .bind(name)
        .bind(Json(entry))
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_log_lines(&self, name: &str, lines: &[LogLine]) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE job_infos
            SET log_lines = $2, last_modified_time = $3
            WHERE name = $1 AND running_state = 'RUNNING'
            "#,
        )
        .bind(name)
        .bind(Json(lines))
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn add_log_line(&self, name: &str, line: &LogLine) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE job_infos
            SET log_lines = log_lines || $2, last_modified_time = $3
            WHERE name = $1 AND running_state = 'RUNNING'
            "#,
        )
        .bind(name)
        .bind(Json([line]))
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_status_message(&self, name: &str, message: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE job_infos
            SET status_message = $2, last_modified_time = $3
            WHERE name = $1 AND running_state = 'RUNNING'
            "#,
        )
        .bind(name)
        .bind(message)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn add_additional_data_by_id(&self, id: Uuid, key: &str, value: &str) -> Result<bool> {
        let entry = HashMap::from([(key, value)]);

        let result = sqlx::query(
            r#"
            UPDATE job_infos
            SET additional_data = additional_data || $2, last_modified_time = $3
            WHERE id = $1 AND running_state = 'RUNNING'
            "#,
        )
        .bind(id)
        .bind(Json(entry))
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn add_log_line_by_id(&self, id: Uuid, line: &LogLine) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_infos
            SET log_lines = log_lines || $2, last_modified_time = $3
            WHERE id = $1 AND running_state = 'RUNNING'
            "#,
        )
        .bind(id)
        .bind(Json([line]))
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_status_message_by_id(&self, id: Uuid, message: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE job_infos
            SET status_message = $2, last_modified_time = $3
            WHERE id = $1 AND running_state = 'RUNNING'
            "#,
        )
        .bind(id)
        .bind(message)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_host_thread_information(
        &self,
        name: &str,
        host: &str,
        thread: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE job_infos
            SET host = $2, thread = $3, last_modified_time = $4
            WHERE name = $1 AND running_state = 'RUNNING'
            "#,
        )
        .bind(name)
        .bind(host)
        .bind(thread)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn cleanup_timed_out_jobs(&self, now: chrono::DateTime<chrono::Utc>) -> Result<u64> {
        // elapsed time is compared in milliseconds: adding a huge timeout to a timestamp overflows
        let result = sqlx::query(
            r#"
            UPDATE job_infos
            SET running_state = 'FINISHED', result_code = 'TIMED_OUT', result_message = $2,
                finish_time = $1, last_modified_time = $1
            WHERE running_state = 'RUNNING'
              AND EXTRACT(EPOCH FROM ($1 - last_modified_time)) * 1000 > max_execution_time_ms
            "#,
        )
        .bind(now)
        .bind(TIMED_OUT_MESSAGE)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn cleanup_old_jobs(&self, before: chrono::DateTime<chrono::Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM job_infos WHERE running_state = 'FINISHED' AND last_modified_time < $1",
        )
        .bind(before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn cleanup_not_executed_jobs(
        &self,
        before: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM job_infos
            WHERE running_state = 'FINISHED' AND result_code = 'NOT_EXECUTED'
              AND last_modified_time < $1
            "#,
        )
        .bind(before)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn distinct_job_names(&self) -> Result<Vec<String>> {
        let names = sqlx::query_scalar("SELECT DISTINCT name FROM job_infos ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        Ok(names)
    }

    async fn count(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM job_infos")
            .fetch_one(&self.pool)
            .await?;

        Ok(u64::try_from(count).unwrap_or(0))
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobInfoRow {
    id: Uuid,
    name: String,
    host: String,
    thread: String,
    execution_priority: String,
    running_state: String,
    result_code: Option<String>,
    creation_time: chrono::DateTime<chrono::Utc>,
    start_time: Option<chrono::DateTime<chrono::Utc>>,
    finish_time: Option<chrono::DateTime<chrono::Utc>>,
    last_modified_time: chrono::DateTime<chrono::Utc>,
    max_execution_time_ms: i64,
    parameters: Json<HashMap<String, String>>,
    additional_data: Json<HashMap<String, String>>,
    log_lines: Json<Vec<LogLine>>,
    status_message: Option<String>,
    result_message: Option<String>,
    error_message: Option<String>,
    aborted: bool,
}

impl TryFrom<JobInfoRow> for JobInfo {
    type Error = StoreError;

    fn try_from(row: JobInfoRow) -> Result<Self> {
        Ok(JobInfo {
            id: row.id,
            name: row.name,
            host: row.host,
            thread: row.thread,
            execution_priority: string_to_priority(&row.execution_priority)?,
            running_state: string_to_running_state(&row.running_state)?,
            result_code: row
                .result_code
                .as_deref()
                .map(string_to_result_code)
                .transpose()?,
            creation_time: row.creation_time,
            start_time: row.start_time,
            finish_time: row.finish_time,
            last_modified_time: row.last_modified_time,
            max_execution_time_ms: row.max_execution_time_ms,
            parameters: row.parameters.0,
            additional_data: row.additional_data.0,
            log_lines: row.log_lines.0,
            status_message: row.status_message,
            result_message: row.result_message,
            error_message: row.error_message,
            aborted: row.aborted,
        })
    }
}
