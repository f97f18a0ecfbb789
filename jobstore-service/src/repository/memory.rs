//! In-process store
//!
//! Implements all three repositories over plain maps. Every call takes the single store
//! mutex for its whole duration, which makes each operation atomic exactly like the
//! conditional writes of the PostgreSQL adapter.

use async_trait::async_trait;
use jobstore_core::domain::definition::StoredJobDefinition;
use jobstore_core::domain::job::{JobInfo, ResultCode, RunningState};
use jobstore_core::domain::lease::Lease;
use jobstore_core::domain::log::LogLine;
use jobstore_core::dto::job::CreateJobInfo;
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    JobDefinitionRepository, JobInfoRepository, LeaseRepository, Result, TIMED_OUT_MESSAGE,
};

#[derive(Default)]
struct State {
    jobs: HashMap<Uuid, JobInfo>,
    definitions: HashMap<String, StoredJobDefinition>,
    leases: HashMap<String, Lease>,
}

impl State {
    fn find_mut(&mut self, name: &str, state: RunningState) -> Option<&mut JobInfo> {
        self.jobs
            .values_mut()
            .find(|job| job.name == name && job.running_state == state)
    }

    fn has(&self, name: &str, state: RunningState) -> bool {
        self.jobs
            .values()
            .any(|job| job.name == name && job.running_state == state)
    }

    fn running_by_id(&mut self, id: Uuid) -> Option<&mut JobInfo> {
        self.jobs
            .get_mut(&id)
            .filter(|job| job.running_state == RunningState::Running)
    }

    fn sorted(&self, filter: impl Fn(&JobInfo) -> bool, newest_first: bool) -> Vec<JobInfo> {
        let mut jobs: Vec<JobInfo> = self.jobs.values().filter(|j| filter(j)).cloned().collect();
        jobs.sort_by_key(|job| job.creation_time);
        if newest_first {
            jobs.reverse();
        }
        jobs
    }
}

fn finish(
    job: &mut JobInfo,
    result_code: ResultCode,
    message: Option<&str>,
    now: chrono::DateTime<chrono::Utc>,
) {
    job.running_state = RunningState::Finished;
    job.result_code = Some(result_code);
    job.finish_time = Some(now);
    job.last_modified_time = now;
    if let Some(message) = message {
        job.result_message = Some(message.to_string());
    }
}

fn finish_with_error(job: &mut JobInfo, error: &str, now: chrono::DateTime<chrono::Utc>) {
    finish(job, ResultCode::Failed, None, now);
    job.error_message = Some(error.to_string());
}

fn limit_to_usize(limit: i64) -> usize {
    usize::try_from(limit).unwrap_or(0)
}

/// Store kept entirely in this process
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `update` on the name's RUNNING record and advances its modification time
    async fn update_running(&self, name: &str, update: impl FnOnce(&mut JobInfo)) {
        let mut state = self.state.lock().await;
        if let Some(job) = state.find_mut(name, RunningState::Running) {
            update(job);
            job.last_modified_time = chrono::Utc::now();
        }
    }

    /// Runs `update` on the record with `id` while it is RUNNING
    async fn update_running_by_id(&self, id: Uuid, update: impl FnOnce(&mut JobInfo)) -> bool {
        let mut state = self.state.lock().await;
        match state.running_by_id(id) {
            Some(job) => {
                update(job);
                job.last_modified_time = chrono::Utc::now();
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl JobInfoRepository for InMemoryStore {
    async fn create(&self, job: CreateJobInfo) -> Result<Option<Uuid>> {
        let mut state = self.state.lock().await;
        if job.running_state != RunningState::Finished && state.has(&job.name, job.running_state)
        {
            return Ok(None);
        }

        let id = Uuid::new_v4();
        let now = chrono::Utc::now();
        let start_time = (job.running_state == RunningState::Running).then_some(now);
        state.jobs.insert(
            id,
            JobInfo {
                id,
                name: job.name,
                host: job.host,
                thread: job.thread,
                execution_priority: job.execution_priority,
                running_state: job.running_state,
                result_code: None,
                creation_time: now,
                start_time,
                finish_time: None,
                last_modified_time: now,
                max_execution_time_ms: job.max_execution_time_ms,
                parameters: job.parameters,
                additional_data: job.additional_data,
                log_lines: Vec::new(),
                status_message: None,
                result_message: None,
                error_message: None,
                aborted: false,
            },
        );

        Ok(Some(id))
    }

    async fn activate_queued_job(&self, name: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.has(name, RunningState::Running) {
            return Ok(false);
        }

        let now = chrono::Utc::now();
        Ok(match state.find_mut(name, RunningState::Queued) {
            Some(job) => {
                job.running_state = RunningState::Running;
                job.start_time = Some(now);
                job.last_modified_time = now;
                true
            }
            None => false,
        })
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<JobInfo>> {
        Ok(self.state.lock().await.jobs.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str, limit: i64) -> Result<Vec<JobInfo>> {
        let state = self.state.lock().await;
        let mut jobs = state.sorted(|job| job.name == name, true);
        jobs.truncate(limit_to_usize(limit));
        Ok(jobs)
    }

    async fn find_by_name_and_running_state(
        &self,
        name: &str,
        state: RunningState,
    ) -> Result<Option<JobInfo>> {
        let store = self.state.lock().await;
        Ok(store
            .jobs
            .values()
            .find(|job| job.name == name && job.running_state == state)
            .cloned())
    }

    async fn find_by_running_state(&self, state: RunningState) -> Result<Vec<JobInfo>> {
        let store = self.state.lock().await;
        Ok(store.sorted(|job| job.running_state == state, false))
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<JobInfo>> {
        let state = self.state.lock().await;
        let mut jobs = state.sorted(|_| true, true);
        jobs.truncate(limit_to_usize(limit));
        Ok(jobs)
    }

    async fn mark_running_as_finished(
        &self,
        name: &str,
        result_code: ResultCode,
        message: Option<&str>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.find_mut(name, RunningState::Running) {
            Some(job) => {
                finish(job, result_code, message, chrono::Utc::now());
                true
            }
            None => false,
        })
    }

    async fn mark_running_as_finished_with_error(&self, name: &str, error: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.find_mut(name, RunningState::Running) {
            Some(job) => {
                finish_with_error(job, error, chrono::Utc::now());
                true
            }
            None => false,
        })
    }

    async fn mark_as_finished(
        &self,
        id: Uuid,
        result_code: ResultCode,
        message: Option<&str>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.running_by_id(id) {
            Some(job) => {
                finish(job, result_code, message, chrono::Utc::now());
                true
            }
            None => false,
        })
    }

    async fn mark_as_finished_with_error(&self, id: Uuid, error: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.running_by_id(id) {
            Some(job) => {
                finish_with_error(job, error, chrono::Utc::now());
                true
            }
            None => false,
        })
    }

    async fn mark_queued_as_not_executed(&self, name: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.find_mut(name, RunningState::Queued) {
            Some(job) => {
                finish(job, ResultCode::NotExecuted, None, chrono::Utc::now());
                true
            }
            None => false,
        })
    }

    async fn remove(&self, id: Uuid) -> Result<bool> {
        Ok(self.state.lock().await.jobs.remove(&id).is_some())
    }

    async fn remove_queued(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        let queued = state
            .jobs
            .get(&id)
            .is_some_and(|job| job.running_state == RunningState::Queued);
        if queued {
            state.jobs.remove(&id);
        }
        Ok(queued)
    }

    async fn abort_job(&self, id: Uuid) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.running_by_id(id) {
            Some(job) => {
                job.aborted = true;
                job.last_modified_time = chrono::Utc::now();
                true
            }
            None => false,
        })
    }

    async fn is_aborted(&self, id: Uuid) -> Result<bool> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&id).is_some_and(|job| job.aborted))
    }

    async fn add_additional_data(&self, name: &str, key: &str, value: &str) -> Result<()> {
        self.update_running(name, |job| {
            job.additional_data
                .insert(key.to_string(), value.to_string());
        })
        .await;
        Ok(())
    }

    async fn set_log_lines(&self, name: &str, lines: &[LogLine]) -> Result<()> {
        self.update_running(name, |job| job.log_lines = lines.to_vec())
            .await;
        Ok(())
    }

    async fn add_log_line(&self, name: &str, line: &LogLine) -> Result<()> {
        self.update_running(name, |job| job.log_lines.push(line.clone()))
            .await;
        Ok(())
    }

    async fn set_status_message(&self, name: &str, message: &str) -> Result<()> {
        self.update_running(name, |job| job.status_message = Some(message.to_string()))
            .await;
        Ok(())
    }

    async fn add_additional_data_by_id(&self, id: Uuid, key: &str, value: &str) -> Result<bool> {
        Ok(self
            .update_running_by_id(id, |job| {
                job.additional_data
                    .insert(key.to_string(), value.to_string());
            })
            .await)
    }

    async fn add_log_line_by_id(&self, id: Uuid, line: &LogLine) -> Result<bool> {
        Ok(self
            .update_running_by_id(id, |job| job.log_lines.push(line.clone()))
            .await)
    }

    async fn set_status_message_by_id(&self, id: Uuid, message: &str) -> Result<bool> {
        Ok(self
            .update_running_by_id(id, |job| job.status_message = Some(message.to_string()))
            .await)
    }

    async fn update_host_thread_information(
        &self,
        name: &str,
        host: &str,
        thread: &str,
    ) -> Result<()> {
        self.update_running(name, |job| {
            job.host = host.to_string();
            job.thread = thread.to_string();
        })
        .await;
        Ok(())
    }

    async fn cleanup_timed_out_jobs(&self, now: chrono::DateTime<chrono::Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let mut count = 0;
        for job in state.jobs.values_mut() {
            if job.running_state == RunningState::Running && job.is_expired(now) {
                finish(job, ResultCode::TimedOut, Some(TIMED_OUT_MESSAGE), now);
                count += 1;
            }
        }
        Ok(count)
    }

    async fn cleanup_old_jobs(&self, before: chrono::DateTime<chrono::Utc>) -> Result<u64> {
        let mut state = self.state.lock().await;
        let initial = state.jobs.len();
        state.jobs.retain(|_, job| {
            job.running_state != RunningState::Finished || job.last_modified_time >= before
        });
        Ok((initial - state.jobs.len()) as u64)
    }

    async fn cleanup_not_executed_jobs(
        &self,
        before: chrono::DateTime<chrono::Utc>,
    ) -> Result<u64> {
        let mut state = self.state.lock().await;
        let initial = state.jobs.len();
        state.jobs.retain(|_, job| {
            job.result_code != Some(ResultCode::NotExecuted) || job.last_modified_time >= before
        });
        Ok((initial - state.jobs.len()) as u64)
    }

    async fn distinct_job_names(&self) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        let mut names: Vec<String> = state.jobs.values().map(|job| job.name.clone()).collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.state.lock().await.jobs.len() as u64)
    }
}

#[async_trait]
impl JobDefinitionRepository for InMemoryStore {
    async fn add_or_update(&self, definition: &StoredJobDefinition) -> Result<()> {
        let mut state = self.state.lock().await;
        let disabled = state
            .definitions
            .get(&definition.name)
            .map_or(definition.disabled, |existing| existing.disabled);
        state.definitions.insert(
            definition.name.clone(),
            StoredJobDefinition {
                disabled,
                ..definition.clone()
            },
        );
        Ok(())
    }

    async fn find(&self, name: &str) -> Result<Option<StoredJobDefinition>> {
        Ok(self.state.lock().await.definitions.get(name).cloned())
    }

    async fn find_all(&self) -> Result<Vec<StoredJobDefinition>> {
        let state = self.state.lock().await;
        let mut definitions: Vec<StoredJobDefinition> =
            state.definitions.values().cloned().collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(definitions)
    }

    async fn set_disabled(&self, name: &str, disabled: bool) -> Result<()> {
        let mut state = self.state.lock().await;
        state
            .definitions
            .entry(name.to_string())
            .or_insert_with(|| StoredJobDefinition {
                name: name.to_string(),
                ..StoredJobDefinition::execution_semaphore()
            })
            .disabled = disabled;
        Ok(())
    }
}

#[async_trait]
impl LeaseRepository for InMemoryStore {
    async fn expire_stale_lease(
        &self,
        name: &str,
        now: chrono::DateTime<chrono::Utc>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.leases.get_mut(name) {
            Some(lease) if lease.is_stale(now) => {
                lease.released_at = Some(now);
                lease.outcome = Some(ResultCode::TimedOut);
                lease.message = Some("Lease expired while held".to_string());
                true
            }
            _ => false,
        })
    }

    async fn acquire_lease(
        &self,
        name: &str,
        holder: &str,
        expires_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<Option<Lease>> {
        let mut state = self.state.lock().await;
        if state.leases.get(name).is_some_and(Lease::is_held) {
            return Ok(None);
        }

        let lease = Lease {
            name: name.to_string(),
            holder: holder.to_string(),
            acquired_at: chrono::Utc::now(),
            expires_at,
            released_at: None,
            outcome: None,
            message: None,
        };
        state.leases.insert(name.to_string(), lease.clone());
        Ok(Some(lease))
    }

    async fn release_lease(
        &self,
        name: &str,
        holder: &str,
        outcome: ResultCode,
        message: Option<&str>,
    ) -> Result<bool> {
        let mut state = self.state.lock().await;
        Ok(match state.leases.get_mut(name) {
            Some(lease) if lease.is_held() && lease.holder == holder => {
                lease.released_at = Some(chrono::Utc::now());
                lease.outcome = Some(outcome);
                lease.message = message.map(str::to_string);
                true
            }
            _ => false,
        })
    }

    async fn find_lease(&self, name: &str) -> Result<Option<Lease>> {
        Ok(self.state.lock().await.leases.get(name).cloned())
    }

    async fn find_all_leases(&self) -> Result<Vec<Lease>> {
        let state = self.state.lock().await;
        let mut leases: Vec<Lease> = state.leases.values().cloned().collect();
        leases.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(leases)
    }
}
