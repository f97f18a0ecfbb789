mod common;

use async_trait::async_trait;
use common::{test_config, wait_for_finish, wait_until};
use jobstore_client::{ClientError, RemoteJobExecutor};
use jobstore_core::domain::definition::JobDefinition;
use jobstore_core::domain::job::{
    EXIT_CODE, JobExecutionPriority, REMOTE_JOB_URI, RESUMED_ALREADY_RUNNING_JOB, ResultCode,
    RunningState,
};
use jobstore_core::domain::remote::{RemoteJobResult, RemoteJobStatus};
use jobstore_core::dto::remote::RemoteJob;
use jobstore_service::{JobExecutionContext, JobRunnable, JobService, RemoteJobRunnable, Store};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

const JOB_URI: &str = "http://executor/jobs/render/42";

#[derive(Default)]
struct FakeExecutor {
    already_running: AtomicBool,
    refuse_start: AtomicBool,
    status: Mutex<Option<RemoteJobStatus>>,
    started: Mutex<Vec<RemoteJob>>,
    status_calls: AtomicUsize,
    stopped: Mutex<Vec<String>>,
}

impl FakeExecutor {
    fn report(&self, status: RemoteJobStatus) {
        *self.status.lock().unwrap() = Some(status);
    }

    fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteJobExecutor for FakeExecutor {
    async fn start_job(&self, job: &RemoteJob) -> Result<String, ClientError> {
        if self.refuse_start.load(Ordering::SeqCst) {
            return Err(ClientError::api_error(500, "executor overloaded"));
        }
        self.started.lock().unwrap().push(job.clone());
        if self.already_running.load(Ordering::SeqCst) {
            return Err(ClientError::AlreadyRunning {
                job_uri: JOB_URI.to_string(),
            });
        }
        Ok(JOB_URI.to_string())
    }

    async fn stop_job(&self, job_uri: &str) -> Result<(), ClientError> {
        self.stopped.lock().unwrap().push(job_uri.to_string());
        Ok(())
    }

    async fn get_status(&self, _job_uri: &str) -> Result<RemoteJobStatus, ClientError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.status
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ClientError::api_error(404, "unknown job"))
    }

    async fn is_alive(&self) -> bool {
        true
    }
}

struct RenderJob {
    definition: JobDefinition,
    fail_after_execution: bool,
    events: Mutex<Vec<String>>,
}

impl RenderJob {
    fn new(polling_interval: Duration) -> Self {
        Self {
            definition: JobDefinition::remote(
                "render",
                Duration::from_secs(600),
                polling_interval,
            )
            .abortable(),
            fail_after_execution: false,
            events: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl RemoteJobRunnable for RenderJob {
    fn definition(&self) -> &JobDefinition {
        &self.definition
    }

    async fn on_start(&self, _context: &JobExecutionContext) -> anyhow::Result<()> {
        self.events.lock().unwrap().push("on_start".to_string());
        Ok(())
    }

    async fn after_execution(
        &self,
        _context: &JobExecutionContext,
        result: &RemoteJobResult,
    ) -> anyhow::Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(format!("after_execution:{}", result.exit_code));
        if self.fail_after_execution {
            anyhow::bail!("could not publish artifacts");
        }
        Ok(())
    }

    async fn on_success(&self, _context: &JobExecutionContext) -> anyhow::Result<()> {
        self.events.lock().unwrap().push("on_success".to_string());
        Ok(())
    }
}

struct Fixture {
    store: Store,
    service: JobService,
    executor: Arc<FakeExecutor>,
}

async fn fixture(job: RenderJob, executor: FakeExecutor) -> Fixture {
    let store = Store::in_memory();
    let service = JobService::new(store.clone(), test_config());
    let executor = Arc::new(executor);
    service
        .register_job(JobRunnable::remote(job, executor.clone()))
        .await
        .unwrap();
    Fixture {
        store,
        service,
        executor,
    }
}

/// Starts the job and waits until the start request has been recorded
async fn start(fixture: &Fixture) -> Uuid {
    let id = fixture
        .service
        .execute_job("render", JobExecutionPriority::CheckPreconditions)
        .await
        .unwrap();
    let recorded = wait_until(|| async {
        fixture
            .store
            .jobs
            .find_by_id(id)
            .await
            .unwrap()
            .is_some_and(|job| {
                job.running_state != RunningState::Running
                    || job.additional_data.contains_key(REMOTE_JOB_URI)
            })
    })
    .await;
    assert!(recorded, "remote start was not recorded");
    id
}

fn finished(result: RemoteJobResult) -> RemoteJobStatus {
    RemoteJobStatus::finished(
        vec!["rendering".to_string(), "done".to_string()],
        result,
        "2026-01-01T12:00:00Z".to_string(),
    )
}

#[tokio::test]
async fn test_remote_job_success_records_result() {
    let fixture = fixture(RenderJob::new(Duration::ZERO), FakeExecutor::default()).await;
    let id = start(&fixture).await;

    let record = fixture.store.jobs.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.remote_job_uri(), Some(JOB_URI));
    let started = fixture.executor.started.lock().unwrap().clone();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].client_id, id.to_string());

    fixture.executor.report(finished(RemoteJobResult {
        ok: true,
        exit_code: 0,
        message: Some("rendered 12 frames".to_string()),
    }));
    assert_eq!(fixture.service.poll_remote_jobs().await.unwrap(), 1);

    let record = wait_for_finish(&fixture.store, id).await;
    assert_eq!(record.result_code, Some(ResultCode::Successful));
    assert_eq!(record.result_message.as_deref(), Some("rendered 12 frames"));
    let lines: Vec<_> = record.log_lines.iter().map(|l| l.line.as_str()).collect();
    assert_eq!(lines, vec!["rendering", "done"]);
}

#[tokio::test]
async fn test_remote_job_hooks_order() {
    let store = Store::in_memory();
    let service = JobService::new(store.clone(), test_config());
    let executor = Arc::new(FakeExecutor::default());
    let job = Arc::new(RenderJob::new(Duration::ZERO));
    service
        .register_job(JobRunnable::Remote {
            job: job.clone(),
            executor: executor.clone(),
        })
        .await
        .unwrap();

    let id = service
        .execute_job("render", JobExecutionPriority::ForceExecution)
        .await
        .unwrap();
    assert!(wait_until(|| async { !executor.started.lock().unwrap().is_empty() }).await);
    assert!(
        wait_until(|| async {
            store
                .jobs
                .find_by_id(id)
                .await
                .unwrap()
                .is_some_and(|job| job.remote_job_uri().is_some())
        })
        .await
    );

    executor.report(finished(RemoteJobResult {
        ok: true,
        exit_code: 0,
        message: None,
    }));
    service.poll_remote_jobs().await.unwrap();
    wait_for_finish(&store, id).await;

    let events = job.events.lock().unwrap().clone();
    assert_eq!(events, vec!["on_start", "after_execution:0", "on_success"]);
}

#[tokio::test]
async fn test_running_remote_job_updates_status() {
    let fixture = fixture(RenderJob::new(Duration::ZERO), FakeExecutor::default()).await;
    let id = start(&fixture).await;

    fixture.executor.report(RemoteJobStatus::running(
        vec!["frame 1".to_string()],
        Some("1/12 frames".to_string()),
    ));
    fixture.service.poll_remote_jobs().await.unwrap();

    let record = fixture.store.jobs.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.running_state, RunningState::Running);
    assert_eq!(record.status_message.as_deref(), Some("1/12 frames"));
    assert_eq!(record.log_lines.len(), 1);
}

#[tokio::test]
async fn test_remote_failure_records_exit_code() {
    let fixture = fixture(RenderJob::new(Duration::ZERO), FakeExecutor::default()).await;
    let id = start(&fixture).await;

    fixture.executor.report(finished(RemoteJobResult {
        ok: false,
        exit_code: 3,
        message: Some("out of memory".to_string()),
    }));
    fixture.service.poll_remote_jobs().await.unwrap();

    let record = fixture.store.jobs.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.result_code, Some(ResultCode::Failed));
    assert_eq!(record.additional_data.get(EXIT_CODE).map(String::as_str), Some("3"));
    assert_eq!(record.result_message.as_deref(), Some("out of memory"));
}

#[tokio::test]
async fn test_after_execution_failure_marks_job_failed() {
    let mut job = RenderJob::new(Duration::ZERO);
    job.fail_after_execution = true;
    let fixture = fixture(job, FakeExecutor::default()).await;
    let id = start(&fixture).await;

    fixture.executor.report(finished(RemoteJobResult {
        ok: true,
        exit_code: 0,
        message: None,
    }));
    fixture.service.poll_remote_jobs().await.unwrap();

    let record = fixture.store.jobs.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.result_code, Some(ResultCode::Failed));
    assert!(record.error_message.unwrap().contains("could not publish artifacts"));
}

#[tokio::test]
async fn test_poll_skips_recently_modified_jobs() {
    let fixture = fixture(
        RenderJob::new(Duration::from_secs(60)),
        FakeExecutor::default(),
    )
    .await;
    start(&fixture).await;

    assert_eq!(fixture.service.poll_remote_jobs().await.unwrap(), 0);
    assert_eq!(fixture.executor.status_calls(), 0);
}

#[tokio::test]
async fn test_unreachable_executor_leaves_record_running() {
    let fixture = fixture(RenderJob::new(Duration::ZERO), FakeExecutor::default()).await;
    let id = start(&fixture).await;

    assert_eq!(fixture.service.poll_remote_jobs().await.unwrap(), 1);
    assert_eq!(fixture.executor.status_calls(), 1);

    let record = fixture.store.jobs.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.running_state, RunningState::Running);
}

#[tokio::test]
async fn test_already_running_remote_job_is_resumed() {
    let executor = FakeExecutor::default();
    executor.already_running.store(true, Ordering::SeqCst);
    let fixture = fixture(RenderJob::new(Duration::ZERO), executor).await;
    let id = start(&fixture).await;

    let record = fixture.store.jobs.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.running_state, RunningState::Running);
    assert_eq!(record.remote_job_uri(), Some(JOB_URI));
    assert_eq!(
        record
            .additional_data
            .get(RESUMED_ALREADY_RUNNING_JOB)
            .map(String::as_str),
        Some("true")
    );
}

#[tokio::test]
async fn test_refused_start_marks_job_failed() {
    let executor = FakeExecutor::default();
    executor.refuse_start.store(true, Ordering::SeqCst);
    let fixture = fixture(RenderJob::new(Duration::ZERO), executor).await;
    let id = start(&fixture).await;

    let record = wait_for_finish(&fixture.store, id).await;
    assert_eq!(record.result_code, Some(ResultCode::Failed));
    assert!(
        record
            .error_message
            .unwrap()
            .starts_with("Failed to start remote job")
    );
}

#[tokio::test]
async fn test_abort_stops_remote_job() {
    let fixture = fixture(RenderJob::new(Duration::ZERO), FakeExecutor::default()).await;
    let id = start(&fixture).await;

    assert!(fixture.service.abort_job(id).await.unwrap());

    let record = fixture.store.jobs.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.result_code, Some(ResultCode::Aborted));
    assert!(record.aborted);
    assert_eq!(
        fixture.executor.stopped.lock().unwrap().clone(),
        vec![JOB_URI.to_string()]
    );
}

#[tokio::test]
async fn test_registered_remote_definition_is_marked_remote() {
    let fixture = fixture(RenderJob::new(Duration::ZERO), FakeExecutor::default()).await;

    let stored = fixture.store.definitions.find("render").await.unwrap().unwrap();
    assert!(stored.remote);
    assert!(stored.abortable);
}
