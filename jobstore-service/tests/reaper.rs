mod common;

use common::test_config;
use jobstore_core::domain::definition::JobDefinition;
use jobstore_core::domain::job::{JobExecutionPriority, ResultCode, RunningState};
use jobstore_core::dto::job::CreateJobInfo;
use jobstore_service::repository::InMemoryStore;
use jobstore_service::service::reaper::{CLEANUP_SWEEP, TIMEOUT_SWEEP};
use jobstore_service::{Reaper, Store};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

async fn create(
    store: &Store,
    name: &str,
    state: RunningState,
    max_execution_time_ms: i64,
) -> Uuid {
    store
        .jobs
        .create(CreateJobInfo {
            name: name.to_string(),
            host: "other-host".to_string(),
            thread: "worker-1".to_string(),
            max_execution_time_ms,
            running_state: state,
            execution_priority: JobExecutionPriority::CheckPreconditions,
            parameters: HashMap::new(),
            additional_data: HashMap::new(),
        })
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test]
async fn test_timed_out_job_is_reaped() {
    let store = Store::in_memory();
    let reaper = Reaper::new(&store, &test_config());
    let expired = create(&store, "import", RunningState::Running, 0).await;
    let alive = create(&store, "export", RunningState::Running, 60_000).await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(reaper.cleanup_timed_out_jobs().await.unwrap(), Some(1));

    let record = store.jobs.find_by_id(expired).await.unwrap().unwrap();
    assert_eq!(record.result_code, Some(ResultCode::TimedOut));
    let record = store.jobs.find_by_id(alive).await.unwrap().unwrap();
    assert_eq!(record.running_state, RunningState::Running);

    let lease = store.leases.find_lease(TIMEOUT_SWEEP).await.unwrap().unwrap();
    assert!(!lease.is_held());
    assert_eq!(lease.outcome, Some(ResultCode::Successful));
}

#[tokio::test]
async fn test_unbounded_timeout_does_not_break_the_sweep() {
    let store = Store::in_memory();
    let reaper = Reaper::new(&store, &test_config());
    let expired = create(&store, "import", RunningState::Running, 0).await;
    let unbounded = create(&store, "forever", RunningState::Running, i64::MAX).await;
    let clamped = create(
        &store,
        "long-running",
        RunningState::Running,
        JobDefinition::local("long-running", Duration::MAX).max_execution_time_ms(),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(reaper.cleanup_timed_out_jobs().await.unwrap(), Some(1));
    assert_eq!(reaper.cleanup_timed_out_jobs().await.unwrap(), Some(0));

    let record = store.jobs.find_by_id(expired).await.unwrap().unwrap();
    assert_eq!(record.result_code, Some(ResultCode::TimedOut));
    for id in [unbounded, clamped] {
        let record = store.jobs.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.running_state, RunningState::Running);
    }

    let lease = store.leases.find_lease(TIMEOUT_SWEEP).await.unwrap().unwrap();
    assert!(!lease.is_held());
    assert_eq!(lease.outcome, Some(ResultCode::Successful));
}

#[tokio::test]
async fn test_concurrent_reapers_reap_once() {
    let shared = Arc::new(InMemoryStore::new());
    let store = Store::from_memory(shared.clone());
    let id = create(&store, "import", RunningState::Running, 0).await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let reaper = Reaper::new(&Store::from_memory(shared.clone()), &test_config());
        handles.push(tokio::spawn(async move {
            reaper.cleanup_timed_out_jobs().await.unwrap()
        }));
    }

    let mut reaped = 0;
    for handle in handles {
        reaped += handle.await.unwrap().unwrap_or(0);
    }
    assert_eq!(reaped, 1);

    let record = store.jobs.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(record.result_code, Some(ResultCode::TimedOut));
}

#[tokio::test]
async fn test_sweep_is_skipped_while_lease_is_held() {
    let store = Store::in_memory();
    let reaper = Reaper::new(&store, &test_config());
    let expires_at = chrono::Utc::now() + chrono::Duration::minutes(5);
    store
        .leases
        .acquire_lease(TIMEOUT_SWEEP, "busy-host/1", expires_at)
        .await
        .unwrap()
        .unwrap();
    create(&store, "import", RunningState::Running, 0).await;

    assert_eq!(reaper.cleanup_timed_out_jobs().await.unwrap(), None);
}

#[tokio::test]
async fn test_stale_lease_is_healed() {
    let store = Store::in_memory();
    let reaper = Reaper::new(&store, &test_config());
    let expired = chrono::Utc::now() - chrono::Duration::minutes(1);
    store
        .leases
        .acquire_lease(CLEANUP_SWEEP, "crashed-host/1", expired)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(reaper.cleanup_old_jobs().await.unwrap(), Some(0));

    let lease = store.leases.find_lease(CLEANUP_SWEEP).await.unwrap().unwrap();
    assert!(lease.holder.starts_with("test-host/"));
    assert!(!lease.is_held());
}

#[tokio::test]
async fn test_cleanup_deletes_only_old_finished_jobs() {
    let store = Store::in_memory();
    let mut config = test_config();
    config.retention = Duration::ZERO;
    config.not_executed_retention = Duration::ZERO;
    let reaper = Reaper::new(&store, &config);

    let finished = create(&store, "import", RunningState::Running, 60_000).await;
    store
        .jobs
        .mark_as_finished(finished, ResultCode::Successful, None)
        .await
        .unwrap();
    let running = create(&store, "export", RunningState::Running, 60_000).await;
    let queued = create(&store, "report", RunningState::Queued, 60_000).await;
    tokio::time::sleep(Duration::from_millis(5)).await;

    assert_eq!(reaper.cleanup_old_jobs().await.unwrap(), Some(1));
    assert!(store.jobs.find_by_id(finished).await.unwrap().is_none());
    assert!(store.jobs.find_by_id(running).await.unwrap().is_some());
    assert!(store.jobs.find_by_id(queued).await.unwrap().is_some());

    store.jobs.mark_queued_as_not_executed("report").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(reaper.cleanup_not_executed_jobs().await.unwrap(), Some(1));
    assert!(store.jobs.find_by_id(queued).await.unwrap().is_none());
}
