//! ID resolver module
//!
//! Resolves job record id prefixes to full ids, so operators can type the first few
//! characters of an id instead of the whole UUID.

use anyhow::{Context, Result, anyhow};
use jobstore_service::Store;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Number of most recent records searched for a prefix
const RESOLVE_WINDOW: i64 = 10_000;

/// Resolve a job record id or prefix to a full UUID
///
/// A full UUID is returned as is. A prefix must match exactly one of the most recent
/// records.
pub async fn resolve_job_id(store: &Store, id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    if let Some(uuid) = id_or_prefix.as_uuid() {
        return Ok(uuid);
    }

    let jobs = store
        .jobs
        .list_recent(RESOLVE_WINDOW)
        .await
        .context("Failed to fetch jobs for ID resolution")?;

    let matches: Vec<Uuid> = jobs
        .iter()
        .map(|job| job.id)
        .filter(|id| id_or_prefix.matches(id))
        .collect();

    unique_match(id_or_prefix, &matches)
}

fn unique_match(id_or_prefix: &IdOrPrefix, matches: &[Uuid]) -> Result<Uuid> {
    match matches {
        [] => Err(anyhow!(
            "No job found with ID starting with '{}'",
            id_or_prefix
        )),
        [id] => Ok(*id),
        _ => {
            let ids: Vec<String> = matches.iter().map(Uuid::to_string).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple jobs: {}",
                id_or_prefix,
                ids.join(", ")
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobstore_core::domain::job::{JobExecutionPriority, RunningState};
    use jobstore_core::dto::job::CreateJobInfo;
    use std::collections::HashMap;

    async fn create(store: &Store, name: &str) -> Uuid {
        store
            .jobs
            .create(CreateJobInfo {
                name: name.to_string(),
                host: "cli-test".to_string(),
                thread: "main".to_string(),
                max_execution_time_ms: 60_000,
                running_state: RunningState::Queued,
                execution_priority: JobExecutionPriority::CheckPreconditions,
                parameters: HashMap::new(),
                additional_data: HashMap::new(),
            })
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_resolve_unique_prefix() {
        let store = Store::in_memory();
        let id = create(&store, "import").await;

        let prefix = IdOrPrefix::parse(&id.to_string()[..8]);
        assert_eq!(resolve_job_id(&store, &prefix).await.unwrap(), id);
    }

    #[tokio::test]
    async fn test_resolve_full_id_skips_lookup() {
        let store = Store::in_memory();
        let id = Uuid::new_v4();

        let full = IdOrPrefix::parse(&id.to_string());
        assert_eq!(resolve_job_id(&store, &full).await.unwrap(), id);
    }

    #[tokio::test]
    async fn test_resolve_unknown_prefix_fails() {
        let store = Store::in_memory();
        create(&store, "import").await;

        let result = resolve_job_id(&store, &IdOrPrefix::parse("zzzz")).await;
        assert!(result.unwrap_err().to_string().contains("No job found"));
    }

    #[test]
    fn test_ambiguous_prefix_is_rejected() {
        let first = Uuid::parse_str("aaaa0000-0000-0000-0000-000000000001").unwrap();
        let second = Uuid::parse_str("aaaa0000-0000-0000-0000-000000000002").unwrap();

        let result = unique_match(&IdOrPrefix::parse("aaaa"), &[first, second]);
        assert!(result.unwrap_err().to_string().contains("Ambiguous prefix"));
    }
}
