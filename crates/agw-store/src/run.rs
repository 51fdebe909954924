// SPDX-License-Identifier: MIT OR Apache-2.0
//! Runs.
//!
//! Runs are append-only and published only in a terminal state: the store
//! never holds an in-flight run, so readers cannot observe one. Listings
//! page by id, which UUIDv7 makes time-ordered.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use agw_core::error::{ErrorKind, GatewayError};
use agw_core::run::{Run, RunStatus};

/// Field filters for run search.
#[derive(Debug, Clone, Default)]
pub struct RunSearchQuery {
    /// Filter by terminal status.
    pub status: Option<RunStatus>,
    /// Filter by model.
    pub model: Option<String>,
    /// Filter by version id.
    pub version_id: Option<String>,
    /// Return runs with an id strictly before this one (paging cursor).
    pub before_id: Option<Uuid>,
    /// Page size; default 20.
    pub limit: Option<usize>,
}

/// Store of runs, keyed `(tenant_uid, run_id)`.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Publish a terminal run.
    ///
    /// # Errors
    ///
    /// `internal` when the run is somehow published twice.
    async fn insert_run(&self, tenant_uid: u64, run: Run) -> Result<(), GatewayError>;

    /// Fetch a run owned by an agent.
    async fn get_run(
        &self,
        tenant_uid: u64,
        agent_id: &str,
        run_id: Uuid,
    ) -> Result<Run, GatewayError>;

    /// Search an agent's runs, newest first.
    async fn search_runs(
        &self,
        tenant_uid: u64,
        agent_id: &str,
        query: &RunSearchQuery,
    ) -> Result<Vec<Run>, GatewayError>;
}

/// In-memory run store.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    inner: RwLock<BTreeMap<(u64, Uuid), Run>>,
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn insert_run(&self, tenant_uid: u64, run: Run) -> Result<(), GatewayError> {
        let mut inner = self.inner.write().await;
        let key = (tenant_uid, run.id);
        if inner.contains_key(&key) {
            return Err(GatewayError::internal(format!(
                "run {} was published twice",
                run.id
            )));
        }
        inner.insert(key, run);
        Ok(())
    }

    async fn get_run(
        &self,
        tenant_uid: u64,
        agent_id: &str,
        run_id: Uuid,
    ) -> Result<Run, GatewayError> {
        self.inner
            .read()
            .await
            .get(&(tenant_uid, run_id))
            .filter(|run| run.agent_id == agent_id)
            .cloned()
            .ok_or_else(|| {
                GatewayError::new(ErrorKind::RunNotFound, format!("run {run_id} not found"))
            })
    }

    async fn search_runs(
        &self,
        tenant_uid: u64,
        agent_id: &str,
        query: &RunSearchQuery,
    ) -> Result<Vec<Run>, GatewayError> {
        let inner = self.inner.read().await;
        let limit = query.limit.unwrap_or(20);
        let mut matches: Vec<Run> = inner
            .iter()
            .filter(|((t, _), _)| *t == tenant_uid)
            .map(|(_, run)| run)
            .filter(|run| run.agent_id == agent_id)
            .filter(|run| query.status.is_none_or(|s| run.status == s))
            .filter(|run| {
                query
                    .model
                    .as_deref()
                    .is_none_or(|m| run.version_properties.model.as_deref() == Some(m))
            })
            .filter(|run| query.version_id.as_deref().is_none_or(|v| run.version_id == v))
            .filter(|run| query.before_id.is_none_or(|cursor| run.id < cursor))
            .cloned()
            .collect();
        // Newest first; UUIDv7 ids order by creation time.
        matches.sort_by(|a, b| b.id.cmp(&a.id));
        matches.truncate(limit);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agw_core::ids::new_run_id;
    use chrono::Utc;

    fn run(agent_id: &str, status: RunStatus) -> Run {
        Run {
            id: new_run_id(),
            agent_id: agent_id.into(),
            schema_id: 1,
            version_id: "0".repeat(32),
            version_properties: Default::default(),
            task_input: serde_json::json!({}),
            task_input_hash: String::new(),
            task_output: serde_json::json!({}),
            task_output_hash: String::new(),
            task_input_preview: None,
            task_output_preview: None,
            status,
            cost_usd: None,
            duration_seconds: None,
            llm_completions: vec![],
            tool_calls: vec![],
            tool_call_requests: vec![],
            reasoning_steps: vec![],
            error: None,
            metadata: Default::default(),
            conversation_id: None,
            from_cache: false,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_then_get() {
        let store = MemoryRunStore::default();
        let r = run("greeter", RunStatus::Success);
        let id = r.id;
        store.insert_run(1, r).await.unwrap();
        let fetched = store.get_run(1, "greeter", id).await.unwrap();
        assert_eq!(fetched.id, id);
    }

    #[tokio::test]
    async fn get_scopes_by_agent_and_tenant() {
        let store = MemoryRunStore::default();
        let r = run("greeter", RunStatus::Success);
        let id = r.id;
        store.insert_run(1, r).await.unwrap();
        assert!(store.get_run(1, "other-agent", id).await.is_err());
        assert!(store.get_run(2, "greeter", id).await.is_err());
    }

    #[tokio::test]
    async fn double_publish_is_an_error() {
        let store = MemoryRunStore::default();
        let r = run("greeter", RunStatus::Success);
        store.insert_run(1, r.clone()).await.unwrap();
        assert!(store.insert_run(1, r).await.is_err());
    }

    #[tokio::test]
    async fn search_is_newest_first_and_paged() {
        let store = MemoryRunStore::default();
        let mut ids = Vec::new();
        for _ in 0..5 {
            let r = run("greeter", RunStatus::Success);
            ids.push(r.id);
            store.insert_run(1, r).await.unwrap();
        }
        let page = store
            .search_runs(
                1,
                "greeter",
                &RunSearchQuery {
                    limit: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, ids[4]);
        // Page two via cursor.
        let next = store
            .search_runs(
                1,
                "greeter",
                &RunSearchQuery {
                    limit: Some(2),
                    before_id: Some(page[1].id),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(next[0].id, ids[2]);
    }

    #[tokio::test]
    async fn search_filters_by_status() {
        let store = MemoryRunStore::default();
        store.insert_run(1, run("greeter", RunStatus::Success)).await.unwrap();
        store.insert_run(1, run("greeter", RunStatus::Failure)).await.unwrap();
        let failures = store
            .search_runs(
                1,
                "greeter",
                &RunSearchQuery {
                    status: Some(RunStatus::Failure),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(failures.len(), 1);
    }
}
