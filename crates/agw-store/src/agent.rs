// SPDX-License-Identifier: MIT OR Apache-2.0
//! Agents and their schemas.
//!
//! Agents are created lazily on first use. A schema pair is streamlined
//! before it gets here; its digest decides identity: posting an identical
//! pair returns the existing `schema_id`, a new pair increments it.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use agw_core::error::{ErrorKind, GatewayError};
use agw_schema::SchemaPair;

/// One schema attached to an agent.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaRecord {
    /// Monotonically increasing id within the agent.
    pub schema_id: u32,
    /// The streamlined pair.
    pub pair: SchemaPair,
    /// Stable digest of the pair.
    pub digest: String,
}

/// A stored agent.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRecord {
    /// URL-safe agent id, unique within the tenant.
    pub agent_id: String,
    /// Numeric uid; `(tenant_uid, agent_uid)` is globally unique.
    pub agent_uid: u64,
    /// Schemas in creation order.
    pub schemas: Vec<SchemaRecord>,
}

impl AgentRecord {
    /// The schema with the given id.
    #[must_use]
    pub fn schema(&self, schema_id: u32) -> Option<&SchemaRecord> {
        self.schemas.iter().find(|s| s.schema_id == schema_id)
    }
}

/// Store of agents and their schemas.
#[async_trait]
pub trait AgentStore: Send + Sync {
    /// Fetch an agent, or create it with the given schema pair. Returns the
    /// record and the id of the schema matching `pair`.
    async fn get_or_create_agent(
        &self,
        tenant_uid: u64,
        agent_id: &str,
        pair: SchemaPair,
    ) -> Result<(AgentRecord, u32), GatewayError>;

    /// Fetch an agent.
    async fn get_agent(&self, tenant_uid: u64, agent_id: &str)
        -> Result<AgentRecord, GatewayError>;
}

/// In-memory agent store.
#[derive(Debug, Default)]
pub struct MemoryAgentStore {
    inner: RwLock<MemoryAgentInner>,
}

#[derive(Debug, Default)]
struct MemoryAgentInner {
    agents: BTreeMap<(u64, String), AgentRecord>,
    next_uid: u64,
}

#[async_trait]
impl AgentStore for MemoryAgentStore {
    async fn get_or_create_agent(
        &self,
        tenant_uid: u64,
        agent_id: &str,
        pair: SchemaPair,
    ) -> Result<(AgentRecord, u32), GatewayError> {
        let digest = pair.digest();
        let mut inner = self.inner.write().await;
        let key = (tenant_uid, agent_id.to_string());
        if let Some(agent) = inner.agents.get_mut(&key) {
            if let Some(existing) = agent.schemas.iter().find(|s| s.digest == digest) {
                let schema_id = existing.schema_id;
                return Ok((agent.clone(), schema_id));
            }
            let schema_id = agent.schemas.iter().map(|s| s.schema_id).max().unwrap_or(0) + 1;
            agent.schemas.push(SchemaRecord {
                schema_id,
                pair,
                digest,
            });
            return Ok((agent.clone(), schema_id));
        }

        inner.next_uid += 1;
        let agent = AgentRecord {
            agent_id: agent_id.to_string(),
            agent_uid: inner.next_uid,
            schemas: vec![SchemaRecord {
                schema_id: 1,
                pair,
                digest,
            }],
        };
        inner.agents.insert(key, agent.clone());
        Ok((agent, 1))
    }

    async fn get_agent(
        &self,
        tenant_uid: u64,
        agent_id: &str,
    ) -> Result<AgentRecord, GatewayError> {
        self.inner
            .read()
            .await
            .agents
            .get(&(tenant_uid, agent_id.to_string()))
            .cloned()
            .ok_or_else(|| {
                GatewayError::new(ErrorKind::AgentNotFound, format!("agent {agent_id} not found"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_post_creates_agent_with_schema_one() {
        let store = MemoryAgentStore::default();
        let (agent, schema_id) = store
            .get_or_create_agent(1, "greeter", SchemaPair::raw_messages())
            .await
            .unwrap();
        assert_eq!(schema_id, 1);
        assert_eq!(agent.agent_uid, 1);
    }

    #[tokio::test]
    async fn identical_schema_reuses_the_id() {
        let store = MemoryAgentStore::default();
        store
            .get_or_create_agent(1, "greeter", SchemaPair::raw_messages())
            .await
            .unwrap();
        let (_, schema_id) = store
            .get_or_create_agent(1, "greeter", SchemaPair::raw_messages())
            .await
            .unwrap();
        assert_eq!(schema_id, 1);
    }

    #[tokio::test]
    async fn changed_schema_increments_the_id() {
        let store = MemoryAgentStore::default();
        store
            .get_or_create_agent(1, "greeter", SchemaPair::raw_messages())
            .await
            .unwrap();
        let (agent, schema_id) = store
            .get_or_create_agent(1, "greeter", SchemaPair::raw_string_output())
            .await
            .unwrap();
        assert_eq!(schema_id, 2);
        assert_eq!(agent.schemas.len(), 2);
    }

    #[tokio::test]
    async fn uids_are_unique_per_tenant_scope() {
        let store = MemoryAgentStore::default();
        let (a, _) = store
            .get_or_create_agent(1, "one", SchemaPair::raw_messages())
            .await
            .unwrap();
        let (b, _) = store
            .get_or_create_agent(2, "two", SchemaPair::raw_messages())
            .await
            .unwrap();
        assert_ne!(a.agent_uid, b.agent_uid);
    }

    #[tokio::test]
    async fn missing_agent_is_agent_not_found() {
        let store = MemoryAgentStore::default();
        let err = store.get_agent(1, "ghost").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::AgentNotFound);
    }
}
