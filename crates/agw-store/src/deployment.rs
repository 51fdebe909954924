// SPDX-License-Identifier: MIT OR Apache-2.0
//! Deployments: `(agent, schema, environment) → version`.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use agw_core::error::{ErrorKind, GatewayError};
use agw_core::version::VersionEnvironment;

/// Store of deployments. Re-deploying replaces the mapping atomically.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Point an environment at a version.
    async fn deploy(
        &self,
        tenant_uid: u64,
        agent_uid: u64,
        schema_id: u32,
        environment: VersionEnvironment,
        version_id: String,
    ) -> Result<(), GatewayError>;

    /// The version deployed to an environment.
    async fn get_deployment(
        &self,
        tenant_uid: u64,
        agent_uid: u64,
        schema_id: u32,
        environment: VersionEnvironment,
    ) -> Result<String, GatewayError>;

    /// Environments pointing at a version.
    async fn deployments_for_version(
        &self,
        tenant_uid: u64,
        agent_uid: u64,
        version_id: &str,
    ) -> Result<Vec<VersionEnvironment>, GatewayError>;
}

type Key = (u64, u64, u32, VersionEnvironment);

/// In-memory deployment store.
#[derive(Debug, Default)]
pub struct MemoryDeploymentStore {
    inner: RwLock<BTreeMap<Key, String>>,
}

#[async_trait]
impl DeploymentStore for MemoryDeploymentStore {
    async fn deploy(
        &self,
        tenant_uid: u64,
        agent_uid: u64,
        schema_id: u32,
        environment: VersionEnvironment,
        version_id: String,
    ) -> Result<(), GatewayError> {
        self.inner
            .write()
            .await
            .insert((tenant_uid, agent_uid, schema_id, environment), version_id);
        Ok(())
    }

    async fn get_deployment(
        &self,
        tenant_uid: u64,
        agent_uid: u64,
        schema_id: u32,
        environment: VersionEnvironment,
    ) -> Result<String, GatewayError> {
        self.inner
            .read()
            .await
            .get(&(tenant_uid, agent_uid, schema_id, environment))
            .cloned()
            .ok_or_else(|| {
                GatewayError::new(
                    ErrorKind::DeploymentNotFound,
                    format!("no deployment for environment {environment}"),
                )
            })
    }

    async fn deployments_for_version(
        &self,
        tenant_uid: u64,
        agent_uid: u64,
        version_id: &str,
    ) -> Result<Vec<VersionEnvironment>, GatewayError> {
        Ok(self
            .inner
            .read()
            .await
            .iter()
            .filter(|((t, a, _, _), v)| *t == tenant_uid && *a == agent_uid && *v == version_id)
            .map(|((_, _, _, env), _)| *env)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deploy_then_fetch() {
        let store = MemoryDeploymentStore::default();
        store
            .deploy(1, 1, 1, VersionEnvironment::Production, "abc".into())
            .await
            .unwrap();
        let v = store
            .get_deployment(1, 1, 1, VersionEnvironment::Production)
            .await
            .unwrap();
        assert_eq!(v, "abc");
    }

    #[tokio::test]
    async fn redeploy_replaces_the_mapping() {
        let store = MemoryDeploymentStore::default();
        store
            .deploy(1, 1, 1, VersionEnvironment::Production, "old".into())
            .await
            .unwrap();
        store
            .deploy(1, 1, 1, VersionEnvironment::Production, "new".into())
            .await
            .unwrap();
        let v = store
            .get_deployment(1, 1, 1, VersionEnvironment::Production)
            .await
            .unwrap();
        assert_eq!(v, "new");
    }

    #[tokio::test]
    async fn missing_deployment_is_deployment_not_found() {
        let store = MemoryDeploymentStore::default();
        let err = store
            .get_deployment(1, 1, 1, VersionEnvironment::Staging)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::DeploymentNotFound);
    }

    #[tokio::test]
    async fn reverse_lookup_by_version() {
        let store = MemoryDeploymentStore::default();
        store
            .deploy(1, 1, 1, VersionEnvironment::Dev, "abc".into())
            .await
            .unwrap();
        store
            .deploy(1, 1, 1, VersionEnvironment::Production, "abc".into())
            .await
            .unwrap();
        let envs = store.deployments_for_version(1, 1, "abc").await.unwrap();
        assert_eq!(envs.len(), 2);
    }
}
