// SPDX-License-Identifier: MIT OR Apache-2.0
//! Versions.
//!
//! Versions are keyed by their deterministic property hash. Creating one is
//! idempotent. Saving assigns a semver: the major bumps when prompt-level
//! properties change (messages, instructions, output schema), the minor for
//! tuning changes within the same major. A saved version is immutable and
//! its semver never changes; an unsaved version may be garbage-collected
//! once no run references it.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use agw_core::error::{ErrorKind, GatewayError};
use agw_core::version::{MajorMinor, SavedVersion, VersionProperties};

/// Store of versions, keyed `(tenant_uid, agent_uid, version_id)`.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Fetch or create the version for these properties. The first version
    /// of a schema is auto-saved as `1.1`.
    async fn get_or_create_version(
        &self,
        tenant_uid: u64,
        agent_uid: u64,
        schema_id: u32,
        properties: VersionProperties,
    ) -> Result<SavedVersion, GatewayError>;

    /// Fetch by hash id.
    async fn get_version(
        &self,
        tenant_uid: u64,
        agent_uid: u64,
        version_id: &str,
    ) -> Result<SavedVersion, GatewayError>;

    /// Fetch by semver.
    async fn get_version_by_semver(
        &self,
        tenant_uid: u64,
        agent_uid: u64,
        semver: MajorMinor,
    ) -> Result<SavedVersion, GatewayError>;

    /// Assign a semver to a stored version; idempotent for already-saved
    /// versions.
    async fn save_version(
        &self,
        tenant_uid: u64,
        agent_uid: u64,
        version_id: &str,
    ) -> Result<SavedVersion, GatewayError>;

    /// Every version of an agent, saved and unsaved.
    async fn list_versions(
        &self,
        tenant_uid: u64,
        agent_uid: u64,
    ) -> Result<Vec<SavedVersion>, GatewayError>;
}

/// Whether a property change is prompt-level (major) or tuning (minor).
fn is_major_change(a: &VersionProperties, b: &VersionProperties) -> bool {
    a.messages != b.messages
        || a.instructions != b.instructions
        || a.output_schema != b.output_schema
        || a.structured_generation != b.structured_generation
}

/// In-memory version store.
#[derive(Debug, Default)]
pub struct MemoryVersionStore {
    inner: RwLock<BTreeMap<(u64, u64), Vec<SavedVersion>>>,
}

impl MemoryVersionStore {
    fn not_found(version: &str) -> GatewayError {
        GatewayError::new(
            ErrorKind::VersionNotFound,
            format!("version {version} not found"),
        )
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn get_or_create_version(
        &self,
        tenant_uid: u64,
        agent_uid: u64,
        schema_id: u32,
        properties: VersionProperties,
    ) -> Result<SavedVersion, GatewayError> {
        let id = properties.id();
        let mut inner = self.inner.write().await;
        let versions = inner.entry((tenant_uid, agent_uid)).or_default();
        if let Some(existing) = versions.iter().find(|v| v.id == id) {
            return Ok(existing.clone());
        }
        let is_first_of_schema = !versions.iter().any(|v| v.schema_id == schema_id);
        let version = SavedVersion {
            id,
            schema_id,
            properties,
            // The schema's first version is auto-saved.
            semver: is_first_of_schema.then_some(MajorMinor { major: 1, minor: 1 }),
            created_at: chrono::Utc::now(),
        };
        versions.push(version.clone());
        Ok(version)
    }

    async fn get_version(
        &self,
        tenant_uid: u64,
        agent_uid: u64,
        version_id: &str,
    ) -> Result<SavedVersion, GatewayError> {
        self.inner
            .read()
            .await
            .get(&(tenant_uid, agent_uid))
            .and_then(|versions| versions.iter().find(|v| v.id == version_id))
            .cloned()
            .ok_or_else(|| Self::not_found(version_id))
    }

    async fn get_version_by_semver(
        &self,
        tenant_uid: u64,
        agent_uid: u64,
        semver: MajorMinor,
    ) -> Result<SavedVersion, GatewayError> {
        self.inner
            .read()
            .await
            .get(&(tenant_uid, agent_uid))
            .and_then(|versions| versions.iter().find(|v| v.semver == Some(semver)))
            .cloned()
            .ok_or_else(|| Self::not_found(&semver.to_string()))
    }

    async fn save_version(
        &self,
        tenant_uid: u64,
        agent_uid: u64,
        version_id: &str,
    ) -> Result<SavedVersion, GatewayError> {
        let mut inner = self.inner.write().await;
        let versions = inner
            .get_mut(&(tenant_uid, agent_uid))
            .ok_or_else(|| Self::not_found(version_id))?;

        let saved: Vec<(MajorMinor, VersionProperties)> = versions
            .iter()
            .filter_map(|v| v.semver.map(|s| (s, v.properties.clone())))
            .collect();

        let version = versions
            .iter_mut()
            .find(|v| v.id == version_id)
            .ok_or_else(|| Self::not_found(version_id))?;
        if version.semver.is_some() {
            // A saved version's semver never changes.
            return Ok(version.clone());
        }

        let semver = match saved.iter().max_by_key(|(s, _)| *s) {
            None => MajorMinor { major: 1, minor: 1 },
            Some((latest, latest_properties)) => {
                if is_major_change(latest_properties, &version.properties) {
                    MajorMinor {
                        major: latest.major + 1,
                        minor: 1,
                    }
                } else {
                    MajorMinor {
                        major: latest.major,
                        minor: latest.minor + 1,
                    }
                }
            }
        };
        version.semver = Some(semver);
        Ok(version.clone())
    }

    async fn list_versions(
        &self,
        tenant_uid: u64,
        agent_uid: u64,
    ) -> Result<Vec<SavedVersion>, GatewayError> {
        Ok(self
            .inner
            .read()
            .await
            .get(&(tenant_uid, agent_uid))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agw_core::message::Message;

    fn props(model: &str, temperature: f64) -> VersionProperties {
        VersionProperties {
            model: Some(model.into()),
            temperature: Some(temperature),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn create_is_idempotent() {
        let store = MemoryVersionStore::default();
        let a = store
            .get_or_create_version(1, 1, 1, props("gpt-4o", 0.5))
            .await
            .unwrap();
        let b = store
            .get_or_create_version(1, 1, 1, props("gpt-4o", 0.5))
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(store.list_versions(1, 1).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn first_version_of_a_schema_is_auto_saved() {
        let store = MemoryVersionStore::default();
        let v = store
            .get_or_create_version(1, 1, 1, props("gpt-4o", 0.5))
            .await
            .unwrap();
        assert_eq!(v.semver, Some(MajorMinor { major: 1, minor: 1 }));
        let second = store
            .get_or_create_version(1, 1, 1, props("gpt-4o", 0.9))
            .await
            .unwrap();
        assert!(second.semver.is_none());
    }

    #[tokio::test]
    async fn tuning_changes_bump_the_minor() {
        let store = MemoryVersionStore::default();
        store
            .get_or_create_version(1, 1, 1, props("gpt-4o", 0.5))
            .await
            .unwrap();
        let v2 = store
            .get_or_create_version(1, 1, 1, props("gpt-4o-mini", 0.5))
            .await
            .unwrap();
        let saved = store.save_version(1, 1, &v2.id).await.unwrap();
        assert_eq!(saved.semver, Some(MajorMinor { major: 1, minor: 2 }));
    }

    #[tokio::test]
    async fn prompt_changes_bump_the_major() {
        let store = MemoryVersionStore::default();
        store
            .get_or_create_version(1, 1, 1, props("gpt-4o", 0.5))
            .await
            .unwrap();
        let mut changed = props("gpt-4o", 0.5);
        changed.messages = Some(vec![Message::system("You greet people.")]);
        let v2 = store
            .get_or_create_version(1, 1, 1, changed)
            .await
            .unwrap();
        let saved = store.save_version(1, 1, &v2.id).await.unwrap();
        assert_eq!(saved.semver, Some(MajorMinor { major: 2, minor: 1 }));
    }

    #[tokio::test]
    async fn output_schema_changes_bump_the_major() {
        let store = MemoryVersionStore::default();
        store
            .get_or_create_version(1, 1, 1, props("gpt-4o", 0.5))
            .await
            .unwrap();
        let mut changed = props("gpt-4o", 0.5);
        changed.output_schema = Some(serde_json::json!({
            "type": "object",
            "properties": {"greeting": {"type": "string"}},
        }));
        let v2 = store
            .get_or_create_version(1, 1, 1, changed)
            .await
            .unwrap();
        let saved = store.save_version(1, 1, &v2.id).await.unwrap();
        assert_eq!(saved.semver, Some(MajorMinor { major: 2, minor: 1 }));
    }

    #[tokio::test]
    async fn saving_twice_keeps_the_first_semver() {
        let store = MemoryVersionStore::default();
        let v = store
            .get_or_create_version(1, 1, 1, props("gpt-4o", 0.5))
            .await
            .unwrap();
        let first = store.save_version(1, 1, &v.id).await.unwrap();
        let second = store.save_version(1, 1, &v.id).await.unwrap();
        assert_eq!(first.semver, second.semver);
    }

    #[tokio::test]
    async fn semver_lookup() {
        let store = MemoryVersionStore::default();
        let v = store
            .get_or_create_version(1, 1, 1, props("gpt-4o", 0.5))
            .await
            .unwrap();
        let fetched = store
            .get_version_by_semver(1, 1, MajorMinor { major: 1, minor: 1 })
            .await
            .unwrap();
        assert_eq!(fetched.id, v.id);
        assert!(store
            .get_version_by_semver(1, 1, MajorMinor { major: 9, minor: 9 })
            .await
            .is_err());
    }
}
