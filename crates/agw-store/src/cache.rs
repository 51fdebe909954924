// SPDX-License-Identifier: MIT OR Apache-2.0
//! The run cache.
//!
//! A content-addressed mapping from run fingerprints to prior successful
//! run ids. Entries reference runs, never duplicate payloads. Inserts are
//! first-writer-wins; there is no single-flight, so concurrent misses may
//! each execute.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use agw_core::error::GatewayError;

/// The cache key: everything that makes two runs interchangeable.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    /// Agent uid.
    pub agent_uid: u64,
    /// Schema id.
    pub schema_id: u32,
    /// Version hash.
    pub version_id: String,
    /// Input fingerprint.
    pub task_input_hash: String,
}

/// Store of cache entries.
#[async_trait]
pub trait RunCacheStore: Send + Sync {
    /// The cached run id for a fingerprint, when any.
    async fn get(&self, tenant_uid: u64, key: &CacheKey) -> Result<Option<Uuid>, GatewayError>;

    /// Record a successful run; the first writer wins.
    async fn insert_if_absent(
        &self,
        tenant_uid: u64,
        key: CacheKey,
        run_id: Uuid,
    ) -> Result<(), GatewayError>;
}

/// In-memory run cache.
#[derive(Debug, Default)]
pub struct MemoryRunCache {
    inner: RwLock<BTreeMap<(u64, CacheKey), Uuid>>,
}

#[async_trait]
impl RunCacheStore for MemoryRunCache {
    async fn get(&self, tenant_uid: u64, key: &CacheKey) -> Result<Option<Uuid>, GatewayError> {
        Ok(self
            .inner
            .read()
            .await
            .get(&(tenant_uid, key.clone()))
            .copied())
    }

    async fn insert_if_absent(
        &self,
        tenant_uid: u64,
        key: CacheKey,
        run_id: Uuid,
    ) -> Result<(), GatewayError> {
        self.inner
            .write()
            .await
            .entry((tenant_uid, key))
            .or_insert(run_id);
        Ok(())
    }
}
