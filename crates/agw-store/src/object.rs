// SPDX-License-Identifier: MIT OR Apache-2.0
//! Object storage for file payloads.
//!
//! Inline file data is hoisted here during run finalization, keyed by
//! content digest so identical payloads share one object.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use agw_core::error::GatewayError;

/// Store of immutable binary objects.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under `(tenant_uid, sha256(bytes))`; returns the storage
    /// URL. Storing the same bytes twice returns the same URL.
    async fn store(
        &self,
        tenant_uid: u64,
        bytes: &[u8],
        content_type: Option<&str>,
    ) -> Result<String, GatewayError>;
}

/// In-memory object store handing out `memory://` URLs.
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    inner: RwLock<BTreeMap<(u64, String), Vec<u8>>>,
}

impl MemoryObjectStore {
    /// Number of stored objects, for tests.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Whether the store is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn store(
        &self,
        tenant_uid: u64,
        bytes: &[u8],
        _content_type: Option<&str>,
    ) -> Result<String, GatewayError> {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        let digest = format!("{:x}", hasher.finalize());
        let url = format!("memory://{tenant_uid}/{digest}");
        self.inner
            .write()
            .await
            .entry((tenant_uid, digest))
            .or_insert_with(|| bytes.to_vec());
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identical_payloads_share_an_object() {
        let store = MemoryObjectStore::default();
        let a = store.store(1, b"hello", Some("text/plain")).await.unwrap();
        let b = store.store(1, b"hello", Some("text/plain")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn urls_are_tenant_scoped() {
        let store = MemoryObjectStore::default();
        let a = store.store(1, b"hello", None).await.unwrap();
        let b = store.store(2, b"hello", None).await.unwrap();
        assert_ne!(a, b);
    }
}
