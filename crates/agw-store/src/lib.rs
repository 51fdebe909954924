// SPDX-License-Identifier: MIT OR Apache-2.0
//! agw-store
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Storage for the gateway: agents and their schemas, versions and
//! deployments, runs, the run cache, object storage for file payloads, and
//! tenants with their credit balances.
//!
//! Every store is a trait; the in-memory implementations here are the
//! reference semantics (uid assignment, schema-id stability,
//! publish-after-terminal, first-writer-wins cache inserts, conditional
//! credit decrement). A database-backed implementation must preserve them.

/// Agents and their schemas.
pub mod agent;
/// The run cache.
pub mod cache;
/// Deployments.
pub mod deployment;
/// Object storage for file payloads.
pub mod object;
/// Runs.
pub mod run;
/// Tenants and credits.
pub mod tenant;
/// Versions.
pub mod version;

pub use agent::{AgentRecord, AgentStore, MemoryAgentStore, SchemaRecord};
pub use cache::{CacheKey, MemoryRunCache, RunCacheStore};
pub use deployment::{DeploymentStore, MemoryDeploymentStore};
pub use object::{MemoryObjectStore, ObjectStore};
pub use run::{MemoryRunStore, RunSearchQuery, RunStore};
pub use tenant::{MemoryTenantStore, NoopPaymentHook, PaymentHook, TenantStore};
pub use version::{MemoryVersionStore, VersionStore};

use std::sync::Arc;

/// Bundle of every store handle the engine needs.
#[derive(Clone)]
pub struct Storage {
    /// Agents and schemas.
    pub agents: Arc<dyn AgentStore>,
    /// Versions.
    pub versions: Arc<dyn VersionStore>,
    /// Deployments.
    pub deployments: Arc<dyn DeploymentStore>,
    /// Runs.
    pub runs: Arc<dyn RunStore>,
    /// The run cache.
    pub cache: Arc<dyn RunCacheStore>,
    /// Object storage.
    pub objects: Arc<dyn ObjectStore>,
    /// Tenants.
    pub tenants: Arc<dyn TenantStore>,
}

impl Storage {
    /// A fully in-memory storage bundle.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            agents: Arc::new(MemoryAgentStore::default()),
            versions: Arc::new(MemoryVersionStore::default()),
            deployments: Arc::new(MemoryDeploymentStore::default()),
            runs: Arc::new(MemoryRunStore::default()),
            cache: Arc::new(MemoryRunCache::default()),
            objects: Arc::new(MemoryObjectStore::default()),
            tenants: Arc::new(MemoryTenantStore::default()),
        }
    }
}
