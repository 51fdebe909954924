// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tenants and credits.
//!
//! Token resolution and the one write path that must stay consistent: the
//! conditional credit decrement. The balance may go negative from in-flight
//! runs but never below the configured floor; crossing the low-credit
//! threshold fires the payment hook exactly once per crossing.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use agw_core::error::{ErrorKind, GatewayError};
use agw_core::tenant::TenantContext;

/// Balance below which decrements are clamped.
const CREDIT_FLOOR_USD: f64 = -50.0;

/// Balance below which an automatic payment is attempted.
const LOW_CREDIT_THRESHOLD_USD: f64 = 5.0;

/// Triggered when a tenant crosses the low-credit threshold.
#[async_trait]
pub trait PaymentHook: Send + Sync {
    /// Attempt an automatic top-up. Failures are recorded on the tenant,
    /// never propagated to the run that triggered them.
    async fn attempt_payment(&self, tenant: &TenantContext);
}

/// A hook that does nothing.
#[derive(Debug, Default)]
pub struct NoopPaymentHook;

#[async_trait]
impl PaymentHook for NoopPaymentHook {
    async fn attempt_payment(&self, _tenant: &TenantContext) {}
}

/// Store of tenants.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Resolve a bearer token to a tenant.
    async fn resolve_token(&self, token: &str) -> Result<TenantContext, GatewayError>;

    /// Fetch a tenant by uid.
    async fn get_tenant(&self, tenant_uid: u64) -> Result<TenantContext, GatewayError>;

    /// Atomically decrement credits by `amount_usd`, clamped at the floor.
    /// Returns the new balance.
    async fn decrement_credits(
        &self,
        tenant_uid: u64,
        amount_usd: f64,
    ) -> Result<f64, GatewayError>;
}

/// In-memory tenant store.
pub struct MemoryTenantStore {
    inner: RwLock<MemoryTenantInner>,
    payment_hook: Arc<dyn PaymentHook>,
}

struct MemoryTenantInner {
    by_token: BTreeMap<String, u64>,
    tenants: BTreeMap<u64, TenantContext>,
}

impl Default for MemoryTenantStore {
    fn default() -> Self {
        Self::new(Arc::new(NoopPaymentHook))
    }
}

impl MemoryTenantStore {
    /// Build a store around a payment hook.
    #[must_use]
    pub fn new(payment_hook: Arc<dyn PaymentHook>) -> Self {
        Self {
            inner: RwLock::new(MemoryTenantInner {
                by_token: BTreeMap::new(),
                tenants: BTreeMap::new(),
            }),
            payment_hook,
        }
    }

    /// Register a tenant reachable via `token`.
    pub async fn add_tenant(&self, token: &str, tenant: TenantContext) {
        let mut inner = self.inner.write().await;
        inner.by_token.insert(token.to_string(), tenant.tenant_uid);
        inner.tenants.insert(tenant.tenant_uid, tenant);
    }
}

#[async_trait]
impl TenantStore for MemoryTenantStore {
    async fn resolve_token(&self, token: &str) -> Result<TenantContext, GatewayError> {
        let inner = self.inner.read().await;
        inner
            .by_token
            .get(token)
            .and_then(|uid| inner.tenants.get(uid))
            .cloned()
            .ok_or_else(|| GatewayError::new(ErrorKind::BadRequest, "invalid bearer token"))
    }

    async fn get_tenant(&self, tenant_uid: u64) -> Result<TenantContext, GatewayError> {
        self.inner
            .read()
            .await
            .tenants
            .get(&tenant_uid)
            .cloned()
            .ok_or_else(|| GatewayError::internal(format!("unknown tenant uid {tenant_uid}")))
    }

    async fn decrement_credits(
        &self,
        tenant_uid: u64,
        amount_usd: f64,
    ) -> Result<f64, GatewayError> {
        let (balance, crossed) = {
            let mut inner = self.inner.write().await;
            let tenant = inner.tenants.get_mut(&tenant_uid).ok_or_else(|| {
                GatewayError::internal(format!("unknown tenant uid {tenant_uid}"))
            })?;
            let before = tenant.current_credits_usd;
            tenant.current_credits_usd = (before - amount_usd).max(CREDIT_FLOOR_USD);
            let after = tenant.current_credits_usd;
            (
                after,
                before >= LOW_CREDIT_THRESHOLD_USD && after < LOW_CREDIT_THRESHOLD_USD,
            )
        };
        if crossed {
            let tenant = self.get_tenant(tenant_uid).await?;
            self.payment_hook.attempt_payment(&tenant).await;
        }
        Ok(balance)
    }
}
