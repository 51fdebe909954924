// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tenant context.
//!
//! Every entity in the gateway is tenant-scoped. The context travels with a
//! request after authentication and carries the credit balance snapshot and
//! any provider credential overrides.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Credential override for a single provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Provider these credentials apply to.
    pub provider: String,
    /// API key to use instead of the gateway's own.
    pub api_key: String,
    /// Base URL override, when the tenant points at a proxy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Why the tenant's last automatic payment failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailure {
    /// Stable failure code (`"internal"` means our fault, not the card's).
    pub failure_code: String,
    /// Human-readable reason.
    pub message: String,
}

/// Process-wide context for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantContext {
    /// URL-safe tenant slug.
    pub tenant: String,
    /// Numeric tenant uid, globally unique.
    pub tenant_uid: u64,
    /// Current credit balance in USD.
    pub current_credits_usd: f64,
    /// Last automatic payment failure, when in a failed state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_failure: Option<PaymentFailure>,
    /// Per-provider credential overrides, keyed by provider name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub provider_settings: BTreeMap<String, ProviderSettings>,
}

impl TenantContext {
    /// A tenant with the given slug and uid and no overrides.
    #[must_use]
    pub fn new(tenant: impl Into<String>, tenant_uid: u64) -> Self {
        Self {
            tenant: tenant.into(),
            tenant_uid,
            current_credits_usd: 0.0,
            payment_failure: None,
            provider_settings: BTreeMap::new(),
        }
    }

    /// Whether new runs should be blocked for lack of credits.
    ///
    /// Internal payment failures never block: the balance went negative
    /// through no fault of the tenant.
    #[must_use]
    pub fn is_out_of_credits(&self) -> bool {
        if self.current_credits_usd >= 0.0 {
            return false;
        }
        !matches!(&self.payment_failure, Some(f) if f.failure_code == "internal")
    }
}
