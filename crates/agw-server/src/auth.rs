// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bearer authentication.
//!
//! Every route resolves the `Authorization` header to a tenant before doing
//! anything else. Anonymous requests fail with 401. Run-starting routes
//! additionally gate on credits: a negative balance blocks *new* runs with
//! 402 while in-flight runs finish unhindered.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use agw_core::error::{ErrorKind, GatewayError};
use agw_core::tenant::TenantContext;

use crate::state::AppState;

/// The authenticated tenant, extracted from the bearer token.
#[derive(Debug, Clone)]
pub struct AuthedTenant(pub TenantContext);

/// 401 body for missing or invalid credentials.
fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": {"code": "unauthorized", "message": message}})),
    )
        .into_response()
}

impl FromRequestParts<AppState> for AuthedTenant {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized("missing Authorization header"))?;
        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| unauthorized("expected a bearer token"))?;
        let tenant = state
            .engine
            .storage()
            .tenants
            .resolve_token(token)
            .await
            .map_err(|_| unauthorized("invalid bearer token"))?;
        Ok(Self(tenant))
    }
}

/// Block new runs for tenants with no credits.
///
/// # Errors
///
/// `insufficient_credits` (402) when the balance is below zero.
pub fn check_enough_credits(tenant: &TenantContext) -> Result<(), GatewayError> {
    if tenant.is_out_of_credits() {
        tracing::warn!(tenant = %tenant.tenant, "blocked run for no credits");
        return Err(GatewayError::new(
            ErrorKind::InsufficientCredits,
            "insufficient credits to run the agent",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_balance_is_blocked() {
        let mut tenant = TenantContext::new("acme", 1);
        tenant.current_credits_usd = -0.5;
        let err = check_enough_credits(&tenant).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InsufficientCredits);
        assert_eq!(err.kind.http_status(), 402);
    }

    #[test]
    fn positive_balance_passes() {
        let mut tenant = TenantContext::new("acme", 1);
        tenant.current_credits_usd = 3.0;
        assert!(check_enough_credits(&tenant).is_ok());
    }
}
