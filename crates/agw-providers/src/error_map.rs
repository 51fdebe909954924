// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared error classification.
//!
//! Providers agree on very little here: some return structured error
//! payloads, some return prose, and at least one returns HTTP 200 with an
//! apology when content is moderated. The helpers in this module map the
//! common shapes to the gateway taxonomy; adapters layer provider-specific
//! rules on top.

use serde::Deserialize;
use std::time::Duration;

use agw_core::error::{ErrorKind, GatewayError};
use agw_models::Provider;

/// The OpenAI-style error envelope used by most compatible providers.
#[derive(Debug, Deserialize)]
pub struct WireErrorEnvelope {
    /// Inner payload.
    pub error: WireErrorPayload,
}

/// Inner error payload.
#[derive(Debug, Deserialize)]
pub struct WireErrorPayload {
    /// Human-readable message.
    pub message: String,
    /// Provider error type, when present.
    #[serde(default)]
    pub r#type: Option<String>,
    /// Provider error code, when present.
    #[serde(default)]
    pub code: Option<serde_json::Value>,
}

/// Returns `true` when a 200-status completion text smells like a content
/// moderation refusal: an apology paired with a policy word. Bedrock does
/// this instead of returning an error status.
#[must_use]
pub fn is_moderation_refusal(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("apologize")
        && (lower.contains("inappropriate") || lower.contains("offensive"))
}

/// Classify a non-2xx response using the OpenAI-style envelope when the body
/// carries one, falling back to status-based rules.
#[must_use]
pub fn classify_openai_style(provider: Provider, status: u16, body: &str) -> GatewayError {
    let message = serde_json::from_str::<WireErrorEnvelope>(body)
        .map(|e| e.error.message)
        .unwrap_or_else(|_| body.chars().take(500).collect());

    let mut err = classify_status(provider, status, &message);
    err = err.with_detail("provider", provider.as_str());
    err
}

/// Status-based classification shared by every adapter.
#[must_use]
pub fn classify_status(provider: Provider, status: u16, message: &str) -> GatewayError {
    let lower = message.to_lowercase();
    match status {
        429 => GatewayError::new(
            ErrorKind::RateLimit,
            format!("{provider} rate limited the request"),
        )
        .with_retry_after(Duration::from_secs(5)),
        408 | 504 => GatewayError::new(ErrorKind::ReadTimeout, format!("{provider} timed out"))
            .with_retry_after(Duration::from_secs(10)),
        500..=599 => GatewayError::new(
            ErrorKind::ProviderInternal,
            format!("{provider} returned {status}: {message}"),
        )
        .with_retry_after(Duration::from_secs(10)),
        401 | 403 => {
            let mut e = GatewayError::new(
                ErrorKind::ProviderInternal,
                format!("{provider} rejected the gateway credentials"),
            );
            e.capture = true;
            e
        }
        400 | 422 => classify_bad_request(provider, &lower, message),
        _ => {
            let mut e = GatewayError::new(
                ErrorKind::Internal,
                format!("unexpected {status} from {provider}: {message}"),
            );
            e.capture = true;
            e
        }
    }
}

fn classify_bad_request(provider: Provider, lower: &str, message: &str) -> GatewayError {
    if lower.contains("content_policy") || lower.contains("content management policy") {
        return GatewayError::new(ErrorKind::ContentModeration, message.to_string());
    }
    if lower.contains("context length") || lower.contains("too many tokens") || lower.contains("prompt is too long") {
        return GatewayError::new(ErrorKind::MaxTokensExceeded, message.to_string());
    }
    if lower.contains("image") && (lower.contains("invalid") || lower.contains("unsupported") || lower.contains("could not process")) {
        return GatewayError::new(ErrorKind::InvalidFile, message.to_string());
    }
    if lower.contains("does not support") {
        return GatewayError::new(ErrorKind::ModelDoesNotSupportMode, message.to_string());
    }
    let mut e = GatewayError::new(
        ErrorKind::Internal,
        format!("{provider} rejected the request: {message}"),
    );
    e.capture = true;
    e
}
