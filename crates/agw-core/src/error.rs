// SPDX-License-Identifier: MIT OR Apache-2.0
//! Canonical error taxonomy for the gateway.
//!
//! Each [`ErrorKind`] has a stable string code used both as the external
//! `error.code` field and as the internal tag, a retriability class consumed
//! by the fallback orchestrator, and an HTTP status for the surface layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ErrorKind
// ---------------------------------------------------------------------------

/// Enumeration of all canonical error kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Model, provider, or schema mismatch in the requested run options.
    InvalidRunOptions,
    /// Message templating failed; details carry line and column.
    InvalidTemplate,
    /// A file was unreachable or had the wrong mime type.
    InvalidFile,
    /// Generic client mistake.
    BadRequest,
    /// The provider truncated the output at its token limit.
    MaxTokensExceeded,
    /// The provider refused to generate for content policy reasons.
    ContentModeration,
    /// The completion was not parseable and carried no tool calls.
    FailedGeneration,
    /// Schema-guided decoding failed on the provider side.
    StructuredGenerationError,
    /// A transport-level timeout.
    ReadTimeout,
    /// The provider returned a 5xx.
    ProviderInternal,
    /// The provider returned a 429; may carry a retry-after hint.
    RateLimit,
    /// The model does not support the requested mode (e.g. image input).
    ModelDoesNotSupportMode,
    /// The pricing table has no entry for the model that ran.
    UnpriceableRun,
    /// The tenant balance is below the floor.
    InsufficientCredits,
    /// The client disconnected mid-stream.
    ClientDisconnect,
    /// No deployment exists for the requested environment.
    DeploymentNotFound,
    /// No stored version matches the requested reference.
    VersionNotFound,
    /// The requested agent does not exist.
    AgentNotFound,
    /// The requested run does not exist.
    RunNotFound,
    /// Unexpected internal error.
    Internal,
}

/// How the runner may react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Retriability {
    /// Never retried; surfaced immediately.
    No,
    /// Retried at most once on the same attempt.
    Once,
    /// Retried with backoff and eligible for fallback.
    Yes,
}

impl ErrorKind {
    /// Stable machine-readable code string.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRunOptions => "invalid_run_options",
            Self::InvalidTemplate => "invalid_template",
            Self::InvalidFile => "invalid_file",
            Self::BadRequest => "bad_request",
            Self::MaxTokensExceeded => "max_tokens_exceeded",
            Self::ContentModeration => "content_moderation",
            Self::FailedGeneration => "failed_generation",
            Self::StructuredGenerationError => "structured_generation_error",
            Self::ReadTimeout => "read_timeout",
            Self::ProviderInternal => "provider_internal",
            Self::RateLimit => "rate_limit",
            Self::ModelDoesNotSupportMode => "model_does_not_support_mode",
            Self::UnpriceableRun => "unpriceable_run",
            Self::InsufficientCredits => "insufficient_credits",
            Self::ClientDisconnect => "client_disconnect",
            Self::DeploymentNotFound => "deployment_not_found",
            Self::VersionNotFound => "version_not_found",
            Self::AgentNotFound => "agent_not_found",
            Self::RunNotFound => "run_not_found",
            Self::Internal => "internal",
        }
    }

    /// Retriability class consumed by the fallback orchestrator.
    #[must_use]
    pub fn retriability(&self) -> Retriability {
        match self {
            Self::ReadTimeout | Self::ProviderInternal | Self::RateLimit => Retriability::Yes,
            Self::FailedGeneration | Self::StructuredGenerationError => Retriability::Once,
            _ => Retriability::No,
        }
    }

    /// HTTP status the surface layer maps this kind to.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRunOptions | Self::InvalidTemplate | Self::InvalidFile | Self::BadRequest => 400,
            Self::InsufficientCredits => 402,
            Self::DeploymentNotFound | Self::VersionNotFound | Self::AgentNotFound | Self::RunNotFound => 404,
            Self::MaxTokensExceeded
            | Self::ContentModeration
            | Self::FailedGeneration
            | Self::StructuredGenerationError
            | Self::ModelDoesNotSupportMode
            | Self::UnpriceableRun
            | Self::ClientDisconnect => 422,
            Self::RateLimit => 429,
            Self::ReadTimeout | Self::ProviderInternal => 502,
            Self::Internal => 500,
        }
    }

    /// Parse a stable code string back into a kind.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        ALL_KINDS.iter().find(|k| k.code() == code).copied()
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// All kinds, in definition order.
const ALL_KINDS: &[ErrorKind] = &[
    ErrorKind::InvalidRunOptions,
    ErrorKind::InvalidTemplate,
    ErrorKind::InvalidFile,
    ErrorKind::BadRequest,
    ErrorKind::MaxTokensExceeded,
    ErrorKind::ContentModeration,
    ErrorKind::FailedGeneration,
    ErrorKind::StructuredGenerationError,
    ErrorKind::ReadTimeout,
    ErrorKind::ProviderInternal,
    ErrorKind::RateLimit,
    ErrorKind::ModelDoesNotSupportMode,
    ErrorKind::UnpriceableRun,
    ErrorKind::InsufficientCredits,
    ErrorKind::ClientDisconnect,
    ErrorKind::DeploymentNotFound,
    ErrorKind::VersionNotFound,
    ErrorKind::AgentNotFound,
    ErrorKind::RunNotFound,
    ErrorKind::Internal,
];

// ---------------------------------------------------------------------------
// GatewayError
// ---------------------------------------------------------------------------

/// Rich error value flowing through the engine.
///
/// Carries the taxonomy kind, a human message, structured context, an
/// optional `retry_after` hint from the provider, any partial output
/// accumulated before failure, and the id of the run that was persisted for
/// the failure (set late, by the run service).
#[derive(Debug, thiserror::Error)]
#[error("[{}] {message}", .kind.code())]
pub struct GatewayError {
    /// Taxonomy kind.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Structured context, deterministic ordering.
    pub details: BTreeMap<String, serde_json::Value>,
    /// Provider-advised delay before retrying, if any.
    pub retry_after: Option<Duration>,
    /// Partial output accumulated before the failure, if any.
    pub partial_output: Option<serde_json::Value>,
    /// Id of the persisted failed run, when one was stored.
    pub run_id: Option<String>,
    /// Whether the error should be logged at error level when surfaced.
    pub capture: bool,
}

impl GatewayError {
    /// Build an error of the given kind.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            details: BTreeMap::new(),
            retry_after: None,
            partial_output: None,
            run_id: None,
            capture: false,
        }
    }

    /// Shorthand for [`ErrorKind::BadRequest`].
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    /// Shorthand for [`ErrorKind::InvalidRunOptions`].
    #[must_use]
    pub fn invalid_run_options(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRunOptions, message)
    }

    /// Shorthand for [`ErrorKind::Internal`] with `capture` set.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        let mut e = Self::new(ErrorKind::Internal, message);
        e.capture = true;
        e
    }

    /// Attach a context entry.
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Attach a retry-after hint.
    #[must_use]
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// Attach the partial output accumulated before failure.
    #[must_use]
    pub fn with_partial_output(mut self, output: serde_json::Value) -> Self {
        self.partial_output = Some(output);
        self
    }

    /// Retriability of the underlying kind.
    #[must_use]
    pub fn retriability(&self) -> Retriability {
        self.kind.retriability()
    }

    /// Wire-shaped error body.
    #[must_use]
    pub fn to_response(&self) -> ErrorResponse {
        ErrorResponse {
            error: ErrorBody {
                code: self.kind.code().to_string(),
                message: self.message.clone(),
                details: if self.details.is_empty() {
                    None
                } else {
                    Some(self.details.clone())
                },
                run_id: self.run_id.clone(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Wire shape
// ---------------------------------------------------------------------------

/// The `{"error": {...}}` envelope returned on failure, and emitted as a
/// terminal `data:` event in SSE streams.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// The error payload.
    pub error: ErrorBody,
}

/// Inner error payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable code string, one of the taxonomy kinds.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Structured context, when any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<BTreeMap<String, serde_json::Value>>,
    /// Id of the persisted failed run, when one was stored.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}
