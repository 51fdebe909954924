// SPDX-License-Identifier: MIT OR Apache-2.0
//! Error rendering.
//!
//! Taxonomy errors map to their HTTP status with the canonical
//! `{"error": {...}}` body; in SSE streams the same shape is a terminal
//! `data:` event.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use agw_core::error::GatewayError;

/// Wrapper making [`GatewayError`] an axum response.
#[derive(Debug)]
pub struct ApiError(pub GatewayError);

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        if err.capture {
            tracing::error!(code = err.kind.code(), message = %err.message, "request failed");
        } else {
            tracing::debug!(code = err.kind.code(), message = %err.message, "request failed");
        }
        let status = StatusCode::from_u16(err.kind.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(err.to_response())).into_response()
    }
}

/// Result alias for handlers.
pub type ApiResult<T> = Result<T, ApiError>;
