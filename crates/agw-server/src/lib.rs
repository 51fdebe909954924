// SPDX-License-Identifier: MIT OR Apache-2.0
//! agw-server
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The HTTP surface of the agent gateway.
//!
//! One axum router serves the OpenAI-compatible completion endpoint, the
//! model listing, and the native agent/run/version endpoints. Bearer tokens
//! resolve to tenants; taxonomy errors render with their status mapping;
//! streamed responses use `data:` framed SSE terminated by `[DONE]`.

/// Agent and run endpoints.
pub mod agents;
/// Bearer authentication and the credit gate.
pub mod auth;
/// Error rendering.
pub mod error;
/// Feedback tokens.
pub mod feedback;
/// The model listing.
pub mod models;
/// The OpenAI-compatible surface.
pub mod openai;
/// Shared application state.
pub mod state;
/// Version listing, saving, and deployment.
pub mod versions;

pub use feedback::FeedbackSigner;
pub use state::AppState;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

/// Build the full application router.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(openai::chat_completions))
        .route("/v1/models", get(models::list_models))
        .route("/v1/{tenant}/agents", post(agents::upsert_agent))
        .route(
            "/v1/{tenant}/agents/{agent_id}/schemas/{schema_id}/run",
            post(agents::run_agent),
        )
        .route(
            "/v1/{tenant}/agents/{agent_id}/runs/{run_id}/reply",
            post(agents::reply_to_run),
        )
        .route(
            "/v1/{tenant}/agents/{agent_id}/runs/search",
            post(agents::search_runs),
        )
        .route(
            "/v1/{tenant}/agents/{agent_id}/runs/{run_id}",
            get(agents::get_run),
        )
        .route(
            "/v1/{tenant}/agents/{agent_id}/versions",
            get(versions::list_versions).post(versions::save_version),
        )
        .route(
            "/v1/{tenant}/agents/{agent_id}/versions/{version_id}/deploy",
            post(versions::deploy_version),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}
