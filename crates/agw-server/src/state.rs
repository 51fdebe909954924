// SPDX-License-Identifier: MIT OR Apache-2.0
//! Shared application state.

use std::sync::Arc;

use agw_engine::RunEngine;

use crate::feedback::FeedbackSigner;

/// State handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// The run engine.
    pub engine: Arc<RunEngine>,
    /// Feedback token signer.
    pub feedback: FeedbackSigner,
    /// Public base URL used to build run links.
    pub base_url: String,
}

impl AppState {
    /// Assemble the state.
    #[must_use]
    pub fn new(engine: Arc<RunEngine>, feedback: FeedbackSigner, base_url: String) -> Self {
        Self {
            engine,
            feedback,
            base_url,
        }
    }

    /// Public URL of a run.
    #[must_use]
    pub fn run_url(&self, agent_id: &str, run_id: uuid::Uuid) -> String {
        format!("{}/agents/{agent_id}/runs/{run_id}", self.base_url)
    }
}
