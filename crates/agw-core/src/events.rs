// SPDX-License-Identifier: MIT OR Apache-2.0
//! Domain events.
//!
//! The engine publishes an event after each run reaches a terminal state.
//! Downstream consumers (deployment tracking, analytics, credit accounting)
//! subscribe to the channel; the engine never blocks on them.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::run::RunStatus;

/// Emitted once per persisted run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunCreatedEvent {
    /// Tenant uid owning the run.
    pub tenant_uid: u64,
    /// Agent the run belongs to.
    pub agent_id: String,
    /// Schema the run belongs to.
    pub schema_id: u32,
    /// Version the run executed with.
    pub version_id: String,
    /// The run id.
    pub run_id: Uuid,
    /// Terminal status.
    pub status: RunStatus,
    /// Total cost of the run.
    pub cost_usd: Option<f64>,
    /// Whether the run was served from cache.
    pub from_cache: bool,
}

/// Sending half of the run event channel. Sends never block; a closed
/// receiver is ignored.
#[derive(Debug, Clone)]
pub struct RunEventSender {
    tx: tokio::sync::mpsc::UnboundedSender<RunCreatedEvent>,
}

impl RunEventSender {
    /// Create a channel pair.
    #[must_use]
    pub fn channel() -> (Self, tokio::sync::mpsc::UnboundedReceiver<RunCreatedEvent>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// A sender whose events are dropped. Useful in tests.
    #[must_use]
    pub fn discard() -> Self {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        Self { tx }
    }

    /// Publish an event; a closed receiver is not an error.
    pub fn send(&self, event: RunCreatedEvent) {
        let _ = self.tx.send(event);
    }
}
