// SPDX-License-Identifier: MIT OR Apache-2.0
//! agw-engine
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The run engine.
//!
//! Everything between an authenticated, normalized run request and a
//! persisted run lives here: resolving the version reference, validating
//! and templating the input, planning provider attempts with fallback,
//! driving buffered and streamed executions through the tool loop, and
//! finalizing the run with file offloading, cost accounting, previews, and
//! credit decrement.

/// Run finalization: files, cost, previews, persistence, credits.
pub mod finalize;
/// The input pipeline.
pub mod input;
/// Keypath helpers shared by hashing and privacy stripping.
pub mod keypath;
/// The version resolver.
pub mod resolver;
/// The runner and fallback orchestrator.
pub mod runner;
/// The run service tying the stages together.
pub mod service;

pub use input::PreparedInput;
pub use resolver::{NoopDetectors, PropertyDetectors, ResolvedVersion};
pub use service::{RunContext, RunEngine, RunStreamItem};

use std::time::Duration;

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-attempt provider timeout.
    pub attempt_timeout: Duration,
    /// Ceiling on a whole run.
    pub run_timeout: Duration,
    /// Ceiling on tool-loop iterations.
    pub max_tool_iterations: usize,
    /// Transient retries within one `(provider, model)` attempt.
    pub max_attempt_retries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(60),
            run_timeout: Duration::from_secs(180),
            max_tool_iterations: 10,
            max_attempt_retries: 2,
        }
    }
}
