// SPDX-License-Identifier: MIT OR Apache-2.0
//! agw-tools
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Hosted tools.
//!
//! A fixed registry of `@`-prefixed tools whose implementations live inside
//! the gateway: web search, a text-mode browser, and a Perplexity proxy.
//! Each tool declares its schemas and timeout; invocation validates the
//! input, runs with the timeout, and always produces a [`ToolCall`] — the
//! error case included, so the model can react to failures.

/// The built-in tool implementations.
pub mod builtin;
/// The registry and invocation path.
pub mod registry;

pub use registry::{check_external_tools, split_tool_requests, ToolConfig, ToolRegistry};

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;

use agw_core::error::GatewayError;

/// Default per-tool execution timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// A tool whose implementation lives inside the gateway.
#[async_trait]
pub trait HostedTool: Send + Sync {
    /// Canonical name, starting with `@`.
    fn name(&self) -> &'static str;

    /// Human description handed to the model.
    fn description(&self) -> &'static str;

    /// JSON schema of the arguments.
    fn input_schema(&self) -> Value;

    /// JSON schema of the result.
    fn output_schema(&self) -> Value;

    /// Execution timeout; the default is thirty seconds.
    fn timeout(&self) -> Duration {
        DEFAULT_TOOL_TIMEOUT
    }

    /// Run the tool on validated input.
    async fn execute(&self, input: Value) -> Result<Value, GatewayError>;
}

/// Returns `true` when the name denotes a hosted tool.
#[must_use]
pub fn is_hosted_tool_name(name: &str) -> bool {
    name.starts_with('@')
}
