// SPDX-License-Identifier: MIT OR Apache-2.0
//! The registry and invocation path.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use agw_core::error::{ErrorKind, GatewayError};
use agw_core::message::{ToolCall, ToolCallRequest};
use agw_core::version::{ExternalTool, ToolSpec};

use crate::builtin::{BrowserTextTool, PerplexityTool, SearchGoogleTool};
use crate::{is_hosted_tool_name, HostedTool};

/// API keys for the hosted tools. Tools with no key are left out of the
/// registry; calls to them fail as unknown tools.
#[derive(Debug, Clone, Default)]
pub struct ToolConfig {
    /// Serper key backing `@search-google`.
    pub serper_api_key: Option<String>,
    /// Perplexity key backing `@perplexity-sonar-pro`.
    pub perplexity_api_key: Option<String>,
}

/// The fixed registry of hosted tools.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn HostedTool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ToolRegistry {
    /// Build the registry from tool credentials.
    #[must_use]
    pub fn new(client: reqwest::Client, config: &ToolConfig) -> Self {
        let mut registry = Self::default();
        registry.register(Arc::new(BrowserTextTool::new(client.clone())));
        if let Some(key) = &config.serper_api_key {
            registry.register(Arc::new(SearchGoogleTool::new(
                client.clone(),
                key.clone(),
                None,
            )));
        }
        if let Some(key) = &config.perplexity_api_key {
            registry.register(Arc::new(PerplexityTool::new(client, key.clone(), None)));
        }
        registry
    }

    /// Register a tool, replacing any previous tool of the same name.
    pub fn register(&mut self, tool: Arc<dyn HostedTool>) {
        self.tools.insert(tool.name(), tool);
    }

    /// Look up a tool by canonical name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Arc<dyn HostedTool>> {
        self.tools.get(name)
    }

    /// Whether a hosted tool with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Names of all registered tools.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.tools.keys().copied().collect()
    }

    /// Execute one tool request: validate the input against the tool's
    /// schema, run with the tool's timeout, and fold the outcome — success
    /// or failure — into a [`ToolCall`]. Errors are appended rather than
    /// surfaced so the model can react to them.
    pub async fn invoke(&self, request: &ToolCallRequest) -> ToolCall {
        let outcome = self.try_invoke(request).await;
        match outcome {
            Ok(result) => ToolCall {
                id: request.id.clone(),
                tool_name: request.tool_name.clone(),
                tool_input: request.tool_input.clone(),
                result: Some(result),
                error: None,
            },
            Err(err) => {
                tracing::warn!(
                    tool = %request.tool_name,
                    error = %err,
                    "hosted tool execution failed"
                );
                ToolCall {
                    id: request.id.clone(),
                    tool_name: request.tool_name.clone(),
                    tool_input: request.tool_input.clone(),
                    result: None,
                    error: Some(err.message),
                }
            }
        }
    }

    async fn try_invoke(&self, request: &ToolCallRequest) -> Result<Value, GatewayError> {
        let tool = self.get(&request.tool_name).ok_or_else(|| {
            GatewayError::new(
                ErrorKind::BadRequest,
                format!("unknown tool: {}", request.tool_name),
            )
        })?;

        let schema = tool.input_schema();
        if let Ok(validator) = jsonschema::validator_for(&schema) {
            if let Some(err) = validator.iter_errors(&request.tool_input).next() {
                return Err(GatewayError::new(
                    ErrorKind::BadRequest,
                    format!("invalid input for {}: {err}", request.tool_name),
                ));
            }
        }

        match tokio::time::timeout(tool.timeout(), tool.execute(request.tool_input.clone())).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::new(
                ErrorKind::ReadTimeout,
                format!("tool {} timed out", request.tool_name),
            )),
        }
    }
}

/// Split emitted tool requests into hosted requests to execute and external
/// requests to hand back to the caller.
///
/// A request for an unknown `@`-name stays in the hosted list; execution
/// will fail it with an "unknown tool" error rather than leak it to the
/// client as an external call.
#[must_use]
pub fn split_tool_requests(
    requests: &[ToolCallRequest],
) -> (Vec<ToolCallRequest>, Vec<ToolCallRequest>) {
    let mut hosted = Vec::new();
    let mut external = Vec::new();
    for request in requests {
        if is_hosted_tool_name(&request.tool_name) {
            hosted.push(request.clone());
        } else {
            external.push(request.clone());
        }
    }
    (hosted, external)
}

/// Validate a version's declared tool list: external tool names must not
/// collide with the hosted namespace.
///
/// # Errors
///
/// `bad_request` when an external tool name begins with `@`.
pub fn check_external_tools(specs: &[ToolSpec]) -> Result<Vec<ExternalTool>, GatewayError> {
    let mut external = Vec::new();
    for spec in specs {
        if let ToolSpec::External(tool) = spec {
            if tool.name.starts_with('@') {
                return Err(GatewayError::bad_request(format!(
                    "external tool name {} cannot start with @",
                    tool.name
                )));
            }
            external.push(tool.clone());
        }
    }
    Ok(external)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct EchoTool;

    #[async_trait]
    impl HostedTool for EchoTool {
        fn name(&self) -> &'static str {
            "@echo"
        }
        fn description(&self) -> &'static str {
            "Echo the input"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object", "required": ["text"], "properties": {"text": {"type": "string"}}})
        }
        fn output_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, input: Value) -> Result<Value, GatewayError> {
            Ok(json!({"echo": input["text"]}))
        }
    }

    struct SlowTool;

    #[async_trait]
    impl HostedTool for SlowTool {
        fn name(&self) -> &'static str {
            "@slow"
        }
        fn description(&self) -> &'static str {
            "Never finishes in time"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn output_schema(&self) -> Value {
            json!({"type": "object"})
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(20)
        }
        async fn execute(&self, _input: Value) -> Result<Value, GatewayError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({}))
        }
    }

    fn request(name: &str, input: Value) -> ToolCallRequest {
        ToolCallRequest {
            id: "call_1".into(),
            tool_name: name.into(),
            tool_input: input,
        }
    }

    #[tokio::test]
    async fn invoke_returns_the_result() {
        let mut registry = ToolRegistry::default();
        registry.register(Arc::new(EchoTool));
        let call = registry.invoke(&request("@echo", json!({"text": "hi"}))).await;
        assert_eq!(call.result.unwrap()["echo"], "hi");
        assert!(call.error.is_none());
    }

    #[tokio::test]
    async fn invalid_input_becomes_a_tool_error() {
        let mut registry = ToolRegistry::default();
        registry.register(Arc::new(EchoTool));
        let call = registry.invoke(&request("@echo", json!({}))).await;
        assert!(call.result.is_none());
        assert!(call.error.unwrap().contains("invalid input"));
    }

    #[tokio::test]
    async fn unknown_tool_becomes_a_tool_error() {
        let registry = ToolRegistry::default();
        let call = registry.invoke(&request("@nope", json!({}))).await;
        assert!(call.error.unwrap().contains("unknown tool"));
    }

    #[tokio::test]
    async fn timeouts_become_tool_errors() {
        let mut registry = ToolRegistry::default();
        registry.register(Arc::new(SlowTool));
        let call = registry.invoke(&request("@slow", json!({}))).await;
        assert!(call.error.unwrap().contains("timed out"));
    }

    #[test]
    fn split_classifies_by_prefix() {
        let requests = vec![
            request("@search-google", json!({})),
            request("get_weather", json!({})),
            request("@unknown-tool", json!({})),
        ];
        let (hosted, external) = split_tool_requests(&requests);
        assert_eq!(hosted.len(), 2);
        assert_eq!(external.len(), 1);
        assert_eq!(external[0].tool_name, "get_weather");
    }

    #[test]
    fn external_tools_cannot_use_the_hosted_namespace() {
        let specs = vec![ToolSpec::External(agw_core::version::ExternalTool {
            name: "@sneaky".into(),
            description: None,
            input_schema: None,
            strict: None,
        })];
        assert!(check_external_tools(&specs).is_err());
    }
}
