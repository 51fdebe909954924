// SPDX-License-Identifier: MIT OR Apache-2.0
//! The version resolver.
//!
//! Turns a [`VersionReference`] — inline properties, a legacy iteration, a
//! semver, an environment, or a hash — into a concrete, sanitized property
//! bundle. Sanitization may change the property hash (deprecated model
//! redirects, tool mentions folded into `enabled_tools`), which callers
//! learn through `is_different_version`.

use async_trait::async_trait;
use std::collections::BTreeSet;

use agw_core::error::GatewayError;
use agw_core::version::{
    ToolSpec, VersionEnvironment, VersionProperties, VersionReference,
};
use agw_models::ModelCatalog;
use agw_store::Storage;
use agw_tools::ToolRegistry;

/// A resolved, sanitized version.
#[derive(Debug, Clone)]
pub struct ResolvedVersion {
    /// Sanitized properties.
    pub properties: VersionProperties,
    /// Hash id of the sanitized properties.
    pub version_id: String,
    /// Environment the reference named, when it was a deployment.
    pub environment: Option<VersionEnvironment>,
    /// Whether sanitization changed the hash the caller asked for.
    pub is_different_version: bool,
}

/// Best-effort property detection hooks. Failures never block a run.
#[async_trait]
pub trait PropertyDetectors: Send + Sync {
    /// Whether the instructions ask for chain-of-thought prompting.
    async fn detect_chain_of_thought(&self, instructions: &str) -> Result<bool, GatewayError>;
}

/// Detectors that detect nothing.
#[derive(Debug, Default)]
pub struct NoopDetectors;

#[async_trait]
impl PropertyDetectors for NoopDetectors {
    async fn detect_chain_of_thought(&self, _instructions: &str) -> Result<bool, GatewayError> {
        Ok(false)
    }
}

/// Resolve a reference against the stores and sanitize the result.
///
/// Stored versions (semver, hash, environment, iteration) are returned as
/// stored; only inline properties run detection hooks.
///
/// # Errors
///
/// `invalid_run_options` for bad models/providers/ranges,
/// `deployment_not_found` / `version_not_found` for missing references.
pub async fn resolve_version(
    storage: &Storage,
    catalog: &ModelCatalog,
    tools: &ToolRegistry,
    detectors: &dyn PropertyDetectors,
    tenant_uid: u64,
    agent_uid: u64,
    schema_id: u32,
    reference: VersionReference,
) -> Result<ResolvedVersion, GatewayError> {
    let (properties, environment, run_detection) = match reference {
        VersionReference::Properties(props) => (*props, None, true),
        VersionReference::Iteration(n) => {
            // Legacy: the n-th created version of the agent.
            let versions = storage.versions.list_versions(tenant_uid, agent_uid).await?;
            let version = versions.into_iter().nth(n.saturating_sub(1) as usize).ok_or_else(
                || {
                    GatewayError::new(
                        agw_core::error::ErrorKind::VersionNotFound,
                        format!("iteration {n} not found"),
                    )
                },
            )?;
            (version.properties, None, false)
        }
        VersionReference::Semver(semver) => {
            let version = storage
                .versions
                .get_version_by_semver(tenant_uid, agent_uid, semver)
                .await?;
            (version.properties, None, false)
        }
        VersionReference::Environment(environment) => {
            let version_id = storage
                .deployments
                .get_deployment(tenant_uid, agent_uid, schema_id, environment)
                .await?;
            let version = storage
                .versions
                .get_version(tenant_uid, agent_uid, &version_id)
                .await?;
            (version.properties, Some(environment), false)
        }
        VersionReference::Hash(version_id) => {
            let version = storage
                .versions
                .get_version(tenant_uid, agent_uid, &version_id)
                .await?;
            (version.properties, None, false)
        }
    };

    let original_id = properties.id();
    let mut sanitized = sanitize_properties(catalog, tools, properties)?;

    if run_detection {
        apply_detections(detectors, &mut sanitized).await;
    }

    let version_id = sanitized.id();
    let is_different_version = version_id != original_id;

    // Register the version so deployments and the cache can reference it.
    let stored = storage
        .versions
        .get_or_create_version(tenant_uid, agent_uid, schema_id, sanitized)
        .await?;

    Ok(ResolvedVersion {
        properties: stored.properties,
        version_id: stored.id,
        environment,
        is_different_version,
    })
}

/// Enforce known models and providers, numeric ranges, and tool mentions.
///
/// # Errors
///
/// `invalid_run_options` on any violation.
pub fn sanitize_properties(
    catalog: &ModelCatalog,
    tools: &ToolRegistry,
    mut properties: VersionProperties,
) -> Result<VersionProperties, GatewayError> {
    let model = properties
        .model
        .clone()
        .ok_or_else(|| GatewayError::invalid_run_options("Model is required"))?;
    let (data, implied_effort) = catalog.resolve(&model)?;
    properties.model = Some(data.id.clone());
    if properties.reasoning_effort.is_none() {
        properties.reasoning_effort = implied_effort;
    }

    if let Some(provider) = &properties.provider {
        let provider = catalog.resolve_provider(provider)?;
        if !data.providers.contains(&provider) {
            return Err(GatewayError::invalid_run_options(format!(
                "Provider {provider} does not serve model {}",
                data.id
            )));
        }
        properties.provider = Some(provider.as_str().to_string());
    }

    check_range("temperature", properties.temperature, 0.0, 2.0)?;
    check_range("top_p", properties.top_p, 0.0, 1.0)?;
    check_range("presence_penalty", properties.presence_penalty, -2.0, 2.0)?;
    check_range("frequency_penalty", properties.frequency_penalty, -2.0, 2.0)?;
    if properties.max_tokens == Some(0) {
        return Err(GatewayError::invalid_run_options("max_tokens must be positive"));
    }

    merge_tool_mentions(tools, &mut properties);
    Ok(properties)
}

fn check_range(name: &str, value: Option<f64>, min: f64, max: f64) -> Result<(), GatewayError> {
    if let Some(v) = value {
        if !(min..=max).contains(&v) || v.is_nan() {
            return Err(GatewayError::invalid_run_options(format!(
                "{name} must be between {min} and {max}"
            )));
        }
    }
    Ok(())
}

/// Union `enabled_tools` with `@tool` mentions found in the instructions.
fn merge_tool_mentions(tools: &ToolRegistry, properties: &mut VersionProperties) {
    let mut enabled: Vec<ToolSpec> = properties.enabled_tools.take().unwrap_or_default();
    let mut names: BTreeSet<String> = enabled.iter().map(|t| t.name().to_string()).collect();

    if let Some(instructions) = &properties.instructions {
        for mention in tool_mentions(instructions) {
            if tools.contains(&mention) && !names.contains(&mention) {
                names.insert(mention.clone());
                enabled.push(ToolSpec::Hosted(mention));
            }
        }
    }

    if enabled.is_empty() {
        properties.enabled_tools = None;
    } else {
        enabled.sort_by_key(ToolSpec::sort_key);
        properties.enabled_tools = Some(enabled);
    }
}

/// Scan instructions for `@tool-name` tokens.
fn tool_mentions(instructions: &str) -> Vec<String> {
    let mut out = Vec::new();
    let chars: Vec<char> = instructions.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '@' {
            let mut name = String::from('@');
            let mut j = i + 1;
            while let Some(c) = chars.get(j) {
                if c.is_ascii_alphanumeric() || *c == '-' || *c == '_' {
                    name.push(*c);
                    j += 1;
                } else {
                    break;
                }
            }
            if name.len() > 1 {
                out.push(name);
            }
            i = j;
        } else {
            i += 1;
        }
    }
    out
}

async fn apply_detections(detectors: &dyn PropertyDetectors, properties: &mut VersionProperties) {
    if properties.is_chain_of_thought_enabled.is_some() {
        return;
    }
    let Some(instructions) = properties.instructions.clone().filter(|i| !i.is_empty()) else {
        return;
    };
    match detectors.detect_chain_of_thought(&instructions).await {
        Ok(detected) => properties.is_chain_of_thought_enabled = Some(detected),
        Err(err) => {
            // Detection is never critical; the run proceeds without it.
            tracing::warn!(error = %err, "chain of thought detection failed");
        }
    }
}
