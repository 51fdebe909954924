// SPDX-License-Identifier: MIT OR Apache-2.0
//! Version properties, references, and hashing.
//!
//! A version is an immutable bundle of run properties identified by a
//! deterministic hash: identical normalized properties always produce the
//! same id. Saving a version attaches a human-readable semver that never
//! changes afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::{looks_like_version_id, VersionId};
use crate::message::Message;

// ---------------------------------------------------------------------------
// Tool choice
// ---------------------------------------------------------------------------

/// Constraint on whether the model may, must, or must not call tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolChoiceMode {
    /// The model picks between a message and tool calls.
    Auto,
    /// The model will not call any tool.
    None,
    /// The model must call at least one tool.
    Required,
}

/// Tool choice: a mode string or a forced function by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolChoice {
    /// `"auto"`, `"none"`, or `"required"`.
    Mode(ToolChoiceMode),
    /// Force a specific tool.
    Function {
        /// Canonical tool name.
        name: String,
    },
}

// ---------------------------------------------------------------------------
// Enabled tools
// ---------------------------------------------------------------------------

/// An externally-executed tool declared on a version. Never run server-side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTool {
    /// Tool name; must not begin with `@`.
    pub name: String,
    /// Human description handed to the model.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
    /// Whether the provider should enforce the schema strictly.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strict: Option<bool>,
}

/// An entry in `enabled_tools`: a hosted tool by `@`-name, or an external
/// tool definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolSpec {
    /// Hosted tool referenced by its canonical `@`-prefixed name.
    Hosted(String),
    /// External tool carried with its schemas.
    External(ExternalTool),
}

impl ToolSpec {
    /// The tool name, whichever the form.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Hosted(name) => name,
            Self::External(t) => &t.name,
        }
    }

    /// Sort key used when normalizing `enabled_tools`.
    #[must_use]
    pub fn sort_key(&self) -> String {
        self.name().trim_start_matches('@').to_lowercase()
    }
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

/// The immutable property bundle describing how to run an agent.
///
/// The id of a version is a pure function of these fields: null-valued keys
/// are dropped and the remainder is hashed in sorted-key order. Unknown
/// keys are rejected at the boundary rather than silently dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionProperties {
    /// Model identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Forced provider, when pinned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    /// Sampling temperature.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Nucleus sampling parameter.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Presence penalty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f64>,
    /// Frequency penalty.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f64>,
    /// Completion token ceiling.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    /// Tool choice constraint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    /// Enabled hosted and external tools.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled_tools: Option<Vec<ToolSpec>>,
    /// Reasoning effort hint for thinking models.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<String>,
    /// Prompt message templates (system / assistant), possibly with
    /// `{{variable}}` placeholders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    /// Legacy instruction string rendered as the first system message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    /// Streamlined output schema the version generates against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<serde_json::Value>,
    /// Whether provider-side schema-guided decoding should be used.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_generation: Option<bool>,
    /// Whether chain-of-thought prompting was detected or requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_chain_of_thought_enabled: Option<bool>,
}

impl VersionProperties {
    /// Deterministic version id: the first 32 hex chars of the SHA-256 of
    /// the normalized properties.
    #[must_use]
    pub fn id(&self) -> VersionId {
        let value = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        let digest = crate::hash::canonical_digest(&value);
        digest[..32].to_string()
    }

    /// Whether two property bundles hash to the same id.
    #[must_use]
    pub fn same_version(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

// ---------------------------------------------------------------------------
// Environments and semver
// ---------------------------------------------------------------------------

/// Deployment environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionEnvironment {
    /// Development.
    Dev,
    /// Staging.
    Staging,
    /// Production.
    Production,
}

impl FromStr for VersionEnvironment {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dev" => Ok(Self::Dev),
            "staging" => Ok(Self::Staging),
            "production" => Ok(Self::Production),
            _ => Err(()),
        }
    }
}

impl fmt::Display for VersionEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dev => f.write_str("dev"),
            Self::Staging => f.write_str("staging"),
            Self::Production => f.write_str("production"),
        }
    }
}

/// Human-readable semver assigned when a version is saved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MajorMinor {
    /// Bumped when prompt-level properties change.
    pub major: u32,
    /// Bumped for tuning changes within a major.
    pub minor: u32,
}

impl MajorMinor {
    /// Parse `"<major>.<minor>"`.
    #[must_use]
    pub fn from_string(s: &str) -> Option<Self> {
        let (major, minor) = s.split_once('.')?;
        Some(Self {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }
}

impl fmt::Display for MajorMinor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

/// How a request points at a version.
#[derive(Debug, Clone, PartialEq)]
pub enum VersionReference {
    /// Inline properties; the id is known only after sanitization.
    Properties(Box<VersionProperties>),
    /// Legacy integer iteration.
    Iteration(u32),
    /// Saved semver.
    Semver(MajorMinor),
    /// Deployment environment.
    Environment(VersionEnvironment),
    /// Exact 32-char version hash.
    Hash(VersionId),
}

impl VersionReference {
    /// Parse the string forms: environment name, `major.minor`, 32-char
    /// hash, or integer iteration.
    #[must_use]
    pub fn parse_str(s: &str) -> Option<Self> {
        if let Ok(env) = s.parse::<VersionEnvironment>() {
            return Some(Self::Environment(env));
        }
        if let Some(semver) = MajorMinor::from_string(s) {
            return Some(Self::Semver(semver));
        }
        if looks_like_version_id(s) {
            return Some(Self::Hash(s.to_string()));
        }
        s.parse::<u32>().ok().map(Self::Iteration)
    }
}

// ---------------------------------------------------------------------------
// Saved versions
// ---------------------------------------------------------------------------

/// A version persisted in the store, optionally semver-named.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedVersion {
    /// Deterministic hash id.
    pub id: VersionId,
    /// Owning schema.
    pub schema_id: u32,
    /// The property bundle.
    pub properties: VersionProperties,
    /// Semver assigned on save; never changes afterwards.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub semver: Option<MajorMinor>,
    /// Creation timestamp.
    pub created_at: chrono::DateTime<chrono::Utc>,
}
