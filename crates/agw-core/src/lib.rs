// SPDX-License-Identifier: MIT OR Apache-2.0
//! agw-core
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The canonical domain model for the agent gateway.
//!
//! Every other crate in the workspace speaks these types: messages and
//! content blocks, files, version properties and their deterministic hash,
//! runs and completions, usage accounting, previews, and the error taxonomy
//! shared between the engine and the HTTP surface.

/// Canonical error taxonomy shared by every layer.
pub mod error;
/// Domain events emitted after a run reaches a terminal state.
pub mod events;
/// File payloads: URL or base64 data plus a format classification.
pub mod file;
/// Canonical JSON hashing for fingerprints.
pub mod hash;
/// Identifier helpers: UUIDv7 run ids and hash-shaped version ids.
pub mod ids;
/// The canonical message form exchanged with provider adapters.
pub mod message;
/// Human-readable previews of inputs and outputs.
pub mod preview;
/// Runs, completions, and usage accounting.
pub mod run;
/// Tenant context carried by every request.
pub mod tenant;
/// Version properties, references, environments, and hashing.
pub mod version;

pub use error::{ErrorBody, ErrorKind, ErrorResponse, GatewayError, Retriability};
pub use events::{RunCreatedEvent, RunEventSender};
pub use file::{File, FileKind, FileWithKeyPath};
pub use ids::{is_uuid7, new_run_id, VersionId};
pub use message::{
    Message, MessageContent, ReasoningStep, Role, ToolCall, ToolCallRequest, ToolCallResult,
};
pub use run::{
    CacheUsage, FinishReason, LlmCompletion, LlmUsage, Run, RunOutput, RunStatus, UseFallback,
};
pub use tenant::{PaymentFailure, ProviderSettings, TenantContext};
pub use version::{
    ExternalTool, MajorMinor, SavedVersion, ToolChoice, ToolChoiceMode, ToolSpec,
    VersionEnvironment, VersionProperties, VersionReference,
};

/// Current wire-contract version embedded in responses that advertise one.
pub const GATEWAY_VERSION: &str = "agw/v0.1";
