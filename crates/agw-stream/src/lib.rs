// SPDX-License-Identifier: MIT OR Apache-2.0
//! agw-stream
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Streaming plumbing shared by every provider adapter: SSE byte framing,
//! best-effort partial-JSON parsing, and the aggregator that turns adapter
//! deltas into partial structured outputs, reasoning steps, and tool-call
//! requests.

/// The streaming aggregator.
pub mod aggregator;
/// Best-effort completion of truncated JSON.
pub mod partial_json;
/// SSE byte framing.
pub mod sse;

pub use aggregator::{StreamingAggregator, ToolCallDelta, ToolCallRequestBuffer};
pub use partial_json::{extract_json_str, parse_partial_json};
pub use sse::{SseEvent, SseParser};
