// SPDX-License-Identifier: MIT OR Apache-2.0
//! agw-schema
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! JSON-schema handling for the agent gateway.
//!
//! Schemas arriving from clients are *streamlined* before storage so that
//! two schemas differing only in implementation details (ref indirection,
//! optional-nullable spelling, metadata) map to the same stable id. This
//! module is the ground truth for schema interoperability: the streamliner,
//! the embedded-file extractor, and instance validation all live here.

/// Embedded-file discovery and extraction.
pub mod files;
/// Schema shape helpers: raw-message markers and stable schema digests.
pub mod shape;
/// The schema streamliner.
pub mod streamline;
/// Instance validation against streamlined schemas.
pub mod validate;

pub use files::{extract_files, file_format_for_ref, schema_contains_file};
pub use shape::{is_raw_message_output, is_raw_messages_input, schema_digest, SchemaPair};
pub use streamline::streamline_schema;
pub use validate::validate_instance;

/// Names of the canonical internal `$defs` recognized in schemas.
pub const FILE_DEFS: &[&str] = &["File", "Image", "Audio", "PDF"];
