// SPDX-License-Identifier: MIT OR Apache-2.0
//! Instance validation against streamlined schemas.

use serde_json::Value;

use agw_core::error::{ErrorKind, GatewayError};

/// Validate `instance` against `schema`.
///
/// # Errors
///
/// Returns [`ErrorKind::BadRequest`] carrying up to five violation messages
/// with their instance paths, or [`ErrorKind::Internal`] when the schema
/// itself cannot be compiled.
pub fn validate_instance(schema: &Value, instance: &Value) -> Result<(), GatewayError> {
    let validator = jsonschema::validator_for(schema).map_err(|e| {
        GatewayError::internal(format!("schema failed to compile: {e}"))
            .with_detail("schema", schema.clone())
    })?;

    let violations: Vec<String> = validator
        .iter_errors(instance)
        .map(|err| {
            let path = err.instance_path.to_string();
            if path.is_empty() {
                err.to_string()
            } else {
                format!("{path}: {err}")
            }
        })
        .take(5)
        .collect();

    if violations.is_empty() {
        return Ok(());
    }
    Err(
        GatewayError::new(ErrorKind::BadRequest, "input does not match the schema")
            .with_detail("violations", serde_json::json!(violations)),
    )
}
