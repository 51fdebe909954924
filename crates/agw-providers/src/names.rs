// SPDX-License-Identifier: MIT OR Apache-2.0
//! Tool-name mapping.
//!
//! Canonical tool names may begin with `@` (hosted tools) and contain
//! dashes; most providers only accept `[a-zA-Z0-9_]`. The substitution is
//! reversible: `@` becomes `_at_` and `-` becomes `__`.

/// Map a canonical tool name to the provider-safe form.
#[must_use]
pub fn internal_tool_name_to_native(name: &str) -> String {
    name.replace('@', "_at_").replace('-', "__")
}

/// Map a provider-safe tool name back to canonical form.
#[must_use]
pub fn native_tool_name_to_internal(name: &str) -> String {
    name.replace("_at_", "@").replace("__", "-")
}
