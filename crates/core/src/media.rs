//! Remote media reference scanning and rewriting.
//!
//! Job parameters are an opaque JSON document. Any string value beginning
//! with an HTTP(S) scheme is treated as a remote media reference that must
//! be materialized locally before assembly. Scanning and rewriting are pure
//! functions over `serde_json::Value` so the orchestrator never needs to
//! know the document's shape.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::CoreError;

/// URL prefixes that mark a string value as a remote reference.
pub const REMOTE_PREFIXES: &[&str] = &["http://", "https://"];

/// Whether a string value is a remote media reference.
pub fn is_remote_reference(value: &str) -> bool {
    REMOTE_PREFIXES.iter().any(|p| value.starts_with(p))
}

/// Validate that a URL is non-empty and carries an HTTP(S) scheme.
pub fn validate_remote_url(url: &str) -> Result<(), CoreError> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Validation(
            "Download URL must not be empty".to_string(),
        ));
    }
    if !is_remote_reference(trimmed) {
        return Err(CoreError::Validation(format!(
            "Download URL must start with http:// or https://, got: '{trimmed}'"
        )));
    }
    Ok(())
}

/// Collect every distinct remote reference in a parameter document.
///
/// Walks objects and arrays depth-first; each URL appears once, at its
/// first occurrence.
pub fn extract_remote_refs(params: &Value) -> Vec<String> {
    let mut refs = Vec::new();
    collect_refs(params, &mut refs);
    refs
}

fn collect_refs(value: &Value, refs: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if is_remote_reference(s) && !refs.iter().any(|r| r == s) {
                refs.push(s.clone());
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_refs(item, refs);
            }
        }
        Value::Object(map) => {
            for item in map.values() {
                collect_refs(item, refs);
            }
        }
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

/// Rewrite remote references to their local paths, in place.
///
/// Only exact string matches present in `mapping` are replaced; references
/// without a mapping (e.g. a download that failed) are left untouched for
/// downstream layers to reject or tolerate. Returns the number of values
/// rewritten.
pub fn rewrite_refs(params: &mut Value, mapping: &HashMap<String, String>) -> usize {
    match params {
        Value::String(s) => {
            if let Some(local) = mapping.get(s.as_str()) {
                *s = local.clone();
                1
            } else {
                0
            }
        }
        Value::Array(items) => items.iter_mut().map(|v| rewrite_refs(v, mapping)).sum(),
        Value::Object(map) => map
            .values_mut()
            .map(|v| rewrite_refs(v, mapping))
            .sum(),
        Value::Null | Value::Bool(_) | Value::Number(_) => 0,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
