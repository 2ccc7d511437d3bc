//! Default merge for parallel results
//!
//! Designed to be order-independent in content: every non-`response` key is
//! namespaced by the producing agent's id, and `response` values are
//! concatenated with a visual separator.

use serde_json::{Map, Value};

/// Separator between concatenated agent responses.
pub const RESPONSE_SEPARATOR: &str = "\n\n---\n\n";

/// Merge per-agent result states into the base state.
pub fn default_merge(
    base: Map<String, Value>,
    results: Vec<(String, Map<String, Value>)>,
) -> Map<String, Value> {
    let mut merged = base;
    let mut responses = Vec::new();

    for (agent_id, result) in results {
        for (key, value) in result {
            if key == "response" {
                match value.as_str() {
                    Some(text) => responses.push(text.to_string()),
                    None => responses.push(value.to_string()),
                }
            } else {
                merged.insert(format!("{}.{}", agent_id, key), value);
            }
        }
    }

    if !responses.is_empty() {
        merged.insert(
            "response".to_string(),
            Value::String(responses.join(RESPONSE_SEPARATOR)),
        );
    }
    merged
}
