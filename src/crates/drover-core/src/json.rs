//! Salvaging parser for model-produced JSON
//!
//! Models asked for JSON frequently wrap it in markdown fences or prose.
//! [`parse_salvaged`] tries the raw text first, then a fenced block, then the
//! outermost braces/brackets.

use serde::de::DeserializeOwned;

/// Locate a JSON candidate inside free-form model output.
pub fn extract_json(text: &str) -> Option<&str> {
    // ```json ... ``` block (either fence casing)
    for fence in ["```json", "```JSON"] {
        if let Some(start) = text.find(fence) {
            let content = &text[start + fence.len()..];
            if let Some(end) = content.find("```") {
                return Some(content[..end].trim());
            }
        }
    }

    // Outermost object
    if let Some(start) = text.find('{') {
        if let Some(end) = text.rfind('}') {
            if end > start {
                return Some(text[start..=end].trim());
            }
        }
    }

    // Outermost array
    if let Some(start) = text.find('[') {
        if let Some(end) = text.rfind(']') {
            if end > start {
                return Some(text[start..=end].trim());
            }
        }
    }

    None
}

/// Parse model output as `T`, salvaging from fences or surrounding prose.
pub fn parse_salvaged<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    match serde_json::from_str(text.trim()) {
        Ok(value) => Ok(value),
        Err(direct_err) => match extract_json(text) {
            Some(candidate) => serde_json::from_str(candidate),
            None => Err(direct_err),
        },
    }
}
