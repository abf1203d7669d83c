//! Pull structured JSON out of free-form model replies.
//!
//! Models wrap JSON in ```json fences or surround it with prose even when
//! asked not to. Callers get the object text back, or a parse error string.

use serde::de::DeserializeOwned;

/// Strip a Markdown code fence if present, otherwise narrow to the outermost
/// `{ … }` span. Returns the input trimmed when neither applies.
pub fn extract_json(response: &str) -> &str {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```") {
        let after_start = &trimmed[start + 3..];
        // Drop an optional language label, with or without a following newline.
        let content = match after_start.get(..4) {
            Some(label) if label.eq_ignore_ascii_case("json") => &after_start[4..],
            _ => after_start,
        };
        if let Some(end) = content.find("```") {
            return content[..end].trim();
        }
    }

    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(open), Some(close)) if open < close => &trimmed[open..=close],
        _ => trimmed,
    }
}

/// Deserialize `T` from a model reply.
pub fn parse_reply<T: DeserializeOwned>(response: &str) -> Result<T, String> {
    serde_json::from_str(extract_json(response)).map_err(|e| format!("invalid JSON reply: {e}"))
}
