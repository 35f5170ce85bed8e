//! Recover structured data from noisy model output.
//!
//! Model replies are not guaranteed to be pure JSON: they arrive fenced,
//! wrapped in prose, or malformed. The extractor is liberal about where the
//! JSON lives but never guesses semantics - a failed parse is always reported
//! as `None`, never partially repaired.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// First fenced block tagged `json`, non-greedy over the body.
static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```json(.*?)```").expect("valid regex"));

/// First fenced block with any (or no) language tag; body starts after the
/// fence line.
static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[^\n]*\n(.*?)```").expect("valid regex"));

/// Extract a JSON object from a model reply.
///
/// Precedence:
/// 1. trimmed text starting with `{` parses directly;
/// 2. text starting with a ```` ```json ```` fence takes the stripped-fence
///    shortcut (drop the 7-char opening and 3-char closing markers);
/// 3. otherwise the first ```` ```json ```` fenced block anywhere in the text
///    is parsed.
///
/// Returns `None` when no candidate region parses as a JSON object. Callers
/// must treat `None` as "extraction failed" and decide whether to retry the
/// whole generation step.
pub fn extract_json(response: &str) -> Option<Map<String, Value>> {
    let trimmed = response.trim();

    if trimmed.starts_with('{') {
        return parse_object(trimmed);
    }

    // Fast path for single-shot responses that are exactly one fenced block.
    if trimmed.starts_with("```json") && trimmed.ends_with("```") && trimmed.len() >= 10 {
        let stripped = &trimmed[7..trimmed.len() - 3];
        if let Some(obj) = parse_object(stripped.trim()) {
            return Some(obj);
        }
    }

    let body = JSON_FENCE.captures(trimmed)?.get(1)?.as_str();
    parse_object(body.trim())
}

fn parse_object(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Extract a code body from a synthesis reply: the content of the first
/// fenced code block if one is present, else the raw reply verbatim.
pub fn extract_code_block(response: &str) -> String {
    match CODE_FENCE.captures(response).and_then(|c| c.get(1)) {
        Some(body) => body.as_str().trim().to_string(),
        None => response.to_string(),
    }
}
