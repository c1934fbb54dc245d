//! JSON extraction: pull one JSON object out of free-form model text.
//!
//! Even when told to "respond ONLY with valid JSON", models wrap the object
//! in ```` ```json ```` fences, prefix it with "Here is the extracted data:",
//! or append a closing remark. The strategies below run in order and the
//! first one that yields an **object** wins:
//!
//! 1. Fenced reply: strip the fence markers, parse first `{` .. last `}`
//! 2. First `{` .. last `}` of the whole reply
//! 3. The first complete JSON value starting at the first `{` (trailing prose
//!    with its own braces breaks strategy 2)
//! 4. The whole trimmed reply
//!
//! Arrays, strings and numbers are never accepted.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static RE_FENCED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)\r?\n?```").unwrap());

/// Extract the JSON object from `text`, or `None` if no strategy parses one.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let t = text.trim();

    if t.starts_with("```") && t[3..].contains("```") {
        if let Some(caps) = RE_FENCED.captures(t) {
            if let Some(obj) = caps.get(1).and_then(|body| parse_brace_span(body.as_str())) {
                return Some(obj);
            }
        }
    }

    parse_brace_span(t)
        .or_else(|| parse_leading_value(t))
        .or_else(|| as_object(serde_json::from_str(t).ok()?))
}

/// Parse the span from the first `{` to the last `}`.
fn parse_brace_span(t: &str) -> Option<Map<String, Value>> {
    let start = t.find('{')?;
    let end = t.rfind('}')?;
    if end <= start {
        return None;
    }
    as_object(serde_json::from_str(&t[start..=end]).ok()?)
}

/// Parse the first complete value beginning at the first `{`, ignoring
/// whatever follows it.
fn parse_leading_value(t: &str) -> Option<Map<String, Value>> {
    let start = t.find('{')?;
    let mut values = serde_json::Deserializer::from_str(&t[start..]).into_iter::<Value>();
    as_object(values.next()?.ok()?)
}

fn as_object(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}
