// Structured analysis extraction
//
// The upstream model does not reliably emit valid JSON, so extraction is a
// layered fallback: fenced JSON block, then the first balanced `{...}`
// substring, then per-field regex against the raw text. The contract promises
// graceful degradation over hard failure: every required field gets a value,
// empty string when nothing can be found.

use serde_json::{Map, Value};
use std::sync::OnceLock;

use regex::Regex;

fn fenced_json_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(\{.*?\})\s*```").unwrap())
}

/// Extract the given fields from a model response, best-effort.
///
/// Never fails. Fields found in a parsed JSON object keep their JSON value;
/// fields recovered via regex are strings; fields not found at all are empty
/// strings.
pub fn extract_structured(text: &str, required_fields: &[String]) -> Map<String, Value> {
    let mut out = Map::new();

    if let Some(parsed) = parse_json_object(text) {
        for field in required_fields {
            if let Some(value) = parsed.get(field) {
                out.insert(field.clone(), value.clone());
            }
        }
    }

    // Regex fallback for anything missing or empty after JSON parsing
    for field in required_fields {
        let missing = match out.get(field) {
            None | Some(Value::Null) => true,
            Some(Value::String(s)) => s.trim().is_empty(),
            Some(_) => false,
        };
        if missing {
            let value = extract_field(text, field).unwrap_or_default();
            out.insert(field.clone(), Value::String(value));
        }
    }

    out
}

/// Try to find a JSON object in the text: fenced block first, then the first
/// balanced `{...}` substring.
fn parse_json_object(text: &str) -> Option<Map<String, Value>> {
    if let Some(caps) = fenced_json_re().captures(text) {
        if let Ok(Value::Object(map)) = serde_json::from_str(&caps[1]) {
            return Some(map);
        }
    }
    if let Some(candidate) = first_balanced_object(text) {
        if let Ok(Value::Object(map)) = serde_json::from_str(candidate) {
            return Some(map);
        }
    }
    None
}

/// Find the first balanced `{...}` substring, respecting string literals
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Per-field regex ladder against the raw text.
///
/// Tries JSON-style `"field": "value"`, then bolded-label (`**Field Name:** value`),
/// then `Field Name: value`, then `- Field Name: value`. The label is the
/// field's snake_case name with underscores as spaces, case-insensitive.
fn extract_field(text: &str, field: &str) -> Option<String> {
    let label = field.replace('_', " ");
    let field_esc = regex::escape(field);
    let label_esc = regex::escape(&label);

    let patterns = [
        format!(r#"(?i)"{field_esc}"\s*:\s*"([^"]*)""#),
        format!(r"(?im)\*\*{label_esc}\s*:?\*\*\s*:?\s*(.+?)\s*$"),
        format!(r"(?im)^\s*{label_esc}\s*:\s*(.+?)\s*$"),
        format!(r"(?im)^\s*-\s*{label_esc}\s*:\s*(.+?)\s*$"),
    ];

    for pattern in &patterns {
        let re = Regex::new(pattern).ok()?;
        if let Some(caps) = re.captures(text) {
            let value = caps[1].trim().trim_matches('*').trim();
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}
