//! Turning free-form inference replies into JSON objects.
//!
//! Models routinely wrap their answer in a markdown fence, put raw newlines
//! inside string values or leave a trailing comma behind. Parsing goes
//! fence -> strict parse -> repair -> reparse, and reports which of the two
//! failure kinds applies so the caller can decide whether to ask again.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ResponseError {
    /// The reply cannot be JSON no matter how it is cleaned up.
    #[error("Malformed JSON response: {0}")]
    Malformed(String),
    /// The reply looked like JSON but did not parse, even after repair.
    #[error("Invalid JSON response: {0}")]
    InvalidJson(String),
}

/// Return the contents of the first fenced code block, or the whole reply.
pub fn strip_code_fence(response: &str) -> Result<&str, ResponseError> {
    let opening = if let Some(pos) = response.find("```json") {
        Some(pos + "```json".len())
    } else {
        response.find("```").map(|pos| pos + 3)
    };

    let Some(start) = opening else {
        return Ok(response.trim());
    };

    let rest = &response[start..];
    match rest.find("```") {
        Some(end) => Ok(rest[..end].trim()),
        None => Err(ResponseError::Malformed("unclosed code block".to_string())),
    }
}

/// Escape raw line breaks inside string literals, drop other control
/// characters and remove trailing commas before `}` or `]`.
pub fn repair_json(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars: Vec<char> = text.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                c if c.is_control() => {}
                c => out.push(c),
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' if next_significant(&chars[i + 1..]).is_some_and(|n| n == '}' || n == ']') => {}
            '\n' | '\r' | '\t' => out.push(c),
            c if c.is_control() => {}
            c => out.push(c),
        }
    }
    out
}

fn next_significant(rest: &[char]) -> Option<char> {
    rest.iter().copied().find(|c| !c.is_whitespace())
}

/// Slice from the first `{` to the last `}` to drop chatter around the object.
fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

fn parse_object(text: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, got {}", type_name(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Parse an inference reply into a JSON object.
pub fn parse_response(response: &str) -> Result<Map<String, Value>, ResponseError> {
    if response.trim().is_empty() {
        return Err(ResponseError::Malformed("empty response".to_string()));
    }

    let content = strip_code_fence(response)?;

    let strict_error = match parse_object(content) {
        Ok(map) => return Ok(map),
        Err(e) => e,
    };

    let repaired = repair_json(content);
    if let Ok(map) = parse_object(&repaired) {
        return Ok(map);
    }
    if let Some(object) = extract_object(&repaired) {
        if let Ok(map) = parse_object(object) {
            return Ok(map);
        }
    }

    Err(ResponseError::InvalidJson(strict_error))
}

// ---------------------------------------------------------------------------
// Lenient field access
// ---------------------------------------------------------------------------

pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f.round() as i64))
        }
        _ => None,
    }
}

pub fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub fn coerce_string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(items) => items.iter().filter_map(coerce_string).collect(),
        Value::String(s) if !s.trim().is_empty() => vec![s.clone()],
        _ => Vec::new(),
    }
}

/// Borrowed view over a reply object with per-field defaults.
pub struct Fields<'a> {
    map: &'a Map<String, Value>,
}

impl<'a> Fields<'a> {
    pub fn new(map: &'a Map<String, Value>) -> Self {
        Self { map }
    }

    pub fn bool_or(&self, key: &str, default: bool) -> bool {
        self.map.get(key).and_then(coerce_bool).unwrap_or(default)
    }

    pub fn f64_or(&self, key: &str, default: f64) -> f64 {
        self.map.get(key).and_then(coerce_f64).unwrap_or(default)
    }

    pub fn i64_or(&self, key: &str, default: i64) -> i64 {
        self.map.get(key).and_then(coerce_i64).unwrap_or(default)
    }

    pub fn string_or(&self, key: &str, default: &str) -> String {
        self.map
            .get(key)
            .and_then(coerce_string)
            .unwrap_or_else(|| default.to_string())
    }

    pub fn string_list(&self, key: &str) -> Vec<String> {
        self.map.get(key).map(coerce_string_list).unwrap_or_default()
    }
}
