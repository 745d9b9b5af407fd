//! TOON (Token-Oriented Object Notation) encoder.
//!
//! TOON is an indentation-based rendering of JSON aimed at LLM consumers: objects become
//! `key: value` lines, primitive arrays are inlined with their length, and arrays of
//! uniform flat objects become a header plus one row per element:
//!
//! ```text
//! status: success
//! country: Canada
//! tags[2]: a,b
//! rows[2]{id,name}:
//!   1,foo
//!   2,bar
//! ```

use serde_json::{Map, Value};

const INDENT: &str = "  ";

/// Encode any JSON value as TOON. The output has no trailing newline.
pub fn encode(value: &Value) -> String {
    let mut lines = Vec::new();
    match value {
        Value::Object(map) => encode_object(map, 0, &mut lines),
        Value::Array(arr) => encode_array(None, arr, 0, &mut lines),
        other => lines.push(encode_primitive(other)),
    }
    lines.join("\n")
}

fn pad(depth: usize) -> String {
    INDENT.repeat(depth)
}

fn encode_object(map: &Map<String, Value>, depth: usize, lines: &mut Vec<String>) {
    for (k, v) in map {
        encode_field(k, v, depth, lines);
    }
}

fn encode_field(key: &str, value: &Value, depth: usize, lines: &mut Vec<String>) {
    let key = encode_key(key);
    match value {
        Value::Object(map) => {
            lines.push(format!("{}{key}:", pad(depth)));
            encode_object(map, depth + 1, lines);
        }
        Value::Array(arr) => encode_array(Some(&key), arr, depth, lines),
        other => lines.push(format!("{}{key}: {}", pad(depth), encode_primitive(other))),
    }
}

fn encode_array(key: Option<&str>, arr: &[Value], depth: usize, lines: &mut Vec<String>) {
    let prefix = format!("{}{}", pad(depth), key.unwrap_or_default());
    let len = arr.len();

    if arr.iter().all(is_primitive) {
        let items = arr.iter().map(encode_primitive).collect::<Vec<_>>();
        if items.is_empty() {
            lines.push(format!("{prefix}[0]:"));
        } else {
            lines.push(format!("{prefix}[{len}]: {}", items.join(",")));
        }
        return;
    }

    if let Some(fields) = tabular_fields(arr) {
        let header = fields
            .iter()
            .map(|f| encode_key(f))
            .collect::<Vec<_>>()
            .join(",");
        lines.push(format!("{prefix}[{len}]{{{header}}}:"));
        for item in arr {
            let Value::Object(obj) = item else { continue };
            let row = fields
                .iter()
                .map(|f| encode_primitive(&obj[f.as_str()]))
                .collect::<Vec<_>>()
                .join(",");
            lines.push(format!("{}{row}", pad(depth + 1)));
        }
        return;
    }

    lines.push(format!("{prefix}[{len}]:"));
    for item in arr {
        encode_list_item(item, depth + 1, lines);
    }
}

fn encode_list_item(item: &Value, depth: usize, lines: &mut Vec<String>) {
    match item {
        Value::Object(map) if map.is_empty() => lines.push(format!("{}-", pad(depth))),
        Value::Object(map) => {
            // First field shares the hyphen line; the rest align under it.
            let mut nested = Vec::new();
            encode_object(map, depth + 1, &mut nested);
            if let Some(first) = nested.first_mut() {
                let body = first.trim_start().to_string();
                *first = format!("{}- {body}", pad(depth));
            }
            lines.extend(nested);
        }
        Value::Array(arr) => {
            let mut nested = Vec::new();
            encode_array(None, arr, depth + 1, &mut nested);
            if let Some(first) = nested.first_mut() {
                let body = first.trim_start().to_string();
                *first = format!("{}- {body}", pad(depth));
            }
            lines.extend(nested);
        }
        other => lines.push(format!("{}- {}", pad(depth), encode_primitive(other))),
    }
}

/// Field order of the first element when every element is an object with the same keys
/// and only primitive values.
fn tabular_fields(arr: &[Value]) -> Option<Vec<String>> {
    let first = arr.first()?.as_object()?;
    if first.is_empty() {
        return None;
    }
    let fields = first.keys().cloned().collect::<Vec<_>>();
    let uniform = arr.iter().all(|item| {
        item.as_object().is_some_and(|obj| {
            obj.len() == fields.len()
                && fields
                    .iter()
                    .all(|f| obj.get(f).is_some_and(is_primitive))
        })
    });
    uniform.then_some(fields)
}

fn is_primitive(v: &Value) -> bool {
    !matches!(v, Value::Object(_) | Value::Array(_))
}

fn encode_key(key: &str) -> String {
    let mut chars = key.chars();
    let bare = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if bare { key.to_string() } else { quote(key) }
}

fn encode_primitive(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) if needs_quoting(s) => quote(s),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => quote(&v.to_string()),
    }
}

fn needs_quoting(s: &str) -> bool {
    s.is_empty()
        || s.trim() != s
        || matches!(s, "true" | "false" | "null")
        || s.starts_with('-')
        || s.parse::<f64>().is_ok()
        || s
            .chars()
            .any(|c| matches!(c, ',' | ':' | '"' | '\\' | '[' | ']' | '{' | '}' | '\n' | '\r' | '\t'))
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
