//! Turns raw completion text into a single [`Action`].
//!
//! Models wrap their JSON in prose, code fences or stray control bytes. The
//! text is cleaned, parsed whole, and failing that every top-level `{...}`
//! fragment that looks like an action payload is tried in order.

use crate::types::Action;
use serde_json::Value;

/// Extracts the first usable action, or a short reason why none was found.
pub fn coerce_action(text: &str) -> Result<Action, String> {
    let cleaned = strip_control(text);
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return Err("empty_response".to_string());
    }

    let mut last_err = "no_json_object".to_string();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        match action_from_value(value) {
            Ok(action) => return Ok(action),
            Err(e) => last_err = e,
        }
    }

    for fragment in balanced_objects(trimmed) {
        if !fragment.contains("\"actions\"") && !fragment.contains("\"tool\"") {
            continue;
        }
        match serde_json::from_str::<Value>(fragment) {
            Ok(value) => match action_from_value(value) {
                Ok(action) => return Ok(action),
                Err(e) => last_err = e,
            },
            Err(e) => last_err = format!("invalid_json: {}", e),
        }
    }

    Err(last_err)
}

/// Drops C0 control characters except tab, newline and carriage return.
pub fn strip_control(text: &str) -> String {
    text.chars()
        .filter(|c| !matches!(*c, '\u{00}'..='\u{08}' | '\u{0b}' | '\u{0c}' | '\u{0e}'..='\u{1f}'))
        .collect()
}

/// Top-level balanced `{...}` spans, skipping braces inside JSON strings.
fn balanced_objects(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        out.push(&text[s..=idx]);
                    }
                }
            }
            _ => {}
        }
    }
    out
}

fn action_from_value(value: Value) -> Result<Action, String> {
    let candidates = match value {
        Value::Object(mut map) => match map.remove("actions") {
            Some(Value::Array(items)) => items,
            Some(Value::Object(obj)) => vec![Value::Object(obj)],
            Some(_) => return Err("actions_not_a_list".to_string()),
            None if map.contains_key("tool") => vec![Value::Object(map)],
            None => return Err("missing_actions".to_string()),
        },
        Value::Array(items) => items,
        _ => return Err("not_an_object".to_string()),
    };

    if candidates.is_empty() {
        return Err("empty_actions".to_string());
    }

    let mut last_err = String::new();
    for candidate in candidates {
        match serde_json::from_value::<Action>(candidate) {
            Ok(action) => return Ok(action),
            Err(e) => last_err = format!("schema: {}", e),
        }
    }
    Err(last_err)
}
