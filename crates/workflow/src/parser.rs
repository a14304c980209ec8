//! Lenient extraction of JSON objects from model output.
//!
//! Models wrap JSON in prose, markdown fences, or provider-specific content
//! blocks. [`parse_json`] digs the first usable object out and deserializes it.

use loresmith_core::error::WorkflowError;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Flatten provider content-block arrays (`[{"type":"text","text":"..."}]`)
/// into plain text. Anything else is returned unchanged.
pub fn normalize_content(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.starts_with('[') && !trimmed.starts_with('{') {
        return raw.to_string();
    }

    match serde_json::from_str::<Value>(trimmed) {
        Ok(Value::Array(blocks)) if !blocks.is_empty() && blocks.iter().all(is_text_block) => blocks
            .iter()
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        Ok(value) if value.as_object().is_some_and(|o| o.len() <= 2) && is_text_block(&value) => value
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => raw.to_string(),
    }
}

fn is_text_block(value: &Value) -> bool {
    value.get("text").is_some_and(Value::is_string)
        && value
            .get("type")
            .is_none_or(|t| t.as_str() == Some("text"))
}

/// Find the first JSON object in `text`.
///
/// Tried in order: the whole text, fenced code blocks (last first), the
/// balanced object starting at the first `{`, then every other `{...}` span.
pub fn extract_json(text: &str) -> Option<Value> {
    let text = text.trim();

    if let Some(value) = parse_object(text) {
        return Some(value);
    }

    for block in fenced_blocks(text).into_iter().rev() {
        if let Some(value) = parse_object(block) {
            return Some(value);
        }
    }

    let first = text.find('{')?;
    if let Some(value) = balanced_from(text, first).and_then(parse_object) {
        return Some(value);
    }

    // Last resort: any brace-delimited span, shortest first from each opening.
    for (start, _) in text.match_indices('{') {
        for (end, _) in text[start..].match_indices('}') {
            if let Some(value) = parse_object(&text[start..=start + end]) {
                return Some(value);
            }
        }
    }

    None
}

/// Normalize, extract and deserialize in one go.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, WorkflowError> {
    let content = normalize_content(raw);
    let value = extract_json(&content).ok_or_else(|| {
        WorkflowError::ParseFailure(format!("no JSON object in model output: {}", preview(&content)))
    })?;
    serde_json::from_value(value).map_err(|e| WorkflowError::ParseFailure(e.to_string()))
}

fn parse_object(candidate: &str) -> Option<Value> {
    serde_json::from_str::<Value>(candidate.trim())
        .ok()
        .filter(Value::is_object)
}

/// Bodies of ``` fenced blocks, with an optional `json` tag stripped.
fn fenced_blocks(text: &str) -> Vec<&str> {
    text.split("```")
        .skip(1)
        .step_by(2)
        .map(|body| {
            let body = body.trim_start();
            body.strip_prefix("json")
                .or_else(|| body.strip_prefix("JSON"))
                .unwrap_or(body)
                .trim()
        })
        .collect()
}

/// The `{...}` span opening at `start`, matching braces outside string literals.
fn balanced_from(text: &str, start: usize) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[start..start + offset + c.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn preview(text: &str) -> String {
    let mut preview: String = text.chars().take(120).collect();
    if text.chars().count() > 120 {
        preview.push('…');
    }
    preview
}
