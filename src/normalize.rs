//! Response normalizer: maps provider-variant JSON shapes into a uniform
//! `(assistant_text, tool_calls[], finish_reason)` triple.
//!
//! The provider boundary is treated as an untyped JSON tree rather than a
//! fixed struct, since LM Studio and its upstream backends disagree on the
//! exact response shape (content as a string, a dict, or a list of parts;
//! `tool_calls` as a list, a single dict, or absent in favor of a legacy
//! `function_call`).

use crate::model::{FunctionCall, ToolCall};
use serde_json::Value;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Result of normalizing one (non-streaming) `choice` object.
#[derive(Debug, Clone, Default)]
pub struct NormalizedResponse {
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: Option<String>,
}

/// Extract text from a "content-like" JSON value: a string, a dict with
/// `text`/`content`, or a list of parts (each a string or an object with
/// `type` + `text`, or `text`/`content`).
fn extract_text_like(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => {
            if let Some(Value::String(s)) = map.get("text") {
                if !s.is_empty() {
                    return Some(s.clone());
                }
            }
            if let Some(Value::String(s)) = map.get("content") {
                if !s.is_empty() {
                    return Some(s.clone());
                }
            }
            None
        }
        Value::Array(parts) => {
            let mut out = String::new();
            for part in parts {
                match part {
                    Value::String(s) => out.push_str(s),
                    Value::Object(map) => {
                        if let Some(Value::String(s)) = map.get("text") {
                            out.push_str(s);
                        } else if let Some(Value::String(s)) = map.get("content") {
                            out.push_str(s);
                        }
                    }
                    _ => {}
                }
            }
            if out.is_empty() {
                None
            } else {
                Some(out)
            }
        }
        _ => None,
    }
}

/// Content extraction order (first non-empty wins):
/// `choice.message.content`, then `choice.text`, then `choice.output_text`.
pub fn extract_content(choice: &Value) -> String {
    if let Some(content) = choice.get("message").and_then(|m| m.get("content")) {
        if let Some(text) = extract_text_like(content) {
            return text;
        }
    }
    if let Some(text) = choice.get("text").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            return text.to_string();
        }
    }
    if let Some(text) = choice.get("output_text").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            return text.to_string();
        }
    }
    String::new()
}

/// Non-cryptographic stable id for a synthesized legacy function_call tool
/// call, for display only. Collisions are possible and harmless.
fn legacy_fc_id(function_call: &Value) -> String {
    let mut hasher = DefaultHasher::new();
    function_call.to_string().hash(&mut hasher);
    let n = hasher.finish() % 10_000_000;
    format!("legacy_fc_{}", n)
}

fn tool_call_from_value(value: &Value) -> Option<ToolCall> {
    let obj = value.as_object()?;
    let id = obj
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let function = obj.get("function")?;
    let name = function.get("name")?.as_str()?.to_string();
    let arguments = match function.get("arguments") {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };
    Some(ToolCall {
        id,
        kind: "function".to_string(),
        function: FunctionCall { name, arguments },
    })
}

/// Tool-call extraction from a `choice` object, including legacy
/// `function_call` synthesis.
pub fn extract_tool_calls(choice: &Value) -> Vec<ToolCall> {
    let message = choice.get("message");

    if let Some(tool_calls) = message.and_then(|m| m.get("tool_calls")) {
        match tool_calls {
            Value::Array(items) => {
                return items.iter().filter_map(tool_call_from_value).collect();
            }
            Value::Object(_) => {
                if let Some(tc) = tool_call_from_value(tool_calls) {
                    return vec![tc];
                }
            }
            _ => {}
        }
    }

    let legacy = message
        .and_then(|m| m.get("function_call"))
        .or_else(|| choice.get("function_call"));

    if let Some(fc) = legacy {
        if let Some(name) = fc.get("name").and_then(|v| v.as_str()) {
            let arguments = match fc.get("arguments") {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };
            return vec![ToolCall {
                id: legacy_fc_id(fc),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: name.to_string(),
                    arguments,
                },
            }];
        }
    }

    Vec::new()
}

/// Normalize one non-streaming `choice` object into the uniform triple.
/// Idempotent: running this twice on the same input yields identical
/// output.
pub fn normalize_choice(choice: &Value) -> NormalizedResponse {
    NormalizedResponse {
        content: extract_content(choice),
        tool_calls: extract_tool_calls(choice),
        finish_reason: choice
            .get("finish_reason")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    }
}

/// Extract incremental text from one streaming chunk's `choice` object:
/// `choice.delta.content`, then `choice.delta.text`, then
/// `choice.text`/`choice.output_text`, then — when no `delta` key is
/// present at all — falls back to re-running content extraction against
/// `choice.message` itself (some provider variants emit full `message`
/// objects even on "streamed" chunks).
pub fn extract_delta(choice: &Value) -> String {
    match choice.get("delta") {
        Some(delta) => {
            if let Some(content) = delta.get("content") {
                if let Some(text) = extract_text_like(content) {
                    return text;
                }
            }
            if let Some(text) = delta.get("text").and_then(|v| v.as_str()) {
                if !text.is_empty() {
                    return text.to_string();
                }
            }
            fallback_choice_text(choice)
        }
        None => {
            if let Some(text) = fallback_choice_text(choice) {
                return text;
            }
            extract_content(choice)
        }
    }
    .unwrap_or_default()
}

fn fallback_choice_text(choice: &Value) -> Option<String> {
    if let Some(text) = choice.get("text").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            return Some(text.to_string());
        }
    }
    if let Some(text) = choice.get("output_text").and_then(|v| v.as_str()) {
        if !text.is_empty() {
            return Some(text.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_plain_string_content() {
        let choice = json!({"message": {"content": "hi"}, "finish_reason": "stop"});
        let result = normalize_choice(&choice);
        assert_eq!(result.content, "hi");
        assert_eq!(result.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn extracts_parts_list_content() {
        let choice = json!({"message": {"content": [{"type": "text", "text": "a"}, "b"]}});
        assert_eq!(extract_content(&choice), "ab");
    }

    #[test]
    fn falls_back_to_choice_text_then_output_text() {
        let choice = json!({"text": "from-text"});
        assert_eq!(extract_content(&choice), "from-text");
        let choice = json!({"output_text": "from-output-text"});
        assert_eq!(extract_content(&choice), "from-output-text");
    }

    #[test]
    fn extracts_tool_calls_list() {
        let choice = json!({"message": {"tool_calls": [
            {"id": "c1", "function": {"name": "search", "arguments": "{\"q\":\"x\"}"}}
        ]}});
        let calls = extract_tool_calls(&choice);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "search");
    }

    #[test]
    fn wraps_single_tool_call_object() {
        let choice = json!({"message": {"tool_calls": {"id": "c1", "function": {"name": "x", "arguments": "{}"}}}});
        assert_eq!(extract_tool_calls(&choice).len(), 1);
    }

    #[test]
    fn synthesizes_legacy_function_call() {
        let choice = json!({"message": {"function_call": {"name": "legacy_tool", "arguments": "{}"}}});
        let calls = extract_tool_calls(&choice);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.name, "legacy_tool");
        assert!(calls[0].id.starts_with("legacy_fc_"));
    }

    #[test]
    fn normalize_choice_is_idempotent() {
        let choice = json!({"message": {"content": "hi", "tool_calls": [
            {"id": "c1", "function": {"name": "x", "arguments": "{}"}}
        ]}, "finish_reason": "stop"});
        let a = normalize_choice(&choice);
        let b = normalize_choice(&choice);
        assert_eq!(a.content, b.content);
        assert_eq!(a.finish_reason, b.finish_reason);
        assert_eq!(a.tool_calls.len(), b.tool_calls.len());
    }

    #[test]
    fn delta_falls_back_to_message_when_no_delta_key() {
        let choice = json!({"message": {"content": "full text, no delta key"}});
        assert_eq!(extract_delta(&choice), "full text, no delta key");
    }

    #[test]
    fn delta_prefers_delta_content_over_message() {
        let choice = json!({"delta": {"content": "chunk"}, "message": {"content": "ignored"}});
        assert_eq!(extract_delta(&choice), "chunk");
    }
}
