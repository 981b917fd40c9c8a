//! Tool schema normalization: the generic `settings.tools` path and the
//! MCP-discovery path. These two paths are deliberately distinct — see
//! SPEC_FULL.md §3.

use serde_json::{json, Value};

/// A tool schema ready to be sent to the model, plus bookkeeping the
/// registry needs to route invocations back to their origin.
#[derive(Debug, Clone)]
pub struct NormalizedTool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
    /// Present only for MCP-discovered tools; used by the registry to
    /// route `tools/call` back to the right server and raw tool name.
    pub mcp_origin: Option<McpOrigin>,
}

#[derive(Debug, Clone)]
pub struct McpOrigin {
    pub integration_id: String,
    pub raw_tool_name: String,
    pub server_name: String,
}

impl NormalizedTool {
    /// The OpenAI-style `{type:"function", function:{...}}` wire shape.
    pub fn to_openai_format(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
            }
        })
    }
}

/// Sanitize a tool name: disallowed characters become `_`, truncated to 64
/// octets, empty names rejected (caller should treat `None` as invalid).
pub fn sanitize_tool_name(name: &str) -> Option<String> {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let truncated: String = cleaned.chars().take(64).collect();
    if truncated.is_empty() {
        None
    } else {
        Some(truncated)
    }
}

/// Generic normalization for whatever the caller supplies in
/// `settings.tools`. Accepts the full `{type,function}` shape or a
/// shorthand `{name,description,parameters}` shape.
pub fn normalize_settings_tool(raw: &Value) -> Option<NormalizedTool> {
    let obj = raw.as_object()?;

    let (name_val, description_val, parameters_val) = if let Some(func) =
        obj.get("function").and_then(|v| v.as_object())
    {
        (
            func.get("name"),
            func.get("description"),
            func.get("parameters"),
        )
    } else {
        (obj.get("name"), obj.get("description"), obj.get("parameters"))
    };

    let raw_name = name_val.and_then(|v| v.as_str())?;
    let name = sanitize_tool_name(raw_name)?;

    let description = description_val
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();

    let parameters = match parameters_val {
        Some(Value::Object(_)) => parameters_val.cloned().unwrap(),
        _ => json!({"type": "object", "properties": {}}),
    };

    Some(NormalizedTool {
        name,
        description,
        parameters,
        mcp_origin: None,
    })
}

/// Normalize all of `settings.tools`, dropping entries that fail to
/// normalize, then dedupe by name (first occurrence wins).
pub fn normalize_settings_tools(raw_tools: &[Value]) -> Vec<NormalizedTool> {
    let normalized: Vec<NormalizedTool> = raw_tools.iter().filter_map(normalize_settings_tool).collect();
    dedupe_tools(normalized)
}

/// MCP-discovery normalization: composite `<integration>_<raw>` name,
/// stricter schema-wrapping fallback for non-object top-level schemas.
pub fn normalize_mcp_tool(
    integration_id: &str,
    server_name: &str,
    raw_tool: &Value,
) -> Option<NormalizedTool> {
    let obj = raw_tool.as_object()?;
    let raw_name = obj
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("tool")
        .to_string();

    let composite = format!("{}_{}", integration_id.replace('/', "_"), raw_name);
    let name = sanitize_tool_name(&composite).unwrap_or_else(|| "tool".to_string());

    let description = obj
        .get("description")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("MCP tool '{}' from {}", raw_name, server_name));

    let schema = obj
        .get("inputSchema")
        .or_else(|| obj.get("input_schema"));

    let parameters = match schema {
        Some(Value::Object(map)) => {
            let is_object_typed = map.get("type").and_then(|v| v.as_str()) == Some("object");
            if is_object_typed {
                Value::Object(map.clone())
            } else {
                json!({
                    "type": "object",
                    "properties": {"input": Value::Object(map.clone())},
                    "required": ["input"],
                    "additionalProperties": false,
                })
            }
        }
        _ => json!({"type": "object", "properties": {}, "additionalProperties": true}),
    };

    Some(NormalizedTool {
        name,
        description,
        parameters,
        mcp_origin: Some(McpOrigin {
            integration_id: integration_id.to_string(),
            raw_tool_name: raw_name,
            server_name: server_name.to_string(),
        }),
    })
}

/// Deduplicate normalized tools by name, first occurrence wins. Idempotent.
pub fn dedupe_tools(tools: Vec<NormalizedTool>) -> Vec<NormalizedTool> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(tools.len());
    for tool in tools {
        if seen.insert(tool.name.clone()) {
            out.push(tool);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_replaces_disallowed_chars_and_truncates() {
        let name = sanitize_tool_name("weird name!@# ".repeat(10).as_str()).unwrap();
        assert!(name.len() <= 64);
        assert!(name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'));
    }

    #[test]
    fn sanitize_is_idempotent() {
        let once = sanitize_tool_name("my tool!").unwrap();
        let twice = sanitize_tool_name(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn sanitize_rejects_empty() {
        assert!(sanitize_tool_name("").is_none());
    }

    #[test]
    fn generic_normalization_accepts_shorthand_shape() {
        let raw = json!({"name": "search", "description": "look things up"});
        let tool = normalize_settings_tool(&raw).unwrap();
        assert_eq!(tool.name, "search");
        assert_eq!(tool.parameters["type"], "object");
        assert!(tool.parameters.get("required").is_none());
    }

    #[test]
    fn generic_normalization_accepts_full_shape() {
        let raw = json!({
            "type": "function",
            "function": {"name": "search", "parameters": {"type": "object", "properties": {"q": {"type": "string"}}}}
        });
        let tool = normalize_settings_tool(&raw).unwrap();
        assert_eq!(tool.name, "search");
        assert_eq!(tool.parameters["properties"]["q"]["type"], "string");
    }

    #[test]
    fn mcp_normalization_wraps_non_object_schema() {
        let raw = json!({"name": "ping", "inputSchema": {"type": "string"}});
        let tool = normalize_mcp_tool("slack", "Slack", &raw).unwrap();
        assert_eq!(tool.name, "slack_ping");
        assert_eq!(tool.parameters["type"], "object");
        assert_eq!(tool.parameters["required"][0], "input");
    }

    #[test]
    fn mcp_normalization_defaults_missing_schema() {
        let raw = json!({"name": "ping"});
        let tool = normalize_mcp_tool("slack", "Slack", &raw).unwrap();
        assert_eq!(tool.parameters["additionalProperties"], true);
    }

    #[test]
    fn dedupe_is_idempotent() {
        let raw = vec![json!({"name": "a"}), json!({"name": "a"}), json!({"name": "b"})];
        let normalized = normalize_settings_tools(&raw);
        assert_eq!(normalized.len(), 2);
        let twice = dedupe_tools(normalized.clone());
        assert_eq!(twice.len(), normalized.len());
    }
}
