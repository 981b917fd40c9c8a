// src/mcp/protocol.rs
// JSON-RPC 2.0 envelope types used by both MCP transports.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: i64,
    pub method: String,
    pub params: Value,
}

impl JsonRpcRequest {
    pub fn new(id: i64, method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            method: method.to_string(),
            params,
        }
    }

    pub fn initialize(id: i64) -> Self {
        Self::new(
            id,
            "initialize",
            serde_json::json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "lmstudio-orchestrator", "version": env!("CARGO_PKG_VERSION")},
            }),
        )
    }

    pub fn tools_list(id: i64) -> Self {
        Self::new(id, "tools/list", serde_json::json!({}))
    }

    pub fn tools_call(id: i64, name: &str, arguments: Value) -> Self {
        Self::new(id, "tools/call", serde_json::json!({"name": name, "arguments": arguments}))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

impl JsonRpcResponse {
    /// True if `id` matches the numeric request id this response answers.
    pub fn matches_id(&self, expected: i64) -> bool {
        match &self.id {
            Some(Value::Number(n)) => n.as_i64() == Some(expected),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_request_has_protocol_version() {
        let req = JsonRpcRequest::initialize(1);
        assert_eq!(req.params["protocolVersion"], "2024-11-05");
    }

    #[test]
    fn matches_id_checks_numeric_equality() {
        let resp = JsonRpcResponse {
            jsonrpc: Some("2.0".to_string()),
            id: Some(Value::from(2)),
            result: None,
            error: None,
        };
        assert!(resp.matches_id(2));
        assert!(!resp.matches_id(1));
    }
}
