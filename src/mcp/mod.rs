// src/mcp/mod.rs
// Tool Registry: MCP tool discovery (HTTP and stdio) and invocation.

pub mod protocol;

use std::collections::HashMap;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{LmStudioError, Result};
use crate::tool::{normalize_mcp_tool, McpOrigin, NormalizedTool};
use crate::transport::{McpHttpTransport, McpStdioTransport};

/// One configured MCP server: discriminated by presence of `url` vs
/// `command`. Either may declare fallback `calls`/`actions` used when live
/// discovery fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub integration_id: String,
    pub name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub calls: Vec<String>,
}

/// Discovers and invokes tools across whatever MCP servers the caller
/// configures. Discovery is concurrent across servers; invocation routes
/// by the normalized function name back to its origin server.
pub struct ToolRegistry {
    timeout_secs: u64,
    configs: HashMap<String, McpServerConfig>,
}

impl ToolRegistry {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            timeout_secs,
            configs: HashMap::new(),
        }
    }

    /// Discover and normalize tools from every enabled server config.
    /// Individual server failures are logged but never fail discovery as a
    /// whole; each falls through to its own declared-calls fallback.
    pub async fn discover(&mut self, server_configs: Vec<McpServerConfig>) -> Vec<NormalizedTool> {
        let tasks = server_configs
            .iter()
            .cloned()
            .map(|cfg| discover_one(cfg, self.timeout_secs));

        let results = join_all(tasks).await;
        let mut all_tools = Vec::new();
        for (cfg, tools) in server_configs.into_iter().zip(results) {
            self.configs.insert(cfg.integration_id.clone(), cfg);
            all_tools.extend(tools);
        }

        crate::tool::dedupe_tools(all_tools)
    }

    /// Invoke a previously-discovered tool by its normalized function name.
    pub async fn call_tool(&self, tool: &NormalizedTool, arguments: Value) -> Result<Value> {
        let origin = tool
            .mcp_origin
            .as_ref()
            .ok_or_else(|| LmStudioError::other("tool has no MCP origin to route invocation to"))?;
        let cfg = self
            .configs
            .get(&origin.integration_id)
            .ok_or_else(|| LmStudioError::other(format!("unknown MCP server '{}'", origin.integration_id)))?;

        call_tool_on(cfg, origin, arguments, self.timeout_secs).await
    }
}

async fn discover_one(cfg: McpServerConfig, timeout_secs: u64) -> Vec<NormalizedTool> {
    let raw_tools = match discover_raw(&cfg, timeout_secs).await {
        Ok(tools) if !tools.is_empty() => tools,
        Ok(_) => declared_calls_fallback(&cfg),
        Err(e) => {
            debug!(
                "discovery failed for {} ({}), falling back to config-declared calls: {}",
                cfg.integration_id, cfg.name, e
            );
            declared_calls_fallback(&cfg)
        }
    };

    raw_tools
        .iter()
        .filter_map(|t| normalize_mcp_tool(&cfg.integration_id, &cfg.name, t))
        .collect()
}

async fn discover_raw(cfg: &McpServerConfig, timeout_secs: u64) -> Result<Vec<Value>> {
    if let Some(url) = cfg.url.as_deref().filter(|u| !u.trim().is_empty()) {
        info!("discovering tools from HTTP endpoint: {}", url);
        let headers: Vec<(String, String)> = cfg.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let transport = McpHttpTransport::new(url.trim(), headers, timeout_secs);
        transport.initialize_best_effort().await;
        let resp = transport.tools_list().await?;
        Ok(extract_tools_from_result(&resp.result))
    } else if let Some(command) = cfg.command.as_deref().filter(|c| !c.trim().is_empty()) {
        info!("discovering tools from stdio command: {}", command);
        let mut transport = McpStdioTransport::spawn(command.trim(), &cfg.args, &cfg.env, timeout_secs).await?;
        transport.initialize_best_effort().await;
        let req = protocol::JsonRpcRequest::tools_list(2);
        let resp = transport.request(&req).await;
        transport.shutdown().await;
        Ok(extract_tools_from_result(&resp?.result))
    } else {
        Ok(Vec::new())
    }
}

fn extract_tools_from_result(result: &Option<Value>) -> Vec<Value> {
    result
        .as_ref()
        .and_then(|r| r.get("tools"))
        .and_then(|t| t.as_array())
        .map(|arr| arr.iter().filter(|t| t.is_object()).cloned().collect())
        .unwrap_or_default()
}

/// Materialize the config's declared `calls[]` as tools with an empty
/// object schema, used when live discovery yields nothing.
fn declared_calls_fallback(cfg: &McpServerConfig) -> Vec<Value> {
    if cfg.calls.is_empty() {
        return Vec::new();
    }
    info!(
        "using {} config-declared calls for {}: {}",
        cfg.calls.len(),
        cfg.integration_id,
        cfg.calls.join(", ")
    );
    cfg.calls
        .iter()
        .filter(|c| !c.trim().is_empty())
        .map(|call| {
            serde_json::json!({
                "name": call,
                "description": format!("MCP action '{}' from {}", call, cfg.name),
                "inputSchema": {"type": "object", "properties": {}, "additionalProperties": true},
            })
        })
        .collect()
}

async fn call_tool_on(
    cfg: &McpServerConfig,
    origin: &McpOrigin,
    arguments: Value,
    timeout_secs: u64,
) -> Result<Value> {
    if let Some(url) = cfg.url.as_deref().filter(|u| !u.trim().is_empty()) {
        let headers: Vec<(String, String)> = cfg.headers.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let transport = McpHttpTransport::new(url.trim(), headers, timeout_secs);
        transport.initialize_best_effort().await;
        let resp = transport.tools_call(&origin.raw_tool_name, arguments).await?;
        extract_call_result(resp.result)
    } else if let Some(command) = cfg.command.as_deref().filter(|c| !c.trim().is_empty()) {
        let mut transport = McpStdioTransport::spawn(command.trim(), &cfg.args, &cfg.env, timeout_secs).await?;
        transport.initialize_best_effort().await;
        let req = protocol::JsonRpcRequest::tools_call(2, &origin.raw_tool_name, arguments);
        let resp = transport.request(&req).await;
        transport.shutdown().await;
        extract_call_result(resp?.result)
    } else {
        Err(LmStudioError::other(format!(
            "no supported transport for {}",
            origin.integration_id
        )))
    }
}

fn extract_call_result(result: Option<Value>) -> Result<Value> {
    match result {
        Some(v) if v.is_object() => Ok(v),
        other => Err(LmStudioError::other(format!(
            "invalid tools/call response: {:?}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declared_calls_fallback_materializes_empty_schema_tools() {
        let cfg = McpServerConfig {
            integration_id: "demo".to_string(),
            name: "Demo".to_string(),
            url: None,
            headers: HashMap::new(),
            command: None,
            args: Vec::new(),
            env: HashMap::new(),
            calls: vec!["ping".to_string(), "pong".to_string()],
        };
        let raw = declared_calls_fallback(&cfg);
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0]["name"], "ping");
        assert_eq!(raw[0]["description"], "MCP action 'ping' from Demo");

        let normalized: Vec<NormalizedTool> = raw
            .iter()
            .filter_map(|t| normalize_mcp_tool(&cfg.integration_id, &cfg.name, t))
            .collect();
        assert_eq!(normalized[0].name, "demo_ping");
        assert_eq!(normalized[1].name, "demo_pong");
    }

    #[test]
    fn extract_tools_from_result_filters_non_objects() {
        let result = Some(serde_json::json!({"tools": [{"name": "a"}, "not-an-object"]}));
        let tools = extract_tools_from_result(&result);
        assert_eq!(tools.len(), 1);
    }
}
