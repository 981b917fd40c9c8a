//! Stdio MCP discovery against a real spawned process. `cat` is used as an
//! echo server: it reflects each JSON-RPC request back as-is, which is
//! enough to exercise the spawn/write/read-until-matching-id plumbing and
//! the declared-calls fallback (an echoed request has no `result` key, so
//! discovery treats it as empty and falls back to `calls[]`).

use std::collections::HashMap;

use lmstudio_orchestrator::mcp::{McpServerConfig, ToolRegistry};

fn cat_available() -> bool {
    std::process::Command::new("cat")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[tokio::test]
async fn stdio_discovery_falls_back_to_declared_calls_when_echo_yields_no_tools() {
    if !cat_available() {
        return;
    }

    let config = McpServerConfig {
        integration_id: "echo".to_string(),
        name: "Echo".to_string(),
        url: None,
        headers: HashMap::new(),
        command: Some("cat".to_string()),
        args: Vec::new(),
        env: HashMap::new(),
        calls: vec!["ping".to_string()],
    };

    let mut registry = ToolRegistry::new(2);
    let tools = registry.discover(vec![config]).await;

    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "echo_ping");
}
