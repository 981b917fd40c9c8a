// src/transport/mod.rs
// HTTP transport for the inference endpoint and MCP's two sub-transports.

pub mod http;
pub mod stdio;

pub use http::{LmStudioTransport, McpHttpTransport};
pub use stdio::McpStdioTransport;
