// src/transport/http.rs
// HTTP sub-transport: the inference endpoint, and the HTTP flavor of MCP.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{LmStudioError, Result};
use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse};

/// Talks to the OpenAI-compatible LM Studio endpoint: chat completions
/// (streaming and non-streaming), model listing, load/unload.
#[derive(Clone)]
pub struct LmStudioTransport {
    client: Client,
    base_url: String,
    call_timeout: Duration,
    preflight_timeout: Duration,
}

impl LmStudioTransport {
    pub fn new(base_url: impl Into<String>, call_timeout_secs: u64, preflight_timeout_secs: u64) -> Self {
        let client = Client::builder()
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: base_url.into(),
            call_timeout: Duration::from_secs(call_timeout_secs),
            preflight_timeout: Duration::from_secs(preflight_timeout_secs),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    /// `GET /v1/models`, 5s timeout by default. Failure here is the only
    /// place a `ConnectionError` may be raised.
    pub async fn preflight(&self) -> Result<()> {
        self.client
            .get(self.url("/models"))
            .timeout(self.preflight_timeout)
            .send()
            .await
            .map_err(|e| LmStudioError::connection(e.to_string()))?
            .error_for_status()
            .map_err(|e| LmStudioError::connection(e.to_string()))?;
        Ok(())
    }

    /// `GET /v1/models`, reading `data[0].id` as the currently loaded
    /// instance id (if any). Used by connectivity checks and recovery.
    pub async fn loaded_model_id(&self) -> Result<Option<String>> {
        let resp = self
            .client
            .get(self.url("/models"))
            .timeout(self.preflight_timeout)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LmStudioError::endpoint(status.as_u16(), resp.text().await.unwrap_or_default()));
        }
        let body: Value = resp.json().await?;
        Ok(body
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|arr| arr.first())
            .and_then(|first| first.get("id"))
            .and_then(|id| id.as_str())
            .map(|s| s.to_string()))
    }

    /// `POST /v1/chat/completions` with `stream: false`. Returns the parsed
    /// response body. A timeout is surfaced distinctly so callers can
    /// trigger endpoint recovery.
    pub async fn chat_completion(&self, body: &Value) -> Result<Value> {
        debug!(endpoint = %self.base_url, "sending chat/completions request");
        let resp = self
            .client
            .post(self.url("/chat/completions"))
            .timeout(self.call_timeout)
            .json(body)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LmStudioError::endpoint(status.as_u16(), text));
        }
        resp.json::<Value>().await.map_err(LmStudioError::from)
    }

    /// Same request, but streamed: returns the raw `reqwest::Response` so
    /// the caller (the stream reader) can read it line by line.
    pub async fn chat_completion_stream(&self, body: &Value) -> Result<reqwest::Response> {
        let resp = self
            .client
            .post(self.url("/chat/completions"))
            .timeout(self.call_timeout)
            .json(body)
            .send()
            .await
            .map_err(map_request_error)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(LmStudioError::endpoint(status.as_u16(), text));
        }
        Ok(resp)
    }

    pub async fn unload_model(&self, instance_id: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.url("/models/unload"))
            .timeout(self.call_timeout)
            .json(&serde_json::json!({"instance_id": instance_id}))
            .send()
            .await?;
        if !resp.status().is_success() {
            warn!(status = %resp.status(), "model unload returned non-200");
        }
        Ok(())
    }

    pub async fn load_model(&self, model: &str) -> Result<()> {
        let resp = self
            .client
            .post(self.url("/models/load"))
            .timeout(self.call_timeout)
            .json(&serde_json::json!({"model": model}))
            .send()
            .await?;
        if !resp.status().is_success() {
            warn!(status = %resp.status(), "model load returned non-200");
        }
        Ok(())
    }
}

/// Timeouts and connect/TLS/client-level failures during the round loop
/// become the catch-all `LMStudioError`; `ConnectionError` is reserved for
/// the preflight probe.
fn map_request_error(e: reqwest::Error) -> LmStudioError {
    if e.is_timeout() {
        LmStudioError::Timeout(e.to_string())
    } else {
        LmStudioError::from(e)
    }
}

/// Single-request JSON-RPC POST for HTTP-flavored MCP servers.
pub struct McpHttpTransport {
    client: Client,
    url: String,
    headers: Vec<(String, String)>,
    timeout: Duration,
}

impl McpHttpTransport {
    pub fn new(url: impl Into<String>, headers: Vec<(String, String)>, timeout_secs: u64) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            headers,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    async fn post(&self, req: &JsonRpcRequest) -> Result<JsonRpcResponse> {
        let mut builder = self.client.post(&self.url).timeout(self.timeout).json(req);
        for (k, v) in &self.headers {
            builder = builder.header(k, v);
        }
        let resp = builder.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LmStudioError::other(format!(
                "HTTP {}: {}",
                status,
                resp.text().await.unwrap_or_default()
            )));
        }
        resp.json::<JsonRpcResponse>().await.map_err(LmStudioError::from)
    }

    /// Send `initialize`, ignoring any failure (best-effort).
    pub async fn initialize_best_effort(&self) {
        let req = JsonRpcRequest::initialize(1);
        if let Err(e) = self.post(&req).await {
            debug!("MCP initialize failed for {}: {}", self.url, e);
        }
    }

    pub async fn tools_list(&self) -> Result<JsonRpcResponse> {
        self.post(&JsonRpcRequest::tools_list(2)).await
    }

    pub async fn tools_call(&self, name: &str, arguments: Value) -> Result<JsonRpcResponse> {
        self.post(&JsonRpcRequest::tools_call(2, name, arguments)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_base_and_path() {
        let t = LmStudioTransport::new("http://localhost:1234/v1", 120, 5);
        assert_eq!(t.url("/models"), "http://localhost:1234/v1/models");
    }

    #[test]
    fn url_strips_trailing_slash() {
        let t = LmStudioTransport::new("http://localhost:1234/v1/", 120, 5);
        assert_eq!(t.url("/models"), "http://localhost:1234/v1/models");
    }
}
