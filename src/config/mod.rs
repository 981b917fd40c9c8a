// src/config/mod.rs
// Engine configuration, loaded from the environment.

mod helpers;

use serde::{Deserialize, Serialize};

/// Default sampling and endpoint knobs, mirroring the original client's
/// hardcoded constants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the OpenAI-compatible inference endpoint.
    pub api_endpoint: String,
    /// Wall-clock timeout, in seconds, for one model call.
    pub api_timeout_secs: u64,
    /// Wall-clock timeout, in seconds, for the connectivity preflight probe.
    pub preflight_timeout_secs: u64,
    /// Wall-clock timeout, in seconds, for one MCP discovery/call operation.
    pub mcp_timeout_secs: u64,
    /// Maximum tool-use round-trips per orchestrator invocation.
    pub max_tool_rounds: usize,
    /// Consecutive tool calls before a progress decision becomes mandatory.
    pub checkpoint_soft_limit: usize,
    /// Estimated characters per token, used by the history compressor.
    pub chars_per_token_est: f64,

    pub default_temperature: f32,
    pub default_max_tokens: u32,
    pub default_top_p: f32,
    pub default_repetition_penalty: f32,
    pub default_system_prompt: String,
    pub default_context_limit: usize,
    pub default_token_saver: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            api_endpoint: helpers::env_or("LMSTUDIO_API_ENDPOINT", "http://localhost:1234/v1"),
            api_timeout_secs: helpers::env_u64("LMSTUDIO_API_TIMEOUT", 120),
            preflight_timeout_secs: helpers::env_u64("LMSTUDIO_PREFLIGHT_TIMEOUT", 5),
            mcp_timeout_secs: helpers::env_u64("LMSTUDIO_MCP_TIMEOUT", 12),
            max_tool_rounds: helpers::env_usize("LMSTUDIO_MAX_TOOL_ROUNDS", 8),
            checkpoint_soft_limit: helpers::env_usize("LMSTUDIO_CHECKPOINT_SOFT_LIMIT", 5),
            chars_per_token_est: helpers::env_f32("LMSTUDIO_CHARS_PER_TOKEN_EST", 4.0) as f64,
            default_temperature: helpers::env_f32("LMSTUDIO_DEFAULT_TEMPERATURE", 0.7),
            default_max_tokens: helpers::env_usize("LMSTUDIO_DEFAULT_MAX_TOKENS", 2048) as u32,
            default_top_p: helpers::env_f32("LMSTUDIO_DEFAULT_TOP_P", 0.95),
            default_repetition_penalty: helpers::env_f32(
                "LMSTUDIO_DEFAULT_REPETITION_PENALTY",
                1.0,
            ),
            default_system_prompt: helpers::env_or(
                "LMSTUDIO_DEFAULT_SYSTEM_PROMPT",
                "You are a helpful AI assistant.",
            ),
            default_context_limit: helpers::env_usize("LMSTUDIO_DEFAULT_CONTEXT_LIMIT", 4096),
            default_token_saver: helpers::env_bool("LMSTUDIO_DEFAULT_TOKEN_SAVER", false),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api_endpoint.is_empty() {
            return Err(anyhow::anyhow!("LMSTUDIO_API_ENDPOINT must not be empty"));
        }
        if self.max_tool_rounds == 0 {
            tracing::warn!("max_tool_rounds is 0: every invocation will fail with RoundLimitExceeded");
        }
        if self.checkpoint_soft_limit == 0 {
            return Err(anyhow::anyhow!(
                "LMSTUDIO_CHECKPOINT_SOFT_LIMIT must be at least 1"
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}
