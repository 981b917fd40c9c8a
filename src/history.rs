//! History Compressor: token-saver mode summarizes everything but the last
//! user turn into a single system message via one extra, low-temperature
//! model call. Falls back to plain context-window truncation on error.

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::Result;
use crate::model::{Message, Role};
use crate::recovery::recover_endpoint;
use crate::transport::LmStudioTransport;

const PER_MESSAGE_CAP: usize = 2_200;
const SUMMARY_PREFIX: &str =
    "Conversation summary so far. Treat this as trusted context from earlier turns:\n\n";
const TRUNCATION_MARKER: &str = "[Older history truncated]\n\n";

/// Context-window truncation: keep at most the trailing messages whose
/// estimated token count fits within `context_limit`. `context_limit == 0`
/// yields an empty history.
pub fn truncate_by_context_limit(messages: &[Message], context_limit: usize, chars_per_token_est: f64) -> Vec<Message> {
    if context_limit == 0 {
        return Vec::new();
    }
    let budget_chars = (context_limit as f64 * chars_per_token_est).max(0.0) as usize;
    let mut kept = Vec::new();
    let mut used = 0usize;
    for msg in messages.iter().rev() {
        let len = msg.content.len();
        if used + len > budget_chars && !kept.is_empty() {
            break;
        }
        used += len;
        kept.push(msg.clone());
    }
    kept.reverse();
    kept
}

fn role_label(msg: &Message) -> String {
    match msg.role {
        Role::Tool => format!("tool:{}", msg.name.clone().unwrap_or_default()),
        other => other.as_str().to_string(),
    }
}

fn render_one(msg: &Message) -> String {
    let label = role_label(msg);
    if msg.content.len() > PER_MESSAGE_CAP {
        let omitted = msg.content.len() - PER_MESSAGE_CAP;
        let head: String = msg.content.chars().take(PER_MESSAGE_CAP).collect();
        format!("{}: {}\n...[{} chars omitted]", label, head, omitted)
    } else {
        format!("{}: {}", label, msg.content)
    }
}

fn render_block(messages: &[Message], budget_chars: usize) -> String {
    let rendered = messages.iter().map(render_one).collect::<Vec<_>>().join("\n\n");
    if rendered.len() <= budget_chars {
        return rendered;
    }
    let start = rendered.len() - budget_chars;
    // Avoid splitting a UTF-8 codepoint.
    let mut start = start;
    while !rendered.is_char_boundary(start) {
        start += 1;
    }
    format!("{}{}", TRUNCATION_MARKER, &rendered[start..])
}

fn budget_chars(context_limit: usize, chars_per_token_est: f64) -> usize {
    let raw = 2.5 * context_limit as f64 * chars_per_token_est;
    raw.clamp(8_000.0, 50_000.0) as usize
}

fn summary_max_tokens(context_limit: usize) -> u32 {
    let raw = 0.25 * (context_limit.max(512) as f64);
    raw.clamp(192.0, 1024.0) as u32
}

/// Attempt history compression; on any failure, trigger endpoint recovery
/// (best effort) and fall back to the context-window-truncated history.
pub async fn compress_history(
    transport: &LmStudioTransport,
    model: &str,
    all_history: &[Message],
    context_limit: usize,
    chars_per_token_est: f64,
    cancel: &CancellationToken,
) -> Vec<Message> {
    let fallback = truncate_by_context_limit(all_history, context_limit, chars_per_token_est);

    if all_history.len() < 2 {
        return fallback;
    }
    let Some(last) = all_history.last() else {
        return fallback;
    };
    if last.role != Role::User {
        return fallback;
    }

    let prior = &all_history[..all_history.len() - 1];
    let block = render_block(prior, budget_chars(context_limit, chars_per_token_est));

    let body = json!({
        "model": model,
        "messages": [
            {"role": "system", "content": "Summarize the conversation so far in a concise paragraph, preserving concrete facts, decisions, and open questions. Do not invent information."},
            {"role": "user", "content": block},
        ],
        "stream": false,
        "temperature": 0.1,
        "top_p": 0.9,
        "max_tokens": summary_max_tokens(context_limit),
    });

    match summarize(transport, &body).await {
        Ok(summary) => {
            let system = Message::system(format!("{}{}", SUMMARY_PREFIX, summary));
            vec![system, last.clone()]
        }
        Err(e) => {
            warn!("history compression failed, falling back to truncated history: {}", e);
            recover_endpoint(transport, model, cancel).await.ok();
            fallback
        }
    }
}

async fn summarize(transport: &LmStudioTransport, body: &serde_json::Value) -> Result<String> {
    let resp = transport.chat_completion(body).await?;
    let choice = resp
        .get("choices")
        .and_then(|c| c.get(0))
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    Ok(crate::normalize::extract_content(&choice))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn msg(role: Role, content: &str) -> Message {
        Message {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.to_string(),
            timestamp: Utc::now(),
            token_count: 0,
            meta: None,
            tool_call_id: None,
            name: None,
            tool_calls: None,
        }
    }

    #[test]
    fn context_limit_zero_yields_empty_history() {
        let messages = vec![msg(Role::User, "hello")];
        assert!(truncate_by_context_limit(&messages, 0, 4.0).is_empty());
    }

    #[test]
    fn render_one_truncates_over_cap_with_suffix() {
        let long = "x".repeat(PER_MESSAGE_CAP + 50);
        let rendered = render_one(&msg(Role::User, &long));
        assert!(rendered.contains("...[50 chars omitted]"));
    }

    #[test]
    fn render_block_joins_entries_with_double_newline() {
        let messages = vec![msg(Role::User, "a"), msg(Role::Assistant, "b")];
        let block = render_block(&messages, 10_000);
        assert_eq!(block, "user: a\n\nassistant: b");
    }

    #[test]
    fn tool_message_label_includes_name() {
        let mut m = msg(Role::Tool, "result");
        m.name = Some("search".to_string());
        assert_eq!(role_label(&m), "tool:search");
    }

    #[test]
    fn budget_is_clamped() {
        assert_eq!(budget_chars(0, 4.0), 8_000);
        assert_eq!(budget_chars(1_000_000, 4.0), 50_000);
    }
}
