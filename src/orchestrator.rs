//! Tool-Use Orchestrator: the round loop. Request → normalize → execute
//! tools → checkpoint → continue, until a final answer, cancellation, or
//! the round limit.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{LmStudioError, Result};
use crate::history::{compress_history, truncate_by_context_limit};
use crate::model::{Conversation, Message};
use crate::normalize::normalize_choice;
use crate::recovery::recover_endpoint;
use crate::stream::read_stream;
use crate::tool::{normalize_settings_tools, NormalizedTool};
use crate::transport::LmStudioTransport;

const CONTINUE_NUDGE: &str = "Continue from where you left off. Do not repeat previous text.";
const AUTO_CONTINUE_INITIAL_BUDGET: i32 = 2;
const DEFAULT_CHECKPOINT_MAX_TOKENS: u32 = 256;

/// Caller-supplied resolver for a tool call. Mirrors the spec's
/// `tool_executor(name, args) -> string`; errors are caught by the
/// orchestrator and reported to the model as tool output.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    async fn execute(&self, name: &str, arguments: Value) -> std::result::Result<String, String>;
}

/// One resolved tool call, delivered to the caller's optional event sink.
#[derive(Debug, Clone)]
pub struct ToolEvent {
    pub tool_call_id: String,
    pub name: String,
    pub arguments: Value,
    /// JSON-parsed if the tool's string result parses as JSON, else the
    /// raw string wrapped as a JSON string value.
    pub result: Value,
}

/// Knobs governing the round loop, independent of per-conversation
/// sampling settings.
#[derive(Debug, Clone)]
pub struct OrchestratorLimits {
    pub max_tool_rounds: usize,
    pub checkpoint_soft_limit: usize,
}

impl Default for OrchestratorLimits {
    fn default() -> Self {
        Self {
            max_tool_rounds: 8,
            checkpoint_soft_limit: 5,
        }
    }
}

/// Drives one conversation through the tool-use loop against a configured
/// transport.
pub struct Orchestrator {
    transport: LmStudioTransport,
    limits: OrchestratorLimits,
}

impl Orchestrator {
    pub fn new(transport: LmStudioTransport, limits: OrchestratorLimits) -> Self {
        Self { transport, limits }
    }

    /// Run the full round loop for `conversation`. `tool_executor` is
    /// required for any round that returns tool calls; absent it, the
    /// accumulated text is returned as-is. `on_tool_event`/`on_text_delta`
    /// are optional single-consumer sinks.
    pub async fn run(
        &self,
        conversation: &Conversation,
        tool_executor: Option<&(dyn ToolExecutor + Sync)>,
        mut on_tool_event: Option<&mut (dyn FnMut(ToolEvent) + Send)>,
        mut on_text_delta: Option<&mut (dyn FnMut(&str) + Send)>,
        stream_response: bool,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if self.limits.max_tool_rounds == 0 {
            return Err(LmStudioError::RoundLimitExceeded);
        }

        self.transport.preflight().await?;

        let settings = &conversation.settings;
        let chars_per_token_est = 4.0;
        let context_limit = settings.context_limit.unwrap_or(4096);

        let mut local_messages = if settings.token_saver {
            compress_history(
                &self.transport,
                &conversation.model,
                &conversation.messages,
                context_limit,
                chars_per_token_est,
                cancel,
            )
            .await
        } else {
            truncate_by_context_limit(&conversation.messages, context_limit, chars_per_token_est)
        };

        if let Some(prompt) = settings.system_prompt.as_ref().filter(|p| !p.is_empty()) {
            let already_present = local_messages
                .first()
                .map(|m| m.role == crate::model::Role::System && &m.content == prompt)
                .unwrap_or(false);
            if !already_present {
                local_messages.insert(0, Message::system(prompt.clone()));
            }
        }

        let normalized_tools = normalize_settings_tools(&settings.tools);

        let mut accumulator = String::new();
        let mut auto_continue_budget = AUTO_CONTINUE_INITIAL_BUDGET;
        let mut consecutive_tool_calls: usize = 0;

        for round_idx in 0..self.limits.max_tool_rounds {
            if cancel.is_cancelled() {
                return Err(LmStudioError::cancelled(accumulator));
            }

            let use_streaming = stream_response && normalized_tools.is_empty();

            let (content, tool_calls, finish_reason) = if use_streaming {
                let body = build_payload(&local_messages, &conversation.model, settings, &[], true);
                let response = match self.transport.chat_completion_stream(&body).await {
                    Ok(r) => r,
                    Err(e) => return self.on_call_error(e, &conversation.model, cancel).await,
                };
                let outcome = match on_text_delta.as_deref_mut() {
                    Some(sink) => read_stream(response, cancel, |d| sink(d)).await,
                    None => read_stream(response, cancel, |_| {}).await,
                };
                let outcome = match outcome {
                    Ok(o) => o,
                    Err(e) => return Err(e),
                };
                (outcome.text, Vec::new(), outcome.finish_reason)
            } else {
                let body = build_payload(&local_messages, &conversation.model, settings, &normalized_tools, false);
                let resp = match self.transport.chat_completion(&body).await {
                    Ok(r) => r,
                    Err(e) => return self.on_call_error(e, &conversation.model, cancel).await,
                };
                let choice = resp
                    .get("choices")
                    .and_then(|c| c.get(0))
                    .cloned()
                    .unwrap_or(Value::Null);
                let normalized = normalize_choice(&choice);
                (normalized.content, normalized.tool_calls, normalized.finish_reason)
            };

            if !content.is_empty() {
                accumulator.push_str(&content);
            }

            if tool_calls.is_empty() {
                consecutive_tool_calls = 0;
                if finish_reason.as_deref() == Some("length") && auto_continue_budget > 0 {
                    local_messages.push(Message::assistant(content.clone()));
                    local_messages.push(Message::user(CONTINUE_NUDGE));
                    auto_continue_budget -= 1;
                    continue;
                }
                return Ok(if accumulator.is_empty() { content } else { accumulator });
            }

            let Some(executor) = tool_executor else {
                warn!("model requested tools, but no tool executor is configured");
                return Ok(if accumulator.is_empty() { content } else { accumulator });
            };

            local_messages.push(Message::assistant_with_tool_calls(content.clone(), tool_calls.clone()));

            for tool_call in &tool_calls {
                let args = parse_tool_arguments(&tool_call.function.arguments);
                let result_text = execute_tool_safe(executor, &tool_call.function.name, args.clone()).await;

                if let Some(sink) = on_tool_event.as_deref_mut() {
                    let event = ToolEvent {
                        tool_call_id: tool_call.id.clone(),
                        name: tool_call.function.name.clone(),
                        arguments: args,
                        result: safe_json_parse(&result_text),
                    };
                    sink(event);
                }

                local_messages.push(Message::tool_result(
                    tool_call.id.clone(),
                    tool_call.function.name.clone(),
                    result_text,
                ));
                consecutive_tool_calls += 1;

                let must_force_progress = consecutive_tool_calls >= self.limits.checkpoint_soft_limit;
                let (enough_info, note) = self
                    .checkpoint(&local_messages, &conversation.model, settings, must_force_progress)
                    .await;

                if !note.is_empty() {
                    local_messages.push(Message::assistant(note));
                }

                if enough_info {
                    let final_text = self.finalize(&local_messages, &conversation.model, settings).await;
                    let merged = merge_finalize(&accumulator, &final_text);
                    return Ok(if merged.is_empty() { final_text } else { merged });
                }
            }

            info!("completed tool round {} with {} call(s)", round_idx + 1, tool_calls.len());
        }

        Err(LmStudioError::RoundLimitExceeded)
    }

    /// Issue the mandatory post-tool-call checkpoint: a tools-stripped,
    /// deterministic model call that decides whether the loop has enough
    /// information to answer.
    async fn checkpoint(
        &self,
        local_messages: &[Message],
        model: &str,
        settings: &crate::model::ConversationSettings,
        force_progress_decision: bool,
    ) -> (bool, String) {
        let mut instruction = String::from(
            "Tool-loop checkpoint.\nDecide whether enough information has been gathered to answer the user.\n\
             Respond only with JSON of the exact form:\n\
             {\"enough_information\": boolean, \"progress_note\": string}\n\
             If enough_information is true, progress_note should briefly state why no more tools are needed.\n\
             If enough_information is false, progress_note should state the next best step and why.",
        );
        if force_progress_decision {
            instruction.push_str("\nA progress decision is mandatory at this point.");
        }

        let mut messages: Vec<Message> = local_messages.to_vec();
        messages.push(Message::system(instruction));

        let raw_max_tokens = settings.max_tokens.unwrap_or(DEFAULT_CHECKPOINT_MAX_TOKENS);
        let max_tokens = raw_max_tokens.clamp(120, 360);

        let mut body = build_payload(&messages, model, settings, &[], false);
        if let Some(obj) = body.as_object_mut() {
            obj.insert("temperature".to_string(), json!(0.0));
            obj.insert("top_p".to_string(), json!(1.0));
            obj.insert("max_tokens".to_string(), json!(max_tokens));
            obj.remove("tools");
            obj.remove("tool_choice");
        }

        match self.transport.chat_completion(&body).await {
            Ok(resp) => {
                let choice = resp.get("choices").and_then(|c| c.get(0)).cloned().unwrap_or(Value::Null);
                let content = crate::normalize::extract_content(&choice);
                match serde_json::from_str::<Value>(content.trim()) {
                    Ok(parsed) => {
                        let enough = parsed.get("enough_information").and_then(|v| v.as_bool()).unwrap_or(false);
                        let note = parsed
                            .get("progress_note")
                            .and_then(|v| v.as_str())
                            .unwrap_or("")
                            .trim()
                            .to_string();
                        (enough, note)
                    }
                    Err(_) => {
                        warn!("tool-loop checkpoint reply unparseable; continuing tool flow");
                        (false, String::new())
                    }
                }
            }
            Err(e) => {
                warn!("tool-loop checkpoint call failed; continuing tool flow: {}", e);
                (false, String::new())
            }
        }
    }

    /// Final answer call after a checkpoint decides enough information has
    /// been gathered: tools disabled, nudged to answer now.
    async fn finalize(&self, local_messages: &[Message], model: &str, settings: &crate::model::ConversationSettings) -> String {
        let mut messages: Vec<Message> = local_messages.to_vec();
        messages.push(Message::system(
            "You have enough information. Answer the user now. Do not call any tools.",
        ));

        let mut body = build_payload(&messages, model, settings, &[], false);
        if let Some(obj) = body.as_object_mut() {
            obj.remove("tools");
            obj.remove("tool_choice");
        }

        match self.transport.chat_completion(&body).await {
            Ok(resp) => {
                let choice = resp.get("choices").and_then(|c| c.get(0)).cloned().unwrap_or(Value::Null);
                crate::normalize::extract_content(&choice)
            }
            Err(e) => {
                warn!("finalize call failed: {}", e);
                String::new()
            }
        }
    }

    async fn on_call_error<T>(&self, e: LmStudioError, model: &str, cancel: &CancellationToken) -> Result<T> {
        if let LmStudioError::Timeout(_) = &e {
            recover_endpoint(&self.transport, model, cancel).await.ok();
        }
        Err(e)
    }
}

/// Build the JSON body sent to `/chat/completions`.
fn build_payload(
    messages: &[Message],
    model: &str,
    settings: &crate::model::ConversationSettings,
    tools: &[NormalizedTool],
    stream: bool,
) -> Value {
    let mut body = json!({
        "model": model,
        "messages": messages.iter().map(Message::to_wire).collect::<Vec<_>>(),
        "stream": stream,
    });
    let obj = body.as_object_mut().expect("object literal");

    if let Some(t) = settings.temperature {
        obj.insert("temperature".to_string(), json!(t));
    }
    if let Some(t) = settings.top_p {
        obj.insert("top_p".to_string(), json!(t));
    }
    if let Some(r) = settings.repetition_penalty {
        obj.insert("repetition_penalty".to_string(), json!(r));
    }
    if let Some(p) = settings.presence_penalty {
        obj.insert("presence_penalty".to_string(), json!(p));
    }
    if let Some(f) = settings.frequency_penalty {
        obj.insert("frequency_penalty".to_string(), json!(f));
    }
    if let Some(m) = settings.max_tokens {
        obj.insert("max_tokens".to_string(), json!(m));
    }
    if let Some(s) = settings.seed {
        obj.insert("seed".to_string(), json!(s));
    }
    if let Some(stop) = &settings.stop {
        obj.insert("stop".to_string(), json!(stop));
    }

    if !tools.is_empty() {
        let tool_values: Vec<Value> = tools.iter().map(NormalizedTool::to_openai_format).collect();
        obj.insert("tools".to_string(), json!(tool_values));
        let tool_choice = settings.tool_choice.clone().unwrap_or_else(|| json!("auto"));
        obj.insert("tool_choice".to_string(), tool_choice);
    }

    body
}

/// Parse a tool call's raw `arguments` string: JSON object → use directly;
/// JSON non-object → wrap as `{_args: ...}`; non-JSON → wrap as
/// `{_raw: text}`.
fn parse_tool_arguments(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Value::Object(map),
        Ok(other) => json!({"_args": other}),
        Err(_) => json!({"_raw": raw}),
    }
}

async fn execute_tool_safe(executor: &(dyn ToolExecutor + Sync), name: &str, args: Value) -> String {
    match executor.execute(name, args).await {
        Ok(result) => result,
        Err(e) => format!("Tool execution failed: {}", e),
    }
}

/// JSON-parse a tool result string if possible, else wrap as a raw JSON
/// string value.
fn safe_json_parse(text: &str) -> Value {
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Merge the finalize call's text onto the round-loop accumulator: a `\n`
/// separator is inserted only when the accumulator is non-empty and does
/// not already end in `\n`. Distinct from the plain-concatenation rule
/// used for auto-continue accumulation.
fn merge_finalize(accumulator: &str, final_text: &str) -> String {
    let mut merged = accumulator.to_string();
    if !final_text.is_empty() {
        if !merged.is_empty() && !merged.ends_with('\n') {
            merged.push('\n');
        }
        merged.push_str(final_text);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tool_arguments_object_is_used_directly() {
        let args = parse_tool_arguments(r#"{"q":"x"}"#);
        assert_eq!(args["q"], "x");
        assert!(args.get("_args").is_none());
    }

    #[test]
    fn parse_tool_arguments_non_object_json_is_wrapped() {
        let args = parse_tool_arguments("42");
        assert_eq!(args["_args"], 42);
    }

    #[test]
    fn parse_tool_arguments_non_json_is_wrapped_raw() {
        let args = parse_tool_arguments("not json");
        assert_eq!(args["_raw"], "not json");
    }

    #[test]
    fn merge_finalize_inserts_separator_only_when_needed() {
        assert_eq!(merge_finalize("have answer", "answer"), "have answer\nanswer");
        assert_eq!(merge_finalize("", "answer"), "answer");
        assert_eq!(merge_finalize("ends with newline\n", "answer"), "ends with newline\nanswer");
    }

    #[test]
    fn safe_json_parse_falls_back_to_raw_string() {
        assert_eq!(safe_json_parse("not json"), Value::String("not json".to_string()));
        assert_eq!(safe_json_parse("{\"a\":1}")["a"], 1);
    }
}
