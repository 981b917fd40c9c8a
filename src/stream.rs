//! Stream Reader: line-oriented parsing of `data: ` SSE-style frames from
//! the inference endpoint, with mid-stream cancellation.

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{LmStudioError, Result};
use crate::normalize::extract_delta;

/// Outcome of reading a full stream to completion.
#[derive(Debug, Clone, Default)]
pub struct StreamOutcome {
    pub text: String,
    pub finish_reason: Option<String>,
}

/// Read `response` line by line, delivering non-empty deltas to `on_delta`
/// and accumulating them. Cancellation is checked before every line read;
/// on cancellation this raises `Cancelled(partial_text)`.
pub async fn read_stream(
    response: reqwest::Response,
    cancel: &CancellationToken,
    mut on_delta: impl FnMut(&str),
) -> Result<StreamOutcome> {
    let mut byte_stream = response.bytes_stream();
    let mut buffer = String::new();
    let mut accumulator = String::new();
    let mut finish_reason: Option<String> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(LmStudioError::cancelled(accumulator));
        }

        let chunk = match byte_stream.next().await {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => return Err(LmStudioError::other(format!("stream read error: {}", e))),
            None => break,
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(pos) = buffer.find('\n') {
            if cancel.is_cancelled() {
                return Err(LmStudioError::cancelled(accumulator));
            }

            let line: String = buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\r', '\n']).trim();
            if line.is_empty() {
                continue;
            }
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                return Ok(StreamOutcome {
                    text: accumulator,
                    finish_reason,
                });
            }
            let Ok(chunk_json) = serde_json::from_str::<serde_json::Value>(data) else {
                debug!("skipping unparseable stream chunk");
                continue;
            };
            let Some(choice) = chunk_json.get("choices").and_then(|c| c.get(0)) else {
                continue;
            };
            if let Some(fr) = choice.get("finish_reason").and_then(|v| v.as_str()) {
                finish_reason = Some(fr.to_string());
            }
            let delta = extract_delta(choice);
            if !delta.is_empty() {
                accumulator.push_str(&delta);
                on_delta(&delta);
            }
        }
    }

    // EOF without [DONE]: return whatever arrived.
    Ok(StreamOutcome {
        text: accumulator,
        finish_reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_defaults_are_empty() {
        let outcome = StreamOutcome::default();
        assert_eq!(outcome.text, "");
        assert!(outcome.finish_reason.is_none());
    }
}
