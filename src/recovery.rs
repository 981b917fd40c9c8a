//! Endpoint Recovery: on model-call timeout, unload the currently-loaded
//! model, load the target, and poll until it reports ready. The recovery
//! attempt is a side effect for *subsequent* requests — the original
//! timeout is always still surfaced to the caller as fatal.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::transport::LmStudioTransport;

const DEFAULT_INITIAL_WAIT_SECS: u64 = 20;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_RETRY_INTERVAL_SECS: u64 = 5;
const STABILIZATION_SLEEP_SECS: u64 = 5;

/// Sleep for `duration`, returning early if `cancel` fires first. Returns
/// `true` if the sleep ran to completion, `false` if cancelled.
async fn sleep_cancellable(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}

/// Poll `/v1/models` until `data[0].id` equals `target`, or retries are
/// exhausted. Sleeps `initial_wait` before the first poll, then
/// `retry_interval` after every attempt (exactly `max_retries` polls,
/// mirroring the original's `for i in range(max_retries)`). Each sleep is
/// cancellable; cancellation during either the initial wait or a
/// between-poll sleep returns `false` immediately.
pub async fn wait_for_model_ready(
    transport: &LmStudioTransport,
    target: &str,
    initial_wait: Duration,
    max_retries: u32,
    retry_interval: Duration,
    cancel: &CancellationToken,
) -> bool {
    if !sleep_cancellable(initial_wait, cancel).await {
        return false;
    }
    for attempt in 0..max_retries {
        match transport.loaded_model_id().await {
            Ok(Some(id)) if id == target => return true,
            Ok(_) => {}
            Err(e) => warn!("readiness poll failed (attempt {}): {}", attempt, e),
        }
        if !sleep_cancellable(retry_interval, cancel).await {
            return false;
        }
    }
    false
}

/// Full recovery sequence. Always returns `Ok(())` — failures along the way
/// are logged, never propagated, since recovery is best-effort. Cancellation
/// aborts the sequence early at the next sleep boundary.
pub async fn recover_endpoint(
    transport: &LmStudioTransport,
    target_model: &str,
    cancel: &CancellationToken,
) -> Result<()> {
    info!("attempting endpoint recovery, target model: {}", target_model);

    if cancel.is_cancelled() {
        return Ok(());
    }

    if let Ok(Some(instance_id)) = transport.loaded_model_id().await {
        if let Err(e) = transport.unload_model(&instance_id).await {
            warn!("failed to unload current model during recovery: {}", e);
        }
    }

    if let Err(e) = transport.load_model(target_model).await {
        warn!("failed to request target model load during recovery: {}", e);
        return Ok(());
    }

    let ready = wait_for_model_ready(
        transport,
        target_model,
        Duration::from_secs(DEFAULT_INITIAL_WAIT_SECS),
        DEFAULT_MAX_RETRIES,
        Duration::from_secs(DEFAULT_RETRY_INTERVAL_SECS),
        cancel,
    )
    .await;

    if ready {
        if sleep_cancellable(Duration::from_secs(STABILIZATION_SLEEP_SECS), cancel).await {
            info!("endpoint recovery succeeded, model '{}' ready", target_model);
        } else {
            warn!("endpoint recovery cancelled during stabilization sleep for '{}'", target_model);
        }
    } else {
        warn!("endpoint recovery did not confirm readiness for '{}'", target_model);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn default_timeouts_match_documented_bound() {
        let total = DEFAULT_INITIAL_WAIT_SECS + (DEFAULT_MAX_RETRIES as u64) * DEFAULT_RETRY_INTERVAL_SECS;
        assert_eq!(total, 45);
    }

    #[tokio::test]
    async fn wait_for_model_ready_polls_exactly_max_retries_times() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": "never-matches"}]})))
            .mount(&server)
            .await;

        let transport = LmStudioTransport::new(server.uri(), 5, 5);
        let cancel = CancellationToken::new();
        let ready = wait_for_model_ready(
            &transport,
            "target-model",
            Duration::from_millis(1),
            5,
            Duration::from_millis(1),
            &cancel,
        )
        .await;

        assert!(!ready);
        assert_eq!(server.received_requests().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn wait_for_model_ready_stops_immediately_when_cancelled() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/models"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": [{"id": "never-matches"}]})))
            .mount(&server)
            .await;

        let transport = LmStudioTransport::new(server.uri(), 5, 5);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let ready = wait_for_model_ready(
            &transport,
            "target-model",
            Duration::from_secs(30),
            5,
            Duration::from_secs(30),
            &cancel,
        )
        .await;

        assert!(!ready);
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
