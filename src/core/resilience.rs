//! Retry and fallback orchestration
//!
//! Two independent recovery layers. Retry re-issues the same attempt on
//! the same (provider, key) pair with exponential backoff; fallback walks
//! the request's ordered `{provider, model}` alternates, deriving a fresh
//! request id per attempt and linking it to the original.

use std::future::Future;
use tracing::{debug, warn};

use crate::config::RetryConfig;
use crate::core::types::{CancelToken, GatewayRequest};
use crate::utils::error::{GatewayError, Result};

/// Run `op` with bounded retries.
///
/// Retries only errors classified retryable (timeout, network, 5xx, 429),
/// sleeping the configured exponential backoff between attempts.
/// Cancellation during backoff aborts with `RequestCancelled`.
pub async fn with_retry<T, F, Fut>(retry: &RetryConfig, cancel: &CancelToken, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                attempt += 1;
                if !error.is_retryable() || attempt > retry.max_retries {
                    return Err(error);
                }
                let backoff = retry.backoff_for_attempt(attempt);
                debug!(attempt, backoff_ms = backoff.as_millis() as u64, %error, "retrying");
                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = cancel.cancelled() => return Err(GatewayError::RequestCancelled),
                }
            }
        }
    }
}

/// Walk the fallback cascade.
///
/// The primary attempt runs with the request as-is. On a terminal error
/// that allows fallbacks, the next `{provider, model}` alternate runs on
/// a derived request: fresh request id, `parent_request_id` linking back,
/// `fallback_index` incremented. The first success wins; the last error
/// surfaces when the cascade is exhausted.
pub async fn run_with_fallbacks<T, F, Fut>(request: &GatewayRequest, mut attempt: F) -> Result<T>
where
    F: FnMut(GatewayRequest) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_error = match attempt(request.clone()).await {
        Ok(value) => return Ok(value),
        Err(error) => error,
    };

    for (position, alternate) in request.fallbacks.iter().enumerate() {
        if !last_error.allows_fallbacks() {
            return Err(last_error);
        }
        let fallback_index = position + 1;
        warn!(
            provider = %alternate.provider,
            model = %alternate.model,
            fallback_index,
            previous_error = %last_error,
            "falling back"
        );

        let mut derived = request.clone();
        derived.provider = alternate.provider.clone();
        derived.model = alternate.model.clone();
        derived.context = request.context.derive_fallback(fallback_index);

        match attempt(derived).await {
            Ok(value) => return Ok(value),
            Err(error) => last_error = error,
        }
    }
    Err(last_error)
}
