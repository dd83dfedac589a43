//! Bounded retry around provider calls.

use crate::config::RetryPolicy;
use crate::error::{EmbedError, Result};
use std::future::Future;

/// Run `operation` under `policy`, retrying only errors the provider marks
/// as retryable. Returns the last error once attempts are exhausted; the
/// caller decides whether that escalates to a permanent failure.
pub async fn retry_embed<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let delay = policy.delay_for_attempt(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    attempt,
                    max_attempts,
                    error = %err,
                    "embedding call failed, retrying"
                );
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Like [`retry_embed`], but reports how many attempts were made alongside
/// the terminal error so ingest failures can record the retry history.
pub async fn retry_embed_counted<T, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> std::result::Result<(T, u32), (EmbedError, u32)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let delay = policy.delay_for_attempt(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match operation().await {
            Ok(value) => return Ok((value, attempt)),
            Err(err) if err.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    attempt,
                    max_attempts,
                    error = %err,
                    "embedding call failed, retrying"
                );
                attempt += 1;
            }
            Err(err) => return Err((err, attempt)),
        }
    }
}
