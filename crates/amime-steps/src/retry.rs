use amime_core::{RetryPolicy, StepError};
use std::future::Future;
use tracing::warn;

/// Runs `op` until it succeeds, fails with a non-retryable error, or the
/// policy's retry budget is spent.
///
/// Only errors whose [`StepError::is_retryable`] is `true` are retried. The
/// last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, StepError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StepError>>,
{
    let max_retries = policy.max_retries();
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_retries => {
                let Some(delay) = policy.delay_for_attempt(attempt) else {
                    return Err(e);
                };
                warn!(
                    operation = label,
                    attempt = attempt + 1,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}
