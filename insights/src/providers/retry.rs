//! Exponential-backoff retry wrapper for provider calls.

use crate::error::Result;
use crate::model::RetryPolicy;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run `op` up to `policy.max_attempts` times, doubling the delay after
/// each failure. The closure receives the 1-based attempt number.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, what: &str, op: F) -> Result<T>
where
    F: Fn(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.max_attempts.max(1);
    let mut delay = Duration::from_millis(policy.base_delay_ms);

    for attempt in 1..=attempts {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if attempt < attempts => {
                warn!(
                    attempt,
                    max_attempts = attempts,
                    "{what} failed, retrying in {:?}: {err}",
                    delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => {
                warn!("{what} failed after {attempts} attempts: {err}");
                return Err(err);
            }
        }
    }
    unreachable!("retry loop always returns")
}
