//! Retry utilities for transient store and broker failures.
//!
//! Provides exponential backoff and a point-of-use retry wrapper for store
//! calls. Job-level retry (redelivery through the broker) lives in the worker.

use rand::Rng;
use std::future::Future;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::StoreError;

/// Calculate exponential backoff duration for a given attempt.
///
/// Uses `base_delay * 2^attempt` with a cap at 30 seconds.
pub fn backoff_duration(attempt: u32, base_delay_ms: u64) -> Duration {
    let delay = base_delay_ms.saturating_mul(2u64.saturating_pow(attempt));
    Duration::from_millis(delay.min(30_000))
}

/// Backoff with up to 20% random jitter added, so workers that failed
/// together do not retry in lockstep.
pub fn jittered_backoff(attempt: u32, base_delay_ms: u64) -> Duration {
    let base = backoff_duration(attempt, base_delay_ms);
    let max_jitter = base.as_millis() as u64 / 5;
    if max_jitter == 0 {
        return base;
    }
    let jitter = rand::thread_rng().gen_range(0..=max_jitter);
    base + Duration::from_millis(jitter)
}

/// Run a store operation, retrying transient errors with backoff.
///
/// Non-transient errors (not found, conflict, invalid key) are returned
/// immediately. After `policy.attempts` retries the last error is returned.
pub async fn with_store_retry<T, F, Fut>(
    policy: &RetryConfig,
    op_name: &str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.attempts => {
                let delay = jittered_backoff(attempt, policy.delay_ms);
                attempt += 1;
                tracing::debug!(
                    "Retry {attempt}/{} for {op_name} after {delay:?}: {e}",
                    policy.attempts
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
