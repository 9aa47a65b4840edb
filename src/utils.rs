use std::fmt::Display;

use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::error::RetryableError;
use crate::models::retry::RetryConfig;

/// Retries `operation` with exponential backoff and ±10% jitter.
///
/// No delay precedes the first attempt; a persistently failing retryable
/// operation is invoked exactly `max_attempts` times. The last observed error
/// is returned unchanged, and a non-retryable error aborts the loop
/// immediately, so an open circuit breaker denies the whole loop on its first
/// attempt.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, operation: F) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: RetryableError + Display,
{
    let mut attempt = 0;
    let mut delay_ms = config.initial_delay_ms;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        attempt,
                        max_attempts = config.max_attempts,
                        "Retry succeeded"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if !e.is_retryable() {
                    warn!(attempt, error = %e, "Non-retryable error, giving up");
                    return Err(e);
                }

                if attempt >= config.max_attempts {
                    warn!(
                        max_attempts = config.max_attempts,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(e);
                }

                debug!(
                    attempt,
                    max_attempts = config.max_attempts,
                    delay_ms,
                    error = %e,
                    "Retry attempt failed, backing off"
                );

                let jitter = rand::random_range(-0.1..=0.1);
                let jittered_delay = (delay_ms as f64 * (1.0 + jitter)) as u64;

                sleep(Duration::from_millis(jittered_delay)).await;

                delay_ms = std::cmp::min(delay_ms * config.backoff_multiplier, config.max_delay_ms);
            }
        }
    }
}
