//! Exponential backoff with jitter.

use rand::Rng;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// Calculate exponential backoff delay with jitter.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::from_millis(0);
    }

    let exponential_base = 2u64.saturating_pow(attempt - 1);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    let capped_delay = delay_ms.min(max_ms);

    // Apply jitter (0 to 10% of the delay)
    let jitter_range = capped_delay / 10;
    let jitter = if jitter_range > 0 {
        rand::thread_rng().gen_range(0..jitter_range)
    } else {
        0
    };

    Duration::from_millis(capped_delay + jitter)
}

/// Retry `op` with backoff until it succeeds or `budget` would be exceeded.
///
/// `op` receives the 1-based attempt number. The last error is returned when
/// the next delay would end past the budget.
pub async fn retry_within<T, E, F, Fut>(
    budget: Duration,
    base_ms: u64,
    max_ms: u64,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let deadline = Instant::now() + budget;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(e) => {
                let delay = calculate_backoff(attempt, base_ms, max_ms);
                if Instant::now() + delay >= deadline {
                    return Err(e);
                }
                tracing::debug!(attempt, delay = ?delay, error = %e, "Retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
