//! Retry with exponential backoff for interval retrieval

use std::time::Duration;

use crate::cancel::CancelToken;

/// Errors that know whether another attempt could succeed
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for crate::stream::StreamError {
    fn is_retryable(&self) -> bool {
        crate::stream::StreamError::is_retryable(self)
    }
}

/// Exponential backoff: base * 2^attempt (2s, 4s, 8s, ... for a 1s base)
pub fn backoff_duration(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

/// Capped exponential backoff used between order status polls
pub fn poll_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    backoff_duration(initial, attempt).min(max)
}

/// Retry a fallible operation with exponential backoff.
///
/// On retryable errors, logs the failure, sleeps, and retries up to
/// `max_retries` times. Sleeping stops early on cancellation, in which case
/// the last error is returned.
///
/// Returns `Ok(T)` on first success, or the final `Err` on exhaustion / non-retryable error.
pub fn retry_with_backoff<T, E: Retryable + std::fmt::Display>(
    label: &str,
    max_retries: u32,
    base_delay: Duration,
    cancel: &CancelToken,
    mut attempt_fn: impl FnMut() -> Result<T, E>,
) -> Result<T, E> {
    let mut attempt = 0u32;
    loop {
        match attempt_fn() {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_retries && e.is_retryable() && !cancel.is_cancelled() => {
                attempt += 1;
                let delay = backoff_duration(base_delay, attempt);
                log::debug!(
                    "{label}: attempt {attempt}/{max_retries} failed: {e}, retrying in {delay:?}..."
                );
                if !cancel.sleep(delay) {
                    return Err(e);
                }
            }
            Err(e) => {
                log::error!("{label}: failed permanently: {e}");
                return Err(e);
            }
        }
    }
}
