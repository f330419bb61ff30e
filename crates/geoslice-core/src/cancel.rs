//! Cooperative cancellation shared by all workers of a run

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Granularity of interruptible sleeps
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Cancellation signal shared across workers.
///
/// Cloning shares the same flag. Set by SIGTERM/SIGINT handlers or by the
/// scheduler in fail-fast mode.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Underlying flag, for `signal_hook::flag::register`
    pub fn flag(&self) -> Arc<AtomicBool> {
        self.flag.clone()
    }

    /// Request cancellation
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Sleep for `duration`, waking early on cancellation.
    ///
    /// Returns `false` if cancelled before the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        // No representable deadline: sleep until cancelled
        let deadline = Instant::now().checked_add(duration);
        loop {
            if self.is_cancelled() {
                return false;
            }
            let slice = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return true;
                    }
                    SLEEP_SLICE.min(deadline - now)
                }
                None => SLEEP_SLICE,
            };
            std::thread::sleep(slice);
        }
    }

    /// Resolves once cancellation is requested; for racing async requests
    pub async fn cancelled(&self) {
        while !self.is_cancelled() {
            tokio::time::sleep(SLEEP_SLICE).await;
        }
    }
}
