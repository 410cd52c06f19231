// ErrorThrottler: exponential backoff (1s to 60s) for queue transport errors
// in the dispatch loop.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

const MIN_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const BACKOFF_MULTIPLIER: u32 = 2;

/// Each call to `increment_and_wait` doubles the next delay, capped at
/// 60s. `reset` goes back to 1s.
#[derive(Debug, Clone)]
pub struct ErrorThrottler {
    current_delay: Duration,
    consecutive_errors: u32,
}

impl ErrorThrottler {
    pub fn new() -> Self {
        Self {
            current_delay: MIN_BACKOFF,
            consecutive_errors: 0,
        }
    }

    pub fn reset(&mut self) {
        self.current_delay = MIN_BACKOFF;
        self.consecutive_errors = 0;
    }

    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    /// Errors seen since the last `reset`.
    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    /// Sleep for the current delay, then grow it.
    ///
    /// Returns `true` if the delay completed normally, `false` if cancelled.
    pub async fn increment_and_wait(&mut self, cancel: &CancellationToken) -> bool {
        let delay = self.current_delay;

        tracing::warn!(
            "Error throttling: waiting {:.1}s before retry ({} consecutive error(s))",
            delay.as_secs_f64(),
            self.consecutive_errors + 1
        );

        let completed = tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = cancel.cancelled() => false,
        };

        self.increment();
        completed
    }

    pub fn increment(&mut self) {
        self.consecutive_errors = self.consecutive_errors.saturating_add(1);
        self.current_delay = self
            .current_delay
            .saturating_mul(BACKOFF_MULTIPLIER)
            .min(MAX_BACKOFF);
    }
}

impl Default for ErrorThrottler {
    fn default() -> Self {
        Self::new()
    }
}
