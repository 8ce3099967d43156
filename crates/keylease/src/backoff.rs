//! Exponential backoff bounded by a total elapsed budget

use std::time::Duration;

use keylease_common::BackoffConfig;
use tokio::time::Instant;

/// Stateful backoff schedule.
///
/// Delays grow per [`BackoffConfig::calculate_delay`]; once `max_elapsed` has
/// passed since creation no further delay is handed out, and the last delay is
/// clamped so that a sleep never overshoots the budget.
#[derive(Debug)]
pub struct Backoff {
    config: BackoffConfig,
    max_elapsed: Duration,
    started: Instant,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig, max_elapsed: Duration) -> Self {
        Self {
            config,
            max_elapsed,
            started: Instant::now(),
            attempt: 0,
        }
    }

    /// Delay before the next attempt, or `None` when the budget is spent
    pub fn next_delay(&mut self) -> Option<Duration> {
        let remaining = self.max_elapsed.checked_sub(self.started.elapsed())?;
        if remaining.is_zero() {
            return None;
        }

        let delay = self.config.calculate_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        Some(delay.min(remaining))
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Number of delays handed out so far
    pub fn retries(&self) -> u32 {
        self.attempt
    }
}
