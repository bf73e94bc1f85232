//! Fibonacci requeue backoff for failed reconciles.
//!
//! Each failing object walks its own sequence (5s, 5s, 10s, 15s, 25s, ...)
//! capped at a maximum; a successful pass resets it.

use std::time::Duration;

/// Fibonacci backoff over whole seconds.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_secs: u64,
    prev_secs: u64,
    current_secs: u64,
    max_secs: u64,
}

impl FibonacciBackoff {
    /// Starts at `min` and never exceeds `max`.
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        let min_secs = min.as_secs().max(1);
        Self {
            min_secs,
            prev_secs: 0,
            current_secs: min_secs,
            max_secs: max.as_secs().max(min_secs),
        }
    }

    /// Returns the current delay and advances the sequence.
    pub fn next_backoff(&mut self) -> Duration {
        let delay = self.current_secs;
        let next = self.prev_secs.saturating_add(self.current_secs);
        self.prev_secs = self.current_secs;
        self.current_secs = next.min(self.max_secs);
        Duration::from_secs(delay)
    }

    /// Back to the first step.
    pub fn reset(&mut self) {
        self.prev_secs = 0;
        self.current_secs = self.min_secs;
    }

    /// Delay after `failures` consecutive failures, without keeping state.
    #[must_use]
    pub fn for_failures(failures: u32, min: Duration, max: Duration) -> Duration {
        let mut backoff = Self::new(min, max);
        let mut delay = backoff.next_backoff();
        for _ in 1..failures {
            delay = backoff.next_backoff();
            if delay.as_secs() >= backoff.max_secs {
                break;
            }
        }
        delay
    }
}
