use std::thread;
use std::time::Duration;
use tracing::debug;

/// Pause between two reproduction attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(3);

/// A `RetryScheduler` decides how long the reproduction loop pauses before
/// starting the next attempt.
///
/// It is only consulted between attempts: never before the first one and
/// never after the last.
pub trait RetryScheduler: Send {
    /// Blocks until attempt `next_attempt` may start.
    fn before_retry(&mut self, next_attempt: u32);
}

/// Sleeps for the same duration before every retry.
#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff {
    delay: Duration,
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAY)
    }
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl RetryScheduler for FixedBackoff {
    fn before_retry(&mut self, next_attempt: u32) {
        debug!(next_attempt, delay_ms = self.delay.as_millis() as u64, "Waiting before retry");
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn default_delay_is_three_seconds() {
        assert_eq!(FixedBackoff::default().delay(), Duration::from_secs(3));
    }

    #[test]
    fn fixed_backoff_sleeps_for_its_delay() {
        let mut backoff = FixedBackoff::new(Duration::from_millis(30));
        let start = Instant::now();
        backoff.before_retry(2);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn zero_delay_returns_immediately() {
        let mut backoff = FixedBackoff::new(Duration::ZERO);
        let start = Instant::now();
        for attempt in 2..100 {
            backoff.before_retry(attempt);
        }
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
