//! Retry policy for optimistic-concurrency loops.
//!
//! Conditional writes lose races under contention; the services re-read
//! and retry a bounded number of times with jittered exponential backoff
//! before giving up with a contention error.

use std::time::Duration;

use rand::Rng;

/// Backoff settings for read-modify-write retry loops.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Ceiling on any single delay.
    pub max_delay: Duration,
    /// Growth factor per retry.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_secs(1),
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// A generous policy for tests that hammer one record from many tasks.
    pub fn aggressive() -> Self {
        Self {
            max_attempts: 50,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(50),
            multiplier: 1.5,
        }
    }

    /// Delay before retry number `attempt` (1-based), with up to 10%
    /// random jitter to spread competing writers apart.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let raw = self.base_delay.as_millis() as f64 * self.multiplier.powi(exponent as i32);
        let capped = raw.min(self.max_delay.as_millis() as f64);
        let jitter = rand::rng().random_range(0.0..=0.1) * capped;
        Duration::from_millis((capped + jitter) as u64)
    }

    /// Sleeps for the backoff delay of retry number `attempt`.
    pub async fn backoff(&self, attempt: u32) {
        tokio::time::sleep(self.delay_for_attempt(attempt)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_grow_and_cap() {
        let config = RetryConfig {
            max_attempts: 5,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(40),
            multiplier: 2.0,
        };

        let first = config.delay_for_attempt(1);
        assert!(first >= Duration::from_millis(10));
        assert!(first <= Duration::from_millis(11));

        let second = config.delay_for_attempt(2);
        assert!(second >= Duration::from_millis(20));
        assert!(second <= Duration::from_millis(22));

        // Past the cap every delay stays at the cap (plus jitter).
        let tenth = config.delay_for_attempt(10);
        assert!(tenth >= Duration::from_millis(40));
        assert!(tenth <= Duration::from_millis(44));
    }

    #[test]
    fn defaults_are_bounded() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert!(config.base_delay < config.max_delay);
    }
}
