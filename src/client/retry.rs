//! Reconnect backoff policy.
//!
//! Delay grows linearly with the attempt count (`base * count`), matching
//! the device's reference controller. This is deliberate; do not swap in
//! exponential backoff.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Computes reconnect delays and enforces the retry ceiling.
#[derive(Debug, Clone)]
pub(crate) struct ReconnectPolicy {
    /// Delay multiplied by the attempt count.
    base_delay: Duration,
    /// Attempts allowed before giving up.
    max_retries: u32,
    /// Consecutive failed attempts since the last successful open.
    retry_count: u32,
}

impl ReconnectPolicy {
    /// Creates a policy with zero recorded failures.
    pub(crate) fn new(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_retries,
            retry_count: 0,
        }
    }

    /// Records a successful transport open, resetting the failure count.
    pub(crate) fn record_open(&mut self) {
        self.retry_count = 0;
    }

    /// Records a reconnectable close and returns the delay before the next
    /// attempt, or `None` once the ceiling is exceeded.
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        self.retry_count += 1;
        if self.retry_count > self.max_retries {
            return None;
        }
        Some(self.base_delay * self.retry_count)
    }

    /// Returns the consecutive failure count.
    pub(crate) fn retry_count(&self) -> u32 {
        self.retry_count
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_is_linear_in_attempt_count() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(2000), 5);

        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(4000)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(6000)));
    }

    #[test]
    fn test_ceiling_stops_scheduling() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(2000), 5);

        for attempt in 1..=5u32 {
            let delay = policy.next_delay().expect("within ceiling");
            assert_eq!(delay, Duration::from_millis(2000) * attempt);
        }

        assert_eq!(policy.next_delay(), None);
        assert_eq!(policy.next_delay(), None);
    }

    #[test]
    fn test_successful_open_resets_count() {
        let mut policy = ReconnectPolicy::new(Duration::from_millis(2000), 5);

        for _ in 0..5 {
            policy.next_delay();
        }
        assert_eq!(policy.retry_count(), 5);

        policy.record_open();
        assert_eq!(policy.retry_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(2000)));
    }
}
