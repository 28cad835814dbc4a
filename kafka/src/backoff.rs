//! Exponential backoff for transient fetch failures.
//!
//! A broker hiccup must not kill a subscription: the fetch loop sleeps with
//! doubling delays between retries and resets the sequence on the first
//! successful fetch.

use std::time::Duration;

/// Doubling backoff with a cap, reset on success.
#[derive(Clone, Debug)]
pub(crate) struct FetchBackoff {
    initial_delay: Duration,
    max_delay: Duration,
    attempt: u32,
}

impl FetchBackoff {
    pub(crate) const fn new(initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            initial_delay,
            max_delay,
            attempt: 0,
        }
    }

    /// The delay to sleep before the next retry. Each call counts as one
    /// failed attempt.
    pub(crate) fn next_delay(&mut self) -> Duration {
        let exp = self.attempt.min(16);
        self.attempt = self.attempt.saturating_add(1);
        let delay = self.initial_delay.saturating_mul(2_u32.saturating_pow(exp));
        delay.min(self.max_delay)
    }

    /// Forget the failure streak after a successful fetch.
    pub(crate) fn reset(&mut self) {
        self.attempt = 0;
    }
}

impl Default for FetchBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_and_cap() {
        let mut backoff = FetchBackoff::new(Duration::from_millis(100), Duration::from_secs(1));

        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(400));
        assert_eq!(backoff.next_delay(), Duration::from_millis(800));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn reset_restarts_the_sequence() {
        let mut backoff = FetchBackoff::default();
        let first = backoff.next_delay();
        let _ = backoff.next_delay();

        backoff.reset();
        assert_eq!(backoff.next_delay(), first);
    }
}
