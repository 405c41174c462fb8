//! Reconnect backoff.

use std::time::Duration;

use crate::config::RetryConfig;

/// Exponential reconnect delays with a cap and an attempt ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    initial: Duration,
    max: Duration,
    max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    /// `max` is raised to `initial` when configured below it.
    pub fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max: max.max(initial),
            max_attempts,
        }
    }

    /// Policy from the `[retry]` section.
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_attempts,
        )
    }

    /// Attempts before the manager gives up; zero means never retry.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay before reconnect attempt number `attempt` (0-based).
    ///
    /// `initial * 2^attempt`, capped at the maximum; `None` once `attempt`
    /// reaches the ceiling, meaning the user has to reconnect by hand.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        Some(
            self.initial
                .checked_mul(factor)
                .map_or(self.max, |delay| delay.min(self.max)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubles_from_one_second_up_to_the_cap() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(30), 8);
        let delays: Vec<u64> = (0..8)
            .map(|attempt| policy.next_delay(attempt).expect("within ceiling").as_millis() as u64)
            .collect();
        assert_eq!(
            delays,
            vec![1_000, 2_000, 4_000, 8_000, 16_000, 30_000, 30_000, 30_000]
        );
    }

    #[test]
    fn non_decreasing_then_exhausted() {
        let policy = RetryPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 0..policy.max_attempts() {
            let delay = policy.next_delay(attempt).expect("within ceiling");
            assert!(delay >= previous);
            previous = delay;
        }
        assert_eq!(policy.next_delay(policy.max_attempts()), None);
        assert_eq!(policy.next_delay(u32::MAX), None);
    }

    #[test]
    fn huge_ceilings_do_not_overflow() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(30), u32::MAX);
        assert_eq!(policy.next_delay(40), Some(Duration::from_secs(30)));
        assert_eq!(policy.next_delay(1_000), Some(Duration::from_secs(30)));
    }

    #[test]
    fn zero_attempts_never_retries() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(30), 0);
        assert_eq!(policy.next_delay(0), None);
    }
}
