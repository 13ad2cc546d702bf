//! Reconnect policy with capped exponential back-off.

use std::time::Duration;

/// Controls how the client reconnects after a transport drop.
///
/// Delays grow geometrically from `base_delay` and are capped at `max_delay`.
/// There is deliberately no jitter: the delay sequence is part of the
/// client's observable contract.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    /// Delay before the first reconnect attempt.
    pub base_delay: Duration,
    /// Cap applied to the computed delay.
    pub max_delay: Duration,
    /// Multiplier applied after each failed attempt.
    pub factor: f64,
    /// Maximum number of consecutive attempts before giving up.
    /// `0` means unlimited retries.
    pub max_attempts: u32,
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(3000),
            max_delay: Duration::from_millis(30_000),
            factor: 1.5,
            max_attempts: 0, // unlimited
        }
    }
}

impl ReconnectBackoff {
    /// Compute the delay for the given attempt number (1-indexed):
    /// `min(base_delay * factor^(attempt - 1), max_delay)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let base_ms = self.base_delay.as_millis() as f64;
        let delay_ms = base_ms * self.factor.powi(exponent as i32);
        let capped_ms = delay_ms.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped_ms as u64)
    }

    /// Whether the given number of attempts already made exhausts the policy.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts > 0 && attempts >= self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_values() {
        let p = ReconnectBackoff::default();
        assert_eq!(p.base_delay, Duration::from_millis(3000));
        assert_eq!(p.max_delay, Duration::from_millis(30_000));
        assert_eq!(p.max_attempts, 0); // unlimited
    }

    #[test]
    fn delay_sequence_with_default_base() {
        let p = ReconnectBackoff::default();
        assert_eq!(p.delay_for_attempt(1), Duration::from_millis(3000));
        assert_eq!(p.delay_for_attempt(2), Duration::from_millis(4500));
        assert_eq!(p.delay_for_attempt(3), Duration::from_millis(6750));
        assert_eq!(p.delay_for_attempt(4), Duration::from_millis(10_125));
    }

    #[test]
    fn delay_capped_at_max() {
        let p = ReconnectBackoff::default();
        // 3000 * 1.5^6 = 34_171.875 > 30_000
        assert_eq!(p.delay_for_attempt(7), Duration::from_millis(30_000));
        assert_eq!(p.delay_for_attempt(50), Duration::from_millis(30_000));
    }

    #[test]
    fn delays_are_monotonic_until_the_cap() {
        let p = ReconnectBackoff::default();
        let mut prev = Duration::ZERO;
        for attempt in 1..=10 {
            let d = p.delay_for_attempt(attempt);
            assert!(d >= prev, "attempt {attempt} regressed");
            prev = d;
        }
    }

    #[test]
    fn exhausted_when_limited() {
        let p = ReconnectBackoff {
            max_attempts: 5,
            ..Default::default()
        };
        assert!(!p.exhausted(4));
        assert!(p.exhausted(5));
        assert!(p.exhausted(6));
    }

    #[test]
    fn unlimited_never_exhausts() {
        let p = ReconnectBackoff::default();
        assert!(!p.exhausted(1_000_000));
    }
}
