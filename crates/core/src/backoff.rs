//! Retry backoff policy.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Exponential backoff with additive jitter:
/// `min(base * 2^attempts, cap) + uniform[0, jitter)`.
///
/// `attempts` is the failure count *after* the failed attempt was recorded,
/// so the first retry waits `2 * base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(60),
            jitter: Duration::from_secs(1),
        }
    }
}

impl BackoffPolicy {
    pub fn new(base: Duration, cap: Duration, jitter: Duration) -> Self {
        Self { base, cap, jitter }
    }

    /// A policy with no waiting at all (useful in tests).
    pub fn immediate() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, Duration::ZERO)
    }

    /// The capped exponential part, without jitter.
    pub fn base_delay(&self, attempts: u32) -> Duration {
        let factor = 1u128.checked_shl(attempts).unwrap_or(u128::MAX);
        let delay_ms = self.base.as_millis().saturating_mul(factor);
        let capped = delay_ms.min(self.cap.as_millis());
        Duration::from_millis(u64::try_from(capped).unwrap_or(u64::MAX))
    }

    /// Delay for `attempts` with `fraction` (in `[0, 1)`) of the jitter window added.
    pub fn delay_with_jitter(&self, attempts: u32, fraction: f64) -> Duration {
        let window = u64::try_from(self.jitter.as_nanos()).unwrap_or(u64::MAX);
        let extra = (window as f64 * fraction.clamp(0.0, 1.0)) as u64;
        // Jitter window is half-open.
        let extra = extra.min(window.saturating_sub(1));
        self.base_delay(attempts) + Duration::from_nanos(extra)
    }

    /// Delay before the next attempt, with random jitter.
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        if self.jitter.is_zero() {
            return self.base_delay(attempts);
        }
        let fraction: f64 = rand::rng().random_range(0.0..1.0);
        self.delay_with_jitter(attempts, fraction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_policy_doubles_from_two_seconds() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.base_delay(1), Duration::from_secs(2));
        assert_eq!(policy.base_delay(2), Duration::from_secs(4));
        assert_eq!(policy.base_delay(3), Duration::from_secs(8));
        assert_eq!(policy.base_delay(5), Duration::from_secs(32));
    }

    #[test]
    fn default_policy_caps_at_sixty_seconds() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.base_delay(6), Duration::from_secs(60));
        assert_eq!(policy.base_delay(40), Duration::from_secs(60));
        assert_eq!(policy.base_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn zero_jitter_is_deterministic() {
        let policy = BackoffPolicy::new(
            Duration::from_millis(10),
            Duration::from_secs(1),
            Duration::ZERO,
        );
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(40));
        assert_eq!(BackoffPolicy::immediate().delay_for_attempt(9), Duration::ZERO);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            .. ProptestConfig::default()
        })]

        #[test]
        fn delay_is_bounded_by_cap_plus_jitter(attempts in 0u32..200) {
            let policy = BackoffPolicy::default();
            let delay = policy.delay_for_attempt(attempts);

            prop_assert!(delay >= policy.base_delay(attempts));
            prop_assert!(delay < policy.cap + policy.jitter);
        }

        #[test]
        fn base_delay_is_non_decreasing(attempts in 0u32..200) {
            let policy = BackoffPolicy::default();
            prop_assert!(policy.base_delay(attempts) <= policy.base_delay(attempts + 1));
        }

        #[test]
        fn expected_delay_is_non_decreasing(attempts in 0u32..200) {
            // Expectation of uniform jitter is half the window.
            let policy = BackoffPolicy::default();
            let expected = |a| policy.delay_with_jitter(a, 0.5);
            prop_assert!(expected(attempts) <= expected(attempts + 1));
        }
    }
}
