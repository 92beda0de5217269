//! Retry policy with randomized exponential backoff
//!
//! The delay before retry `n` (0-based) is drawn uniformly from
//! `0..=min(max_wait, min_wait * 2^n)` and never drops below `min_wait`.

use rand::Rng;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first call; always at least 1.
    pub max_attempts: u32,
    pub min_wait: Duration,
    pub max_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            min_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(20),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, min_wait: Duration, max_wait: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            min_wait,
            max_wait: max_wait.max(min_wait),
        }
    }

    /// A policy that calls once and never waits.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    /// Whether another attempt is allowed after `attempts_made` calls.
    pub fn allows_another(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Backoff before retry number `retry` (0 for the first retry).
    pub fn delay<R: Rng>(&self, retry: u32, rng: &mut R) -> Duration {
        let factor = 2u32.saturating_pow(retry.min(31));
        let ceiling = self.min_wait.saturating_mul(factor).min(self.max_wait);
        if ceiling.is_zero() {
            return Duration::ZERO;
        }
        let drawn = rng.gen_range(Duration::ZERO..=ceiling);
        drawn.max(self.min_wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn delays_stay_within_bounds() {
        let policy = RetryPolicy::new(6, Duration::from_secs(1), Duration::from_secs(20));
        let mut rng = StdRng::seed_from_u64(7);

        for retry in 0..10 {
            let ceiling = (Duration::from_secs(1) * 2u32.pow(retry)).min(Duration::from_secs(20));
            for _ in 0..50 {
                let d = policy.delay(retry, &mut rng);
                assert!(d >= Duration::from_secs(1), "{d:?} below min");
                assert!(d <= ceiling, "{d:?} above {ceiling:?}");
            }
        }
    }

    #[test]
    fn huge_retry_numbers_saturate_at_max_wait() {
        let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(50));
        let mut rng = StdRng::seed_from_u64(1);
        assert!(policy.delay(u32::MAX, &mut rng) <= Duration::from_millis(50));
    }

    #[test]
    fn attempt_accounting() {
        let policy = RetryPolicy::new(3, Duration::ZERO, Duration::ZERO);
        assert!(policy.allows_another(1));
        assert!(policy.allows_another(2));
        assert!(!policy.allows_another(3));
        assert!(!RetryPolicy::none().allows_another(1));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts, 1);
    }

    #[test]
    fn zero_waits_never_sleep() {
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(RetryPolicy::none().delay(4, &mut rng), Duration::ZERO);
    }
}
