//! src/network/rate_limit.rs
//!
//! Rate limiting for recovery actions (re-announcements after the extension
//! channel comes back).

use governor::{Quota, RateLimiter as GovernorRateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

/// A rate limiter wrapping the `governor` crate.
#[derive(Clone)]
pub struct RateLimiter {
    limiter: Arc<
        GovernorRateLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
}

impl RateLimiter {
    /// Creates a new rate limiter.
    ///
    /// # Arguments
    /// * `burst` - Actions allowed back to back before throttling kicks in. Zero is treated as one.
    /// * `period` - Replenish interval for one action. A zero period is clamped to one millisecond.
    pub fn new(burst: u32, period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
            .allow_burst(burst);
        Self { limiter: Arc::new(GovernorRateLimiter::direct(quota)) }
    }

    /// One action per `period`, no burst.
    pub fn one_per(period: Duration) -> Self {
        Self::new(1, period)
    }

    /// Consumes one permit if available.
    pub fn allow(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_per_blocks_second_call() {
        let limiter = RateLimiter::one_per(Duration::from_secs(60));
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn test_burst_allows_multiple() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn test_zero_burst_treated_as_one() {
        let limiter = RateLimiter::new(0, Duration::ZERO);
        assert!(limiter.allow());
    }
}
