//! Requeue delays for retryable failures.
//!
//! Exponential in the number of consecutive failures of one key, capped, with
//! the upper half randomized so that snippets failing together spread out.

use std::time::Duration;

use rand::Rng;

/// Exponential backoff with jitter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
}

impl Backoff {
    /// Delays start at `base` and never exceed `max`.
    #[must_use]
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// Delay before retry number `failures` (1 for the first failure), before
    /// jitter.
    #[must_use]
    pub fn ceiling(&self, failures: u32) -> Duration {
        let exp = failures.saturating_sub(1).min(31);
        self.base.saturating_mul(1 << exp).min(self.max)
    }

    /// Jittered delay in `[ceiling / 2, ceiling]`.
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let ceiling = self.ceiling(failures);
        let floor = ceiling / 2;
        let spread = u64::try_from((ceiling - floor).as_millis()).unwrap_or(u64::MAX);
        if spread == 0 {
            return ceiling;
        }
        let jitter = rand::rng().random_range(0..=spread);
        floor + Duration::from_millis(jitter)
    }
}
