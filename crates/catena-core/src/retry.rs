//! Exponential backoff with multiplicative jitter.
//!
//! ```text
//! delay(n) = min(base * 2^(n-1), max) * U[0.5, 1.5]
//! ```
//!
//! The random source is a parameter so callers (and tests) control it.

use std::time::Duration;

use rand::Rng;

/// Lower and upper bound of the jitter factor.
pub const JITTER_RANGE: (f64, f64) = (0.5, 1.5);

/// Retry delay schedule for failed fetch attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    /// 2s base, capped at 30s.
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Un-jittered delay for a given attempt number (1-indexed).
    ///
    /// - Attempt 0 or 1: `base`
    /// - Attempt n: `base * 2^(n-1)`, capped by `max_delay`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exponent)
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }

    /// Jittered delay to sleep before the attempt after `attempt`.
    pub fn delay_for<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let factor = rng.random_range(JITTER_RANGE.0..=JITTER_RANGE.1);
        self.backoff(attempt).mul_f64(factor)
    }
}
