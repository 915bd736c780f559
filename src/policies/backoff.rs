//! # Backoff between worker (re)starts.
//!
//! [`BackoffPolicy`] computes the pause before the next start of a worker. The
//! delay for restart `n` (0-indexed) is `first × factor^n`, clamped to `max`, then
//! jittered. The base is derived from `n` alone, so jitter never feeds back.
//!
//! The supervisor default is a fixed one second pause ([`BackoffPolicy::constant`]).
//! Failed startups always use a constant pause; restarts take growth and jitter
//! from [`Settings`](crate::Settings) (`restart_backoff_factor`, `restart_jitter`).
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use procvisor::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(10),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//! assert_eq!(backoff.next(0), Duration::from_millis(100));
//! assert_eq!(backoff.next(1), Duration::from_millis(200));
//! assert_eq!(backoff.next(10), Duration::from_secs(10));
//! ```

use std::time::Duration;

use crate::policies::jitter::JitterPolicy;

/// Restart backoff policy.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first restart.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Multiplicative growth per restart; `1.0` or less means constant.
    pub factor: f64,
    /// Randomization applied on top of the base delay.
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    /// Constant one second, no jitter.
    fn default() -> Self {
        Self::constant(Duration::from_secs(1))
    }
}

impl BackoffPolicy {
    /// A fixed delay between every attempt.
    pub fn constant(delay: Duration) -> Self {
        Self {
            first: delay,
            max: delay,
            factor: 1.0,
            jitter: JitterPolicy::None,
        }
    }

    /// Computes the delay for restart number `attempt` (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let base = self.base(attempt);
        if self.jitter == JitterPolicy::Decorrelated {
            self.jitter.decorrelated(self.first.min(self.max), base, self.max)
        } else {
            self.jitter.apply(base)
        }
    }

    fn base(&self, attempt: u32) -> Duration {
        let floor = self.first.min(self.max);
        if attempt == 0 || self.factor <= 1.0 {
            return floor;
        }
        // NaN, overflow and infinity all land on the cap.
        let grown = self.first.as_secs_f64() * self.factor.powf(f64::from(attempt));
        Duration::try_from_secs_f64(grown).map_or(self.max, |d| d.min(self.max))
    }
}
