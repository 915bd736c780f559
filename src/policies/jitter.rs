//! # Jitter for restart delays.
//!
//! When several command workers crash on the same poisoned input they are all
//! restarted together. [`JitterPolicy`] spreads those restarts apart.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Randomization applied to a computed backoff delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterPolicy {
    /// Exact delay.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// `delay/2 + uniform[0, delay/2]`.
    Equal,
    /// Uniform in `[floor, min(prev * 3, max)]`; see [`JitterPolicy::decorrelated`].
    Decorrelated,
}

impl JitterPolicy {
    /// Applies the stateless variants. `Decorrelated` is returned unchanged.
    pub fn apply(&self, delay: Duration) -> Duration {
        let ms = millis(delay);
        match self {
            JitterPolicy::None | JitterPolicy::Decorrelated => delay,
            JitterPolicy::Full if ms == 0 => Duration::ZERO,
            JitterPolicy::Full => Duration::from_millis(rand::rng().random_range(0..=ms)),
            JitterPolicy::Equal => {
                let half = ms / 2;
                let extra = if half == 0 {
                    0
                } else {
                    rand::rng().random_range(0..=half)
                };
                Duration::from_millis(half + extra)
            }
        }
    }

    /// Decorrelated jitter around `prev`, never below `floor` nor above `max`.
    ///
    /// Other variants fall back to [`JitterPolicy::apply`] on `prev`.
    pub fn decorrelated(&self, floor: Duration, prev: Duration, max: Duration) -> Duration {
        if !matches!(self, JitterPolicy::Decorrelated) {
            return self.apply(prev);
        }
        let lo = millis(floor);
        let hi = millis(prev).saturating_mul(3).min(millis(max)).max(lo);
        if lo >= hi {
            return floor;
        }
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}
