//! Retry-delay randomization.
//!
//! Many webhook tasks for the same shop tend to hit a throttled bucket at the same moment; scaling
//! each computed delay by a random factor in `[0.5, 1.0]` spreads their retries without ever
//! exceeding the configured `max_delay`. The thread-local RNG is used unless a seeded one is
//! passed to [`Jitter::apply_with_rng`].

use rand::{rng, Rng};
use std::time::Duration;

/// Lower bound of the equal-jitter factor.
pub const MIN_FACTOR: f64 = 0.5;

/// How a computed backoff delay is randomized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// Exact delay.
    #[default]
    None,
    /// Delay scaled by a uniform factor in `[0.5, 1.0]`.
    Equal,
}

impl Jitter {
    /// Maps the `jitter` switch of a throttling config.
    pub fn from_flag(enabled: bool) -> Self {
        if enabled {
            Jitter::Equal
        } else {
            Jitter::None
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Jitter::Equal)
    }

    pub fn apply(&self, delay: Duration) -> Duration {
        self.apply_with_rng(delay, &mut rng())
    }

    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Equal => scale(delay, rng.random_range(MIN_FACTOR..=1.0)),
        }
    }
}

/// `delay * factor` in whole milliseconds, never above `delay`.
fn scale(delay: Duration, factor: f64) -> Duration {
    let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
    let scaled = (millis as f64 * factor.clamp(0.0, 1.0)).floor();
    // f64 rounding near u64::MAX can land one step above the input.
    let scaled = if scaled >= millis as f64 { millis } else { scaled as u64 };
    Duration::from_millis(scaled)
}
