//! Exponential backoff for throttled retries.
//!
//! `delay(retry) = min(max_delay, base_delay * multiplier^retry)`, then optionally jittered.
//! Retry indices are 0-based: the first retry (after the initial attempt failed) uses exponent
//! `0`, i.e. exactly `base_delay`.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use storehook::backoff::Backoff;
//! use storehook::config::ThrottlingConfig;
//!
//! let config = ThrottlingConfig {
//!     base_delay_ms: 100,
//!     max_delay_ms: 2_000,
//!     backoff_multiplier: 2.0,
//!     jitter: false,
//!     ..Default::default()
//! };
//! let backoff = Backoff::from_config(&config).unwrap();
//! assert_eq!(backoff.delay(0), Duration::from_millis(100));
//! assert_eq!(backoff.delay(1), Duration::from_millis(200));
//! assert_eq!(backoff.delay(10), Duration::from_millis(2_000)); // capped
//! ```
//!
//! Overflow behavior: an intermediate that overflows or is not finite clamps to `max_delay`.

use crate::config::{ConfigError, ThrottlingConfig};
use crate::jitter::Jitter;
use rand::Rng;
use std::time::Duration;

/// Upper bound applied to any wait derived from remote throttle state (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Exponential backoff calculator built from a validated [`ThrottlingConfig`].
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    multiplier: f64,
    jitter: Jitter,
}

impl Backoff {
    /// Build from config, rejecting values that could produce negative or infinite delays.
    pub fn from_config(config: &ThrottlingConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            base: config.base_delay(),
            max: config.max_delay(),
            multiplier: config.backoff_multiplier,
            jitter: Jitter::from_flag(config.jitter),
        })
    }

    /// Upper bound of every delay this calculator returns.
    pub fn max(&self) -> Duration {
        self.max
    }

    /// Delay before retry `retry` (0-based), including jitter.
    pub fn delay(&self, retry: usize) -> Duration {
        self.jitter.apply(self.exponential(retry))
    }

    /// Same as [`Backoff::delay`] with an injected RNG (for deterministic tests).
    pub fn delay_with_rng<R: Rng>(&self, retry: usize, rng: &mut R) -> Duration {
        self.jitter.apply_with_rng(self.exponential(retry), rng)
    }

    /// The capped exponential delay with no jitter applied.
    pub fn exponential(&self, retry: usize) -> Duration {
        let exponent = retry.min(i32::MAX as usize) as i32;
        let max_ms = self.max.as_millis() as f64;
        let raw = self.base.as_millis() as f64 * self.multiplier.powi(exponent);
        if !raw.is_finite() || raw >= max_ms {
            return self.max;
        }
        Duration::from_millis(raw.max(0.0).round() as u64).min(self.max)
    }
}

/// Functional form: `delay(retry_count, config)`.
pub fn delay(retry_count: usize, config: &ThrottlingConfig) -> Result<Duration, ConfigError> {
    Ok(Backoff::from_config(config)?.delay(retry_count))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config(jitter: bool) -> ThrottlingConfig {
        ThrottlingConfig {
            base_delay_ms: 100,
            max_delay_ms: 2_000,
            backoff_multiplier: 2.0,
            jitter,
            ..Default::default()
        }
    }

    #[test]
    fn exponential_doubles_from_base() {
        let backoff = Backoff::from_config(&config(false)).unwrap();
        assert_eq!(backoff.delay(0), Duration::from_millis(100)); // 100 * 2^0
        assert_eq!(backoff.delay(1), Duration::from_millis(200)); // 100 * 2^1
        assert_eq!(backoff.delay(2), Duration::from_millis(400));
        assert_eq!(backoff.delay(3), Duration::from_millis(800));
        assert_eq!(backoff.delay(4), Duration::from_millis(1600));
        assert_eq!(backoff.delay(5), Duration::from_millis(2000)); // capped
    }

    #[test]
    fn fractional_multiplier() {
        let cfg = ThrottlingConfig { backoff_multiplier: 1.5, ..config(false) };
        let backoff = Backoff::from_config(&cfg).unwrap();
        assert_eq!(backoff.delay(1), Duration::from_millis(150));
        assert_eq!(backoff.delay(2), Duration::from_millis(225));
    }

    #[test]
    fn never_exceeds_max() {
        for jitter in [false, true] {
            let backoff = Backoff::from_config(&config(jitter)).unwrap();
            for retry in 0..200 {
                assert!(backoff.delay(retry) <= Duration::from_millis(2_000));
            }
        }
    }

    #[test]
    fn huge_retry_clamps_instead_of_overflowing() {
        let backoff = Backoff::from_config(&config(false)).unwrap();
        assert_eq!(backoff.delay(usize::MAX), Duration::from_millis(2_000));
        let huge = ThrottlingConfig { backoff_multiplier: 1e300, ..config(false) };
        let backoff = Backoff::from_config(&huge).unwrap();
        assert_eq!(backoff.delay(3), Duration::from_millis(2_000));
    }

    #[test]
    fn deterministic_without_jitter() {
        let cfg = config(false);
        for retry in 0..10 {
            assert_eq!(delay(retry, &cfg).unwrap(), delay(retry, &cfg).unwrap());
        }
    }

    #[test]
    fn jitter_stays_within_half_to_full() {
        let backoff = Backoff::from_config(&config(true)).unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let d = backoff.delay_with_rng(2, &mut rng);
            assert!(d >= Duration::from_millis(200));
            assert!(d <= Duration::from_millis(400));
        }
    }

    #[test]
    fn invalid_config_is_rejected() {
        let bad = ThrottlingConfig { backoff_multiplier: 1.0, ..config(false) };
        assert!(Backoff::from_config(&bad).is_err());
        assert!(delay(0, &bad).is_err());
    }
}
