//! Retry decision for a failed attempt.
//!
//! Semantics:
//! - `retry_count` is the number of retries already performed (0 after the first failure).
//! - Nothing is retried once `retry_count >= max_retries` or when throttling is disabled.
//! - Retryable: network failures, statuses in `retryable_status_codes`, and (when
//!   `respect_remote_rate_limits` is on) remote throttle signals whose bucket cannot cover the
//!   requested cost.
//! - Everything else (validation, auth, other 4xx, cancellation) fails fast.

use crate::config::ThrottlingConfig;
use crate::error::{ApiError, ErrorKind};

/// Decide whether another attempt is warranted.
pub fn should_retry(error: &ApiError, retry_count: usize, config: &ThrottlingConfig) -> bool {
    if !config.enabled || retry_count >= config.max_retries {
        return false;
    }
    is_retryable(error, config)
}

/// Classification half of [`should_retry`], ignoring the retry budget.
pub fn is_retryable(error: &ApiError, config: &ThrottlingConfig) -> bool {
    match error.kind() {
        ErrorKind::Network => true,
        ErrorKind::RemoteThrottle => {
            let starving = error.rate_limit().is_some_and(|info| info.is_budget_insufficient());
            if config.respect_remote_rate_limits && starving {
                return true;
            }
            match error.status() {
                Some(status) => config.retryable_status_codes.contains(&status),
                // Throttle signal without status: only a proactive retry when limits are respected.
                None => config.respect_remote_rate_limits && error.rate_limit().is_none(),
            }
        }
        // A cost snapshot on these never makes them retryable.
        ErrorKind::ServerError | ErrorKind::ClientError | ErrorKind::Unknown => error
            .status()
            .map(|status| config.retryable_status_codes.contains(&status))
            .unwrap_or(false),
        ErrorKind::Validation | ErrorKind::Cancelled => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::{RateLimitInfo, ThrottleStatus};

    fn config() -> ThrottlingConfig {
        ThrottlingConfig { max_retries: 3, ..Default::default() }
    }

    fn info(available: f64, requested: f64) -> RateLimitInfo {
        RateLimitInfo {
            requested_cost: requested,
            actual_cost: 0.0,
            throttle_status: ThrottleStatus {
                maximum_available: 1000.0,
                currently_available: available,
                restore_rate: 50.0,
            },
        }
    }

    #[test]
    fn network_and_listed_statuses_retry() {
        let cfg = config();
        assert!(should_retry(&ApiError::network("reset"), 0, &cfg));
        assert!(should_retry(&ApiError::timeout("slow"), 2, &cfg));
        for status in [429, 500, 502, 503, 504] {
            assert!(should_retry(&ApiError::http(status, "x"), 0, &cfg), "status {}", status);
        }
    }

    #[test]
    fn unlisted_statuses_do_not_retry() {
        let cfg = config();
        for status in [400, 401, 403, 404, 422, 501] {
            assert!(!should_retry(&ApiError::http(status, "x"), 0, &cfg), "status {}", status);
        }
        let narrowed = ThrottlingConfig {
            retryable_status_codes: [503].into_iter().collect(),
            ..config()
        };
        assert!(!should_retry(&ApiError::http(500, "x"), 0, &narrowed));
        assert!(should_retry(&ApiError::http(503, "x"), 0, &narrowed));
    }

    #[test]
    fn non_retryable_errors_never_retry() {
        let cfg = config();
        let errors = [
            ApiError::graphql(["Field 'nope' doesn't exist"]),
            ApiError::Validation("bad id".into()),
            ApiError::Authentication("no token".into()),
            ApiError::Cancelled,
            ApiError::Other("boom".into()),
        ];
        for err in &errors {
            for retry in 0..5 {
                assert!(!should_retry(err, retry, &cfg), "{:?}", err);
            }
        }
    }

    #[test]
    fn budget_exhausted_or_disabled_stops() {
        let cfg = config();
        let err = ApiError::http(503, "x");
        assert!(should_retry(&err, 2, &cfg));
        assert!(!should_retry(&err, 3, &cfg));
        assert!(!should_retry(&err, 10, &cfg));

        let disabled = ThrottlingConfig { enabled: false, ..config() };
        assert!(!should_retry(&err, 0, &disabled));

        let none = ThrottlingConfig { max_retries: 0, ..config() };
        assert!(!should_retry(&err, 0, &none));
    }

    #[test]
    fn remote_throttle_respects_flag() {
        let cfg = config();
        let starving = ApiError::Throttled { rate_limit: Some(info(0.0, 100.0)) };
        assert!(should_retry(&starving, 0, &cfg));

        let ignoring = ThrottlingConfig { respect_remote_rate_limits: false, ..config() };
        assert!(!should_retry(&starving, 0, &ignoring));

        let unknown_state = ApiError::Throttled { rate_limit: None };
        assert!(should_retry(&unknown_state, 0, &cfg));
        assert!(!should_retry(&unknown_state, 0, &ignoring));

        let enough = ApiError::Throttled { rate_limit: Some(info(500.0, 100.0)) };
        assert!(!should_retry(&enough, 0, &cfg));
    }

    #[test]
    fn drained_bucket_does_not_make_client_errors_retryable() {
        let cfg = config();
        for status in [400, 401, 403, 404] {
            let err = ApiError::Http {
                status,
                message: "denied".into(),
                rate_limit: Some(info(0.0, 100.0)),
                retry_after: None,
            };
            for retry in 0..3 {
                assert!(!should_retry(&err, retry, &cfg), "status {}", status);
            }
        }
    }

    #[test]
    fn drained_bucket_on_429_retries_even_when_unlisted() {
        let cfg = ThrottlingConfig { retryable_status_codes: Default::default(), ..config() };
        let err = ApiError::Http {
            status: 429,
            message: "slow down".into(),
            rate_limit: Some(info(10.0, 100.0)),
            retry_after: None,
        };
        assert!(should_retry(&err, 0, &cfg));
        assert!(!should_retry(&ApiError::http(429, "slow down"), 0, &cfg));
    }
}
