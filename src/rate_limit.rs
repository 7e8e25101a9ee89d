//! Remote cost-limiter state.
//!
//! The admin API charges every GraphQL call a weighted cost against a token bucket that refills
//! at `restore_rate` units per second. Cost state comes back either in the response's
//! `extensions.cost` block or in HTTP headers; both normalize to [`RateLimitInfo`].
//!
//! Parsing is all-or-nothing: if any required field is missing or not a non-negative number the
//! result is `None`, never a partially populated snapshot. `actualQueryCost` must be present,
//! but it is `null` when the call was throttled and that reads as `0` (nothing charged).
//!
//! ```rust
//! use serde_json::json;
//! use storehook::rate_limit::RateLimitInfo;
//!
//! let extensions = json!({
//!     "cost": {
//!         "requestedQueryCost": 100,
//!         "actualQueryCost": null,
//!         "throttleStatus": { "maximumAvailable": 1000.0, "currentlyAvailable": 0, "restoreRate": 50.0 }
//!     }
//! });
//! let info = RateLimitInfo::from_extensions(&extensions).unwrap();
//! assert!(info.is_budget_insufficient());
//! assert_eq!(info.refill_wait().unwrap().as_millis(), 2000);
//! ```

use crate::backoff::MAX_BACKOFF;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

pub const HEADER_REQUESTED_COST: &str = "x-graphql-cost-requested";
pub const HEADER_ACTUAL_COST: &str = "x-graphql-cost-actual";
pub const HEADER_MAXIMUM_AVAILABLE: &str = "x-graphql-throttle-maximum";
pub const HEADER_CURRENTLY_AVAILABLE: &str = "x-graphql-throttle-available";
pub const HEADER_RESTORE_RATE: &str = "x-graphql-throttle-restore-rate";

/// Bucket snapshot reported by the remote limiter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThrottleStatus {
    pub maximum_available: f64,
    pub currently_available: f64,
    /// Units restored per second.
    pub restore_rate: f64,
}

/// Cost of one call plus the bucket state after it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitInfo {
    pub requested_cost: f64,
    pub actual_cost: f64,
    pub throttle_status: ThrottleStatus,
}

/// Either wire representation of the cost state.
#[derive(Debug, Clone, Copy)]
pub enum RateLimitInput<'a> {
    Headers(&'a HeaderMap),
    Extensions(&'a Value),
}

/// Parse whichever representation is supplied.
pub fn parse(input: RateLimitInput<'_>) -> Option<RateLimitInfo> {
    match input {
        RateLimitInput::Headers(headers) => RateLimitInfo::from_headers(headers),
        RateLimitInput::Extensions(extensions) => RateLimitInfo::from_extensions(extensions),
    }
}

impl RateLimitInfo {
    /// Parse the `extensions` object of a GraphQL response.
    pub fn from_extensions(extensions: &Value) -> Option<Self> {
        let cost = extensions.get("cost")?;
        let status = cost.get("throttleStatus")?;
        let actual_cost = match cost.get("actualQueryCost")? {
            Value::Null => 0.0,
            v => non_negative(v.as_f64()?)?,
        };
        Some(Self {
            requested_cost: json_number(cost, "requestedQueryCost")?,
            actual_cost,
            throttle_status: ThrottleStatus {
                maximum_available: json_number(status, "maximumAvailable")?,
                currently_available: json_number(status, "currentlyAvailable")?,
                restore_rate: json_number(status, "restoreRate")?,
            },
        })
    }

    /// Parse the cost headers of an HTTP response.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        Some(Self {
            requested_cost: header_number(headers, HEADER_REQUESTED_COST)?,
            actual_cost: header_number(headers, HEADER_ACTUAL_COST)?,
            throttle_status: ThrottleStatus {
                maximum_available: header_number(headers, HEADER_MAXIMUM_AVAILABLE)?,
                currently_available: header_number(headers, HEADER_CURRENTLY_AVAILABLE)?,
                restore_rate: header_number(headers, HEADER_RESTORE_RATE)?,
            },
        })
    }

    /// True when the bucket cannot cover the requested cost.
    pub fn is_budget_insufficient(&self) -> bool {
        self.throttle_status.currently_available < self.requested_cost
    }

    /// Time until the bucket refills enough to cover `requested_cost`.
    ///
    /// `None` when the budget is already sufficient or the restore rate is not positive.
    /// Clamped to [`MAX_BACKOFF`].
    pub fn refill_wait(&self) -> Option<Duration> {
        let deficit = self.requested_cost - self.throttle_status.currently_available;
        let rate = self.throttle_status.restore_rate;
        if deficit <= 0.0 || rate <= 0.0 || !rate.is_finite() {
            return None;
        }
        let secs = deficit / rate;
        Some(Duration::try_from_secs_f64(secs).unwrap_or(MAX_BACKOFF).min(MAX_BACKOFF))
    }
}

fn non_negative(value: f64) -> Option<f64> {
    (value.is_finite() && value >= 0.0).then_some(value)
}

fn json_number(object: &Value, key: &str) -> Option<f64> {
    non_negative(object.get(key)?.as_f64()?)
}

fn header_number(headers: &HeaderMap, name: &str) -> Option<f64> {
    let raw = headers.get(name)?.to_str().ok()?;
    non_negative(raw.trim().parse::<f64>().ok()?)
}

/// Values that may carry remote cost state after a successful call.
pub trait RateLimitSource {
    fn rate_limit_info(&self) -> Option<RateLimitInfo>;
}

impl RateLimitSource for () {
    fn rate_limit_info(&self) -> Option<RateLimitInfo> {
        None
    }
}

/// A raw GraphQL response body.
impl RateLimitSource for Value {
    fn rate_limit_info(&self) -> Option<RateLimitInfo> {
        RateLimitInfo::from_extensions(self.get("extensions")?)
    }
}

impl<T: RateLimitSource> RateLimitSource for Option<T> {
    fn rate_limit_info(&self) -> Option<RateLimitInfo> {
        self.as_ref().and_then(RateLimitSource::rate_limit_info)
    }
}
