#![allow(dead_code)]

use storehook::config::{NotificationConfig, ThrottlingConfig};
use storehook::notify::Severity;
use storehook::rate_limit::{RateLimitInfo, ThrottleStatus};

pub const SHOP: &str = "demo.myshopify.com";

/// `{max_retries: 3, base: 100ms, max: 2s, multiplier: 2, no jitter}`.
pub fn scenario_config() -> ThrottlingConfig {
    ThrottlingConfig {
        max_retries: 3,
        base_delay_ms: 100,
        max_delay_ms: 2_000,
        backoff_multiplier: 2.0,
        jitter: false,
        ..Default::default()
    }
}

pub fn notification_config(threshold: Severity, per_hour: u32) -> NotificationConfig {
    NotificationConfig {
        severity_threshold: threshold,
        max_emails_per_hour: per_hour,
        recipients: vec!["ops@example.com".into()],
        ..Default::default()
    }
}

pub fn drained_bucket() -> RateLimitInfo {
    RateLimitInfo {
        requested_cost: 100.0,
        actual_cost: 0.0,
        throttle_status: ThrottleStatus {
            maximum_available: 1_000.0,
            currently_available: 0.0,
            restore_rate: 50.0,
        },
    }
}

pub fn cost_extensions(available: f64) -> serde_json::Value {
    serde_json::json!({
        "cost": {
            "requestedQueryCost": 100,
            "actualQueryCost": 10,
            "throttleStatus": {
                "maximumAvailable": 1000.0,
                "currentlyAvailable": available,
                "restoreRate": 50.0
            }
        }
    })
}
