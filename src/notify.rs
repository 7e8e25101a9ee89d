//! Error classification and rate-limited notification.
//!
//! [`ErrorHandler`] is the single funnel for failures that should reach a human. For each
//! reported error it:
//! 1. fills in severity/category from a heuristic when the caller did not supply them;
//! 2. logs the error;
//! 3. drops the notification when disabled, below `severity_threshold`, without recipients, or
//!    over the hourly/daily cap for its category;
//! 4. otherwise renders a [`Notification`] and hands it to the [`Notifier`].
//!
//! Nothing here returns an error. A failing notifier is logged and reported as
//! [`NotificationOutcome::DeliveryFailed`]; it never produces a second report.

pub mod notifier;
pub mod tracking;

pub use notifier::{LogNotifier, MemoryNotifier, Notification, Notifier, NotifyError};
pub use tracking::{CategoryStats, ErrorTracking};

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, NotificationConfig};
use crate::error::{ApiError, ErrorKind};
use crate::webhook::WebhookError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Any error that can be reported from any task.
pub type ReportedError = dyn std::error::Error + Send + Sync + 'static;

/// Ordered severity: `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[serde(alias = "LOW")]
    Low,
    #[serde(alias = "MEDIUM")]
    Medium,
    #[serde(alias = "HIGH")]
    High,
    #[serde(alias = "CRITICAL")]
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Authentication,
    Webhook,
    GraphQl,
    RateLimit,
    Network,
    Validation,
    Configuration,
    Unknown,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::Webhook => "webhook",
            ErrorCategory::GraphQl => "graphql",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::Network => "network",
            ErrorCategory::Validation => "validation",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Unknown => "unknown",
        })
    }
}

/// Descriptive metadata attached to a reported error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub service: Option<String>,
    pub operation: Option<String>,
    pub shop: Option<String>,
    pub webhook_topic: Option<String>,
    pub user_id: Option<String>,
    pub request_id: Option<String>,
    pub additional: BTreeMap<String, Value>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_shop(mut self, shop: impl Into<String>) -> Self {
        self.shop = Some(shop.into());
        self
    }

    pub fn with_webhook_topic(mut self, topic: impl Into<String>) -> Self {
        self.webhook_topic = Some(topic.into());
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_additional(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.additional.insert(key.into(), value.into());
        self
    }
}

/// What happened to a reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    Sent,
    Disabled,
    BelowThreshold,
    NoRecipients,
    RateLimited,
    DeliveryFailed,
}

/// Default severity/category for an error nobody classified.
pub fn classify(error: &ReportedError) -> (Severity, ErrorCategory) {
    if let Some(api) = error.downcast_ref::<ApiError>() {
        return classify_api_error(api);
    }
    if error.downcast_ref::<ConfigError>().is_some() {
        return (Severity::Critical, ErrorCategory::Configuration);
    }
    if let Some(webhook) = error.downcast_ref::<WebhookError>() {
        return match webhook {
            WebhookError::InvalidSignature => (Severity::High, ErrorCategory::Authentication),
            WebhookError::Api(api) => classify_api_error(api),
            _ => (Severity::Medium, ErrorCategory::Webhook),
        };
    }

    let message = error.to_string().to_lowercase();
    if ["unauthorized", "authentication", "forbidden", "access token"]
        .iter()
        .any(|needle| message.contains(needle))
    {
        (Severity::High, ErrorCategory::Authentication)
    } else if ["timed out", "timeout", "connection"].iter().any(|needle| message.contains(needle))
    {
        (Severity::Medium, ErrorCategory::Network)
    } else {
        (Severity::Medium, ErrorCategory::Unknown)
    }
}

fn classify_api_error(error: &ApiError) -> (Severity, ErrorCategory) {
    if error.is_authentication() {
        return (Severity::High, ErrorCategory::Authentication);
    }
    match error.kind() {
        ErrorKind::RemoteThrottle => (Severity::Medium, ErrorCategory::RateLimit),
        ErrorKind::Network => (Severity::Medium, ErrorCategory::Network),
        ErrorKind::ServerError => (Severity::High, ErrorCategory::GraphQl),
        ErrorKind::ClientError => (Severity::Medium, ErrorCategory::GraphQl),
        ErrorKind::Validation => (Severity::Low, ErrorCategory::Validation),
        ErrorKind::Cancelled => (Severity::Low, ErrorCategory::Unknown),
        ErrorKind::Unknown => (Severity::Medium, ErrorCategory::Unknown),
    }
}

/// Classifies, logs, and (rate-limited) notifies about errors.
#[derive(Debug)]
pub struct ErrorHandler {
    config: NotificationConfig,
    tracking: Mutex<ErrorTracking>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
}

impl ErrorHandler {
    pub fn new<N>(config: NotificationConfig, notifier: N) -> Self
    where
        N: Notifier + 'static,
    {
        Self {
            config,
            tracking: Mutex::new(ErrorTracking::new()),
            notifier: Arc::new(notifier),
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the clock (tests use `ManualClock`).
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Arc::new(clock);
        self
    }

    pub fn config(&self) -> &NotificationConfig {
        &self.config
    }

    /// Counters for `category` in the current windows.
    pub fn stats(&self, category: ErrorCategory) -> CategoryStats {
        self.lock_tracking().stats(category, self.clock.now_millis())
    }

    /// Report an error. Never fails.
    pub async fn handle(
        &self,
        error: &ReportedError,
        severity: Option<Severity>,
        category: Option<ErrorCategory>,
        context: ErrorContext,
    ) -> NotificationOutcome {
        let (default_severity, default_category) = classify(error);
        let severity = severity.unwrap_or(default_severity);
        let category = category.unwrap_or(default_category);
        log_error(error, severity, category, &context);

        if !self.config.enabled {
            return NotificationOutcome::Disabled;
        }
        if severity < self.config.severity_threshold {
            return NotificationOutcome::BelowThreshold;
        }
        if self.config.recipients.is_empty() {
            tracing::debug!(%category, "no notification recipients configured");
            return NotificationOutcome::NoRecipients;
        }

        let now = self.clock.now_millis();
        let acquired = self.lock_tracking().try_acquire(
            category,
            now,
            self.config.max_emails_per_hour,
            self.config.max_emails_per_day,
        );
        if !acquired {
            tracing::warn!(%category, %severity, "error notification suppressed by rate limit");
            return NotificationOutcome::RateLimited;
        }

        let notification = self.render(error, severity, category, &context, now);
        match self.notifier.send(&notification).await {
            Ok(()) => {
                tracing::info!(%category, %severity, "error notification sent");
                NotificationOutcome::Sent
            }
            Err(err) => {
                tracing::warn!(error = %err, %category, "error notification delivery failed");
                NotificationOutcome::DeliveryFailed
            }
        }
    }

    /// Report with `Critical` severity.
    pub async fn handle_critical_error(
        &self,
        error: &ReportedError,
        context: ErrorContext,
    ) -> NotificationOutcome {
        self.handle(error, Some(Severity::Critical), None, context).await
    }

    /// Report a webhook processing failure.
    pub async fn handle_webhook_error(
        &self,
        error: &ReportedError,
        topic: &str,
        shop: &str,
        context: ErrorContext,
    ) -> NotificationOutcome {
        let context = context.with_webhook_topic(topic).with_shop(shop);
        self.handle(error, Some(Severity::High), Some(ErrorCategory::Webhook), context).await
    }

    /// Report a GraphQL call failure; severity still comes from the heuristic.
    pub async fn handle_graphql_error(
        &self,
        error: &ReportedError,
        shop: &str,
        operation: &str,
        context: ErrorContext,
    ) -> NotificationOutcome {
        let context = context.with_shop(shop).with_operation(operation);
        self.handle(error, None, Some(ErrorCategory::GraphQl), context).await
    }

    fn lock_tracking(&self) -> std::sync::MutexGuard<'_, ErrorTracking> {
        self.tracking.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn render(
        &self,
        error: &ReportedError,
        severity: Severity,
        category: ErrorCategory,
        context: &ErrorContext,
        now_millis: u64,
    ) -> Notification {
        let service = context.service.as_deref().unwrap_or(&self.config.service_name);
        let mut summary = error.to_string();
        if summary.chars().count() > 120 {
            summary = summary.chars().take(117).collect::<String>() + "...";
        }
        let timestamp = i64::try_from(now_millis)
            .ok()
            .and_then(chrono::DateTime::from_timestamp_millis)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| now_millis.to_string());

        let mut body = format!(
            "Severity: {}\nCategory: {}\nService: {}\nTime: {}\nError: {}\n",
            severity, category, service, timestamp, error
        );
        let mut source = error.source();
        while let Some(cause) = source {
            body.push_str(&format!("Caused by: {}\n", cause));
            source = cause.source();
        }
        let fields = [
            ("Operation", &context.operation),
            ("Shop", &context.shop),
            ("Webhook topic", &context.webhook_topic),
            ("User", &context.user_id),
            ("Request", &context.request_id),
        ];
        for (label, value) in fields {
            if let Some(value) = value {
                body.push_str(&format!("{}: {}\n", label, value));
            }
        }
        for (key, value) in &context.additional {
            body.push_str(&format!("{}: {}\n", key, value));
        }

        Notification {
            subject: format!("[{}] {} error in {}: {}", severity, category, service, summary),
            body,
            recipients: self.config.recipients.clone(),
            severity,
            category,
        }
    }
}

fn log_error(
    error: &ReportedError,
    severity: Severity,
    category: ErrorCategory,
    context: &ErrorContext,
) {
    let shop = context.shop.as_deref().unwrap_or("-");
    let operation = context.operation.as_deref().unwrap_or("-");
    let topic = context.webhook_topic.as_deref().unwrap_or("-");
    if severity >= Severity::High {
        tracing::error!(%severity, %category, shop, operation, topic, error = %error, "error reported");
    } else {
        tracing::warn!(%severity, %category, shop, operation, topic, error = %error, "error reported");
    }
}
