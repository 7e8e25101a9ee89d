//! Convenient re-exports for common storehook types.
pub use crate::{
    backoff::{Backoff, MAX_BACKOFF},
    config::{AppConfig, ConfigLoader, NotificationConfig, ThrottlingConfig, ThrottlingOverrides},
    error::{ApiError, ErrorKind},
    executor::{ThrottlingContext, ThrottlingExecutor, ThrottlingResult},
    graphql::{AdminApi, GraphqlClient, GraphqlRequest},
    jitter::Jitter,
    notify::{ErrorCategory, ErrorContext, ErrorHandler, Notifier, Severity},
    rate_limit::{RateLimitInfo, RateLimitSource},
    telemetry::{LogSink, MemorySink, NullSink, ThrottleEvent},
    token_store::{AccessToken, TokenStore},
    webhook::{HandlerRegistry, WebhookEvent, WebhookHandler, WebhookProcessor},
};
