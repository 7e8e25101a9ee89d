//! Error types for remote API calls and their retry classification.
//!
//! Every failure an operation can surface to the throttling executor is an [`ApiError`]. The
//! executor never inspects the variant directly; it asks [`ApiError::kind`] for the taxonomy
//! bucket and [`ApiError::rate_limit`] / [`ApiError::retry_after`] for any server-supplied
//! throttle state.
use crate::rate_limit::RateLimitInfo;
use std::fmt;
use std::time::Duration;

/// Cap the number of GraphQL error messages kept on a single error.
pub const MAX_GRAPHQL_MESSAGES: usize = 10;

/// Taxonomy bucket used by the retry policy and the error handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Connection reset, DNS failure, timeout. Transient.
    Network,
    /// The remote cost limiter refused the call. Not a true failure.
    RemoteThrottle,
    /// 4xx other than 429.
    ClientError,
    /// 5xx.
    ServerError,
    /// Input-shape problem (GraphQL validation, malformed payload).
    Validation,
    /// Anything else.
    Unknown,
    /// The surrounding task gave up.
    Cancelled,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Network => "network",
            ErrorKind::RemoteThrottle => "remote_throttle",
            ErrorKind::ClientError => "client_error",
            ErrorKind::ServerError => "server_error",
            ErrorKind::Validation => "validation",
            ErrorKind::Unknown => "unknown",
            ErrorKind::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// Failure of a single remote API attempt.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    /// Transport-level failure before a response was received.
    #[error("network error: {message}")]
    Network { message: String, timed_out: bool },
    /// Non-success HTTP status.
    #[error("http status {status}: {message}")]
    Http {
        status: u16,
        message: String,
        rate_limit: Option<RateLimitInfo>,
        retry_after: Option<Duration>,
    },
    /// The remote limiter reported the request as throttled.
    #[error("request throttled by remote cost limiter")]
    Throttled { rate_limit: Option<RateLimitInfo> },
    /// GraphQL-level errors with no usable data.
    #[error("graphql errors: {}", .messages.join("; "))]
    GraphQl { messages: Vec<String> },
    /// Caller supplied invalid input.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Missing or rejected credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// Operation aborted by a cancellation signal.
    #[error("operation cancelled")]
    Cancelled,
    /// Unclassified failure.
    #[error("{0}")]
    Other(String),
}

impl ApiError {
    /// Build a network error.
    pub fn network(message: impl Into<String>) -> Self {
        ApiError::Network { message: message.into(), timed_out: false }
    }

    /// Build a network timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        ApiError::Network { message: message.into(), timed_out: true }
    }

    /// Build an HTTP status error without throttle metadata.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        ApiError::Http { status, message: message.into(), rate_limit: None, retry_after: None }
    }

    /// Build a GraphQL error, keeping at most [`MAX_GRAPHQL_MESSAGES`] messages.
    pub fn graphql<I, S>(messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ApiError::GraphQl {
            messages: messages.into_iter().take(MAX_GRAPHQL_MESSAGES).map(Into::into).collect(),
        }
    }

    /// Classify this error into its taxonomy bucket.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ApiError::Network { .. } => ErrorKind::Network,
            ApiError::Http { status, .. } => match *status {
                429 => ErrorKind::RemoteThrottle,
                500..=599 => ErrorKind::ServerError,
                400..=499 => ErrorKind::ClientError,
                _ => ErrorKind::Unknown,
            },
            ApiError::Throttled { .. } => ErrorKind::RemoteThrottle,
            ApiError::GraphQl { .. } | ApiError::Validation(_) => ErrorKind::Validation,
            ApiError::Authentication(_) => ErrorKind::ClientError,
            ApiError::Cancelled => ErrorKind::Cancelled,
            ApiError::Other(_) => ErrorKind::Unknown,
        }
    }

    /// HTTP status, if this error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Remote throttle snapshot attached to the failure, if any.
    pub fn rate_limit(&self) -> Option<&RateLimitInfo> {
        match self {
            ApiError::Http { rate_limit, .. } | ApiError::Throttled { rate_limit } => {
                rate_limit.as_ref()
            }
            _ => None,
        }
    }

    /// Server-requested wait (`Retry-After`), if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            ApiError::Http { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    /// True for 401/403 responses and explicit credential failures.
    pub fn is_authentication(&self) -> bool {
        matches!(self, ApiError::Authentication(_))
            || matches!(self, ApiError::Http { status: 401 | 403, .. })
    }

    /// True if the error came from a cancellation signal.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ApiError::Cancelled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::ThrottleStatus;

    fn info() -> RateLimitInfo {
        RateLimitInfo {
            requested_cost: 100.0,
            actual_cost: 0.0,
            throttle_status: ThrottleStatus {
                maximum_available: 1000.0,
                currently_available: 0.0,
                restore_rate: 50.0,
            },
        }
    }

    #[test]
    fn http_status_maps_to_kind() {
        assert_eq!(ApiError::http(429, "slow down").kind(), ErrorKind::RemoteThrottle);
        assert_eq!(ApiError::http(503, "unavailable").kind(), ErrorKind::ServerError);
        assert_eq!(ApiError::http(404, "missing").kind(), ErrorKind::ClientError);
        assert_eq!(ApiError::http(401, "denied").kind(), ErrorKind::ClientError);
        assert_eq!(ApiError::http(302, "moved").kind(), ErrorKind::Unknown);
    }

    #[test]
    fn non_http_variants_map_to_kind() {
        assert_eq!(ApiError::network("reset").kind(), ErrorKind::Network);
        assert_eq!(ApiError::timeout("slow").kind(), ErrorKind::Network);
        assert_eq!(ApiError::Throttled { rate_limit: None }.kind(), ErrorKind::RemoteThrottle);
        assert_eq!(ApiError::graphql(["bad field"]).kind(), ErrorKind::Validation);
        assert_eq!(ApiError::Validation("x".into()).kind(), ErrorKind::Validation);
        assert_eq!(ApiError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(ApiError::Other("?".into()).kind(), ErrorKind::Unknown);
    }

    #[test]
    fn rate_limit_accessor_reads_http_and_throttled() {
        let http = ApiError::Http {
            status: 429,
            message: "throttled".into(),
            rate_limit: Some(info()),
            retry_after: Some(Duration::from_secs(2)),
        };
        assert_eq!(http.rate_limit(), Some(&info()));
        assert_eq!(http.retry_after(), Some(Duration::from_secs(2)));

        let throttled = ApiError::Throttled { rate_limit: Some(info()) };
        assert_eq!(throttled.rate_limit(), Some(&info()));
        assert!(throttled.retry_after().is_none());

        assert!(ApiError::network("reset").rate_limit().is_none());
    }

    #[test]
    fn graphql_messages_are_capped_and_displayed() {
        let err = ApiError::graphql((0..25).map(|i| format!("e{}", i)));
        match &err {
            ApiError::GraphQl { messages } => assert_eq!(messages.len(), MAX_GRAPHQL_MESSAGES),
            other => panic!("unexpected {:?}", other),
        }
        assert!(err.to_string().starts_with("graphql errors: e0; e1"));
    }

    #[test]
    fn authentication_detection() {
        assert!(ApiError::http(401, "no").is_authentication());
        assert!(ApiError::http(403, "no").is_authentication());
        assert!(ApiError::Authentication("missing token".into()).is_authentication());
        assert!(!ApiError::http(404, "no").is_authentication());
    }
}
