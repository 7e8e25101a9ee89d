#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # storehook
//!
//! Webhook ingestion and a throttled GraphQL execution layer for e-commerce platform apps.
//!
//! ## Features
//!
//! - **Throttling executor** that retries a single logical call with exponential backoff while
//!   honoring the remote API's cost-based throttle state
//! - **Rate-limit parsing** from GraphQL cost extensions or HTTP headers
//! - **Retry policy** over a small error taxonomy
//! - **Webhook dispatch** by topic family with HMAC verification
//! - **Error notification** with per-category hourly and daily caps
//! - **Telemetry** as `tower::Service` sinks
//!
//! ## Quick Start
//!
//! ```rust
//! use storehook::{ApiError, ThrottlingConfig, ThrottlingContext, ThrottlingExecutor, ThrottlingOverrides};
//! use storehook::sleeper::InstantSleeper;
//!
//! #[tokio::main]
//! async fn main() {
//!     let executor = ThrottlingExecutor::new(ThrottlingConfig::default()).with_sleeper(InstantSleeper);
//!     let ctx = ThrottlingContext::new("demo.myshopify.com", "shop.fetch");
//!
//!     let result = executor
//!         .execute(|| async { Ok::<_, ApiError>(()) }, &ctx, &ThrottlingOverrides::default())
//!         .await;
//!     assert!(result.is_success());
//!     assert_eq!(result.retry_count, 0);
//! }
//! ```

pub mod adaptive;
pub mod backoff;
pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod graphql;
pub mod jitter;
pub mod notify;
pub mod prelude;
pub mod rate_limit;
pub mod retry;
pub mod sleeper;
pub mod telemetry;
pub mod token_store;
pub mod webhook;

// Re-exports
pub use backoff::Backoff;
pub use config::{AppConfig, ConfigError, ConfigLoader, ThrottlingConfig, ThrottlingOverrides};
pub use error::{ApiError, ErrorKind};
pub use executor::{ThrottlingContext, ThrottlingExecutor, ThrottlingResult};
pub use graphql::{AdminApi, GraphqlClient, GraphqlRequest, GraphqlResponse};
pub use jitter::Jitter;
pub use notify::{ErrorCategory, ErrorContext, ErrorHandler, NotificationOutcome, Severity};
pub use rate_limit::{RateLimitInfo, ThrottleStatus};
pub use retry::should_retry;
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
pub use token_store::{AccessToken, InMemoryTokenStore, TokenStore};
pub use webhook::{HandlerRegistry, WebhookEvent, WebhookProcessor, WebhookResponse};
