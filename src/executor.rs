//! Throttling executor: one logical operation across several physical attempts.
//!
//! State machine per call:
//!
//! ```text
//! ATTEMPTING -> SUCCESS
//!            -> EVALUATING_RETRY -> WAITING -> ATTEMPTING
//!                                -> TERMINAL
//! ```
//!
//! Invariants:
//! - at most `max_retries + 1` attempts and at most `max_retries` waits;
//! - `retry_count <= max_retries`;
//! - the result holds either data or an error, never both;
//! - no state is shared between calls; the bucket lives in the remote API.
//!
//! Every wait is the larger of the exponential backoff and whatever the remote limiter asks for
//! (bucket refill time, `Retry-After`), when `respect_remote_rate_limits` is on. Waits race a
//! [`CancellationToken`]; cancellation ends the call with [`ApiError::Cancelled`].
//!
//! Example
//! ```rust
//! use storehook::config::{ThrottlingConfig, ThrottlingOverrides};
//! use storehook::error::ApiError;
//! use storehook::executor::{ThrottlingContext, ThrottlingExecutor};
//! use storehook::sleeper::InstantSleeper;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let executor = ThrottlingExecutor::new(ThrottlingConfig::default()).with_sleeper(InstantSleeper);
//! let ctx = ThrottlingContext::new("demo.myshopify.com", "product.fetch");
//! let calls = &AtomicUsize::new(0);
//! let result = executor
//!     .execute(
//!         || async move {
//!             if calls.fetch_add(1, Ordering::SeqCst) == 0 {
//!                 Err(ApiError::http(503, "unavailable"))
//!             } else {
//!                 Ok(())
//!             }
//!         },
//!         &ctx,
//!         &ThrottlingOverrides::default(),
//!     )
//!     .await;
//! assert!(result.is_success());
//! assert_eq!(result.retry_count, 1);
//! # });
//! ```

use crate::adaptive::DynamicConfig;
use crate::backoff::{Backoff, MAX_BACKOFF};
use crate::config::{ThrottlingConfig, ThrottlingOverrides};
use crate::error::ApiError;
use crate::rate_limit::{RateLimitInfo, RateLimitSource};
use crate::retry::should_retry;
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::telemetry::{emit_best_effort, NullSink, ThrottleEvent};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Identifies the call site of one executor invocation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ThrottlingContext {
    pub shop: String,
    pub operation: String,
    pub request_id: Option<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl ThrottlingContext {
    pub fn new(shop: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            shop: shop.into(),
            operation: operation.into(),
            request_id: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Attach a random v4 request id.
    pub fn with_generated_request_id(self) -> Self {
        self.with_request_id(uuid::Uuid::new_v4().to_string())
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Outcome of a full executor invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ThrottlingResult<T> {
    outcome: Result<T, ApiError>,
    /// Last cost snapshot seen on any attempt.
    pub rate_limit: Option<RateLimitInfo>,
    /// Attempts beyond the first.
    pub retry_count: usize,
    /// Sum of all completed waits.
    pub total_delay: Duration,
}

impl<T> ThrottlingResult<T> {
    pub fn success(
        data: T,
        rate_limit: Option<RateLimitInfo>,
        retry_count: usize,
        total_delay: Duration,
    ) -> Self {
        Self { outcome: Ok(data), rate_limit, retry_count, total_delay }
    }

    pub fn failure(
        error: ApiError,
        rate_limit: Option<RateLimitInfo>,
        retry_count: usize,
        total_delay: Duration,
    ) -> Self {
        Self { outcome: Err(error), rate_limit, retry_count, total_delay }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn data(&self) -> Option<&T> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ApiError> {
        self.outcome.as_ref().err()
    }

    pub fn into_result(self) -> Result<T, ApiError> {
        self.outcome
    }

    /// Transform the data, keeping counters and rate-limit state.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> ThrottlingResult<U> {
        ThrottlingResult {
            outcome: self.outcome.map(f),
            rate_limit: self.rate_limit,
            retry_count: self.retry_count,
            total_delay: self.total_delay,
        }
    }
}

/// Runs operations under the throttling retry loop.
#[derive(Debug, Clone)]
pub struct ThrottlingExecutor<S = NullSink> {
    defaults: DynamicConfig<ThrottlingConfig>,
    sleeper: Arc<dyn Sleeper>,
    sink: S,
}

impl ThrottlingExecutor<NullSink> {
    pub fn new(defaults: ThrottlingConfig) -> Self {
        Self { defaults: DynamicConfig::new(defaults), sleeper: Arc::new(TokioSleeper), sink: NullSink }
    }
}

impl Default for ThrottlingExecutor<NullSink> {
    fn default() -> Self {
        Self::new(ThrottlingConfig::default())
    }
}

impl<S> ThrottlingExecutor<S> {
    /// Replace the sleeper (tests inject `InstantSleeper`/`TrackingSleeper`).
    pub fn with_sleeper<Z>(mut self, sleeper: Z) -> Self
    where
        Z: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Replace the telemetry sink.
    pub fn with_sink<S2>(self, sink: S2) -> ThrottlingExecutor<S2> {
        ThrottlingExecutor { defaults: self.defaults, sleeper: self.sleeper, sink }
    }

    /// Live handle to the process defaults.
    pub fn defaults(&self) -> &DynamicConfig<ThrottlingConfig> {
        &self.defaults
    }
}

impl<S> ThrottlingExecutor<S>
where
    S: tower::Service<ThrottleEvent, Response = ()> + Send + Sync + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    /// Run `operation` until it succeeds, fails terminally, or the retry budget runs out.
    pub async fn execute<T, Fut, Op>(
        &self,
        operation: Op,
        context: &ThrottlingContext,
        overrides: &ThrottlingOverrides,
    ) -> ThrottlingResult<T>
    where
        T: RateLimitSource + Send,
        Fut: Future<Output = Result<T, ApiError>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        self.execute_with_cancel(operation, context, overrides, &CancellationToken::new()).await
    }

    /// Like [`execute`](Self::execute), aborting attempts and waits once `cancel` fires.
    pub async fn execute_with_cancel<T, Fut, Op>(
        &self,
        mut operation: Op,
        context: &ThrottlingContext,
        overrides: &ThrottlingOverrides,
        cancel: &CancellationToken,
    ) -> ThrottlingResult<T>
    where
        T: RateLimitSource + Send,
        Fut: Future<Output = Result<T, ApiError>> + Send,
        Op: FnMut() -> Fut + Send,
    {
        let config = overrides.apply(&self.defaults.get());
        let backoff = match Backoff::from_config(&config) {
            Ok(backoff) => backoff,
            Err(err) => {
                tracing::warn!(
                    shop = %context.shop,
                    operation = %context.operation,
                    error = %err,
                    "rejecting call with invalid throttling config"
                );
                return ThrottlingResult::failure(
                    ApiError::Validation(err.to_string()),
                    None,
                    0,
                    Duration::ZERO,
                );
            }
        };

        let mut retry = 0usize;
        let mut total_delay = Duration::ZERO;
        let mut last_info: Option<RateLimitInfo> = None;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ApiError::Cancelled),
                result = operation() => result,
            };

            let error = match outcome {
                Ok(data) => {
                    if let Some(info) = data.rate_limit_info() {
                        self.observe(context, info).await;
                        last_info = Some(info);
                    }
                    tracing::debug!(
                        shop = %context.shop,
                        operation = %context.operation,
                        request_id = context.request_id.as_deref().unwrap_or("-"),
                        retries = retry,
                        total_delay_ms = total_delay.as_millis() as u64,
                        "throttled operation succeeded"
                    );
                    self.emit(ThrottleEvent::Succeeded {
                        shop: context.shop.clone(),
                        operation: context.operation.clone(),
                        retries: retry,
                        total_delay,
                    })
                    .await;
                    return ThrottlingResult::success(data, last_info, retry, total_delay);
                }
                Err(error) => error,
            };

            if let Some(info) = error.rate_limit().copied() {
                self.observe(context, info).await;
                last_info = Some(info);
            }

            if !should_retry(&error, retry, &config) {
                return self.terminal(context, error, last_info, retry, total_delay).await;
            }

            let (delay, throttled) = retry_delay(&backoff, retry, &error, &config);
            tracing::debug!(
                shop = %context.shop,
                operation = %context.operation,
                retry,
                delay_ms = delay.as_millis() as u64,
                throttled,
                error = %error,
                "retrying throttled operation"
            );
            self.emit(ThrottleEvent::RetryScheduled {
                shop: context.shop.clone(),
                operation: context.operation.clone(),
                retry,
                delay,
                throttled,
            })
            .await;

            let slept = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                _ = self.sleeper.sleep(delay) => true,
            };
            if !slept {
                return self
                    .terminal(context, ApiError::Cancelled, last_info, retry, total_delay)
                    .await;
            }
            total_delay += delay;
            retry += 1;
        }
    }

    async fn terminal<T>(
        &self,
        context: &ThrottlingContext,
        error: ApiError,
        last_info: Option<RateLimitInfo>,
        retry: usize,
        total_delay: Duration,
    ) -> ThrottlingResult<T> {
        tracing::warn!(
            shop = %context.shop,
            operation = %context.operation,
            request_id = context.request_id.as_deref().unwrap_or("-"),
            retries = retry,
            total_delay_ms = total_delay.as_millis() as u64,
            kind = %error.kind(),
            error = %error,
            "throttled operation failed"
        );
        self.emit(ThrottleEvent::Failed {
            shop: context.shop.clone(),
            operation: context.operation.clone(),
            retries: retry,
            total_delay,
            kind: error.kind(),
        })
        .await;
        ThrottlingResult::failure(error, last_info, retry, total_delay)
    }

    async fn observe(&self, context: &ThrottlingContext, info: RateLimitInfo) {
        self.emit(ThrottleEvent::CostObserved {
            shop: context.shop.clone(),
            operation: context.operation.clone(),
            info,
        })
        .await;
    }

    async fn emit(&self, event: ThrottleEvent) {
        emit_best_effort(self.sink.clone(), event).await;
    }
}

/// Wait before retry `retry`, and whether remote throttle state stretched it.
fn retry_delay(
    backoff: &Backoff,
    retry: usize,
    error: &ApiError,
    config: &ThrottlingConfig,
) -> (Duration, bool) {
    let exponential = backoff.delay(retry);
    if !config.respect_remote_rate_limits {
        return (exponential, false);
    }
    let remote = error
        .rate_limit()
        .and_then(RateLimitInfo::refill_wait)
        .into_iter()
        .chain(error.retry_after())
        .max()
        .map(|wait| wait.min(MAX_BACKOFF));
    match remote {
        Some(wait) if wait > exponential => (wait, true),
        _ => (exponential, false),
    }
}
