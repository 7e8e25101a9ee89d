//! Telemetry for the throttling executor.
//!
//! The executor describes what it is doing as [`ThrottleEvent`]s and hands them to a sink. Sinks
//! are plain `tower::Service<ThrottleEvent>` implementations, so they compose with standard tower
//! combinators and can be swapped without touching the executor.
//!
//! ```rust
//! use storehook::telemetry::{MemorySink, ThrottleEvent};
//! use std::time::Duration;
//! use tower::Service;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let mut sink = MemorySink::new();
//! let event = ThrottleEvent::RetryScheduled {
//!     shop: "demo.myshopify.com".into(),
//!     operation: "product.fetch".into(),
//!     retry: 0,
//!     delay: Duration::from_millis(100),
//!     throttled: false,
//! };
//! sink.call(event.clone()).await.unwrap();
//! assert_eq!(sink.events(), vec![event]);
//! # }
//! ```

use crate::error::ErrorKind;
use crate::rate_limit::RateLimitInfo;
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

/// A telemetry sink that consumes throttle events.
pub trait TelemetrySink:
    tower::Service<ThrottleEvent, Response = (), Error = Self::SinkError> + Clone + Send + 'static
{
    /// The error type for this sink.
    type SinkError: std::error::Error + Send + 'static;
}

/// Best-effort emit helper that honors `poll_ready` and swallows errors.
///
/// Telemetry never blocks or fails a throttled call: a sink that is not ready or errors simply
/// loses the event.
pub async fn emit_best_effort<S>(sink: S, event: ThrottleEvent)
where
    S: tower::Service<ThrottleEvent, Response = ()> + Send + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    use tower::ServiceExt;

    if let Ok(mut ready_sink) = sink.ready_oneshot().await {
        if let Err(err) = ready_sink.call(event).await {
            tracing::trace!(error = %err, "telemetry sink dropped event");
        }
    }
}

/// Events emitted by the throttling executor.
#[derive(Debug, Clone, PartialEq)]
pub enum ThrottleEvent {
    /// A failed attempt will be retried after `delay`.
    RetryScheduled {
        shop: String,
        operation: String,
        /// 0-based retry index
        retry: usize,
        delay: Duration,
        /// True when the delay was stretched to honor remote throttle state.
        throttled: bool,
    },
    /// A response reported remote cost state.
    CostObserved { shop: String, operation: String, info: RateLimitInfo },
    /// The operation completed successfully.
    Succeeded { shop: String, operation: String, retries: usize, total_delay: Duration },
    /// The operation failed terminally.
    Failed {
        shop: String,
        operation: String,
        retries: usize,
        total_delay: Duration,
        kind: ErrorKind,
    },
}

impl ThrottleEvent {
    /// Short machine-readable name.
    pub fn kind(&self) -> &'static str {
        match self {
            ThrottleEvent::RetryScheduled { .. } => "retry_scheduled",
            ThrottleEvent::CostObserved { .. } => "cost_observed",
            ThrottleEvent::Succeeded { .. } => "succeeded",
            ThrottleEvent::Failed { .. } => "failed",
        }
    }

    pub fn shop(&self) -> &str {
        match self {
            ThrottleEvent::RetryScheduled { shop, .. }
            | ThrottleEvent::CostObserved { shop, .. }
            | ThrottleEvent::Succeeded { shop, .. }
            | ThrottleEvent::Failed { shop, .. } => shop,
        }
    }

    pub fn operation(&self) -> &str {
        match self {
            ThrottleEvent::RetryScheduled { operation, .. }
            | ThrottleEvent::CostObserved { operation, .. }
            | ThrottleEvent::Succeeded { operation, .. }
            | ThrottleEvent::Failed { operation, .. } => operation,
        }
    }
}

impl fmt::Display for ThrottleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThrottleEvent::RetryScheduled { shop, operation, retry, delay, throttled } => write!(
                f,
                "RetryScheduled({}/{}, #{}, delay={:?}, throttled={})",
                shop, operation, retry, delay, throttled
            ),
            ThrottleEvent::CostObserved { shop, operation, info } => write!(
                f,
                "CostObserved({}/{}, requested={}, available={}/{}, restore={}/s)",
                shop,
                operation,
                info.requested_cost,
                info.throttle_status.currently_available,
                info.throttle_status.maximum_available,
                info.throttle_status.restore_rate
            ),
            ThrottleEvent::Succeeded { shop, operation, retries, total_delay } => write!(
                f,
                "Succeeded({}/{}, retries={}, delay={:?})",
                shop, operation, retries, total_delay
            ),
            ThrottleEvent::Failed { shop, operation, retries, total_delay, kind } => write!(
                f,
                "Failed({}/{}, retries={}, delay={:?}, kind={})",
                shop, operation, retries, total_delay, kind
            ),
        }
    }
}

type SinkFuture = BoxFuture<'static, Result<(), Infallible>>;

/// A no-op telemetry sink that discards all events.
#[derive(Clone, Debug, Default)]
pub struct NullSink;

impl Service<ThrottleEvent> for NullSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _event: ThrottleEvent) -> Self::Future {
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for NullSink {
    type SinkError = Infallible;
}

/// A telemetry sink that logs events using the `tracing` crate.
#[derive(Clone, Debug, Default)]
pub struct LogSink;

impl Service<ThrottleEvent> for LogSink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: ThrottleEvent) -> Self::Future {
        tracing::info!(
            kind = event.kind(),
            shop = event.shop(),
            operation = event.operation(),
            event = %event,
            "throttle_event"
        );
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for LogSink {
    type SinkError = Infallible;
}

/// A bounded in-memory sink; oldest events are evicted once capacity is reached.
#[derive(Clone, Debug)]
pub struct MemorySink {
    events: Arc<Mutex<VecDeque<ThrottleEvent>>>,
    capacity: usize,
    evicted: Arc<AtomicU64>,
}

impl MemorySink {
    /// Default cap: 10,000 events.
    pub fn new() -> Self {
        Self::with_capacity(10_000)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::new())),
            capacity: capacity.max(1),
            evicted: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn events(&self) -> Vec<ThrottleEvent> {
        self.lock().iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of events dropped due to capacity.
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<ThrottleEvent>> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

impl Service<ThrottleEvent> for MemorySink {
    type Response = ();
    type Error = Infallible;
    type Future = SinkFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: ThrottleEvent) -> Self::Future {
        {
            let mut events = self.lock();
            if events.len() >= self.capacity {
                events.pop_front();
                self.evicted.fetch_add(1, Ordering::Relaxed);
            }
            events.push_back(event);
        }
        Box::pin(async { Ok(()) })
    }
}

impl TelemetrySink for MemorySink {
    type SinkError = Infallible;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn succeeded(retries: usize) -> ThrottleEvent {
        ThrottleEvent::Succeeded {
            shop: "a.myshopify.com".into(),
            operation: "op".into(),
            retries,
            total_delay: Duration::from_millis(300),
        }
    }

    #[tokio::test]
    async fn memory_sink_evicts_oldest() {
        let mut sink = MemorySink::with_capacity(2);
        for i in 0..3 {
            sink.call(succeeded(i)).await.unwrap();
        }
        assert_eq!(sink.len(), 2);
        assert_eq!(sink.evicted(), 1);
        assert_eq!(sink.events(), vec![succeeded(1), succeeded(2)]);
        sink.clear();
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn emit_best_effort_delivers() {
        let sink = MemorySink::new();
        emit_best_effort(sink.clone(), succeeded(0)).await;
        emit_best_effort(NullSink, succeeded(0)).await;
        emit_best_effort(LogSink, succeeded(0)).await;
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn display_and_accessors() {
        let event = ThrottleEvent::Failed {
            shop: "a.myshopify.com".into(),
            operation: "op".into(),
            retries: 3,
            total_delay: Duration::from_millis(700),
            kind: ErrorKind::ServerError,
        };
        assert_eq!(event.kind(), "failed");
        assert_eq!(event.shop(), "a.myshopify.com");
        assert_eq!(event.operation(), "op");
        let text = event.to_string();
        assert!(text.contains("retries=3"));
        assert!(text.contains("server_error"));
    }
}
