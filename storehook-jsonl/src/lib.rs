//! JSONL sink for `storehook` throttling events. Writes one event per line.
//! Always appends; bring your own path.

use serde_json::json;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};
use storehook::telemetry::{TelemetrySink, ThrottleEvent};

#[derive(Clone, Debug)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

impl tower_service::Service<ThrottleEvent> for JsonlSink {
    type Response = ();
    type Error = io::Error;
    type Future = Pin<Box<dyn std::future::Future<Output = Result<(), Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, event: ThrottleEvent) -> Self::Future {
        let path = self.path.clone();
        let line = event_to_json(&event).to_string() + "\n";
        Box::pin(async move {
            use tokio::io::AsyncWriteExt;
            let mut file =
                tokio::fs::OpenOptions::new().create(true).append(true).open(&path).await?;
            file.write_all(line.as_bytes()).await?;
            file.flush().await?;
            tracing::trace!(path = %path.display(), "throttle event appended");
            Ok(())
        })
    }
}

impl TelemetrySink for JsonlSink {
    type SinkError = io::Error;
}

/// Flat JSON object for one event; `kind` is always present.
pub fn event_to_json(event: &ThrottleEvent) -> serde_json::Value {
    match event {
        ThrottleEvent::RetryScheduled { shop, operation, retry, delay, throttled } => json!({
            "kind": event.kind(),
            "shop": shop,
            "operation": operation,
            "retry": retry,
            "delay_ms": delay.as_millis() as u64,
            "throttled": throttled,
        }),
        ThrottleEvent::CostObserved { shop, operation, info } => json!({
            "kind": event.kind(),
            "shop": shop,
            "operation": operation,
            "requested_cost": info.requested_cost,
            "actual_cost": info.actual_cost,
            "currently_available": info.throttle_status.currently_available,
            "maximum_available": info.throttle_status.maximum_available,
            "restore_rate": info.throttle_status.restore_rate,
        }),
        ThrottleEvent::Succeeded { shop, operation, retries, total_delay } => json!({
            "kind": event.kind(),
            "shop": shop,
            "operation": operation,
            "retries": retries,
            "total_delay_ms": total_delay.as_millis() as u64,
        }),
        ThrottleEvent::Failed { shop, operation, retries, total_delay, kind } => json!({
            "kind": event.kind(),
            "shop": shop,
            "operation": operation,
            "retries": retries,
            "total_delay_ms": total_delay.as_millis() as u64,
            "error_kind": kind.to_string(),
        }),
    }
}
