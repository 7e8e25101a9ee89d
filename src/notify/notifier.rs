//! Outbound notification delivery.
//!
//! The transport (SMTP, an email API) lives outside this crate; it only needs to implement
//! [`Notifier`]. Delivery failures are reported back as [`NotifyError`] and the caller logs them;
//! nothing here retries.

use super::{ErrorCategory, Severity};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
    pub severity: Severity,
    pub category: ErrorCategory,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotifyError {
    #[error("notification delivery failed: {0}")]
    Delivery(String),
}

/// Delivers rendered notifications.
#[async_trait]
pub trait Notifier: Send + Sync + std::fmt::Debug {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Writes notifications to the log instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            subject = %notification.subject,
            recipients = notification.recipients.len(),
            severity = %notification.severity,
            category = %notification.category,
            "error notification"
        );
        Ok(())
    }
}

/// Records notifications in memory; can be switched to fail every delivery.
#[derive(Debug, Default, Clone)]
pub struct MemoryNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    failing: Arc<AtomicBool>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// A notifier whose every delivery fails.
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.set_failing(true);
        notifier
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[async_trait]
impl Notifier for MemoryNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Delivery("transport unavailable".into()));
        }
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).push(notification.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notification() -> Notification {
        Notification {
            subject: "s".into(),
            body: "b".into(),
            recipients: vec!["ops@example.com".into()],
            severity: Severity::High,
            category: ErrorCategory::Webhook,
        }
    }

    #[tokio::test]
    async fn memory_notifier_records_and_fails_on_demand() {
        let notifier = MemoryNotifier::new();
        notifier.send(&notification()).await.unwrap();
        assert_eq!(notifier.sent().len(), 1);

        notifier.set_failing(true);
        assert!(notifier.send(&notification()).await.is_err());
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        assert!(LogNotifier.send(&notification()).await.is_ok());
    }
}
