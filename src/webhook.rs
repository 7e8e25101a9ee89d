//! Webhook ingestion: verify, dispatch by topic family, acknowledge.
//!
//! Topics have the form `entity/action` (`products/create`, `app/uninstalled`). The
//! [`HandlerRegistry`] maps the `entity` prefix to one [`WebhookHandler`]; it is built once at
//! startup and handed to the [`WebhookProcessor`].
//!
//! The processor always answers with a [`WebhookResponse`]. Receipt and enrichment are reported
//! separately: a handler that accepted the event but could not fetch extra data answers with
//! `success: true, synchronized: false`.

pub mod handlers;
pub mod verify;

pub use handlers::{AppHandler, CustomersHandler, OrdersHandler, ProductsHandler};
pub use verify::{sign, verify_signature};

use crate::error::ApiError;
use crate::notify::{ErrorContext, ErrorHandler};
use crate::token_store::TokenStoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One inbound webhook delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub topic: String,
    pub shop: String,
    pub payload: Value,
    /// Delivery id from the platform, if it sent one.
    #[serde(default)]
    pub webhook_id: Option<String>,
}

impl WebhookEvent {
    pub fn new(topic: impl Into<String>, shop: impl Into<String>, payload: Value) -> Self {
        Self { topic: topic.into(), shop: shop.into(), payload, webhook_id: None }
    }

    pub fn with_webhook_id(mut self, id: impl Into<String>) -> Self {
        self.webhook_id = Some(id.into());
        self
    }

    /// `(entity, action)`, or `None` when the topic is not `entity/action`.
    pub fn split_topic(&self) -> Option<(&str, &str)> {
        match self.topic.split_once('/') {
            Some((entity, action)) if !entity.is_empty() && !action.is_empty() => {
                Some((entity, action))
            }
            _ => None,
        }
    }

    pub fn action(&self) -> &str {
        self.split_topic().map(|(_, action)| action).unwrap_or("")
    }

    /// Numeric or string `id` field of the payload, rendered as text.
    pub fn resource_id(&self) -> Option<String> {
        id_value(self.payload.get("id")?)
    }
}

/// A numeric or non-empty string id, rendered without quotes.
pub(crate) fn id_value(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => Some(n.to_string()),
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

/// Acknowledgement returned for every delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub success: bool,
    pub topic: String,
    pub shop: String,
    /// True when the handler also finished all downstream synchronization.
    pub synchronized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WebhookResponse {
    fn accepted(event: &WebhookEvent, outcome: HandlerOutcome) -> Self {
        Self {
            success: true,
            topic: event.topic.clone(),
            shop: event.shop.clone(),
            synchronized: outcome.synchronized,
            message: outcome.message,
            error: None,
        }
    }

    fn rejected(topic: &str, shop: &str, error: &WebhookError) -> Self {
        Self {
            success: false,
            topic: topic.to_string(),
            shop: shop.to_string(),
            synchronized: false,
            message: None,
            error: Some(error.to_string()),
        }
    }
}

/// What a handler reports for an accepted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOutcome {
    pub synchronized: bool,
    pub message: Option<String>,
}

impl HandlerOutcome {
    pub fn synchronized(message: impl Into<String>) -> Self {
        Self { synchronized: true, message: Some(message.into()) }
    }

    pub fn unsynchronized(message: impl Into<String>) -> Self {
        Self { synchronized: false, message: Some(message.into()) }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WebhookError {
    #[error("malformed webhook topic {0:?}")]
    MalformedTopic(String),
    #[error("no handler registered for topic {0:?}")]
    UnknownTopic(String),
    #[error("webhook signature missing or invalid")]
    InvalidSignature,
    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    TokenStore(#[from] TokenStoreError),
}

/// Handles every topic of one entity family.
#[async_trait]
pub trait WebhookHandler: Send + Sync + std::fmt::Debug {
    async fn handle(&self, event: &WebhookEvent) -> Result<HandlerOutcome, WebhookError>;
}

/// Topic prefix to handler.
#[derive(Debug, Clone, Default)]
pub struct HandlerRegistry {
    handlers: BTreeMap<String, Arc<dyn WebhookHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `prefix`, replacing any earlier one.
    pub fn register<H>(mut self, prefix: impl Into<String>, handler: H) -> Self
    where
        H: WebhookHandler + 'static,
    {
        self.handlers.insert(prefix.into(), Arc::new(handler));
        self
    }

    pub fn get(&self, prefix: &str) -> Option<&Arc<dyn WebhookHandler>> {
        self.handlers.get(prefix)
    }

    pub fn prefixes(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

/// Verifies, dispatches and acknowledges webhook deliveries.
#[derive(Debug, Clone)]
pub struct WebhookProcessor {
    registry: HandlerRegistry,
    errors: Arc<ErrorHandler>,
    secret: Option<String>,
}

impl WebhookProcessor {
    pub fn new(registry: HandlerRegistry, errors: Arc<ErrorHandler>) -> Self {
        Self { registry, errors, secret: None }
    }

    /// Require a valid HMAC on [`ingest`](Self::ingest).
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Dispatch an already verified event.
    pub async fn process(&self, event: &WebhookEvent) -> WebhookResponse {
        let handler = match event.split_topic() {
            None => Err(WebhookError::MalformedTopic(event.topic.clone())),
            Some((prefix, _)) => self
                .registry
                .get(prefix)
                .ok_or_else(|| WebhookError::UnknownTopic(event.topic.clone())),
        };
        let handler = match handler {
            Ok(handler) => handler,
            Err(err) => {
                tracing::warn!(topic = %event.topic, shop = %event.shop, error = %err, "webhook not dispatched");
                return WebhookResponse::rejected(&event.topic, &event.shop, &err);
            }
        };

        match handler.handle(event).await {
            Ok(outcome) => {
                tracing::info!(
                    topic = %event.topic,
                    shop = %event.shop,
                    synchronized = outcome.synchronized,
                    "webhook processed"
                );
                WebhookResponse::accepted(event, outcome)
            }
            Err(err) => {
                self.errors
                    .handle_webhook_error(&err, &event.topic, &event.shop, self.context(event))
                    .await;
                WebhookResponse::rejected(&event.topic, &event.shop, &err)
            }
        }
    }

    /// Verify and decode a raw delivery, then [`process`](Self::process) it.
    pub async fn ingest(
        &self,
        topic: &str,
        shop: &str,
        body: &[u8],
        hmac_header: Option<&str>,
    ) -> WebhookResponse {
        if let Some(secret) = &self.secret {
            let valid = hmac_header.is_some_and(|h| verify_signature(secret, body, h));
            if !valid {
                let err = WebhookError::InvalidSignature;
                let context = ErrorContext::new().with_webhook_topic(topic).with_shop(shop);
                self.errors.handle(&err, None, None, context).await;
                return WebhookResponse::rejected(topic, shop, &err);
            }
        }

        let payload: Value = match serde_json::from_slice(body) {
            Ok(payload) => payload,
            Err(e) => {
                let err = WebhookError::InvalidPayload(e.to_string());
                self.errors.handle_webhook_error(&err, topic, shop, ErrorContext::new()).await;
                return WebhookResponse::rejected(topic, shop, &err);
            }
        };
        self.process(&WebhookEvent::new(topic, shop, payload)).await
    }

    fn context(&self, event: &WebhookEvent) -> ErrorContext {
        let mut context = ErrorContext::new().with_operation("webhook.process");
        if let Some(id) = &event.webhook_id {
            context = context.with_request_id(id.clone());
        }
        if let Some(id) = event.resource_id() {
            context = context.with_additional("resource_id", id);
        }
        context
    }
}
