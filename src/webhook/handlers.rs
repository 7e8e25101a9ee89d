//! One handler per webhook entity family.
//!
//! Business persistence is out of scope; handlers validate the payload, log what arrived and,
//! for products, optionally pull the current record through the admin API.

use super::{id_value, HandlerOutcome, HandlerRegistry, WebhookError, WebhookEvent, WebhookHandler};
use crate::config::ThrottlingOverrides;
use crate::executor::ThrottlingContext;
use crate::graphql::{AdminApi, GraphqlRequest};
use crate::notify::{ErrorContext, ErrorHandler};
use crate::telemetry::{NullSink, ThrottleEvent};
use crate::token_store::TokenStore;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

const PRODUCT_QUERY: &str = "query product($id: ID!) { \
    product(id: $id) { id title handle status updatedAt totalInventory } }";

/// Registry with the four built-in families.
pub fn default_registry<S>(
    tokens: Arc<dyn TokenStore>,
    products: ProductsHandler<S>,
) -> HandlerRegistry
where
    S: tower::Service<ThrottleEvent, Response = ()> + Send + Sync + Clone + std::fmt::Debug + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    HandlerRegistry::new()
        .register("products", products)
        .register("orders", OrdersHandler)
        .register("customers", CustomersHandler)
        .register("app", AppHandler::new(tokens))
}

fn require_object(event: &WebhookEvent) -> Result<&serde_json::Map<String, Value>, WebhookError> {
    event
        .payload
        .as_object()
        .ok_or_else(|| WebhookError::InvalidPayload(format!("{} payload is not an object", event.topic)))
}

fn require_id(event: &WebhookEvent) -> Result<String, WebhookError> {
    require_object(event)?;
    event
        .resource_id()
        .ok_or_else(|| WebhookError::InvalidPayload(format!("{} payload has no id", event.topic)))
}

/// `products/*`. With an [`AdminApi`] attached, create/update events are enriched.
#[derive(Debug, Clone)]
pub struct ProductsHandler<S = NullSink> {
    api: Option<Arc<AdminApi<S>>>,
    errors: Option<Arc<ErrorHandler>>,
    overrides: ThrottlingOverrides,
}

impl ProductsHandler<NullSink> {
    /// Log-only handler.
    pub fn new() -> Self {
        Self { api: None, errors: None, overrides: ThrottlingOverrides::default() }
    }
}

impl Default for ProductsHandler<NullSink> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> ProductsHandler<S> {
    pub fn with_api(api: Arc<AdminApi<S>>) -> Self {
        Self { api: Some(api), errors: None, overrides: ThrottlingOverrides::default() }
    }

    /// Report enrichment failures here; they never fail the webhook itself.
    pub fn with_error_handler(mut self, errors: Arc<ErrorHandler>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn with_overrides(mut self, overrides: ThrottlingOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

impl<S> ProductsHandler<S>
where
    S: tower::Service<ThrottleEvent, Response = ()> + Send + Sync + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    async fn enrich(&self, api: &AdminApi<S>, event: &WebhookEvent, gid: &str) -> HandlerOutcome {
        let operation = format!("webhook.{}", event.topic);
        let context = ThrottlingContext::new(&event.shop, &operation)
            .with_metadata("webhook_topic", event.topic.clone());
        let context = match &event.webhook_id {
            Some(id) => context.with_request_id(id.clone()),
            None => context.with_generated_request_id(),
        };
        let request = GraphqlRequest::new(PRODUCT_QUERY).with_variables(json!({ "id": gid }));

        let result = api.query(&event.shop, &request, &context, &self.overrides).await;
        let retries = result.retry_count;
        match result.into_result() {
            Ok(response) => {
                let product = response.data.as_ref().and_then(|d| d.get("product")).filter(|p| !p.is_null());
                match product {
                    Some(product) => {
                        let title = product.get("title").and_then(Value::as_str).unwrap_or("");
                        tracing::info!(shop = %event.shop, product = gid, retries, "product synchronized");
                        HandlerOutcome::synchronized(format!("product {} synchronized: {}", gid, title))
                    }
                    None => HandlerOutcome::unsynchronized(format!("product {} not found", gid)),
                }
            }
            Err(err) => {
                tracing::warn!(shop = %event.shop, product = gid, error = %err, "product enrichment failed");
                if let Some(errors) = &self.errors {
                    let context = ErrorContext::new()
                        .with_webhook_topic(event.topic.clone())
                        .with_request_id(context.request_id.clone().unwrap_or_default());
                    errors.handle_graphql_error(&err, &event.shop, &operation, context).await;
                }
                HandlerOutcome::unsynchronized(format!("enrichment failed: {}", err))
            }
        }
    }
}

#[async_trait]
impl<S> WebhookHandler for ProductsHandler<S>
where
    S: tower::Service<ThrottleEvent, Response = ()> + Send + Sync + Clone + std::fmt::Debug + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    async fn handle(&self, event: &WebhookEvent) -> Result<HandlerOutcome, WebhookError> {
        let id = require_id(event)?;
        tracing::info!(shop = %event.shop, topic = %event.topic, product_id = %id, "product webhook");

        if event.action() == "delete" {
            return Ok(HandlerOutcome::synchronized(format!("product {} deleted", id)));
        }
        let gid = event.payload.get("admin_graphql_api_id").and_then(Value::as_str);
        match (&self.api, gid) {
            (Some(api), Some(gid)) => Ok(self.enrich(api, event, gid).await),
            _ => Ok(HandlerOutcome::synchronized(format!("product {} received", id))),
        }
    }
}

/// `orders/*`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrdersHandler;

#[async_trait]
impl WebhookHandler for OrdersHandler {
    async fn handle(&self, event: &WebhookEvent) -> Result<HandlerOutcome, WebhookError> {
        let id = require_id(event)?;
        let name = event.payload.get("name").and_then(Value::as_str).unwrap_or("-");
        let financial = event.payload.get("financial_status").and_then(Value::as_str).unwrap_or("-");
        tracing::info!(
            shop = %event.shop,
            topic = %event.topic,
            order_id = %id,
            order = name,
            financial_status = financial,
            "order webhook"
        );
        Ok(HandlerOutcome::synchronized(format!("order {} {}", id, event.action())))
    }
}

/// `customers/*`, including the privacy topics (`customers/redact`,
/// `customers/data_request`), which identify the customer in a nested object.
#[derive(Debug, Clone, Copy, Default)]
pub struct CustomersHandler;

#[async_trait]
impl WebhookHandler for CustomersHandler {
    async fn handle(&self, event: &WebhookEvent) -> Result<HandlerOutcome, WebhookError> {
        let payload = require_object(event)?;
        let id = match event.action() {
            "redact" | "data_request" => {
                payload.get("customer").and_then(|c| c.get("id")).and_then(id_value)
            }
            _ => event.resource_id(),
        };
        let id = id.ok_or_else(|| {
            WebhookError::InvalidPayload(format!("{} payload has no customer id", event.topic))
        })?;
        tracing::info!(shop = %event.shop, topic = %event.topic, customer_id = %id, "customer webhook");
        Ok(HandlerOutcome::synchronized(format!("customer {} {}", id, event.action())))
    }
}

/// `app/*`. `app/uninstalled` drops the shop's stored token.
#[derive(Debug, Clone)]
pub struct AppHandler {
    tokens: Arc<dyn TokenStore>,
}

impl AppHandler {
    pub fn new(tokens: Arc<dyn TokenStore>) -> Self {
        Self { tokens }
    }
}

#[async_trait]
impl WebhookHandler for AppHandler {
    async fn handle(&self, event: &WebhookEvent) -> Result<HandlerOutcome, WebhookError> {
        match event.action() {
            "uninstalled" => {
                let removed = self.tokens.remove_token(&event.shop).await?;
                tracing::info!(shop = %event.shop, removed, "app uninstalled");
                let message = if removed { "access token removed" } else { "no access token stored" };
                Ok(HandlerOutcome::synchronized(message))
            }
            action => {
                tracing::info!(shop = %event.shop, action, "app webhook");
                Ok(HandlerOutcome::synchronized(format!("app {}", action)))
            }
        }
    }
}
