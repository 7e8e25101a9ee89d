//! Admin GraphQL client.
//!
//! [`GraphqlClient`] performs exactly one HTTP attempt and maps everything that can go wrong onto
//! [`ApiError`], so the throttling executor can decide what to do next. [`AdminApi`] puts the
//! token lookup, the client and the executor together for callers that just want data.

use crate::config::{ApiConfig, ThrottlingOverrides};
use crate::error::ApiError;
use crate::executor::{ThrottlingContext, ThrottlingExecutor, ThrottlingResult};
use crate::rate_limit::{RateLimitInfo, RateLimitSource};
use crate::telemetry::{NullSink, ThrottleEvent};
use crate::token_store::{AccessToken, TokenStore};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

/// Error code the platform uses for cost-limited requests.
const THROTTLED_CODE: &str = "THROTTLED";

/// Longest response body excerpt kept on an HTTP error.
const MAX_ERROR_BODY: usize = 512;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphqlRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
}

impl GraphqlRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), variables: None }
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GraphqlError {
    pub message: String,
    #[serde(default)]
    pub extensions: Option<Value>,
}

impl GraphqlError {
    pub fn code(&self) -> Option<&str> {
        self.extensions.as_ref()?.get("code")?.as_str()
    }
}

/// A decoded GraphQL response. May carry partial data alongside errors.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct GraphqlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
    #[serde(default)]
    pub extensions: Option<Value>,
    /// Cost state from the body extensions, else from the response headers.
    #[serde(skip)]
    pub rate_limit: Option<RateLimitInfo>,
}

impl RateLimitSource for GraphqlResponse {
    fn rate_limit_info(&self) -> Option<RateLimitInfo> {
        self.rate_limit
    }
}

/// Single-attempt HTTP client for the admin GraphQL endpoint.
#[derive(Debug, Clone)]
pub struct GraphqlClient {
    http: reqwest::Client,
    config: ApiConfig,
}

impl GraphqlClient {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ApiError::Other(format!("failed to build http client: {}", e)))?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// `https://{shop}/admin/api/{version}/graphql.json`, or the configured base URL instead
    /// of `https://{shop}`.
    pub fn endpoint(&self, shop: &str) -> String {
        let base = match &self.config.base_url {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("https://{}", shop),
        };
        format!("{}/admin/api/{}/graphql.json", base, self.config.api_version)
    }

    /// One POST; no retries.
    pub async fn execute(
        &self,
        shop: &str,
        token: &AccessToken,
        request: &GraphqlRequest,
    ) -> Result<GraphqlResponse, ApiError> {
        let response = self
            .http
            .post(self.endpoint(shop))
            .header(ACCESS_TOKEN_HEADER, &token.access_token)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let headers = response.headers().clone();
        let header_info = RateLimitInfo::from_headers(&headers);
        let body = response.text().await.map_err(transport_error)?;

        if !status.is_success() {
            return Err(ApiError::Http {
                status: status.as_u16(),
                message: excerpt(&body),
                rate_limit: header_info,
                retry_after: retry_after(&headers),
            });
        }

        let mut decoded: GraphqlResponse = serde_json::from_str(&body)
            .map_err(|e| ApiError::Other(format!("invalid graphql response: {}", e)))?;
        decoded.rate_limit =
            decoded.extensions.as_ref().and_then(RateLimitInfo::from_extensions).or(header_info);

        if decoded.errors.iter().any(|e| e.code() == Some(THROTTLED_CODE)) {
            return Err(ApiError::Throttled { rate_limit: decoded.rate_limit });
        }
        let has_data = matches!(&decoded.data, Some(data) if !data.is_null());
        if !decoded.errors.is_empty() && !has_data {
            return Err(ApiError::graphql(decoded.errors.iter().map(|e| e.message.clone())));
        }
        if !decoded.errors.is_empty() {
            tracing::debug!(shop, errors = decoded.errors.len(), "graphql response carried partial errors");
        }
        Ok(decoded)
    }
}

fn transport_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() {
        ApiError::timeout(err.to_string())
    } else {
        ApiError::network(err.to_string())
    }
}

/// `Retry-After` in delta-seconds. HTTP-date values are ignored.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs = headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse::<f64>().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs.min(crate::backoff::MAX_BACKOFF.as_secs_f64())))
    } else {
        None
    }
}

fn excerpt(body: &str) -> String {
    if body.len() <= MAX_ERROR_BODY {
        return body.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// Token lookup + single-attempt client + throttling executor.
#[derive(Debug, Clone)]
pub struct AdminApi<S = NullSink> {
    client: GraphqlClient,
    tokens: Arc<dyn TokenStore>,
    executor: ThrottlingExecutor<S>,
}

impl<S> AdminApi<S> {
    pub fn new(
        client: GraphqlClient,
        tokens: Arc<dyn TokenStore>,
        executor: ThrottlingExecutor<S>,
    ) -> Self {
        Self { client, tokens, executor }
    }

    pub fn client(&self) -> &GraphqlClient {
        &self.client
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    pub fn executor(&self) -> &ThrottlingExecutor<S> {
        &self.executor
    }
}

impl<S> AdminApi<S>
where
    S: tower::Service<ThrottleEvent, Response = ()> + Send + Sync + Clone + 'static,
    S::Error: std::error::Error + Send + 'static,
    S::Future: Send + 'static,
{
    /// Run `request` against `shop` under the throttling loop.
    ///
    /// A shop without a stored token fails with [`ApiError::Authentication`] before any attempt.
    pub async fn query(
        &self,
        shop: &str,
        request: &GraphqlRequest,
        context: &ThrottlingContext,
        overrides: &ThrottlingOverrides,
    ) -> ThrottlingResult<GraphqlResponse> {
        let token = match self.tokens.get_token(shop).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                tracing::warn!(shop, operation = %context.operation, "no access token stored for shop");
                return ThrottlingResult::failure(
                    ApiError::Authentication(format!("no access token for {}", shop)),
                    None,
                    0,
                    Duration::ZERO,
                );
            }
            Err(err) => {
                return ThrottlingResult::failure(
                    ApiError::Other(format!("token lookup failed: {}", err)),
                    None,
                    0,
                    Duration::ZERO,
                );
            }
        };

        let client = &self.client;
        let token = &token;
        self.executor.execute(move || client.execute(shop, token, request), context, overrides).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThrottlingConfig;
    use crate::sleeper::InstantSleeper;
    use crate::token_store::InMemoryTokenStore;
    use serde_json::json;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SHOP: &str = "demo.myshopify.com";
    const PATH: &str = "/admin/api/2024-10/graphql.json";

    fn client(server: &MockServer) -> GraphqlClient {
        GraphqlClient::new(ApiConfig { base_url: Some(server.uri()), ..Default::default() }).unwrap()
    }

    fn cost(available: f64) -> Value {
        json!({
            "cost": {
                "requestedQueryCost": 100,
                "actualQueryCost": 12,
                "throttleStatus": {
                    "maximumAvailable": 1000.0,
                    "currentlyAvailable": available,
                    "restoreRate": 50.0
                }
            }
        })
    }

    #[test]
    fn endpoint_uses_shop_domain_by_default() {
        let client = GraphqlClient::new(ApiConfig::default()).unwrap();
        assert_eq!(
            client.endpoint(SHOP),
            "https://demo.myshopify.com/admin/api/2024-10/graphql.json"
        );
    }

    #[tokio::test]
    async fn success_decodes_data_and_cost() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(PATH))
            .and(header(ACCESS_TOKEN_HEADER, "shpat_1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"shop": {"name": "Demo"}},
                "extensions": cost(900.0)
            })))
            .expect(1)
            .mount(&server)
            .await;

        let response = client(&server)
            .execute(SHOP, &AccessToken::new("shpat_1"), &GraphqlRequest::new("{ shop { name } }"))
            .await
            .unwrap();
        assert_eq!(response.data.unwrap()["shop"]["name"], "Demo");
        let info = response.rate_limit.unwrap();
        assert_eq!(info.actual_cost, 12.0);
        assert_eq!(info.throttle_status.currently_available, 900.0);
    }

    #[tokio::test]
    async fn http_429_carries_retry_after_and_header_cost() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(PATH))
            .respond_with(
                ResponseTemplate::new(429)
                    .insert_header("Retry-After", "2")
                    .insert_header("x-graphql-cost-requested", "100")
                    .insert_header("x-graphql-cost-actual", "0")
                    .insert_header("x-graphql-throttle-maximum", "1000")
                    .insert_header("x-graphql-throttle-available", "0")
                    .insert_header("x-graphql-throttle-restore-rate", "50")
                    .set_body_string("Exceeded 2 calls per second"),
            )
            .mount(&server)
            .await;

        let err = client(&server)
            .execute(SHOP, &AccessToken::new("t"), &GraphqlRequest::new("{ shop { name } }"))
            .await
            .unwrap_err();
        assert_eq!(err.status(), Some(429));
        assert_eq!(err.retry_after(), Some(Duration::from_secs(2)));
        let info = err.rate_limit().unwrap();
        assert!(info.is_budget_insufficient());
    }

    #[tokio::test]
    async fn throttled_code_maps_to_throttled() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "errors": [{"message": "Throttled", "extensions": {"code": "THROTTLED"}}],
                "extensions": cost(0.0)
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .execute(SHOP, &AccessToken::new("t"), &GraphqlRequest::new("{ shop { name } }"))
            .await
            .unwrap_err();
        match err {
            ApiError::Throttled { rate_limit: Some(info) } => {
                assert_eq!(info.refill_wait(), Some(Duration::from_secs(2)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn errors_without_data_are_validation_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": null,
                "errors": [{"message": "Field 'nope' doesn't exist on type 'Shop'"}]
            })))
            .mount(&server)
            .await;

        let err = client(&server)
            .execute(SHOP, &AccessToken::new("t"), &GraphqlRequest::new("{ shop { nope } }"))
            .await
            .unwrap_err();
        assert_eq!(err, ApiError::graphql(["Field 'nope' doesn't exist on type 'Shop'"]));
    }

    #[tokio::test]
    async fn partial_data_is_kept() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"product": null},
                "errors": [{"message": "access denied", "extensions": {"code": "ACCESS_DENIED"}}]
            })))
            .mount(&server)
            .await;

        let response = client(&server)
            .execute(SHOP, &AccessToken::new("t"), &GraphqlRequest::new("{ product { id } }"))
            .await
            .unwrap();
        assert_eq!(response.errors[0].code(), Some("ACCESS_DENIED"));
        assert!(response.rate_limit.is_none());
    }

    #[tokio::test]
    async fn slow_response_is_a_network_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(PATH))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = GraphqlClient::new(ApiConfig {
            base_url: Some(server.uri()),
            request_timeout_ms: 50,
            ..Default::default()
        })
        .unwrap();
        let err = client
            .execute(SHOP, &AccessToken::new("t"), &GraphqlRequest::new("{ shop { name } }"))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Network { timed_out: true, .. }), "{:?}", err);
    }

    fn admin(server: &MockServer, tokens: InMemoryTokenStore) -> AdminApi {
        let config = ThrottlingConfig { jitter: false, ..Default::default() };
        AdminApi::new(
            client(server),
            Arc::new(tokens),
            ThrottlingExecutor::new(config).with_sleeper(InstantSleeper),
        )
    }

    #[tokio::test]
    async fn missing_token_fails_without_a_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST")).respond_with(ResponseTemplate::new(200)).expect(0).mount(&server).await;

        let api = admin(&server, InMemoryTokenStore::new());
        let result = api
            .query(
                SHOP,
                &GraphqlRequest::new("{ shop { name } }"),
                &ThrottlingContext::new(SHOP, "shop.fetch"),
                &ThrottlingOverrides::default(),
            )
            .await;
        assert!(matches!(result.error(), Some(ApiError::Authentication(_))));
        assert_eq!(result.retry_count, 0);
    }

    #[tokio::test]
    async fn admin_api_retries_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(PATH))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"data": {"shop": {"name": "Demo"}}})),
            )
            .mount(&server)
            .await;

        let tokens = InMemoryTokenStore::new();
        tokens.store_token(SHOP, AccessToken::new("t")).await.unwrap();
        let api = admin(&server, tokens);
        let result = api
            .query(
                SHOP,
                &GraphqlRequest::new("{ shop { name } }"),
                &ThrottlingContext::new(SHOP, "shop.fetch"),
                &ThrottlingOverrides::default(),
            )
            .await;
        assert!(result.is_success(), "{:?}", result.error());
        assert_eq!(result.retry_count, 1);
        assert_eq!(result.total_delay, Duration::from_millis(1000));
    }
}
