//! REST API Handlers
//!
//! Implements the REST API endpoints for provider dispatch, fan-out search,
//! batches, cache management, health and metrics.

use crate::controlplane::api::exposition::render_prometheus;
use crate::controlplane::orchestrator::{BatchResult, Dispatched, Orchestrator};
use crate::domain::ports::{Operation, SearchQuery};
use crate::error::{ErrorKind, OperationError, UNKNOWN_PROVIDER_CODE};
use axum::{
    extract::{Json, Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

// =============================================================================
// Request/Response Types
// =============================================================================

/// Search query parameters
#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub offset: Option<u32>,
    /// Comma separated provider ids (fan-out only)
    #[serde(default)]
    pub providers: Option<String>,
}

impl SearchParams {
    fn to_operation(&self) -> Operation {
        let mut query = SearchQuery::new(self.q.clone());
        if let Some(limit) = self.limit {
            query = query.with_limit(limit);
        }
        if let Some(offset) = self.offset {
            query = query.with_offset(offset);
        }
        Operation::Search(query)
    }

    fn provider_ids(&self) -> Option<Vec<String>> {
        self.providers.as_ref().map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect()
        })
    }
}

/// Item query parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemParams {
    #[serde(default)]
    pub quality: Option<String>,
}

/// Batch request body
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchRequest {
    pub operations: Vec<Operation>,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

/// Cache clear parameters
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClearCacheParams {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub pattern: Option<String>,
}

/// Provider listing response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvidersResponse {
    pub providers: Vec<String>,
}

/// Outcome of one call inside a fan-out or batch
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallOutcome {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Dispatched>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ApiErrorResponse>,
}

impl From<Result<Dispatched, OperationError>> for CallOutcome {
    fn from(result: Result<Dispatched, OperationError>) -> Self {
        match result {
            Ok(data) => Self {
                ok: true,
                data: Some(data),
                error: None,
            },
            Err(e) => Self {
                ok: false,
                data: None,
                error: Some(ApiErrorResponse::from(&e)),
            },
        }
    }
}

/// Fan-out search response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FanOutResponse {
    pub results: BTreeMap<String, CallOutcome>,
}

/// Batch response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    pub provider_id: String,
    pub results: Vec<CallOutcome>,
    pub succeeded: usize,
    pub failed: usize,
    pub total: usize,
    pub duration_ms: u64,
}

impl From<BatchResult> for BatchResponse {
    fn from(batch: BatchResult) -> Self {
        Self {
            provider_id: batch.provider_id,
            results: batch.results.into_iter().map(CallOutcome::from).collect(),
            succeeded: batch.succeeded,
            failed: batch.failed,
            total: batch.total,
            duration_ms: batch.duration_ms,
        }
    }
}

/// Cache clear response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearCacheResponse {
    pub removed: usize,
}

/// API error response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    /// Upstream status, when the upstream answered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_status: Option<u16>,
    pub retryable: bool,
}

impl From<&OperationError> for ApiErrorResponse {
    fn from(e: &OperationError) -> Self {
        Self {
            error: e.kind.as_str().to_string(),
            message: e.message.clone(),
            provider_id: e.provider_id.clone(),
            upstream_status: e.status,
            retryable: e.retryable,
        }
    }
}

/// HTTP status for an operation failure
pub fn status_for(e: &OperationError) -> StatusCode {
    match e.kind {
        ErrorKind::Configuration if e.code.as_deref() == Some(UNKNOWN_PROVIDER_CODE) => {
            StatusCode::NOT_FOUND
        }
        ErrorKind::Configuration => StatusCode::BAD_REQUEST,
        ErrorKind::Closed => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::ExhaustedRetries => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::TransientNetwork
        | ErrorKind::UpstreamServer
        | ErrorKind::UpstreamClient
        | ErrorKind::Protocol => StatusCode::BAD_GATEWAY,
    }
}

/// Operation failure rendered as an HTTP response
#[derive(Debug)]
pub struct ApiError(pub OperationError);

impl From<OperationError> for ApiError {
    fn from(e: OperationError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            error!(error = %self.0, provider = ?self.0.provider_id, "Request failed");
        } else {
            debug!(error = %self.0, "Request rejected");
        }
        (status, Json(ApiErrorResponse::from(&self.0))).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

// =============================================================================
// REST Router
// =============================================================================

/// REST API router builder
pub struct RestRouter {
    orchestrator: Arc<Orchestrator>,
}

impl RestRouter {
    /// Create a new REST router
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Build the Axum router
    pub fn build(self) -> Router {
        let state = AppState {
            orchestrator: self.orchestrator,
        };

        Router::new()
            // Provider endpoints
            .route("/v1/providers", get(list_providers))
            .route("/v1/providers/:id/search", get(search))
            .route("/v1/providers/:id/items/:item_id", get(fetch_item))
            .route("/v1/providers/:id/items/:item_id/auxiliary", get(fetch_auxiliary))
            .route("/v1/providers/:id/batch", post(batch))
            .route("/v1/providers/:id/warmup", post(warmup))
            // Fan-out
            .route("/v1/search", get(search_all))
            // Cache
            .route("/v1/cache", delete(clear_cache))
            // Health & metrics
            .route("/v1/health", get(get_health))
            .route("/v1/health/check", post(check_health))
            .route("/v1/metrics", get(get_metrics))
            .route("/metrics", get(prometheus_metrics))
            .route("/health", get(health_check))
            .route("/ready", get(readiness_check))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    orchestrator: Arc<Orchestrator>,
}

// =============================================================================
// Handlers
// =============================================================================

/// List provider ids
async fn list_providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        providers: state.orchestrator.provider_ids(),
    })
}

/// Search one provider
async fn search(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Dispatched> {
    let operation = params.to_operation();
    Ok(Json(state.orchestrator.dispatch(&id, &operation).await?))
}

/// Fetch one item
async fn fetch_item(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(String, String)>,
    Query(params): Query<ItemParams>,
) -> ApiResult<Dispatched> {
    let operation = Operation::fetch_item(item_id, params.quality);
    Ok(Json(state.orchestrator.dispatch(&id, &operation).await?))
}

/// Fetch auxiliary data for one item
async fn fetch_auxiliary(
    State(state): State<AppState>,
    Path((id, item_id)): Path<(String, String)>,
) -> ApiResult<Dispatched> {
    let operation = Operation::fetch_auxiliary(item_id);
    Ok(Json(state.orchestrator.dispatch(&id, &operation).await?))
}

/// Run a batch against one provider
async fn batch(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<BatchRequest>,
) -> ApiResult<BatchResponse> {
    info!(provider = %id, operations = request.operations.len(), "Batch requested");
    let result = state
        .orchestrator
        .batch(&id, request.operations, request.max_concurrency)
        .await?;
    Ok(Json(result.into()))
}

/// Prefetch operations into one provider's cache
async fn warmup(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<BatchRequest>,
) -> ApiResult<BatchResponse> {
    let result = state.orchestrator.warmup_cache(&id, request.operations).await?;
    Ok(Json(result.into()))
}

/// Search every provider (or the listed ones)
async fn search_all(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Json<FanOutResponse> {
    let operation = params.to_operation();
    let providers = params.provider_ids();
    let results = state
        .orchestrator
        .dispatch_all(&operation, providers.as_deref())
        .await
        .into_iter()
        .map(|(id, result)| (id, CallOutcome::from(result)))
        .collect();
    Json(FanOutResponse { results })
}

/// Clear cache entries
async fn clear_cache(
    State(state): State<AppState>,
    Query(params): Query<ClearCacheParams>,
) -> ApiResult<ClearCacheResponse> {
    let removed = state
        .orchestrator
        .clear_cache(params.provider.as_deref(), params.pattern.as_deref())
        .await?;
    Ok(Json(ClearCacheResponse { removed }))
}

/// Latest health of every provider
async fn get_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.get_health())
}

/// Probe every provider now
async fn check_health(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.check_health().await)
}

/// Metrics as JSON
async fn get_metrics(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.orchestrator.get_metrics())
}

/// Metrics in the Prometheus text format
async fn prometheus_metrics(State(state): State<AppState>) -> Response {
    match render_prometheus(&state.orchestrator.get_metrics()) {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Health check
async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness check
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    if state.orchestrator.is_destroyed() {
        (StatusCode::SERVICE_UNAVAILABLE, "shutting down")
    } else if state.orchestrator.provider_ids().is_empty() {
        (StatusCode::SERVICE_UNAVAILABLE, "no providers configured")
    } else {
        (StatusCode::OK, "ready")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheConfig;
    use crate::controlplane::{HealthConfig, OrchestratorConfig, ProviderConfig};
    use crate::transport::{RetryPolicy, TransportConfig};
    use axum::body::Body;
    use axum::http::{Method, Request};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: &str) -> ProviderConfig {
        ProviderConfig {
            transport: TransportConfig {
                retry: RetryPolicy::no_retry(),
                ..Default::default()
            },
            cache: CacheConfig::l1_only(100, Duration::from_secs(60)),
            ..ProviderConfig::http_json(base_url)
        }
    }

    fn router(base_url: &str) -> (Router, Arc<Orchestrator>) {
        let config = OrchestratorConfig {
            health: HealthConfig {
                enabled: false,
                ..Default::default()
            },
            metrics_interval_ms: 0,
            ..Default::default()
        }
        .with_provider("alpha", provider(base_url))
        .with_provider("beta", provider(base_url));

        let orchestrator = Orchestrator::new(config).unwrap();
        (RestRouter::new(orchestrator.clone()).build(), orchestrator)
    }

    async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        let request = match body {
            Some(body) => request.body(Body::from(body.to_string())).unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn upstream() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "rust"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"id": "1", "title": "The Rust Book"}],
                "total": 1
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "boom"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_list_providers() {
        let (router, _) = router("http://127.0.0.1:9");
        let (status, body) = call(&router, Method::GET, "/v1/providers", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["providers"], json!(["alpha", "beta"]));
    }

    #[tokio::test]
    async fn test_search_then_cached() {
        let server = upstream().await;
        let (router, _) = router(&server.uri());

        let (status, body) = call(&router, Method::GET, "/v1/providers/alpha/search?q=rust", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cached"], false);
        assert_eq!(body["result"]["type"], "search");
        assert_eq!(body["result"]["data"]["items"][0]["id"], "1");

        let (_, body) = call(&router, Method::GET, "/v1/providers/alpha/search?q=rust", None).await;
        assert_eq!(body["cached"], true);
    }

    #[tokio::test]
    async fn test_error_status_mapping() {
        let server = upstream().await;
        let (router, orchestrator) = router(&server.uri());

        let (status, body) = call(&router, Method::GET, "/v1/providers/nope/search?q=rust", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "configuration");

        let (status, body) = call(&router, Method::GET, "/v1/providers/alpha/search?q=boom", None).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"], "exhausted_retries");
        assert_eq!(body["providerId"], "alpha");

        let (status, _) = call(&router, Method::DELETE, "/v1/cache?pattern=%5B", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        orchestrator.destroy();
        let (status, body) = call(&router, Method::GET, "/v1/providers/alpha/search?q=rust", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "closed");
    }

    #[tokio::test]
    async fn test_fan_out_search() {
        let server = upstream().await;
        let (router, _) = router(&server.uri());

        let (status, body) = call(&router, Method::GET, "/v1/search?q=rust&providers=beta,zeta", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"]["beta"]["ok"], true);
        assert_eq!(body["results"]["zeta"]["ok"], false);
        assert_eq!(body["results"]["zeta"]["error"]["error"], "configuration");
        assert!(body["results"].get("alpha").is_none());
    }

    #[tokio::test]
    async fn test_batch_endpoint() {
        let server = upstream().await;
        let (router, _) = router(&server.uri());

        let request = json!({
            "operations": [
                {"op": "search", "query": "rust"},
                {"op": "search", "query": "boom"}
            ],
            "maxConcurrency": 2
        });
        let (status, body) = call(&router, Method::POST, "/v1/providers/alpha/batch", Some(request)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 2);
        assert_eq!(body["succeeded"], 1);
        assert_eq!(body["results"][0]["ok"], true);
        assert_eq!(body["results"][1]["error"]["error"], "exhausted_retries");
    }

    #[tokio::test]
    async fn test_cache_and_metrics_endpoints() {
        let server = upstream().await;
        let (router, _) = router(&server.uri());

        call(&router, Method::GET, "/v1/providers/alpha/search?q=rust", None).await;

        let (status, body) = call(&router, Method::GET, "/v1/metrics", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["aggregate"]["requestCount"], 1);
        assert_eq!(body["providers"]["alpha"]["cache"]["entryCount"], 1);

        let (status, body) = call(&router, Method::DELETE, "/v1/cache?provider=alpha", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], 1);

        let (status, body) = call(&router, Method::GET, "/v1/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["alpha"]["state"], "unknown");

        let response = router
            .clone()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let text = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(text.to_vec()).unwrap();
        assert!(text.contains("provider_gateway_requests_total{provider=\"alpha\"} 1"));
    }

    #[tokio::test]
    async fn test_readiness() {
        let (router, orchestrator) = router("http://127.0.0.1:9");
        let request = || Request::builder().uri("/ready").body(Body::empty()).unwrap();

        let response = router.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        orchestrator.destroy();
        let response = router.clone().oneshot(request()).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
