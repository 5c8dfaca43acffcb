//! Axum routes for the Stamp Kernel service.

use axum::{
    extract::{Json, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;

use crate::flow::{CallbackFields, Delivery};
use crate::provider::{ProviderDescriptor, ProviderError};
use crate::scoring::{score_platforms, selected_providers, AggregateView, StampWeights};
use crate::types::{PlatformSpec, RequestPayload, VerificationResult};
use crate::STAMP_KERNEL_SCHEMA_VERSION;

use super::flows::{cancel_flow_handler, flow_status_handler, start_flow_handler};
use super::middleware::{record_batch_verification, record_callback};
use super::state::ServiceState;

/// Header carrying the upstream trace context.
const TRACE_HEADER: &str = "X-Cloud-Trace-Context";

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to verify a payload.
///
/// The target providers are `type` (single) and/or `types` (several).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyRequest {
    /// The payload, including the optional `type`.
    #[serde(flatten)]
    pub payload: RequestPayload,
    /// Additional provider ids.
    #[serde(default)]
    pub types: Vec<String>,
}

impl VerifyRequest {
    /// Requested provider ids, deduplicated, in request order.
    pub fn provider_ids(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.payload
            .provider
            .iter()
            .chain(self.types.iter())
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect()
    }
}

/// Outcome of one provider in a verify request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderVerification {
    /// Provider id.
    #[serde(rename = "type")]
    pub provider: String,
    /// Verdict, when the provider produced one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<VerificationResult>,
    /// Failure, when it did not.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

/// Response to a verify request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    /// One entry per requested provider.
    pub results: Vec<ProviderVerification>,
}

/// Provider listing.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderListResponse {
    /// Registered providers.
    pub providers: Vec<ProviderDescriptor>,
    /// Registered platforms.
    pub platforms: Vec<PlatformSpec>,
    /// Registry fingerprint.
    pub registry_fingerprint: String,
}

/// Request to score platforms.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreRequest {
    /// Platforms to score; the registered platforms when empty.
    #[serde(default)]
    pub platforms: Vec<PlatformSpec>,
    /// Provider weights.
    #[serde(default)]
    pub weights: StampWeights,
    /// Providers the user holds.
    #[serde(default)]
    pub verified: BTreeSet<String>,
    /// Providers the user has selected but not yet verified.
    #[serde(default)]
    pub selected: BTreeMap<String, Vec<String>>,
}

/// Redirect landing response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackResponse {
    /// `delivered`, `unknown_correlation` or `bad_signature`.
    pub status: String,
}

/// Service health response (detailed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub schema_version: String,
    pub provider_count: usize,
    pub platform_count: usize,
    pub registry_fingerprint: String,
    pub pending_flows: usize,
    pub sessions_healthy: bool,
}

/// Simple liveness response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessResponse {
    pub status: String,
}

/// Readiness response with dependency status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub sessions: bool,
    pub details: Option<String>,
}

/// Structured error response with correlation ID for tracing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message.
    pub error: String,
    /// Machine-readable error code.
    pub code: String,
    /// Correlation ID for request tracing (matches X-Cloud-Trace-Context or generated UUID).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Additional error details (optional).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    /// Create a new error response with code and message.
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            correlation_id: None,
            details: None,
        }
    }

    /// Add a correlation ID to the error.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Add details to the error.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    fn from_provider_error(error: &ProviderError) -> Self {
        let code = match error {
            ProviderError::ExternalVerification { .. } => "EXTERNAL_VERIFICATION",
            ProviderError::UnknownProvider(_) => "UNKNOWN_PROVIDER",
            ProviderError::DuplicateProvider(_) => "DUPLICATE_PROVIDER",
            ProviderError::InvalidConfig { .. } => "INVALID_CONFIG",
            ProviderError::EmptyRecord { .. } => "EMPTY_RECORD",
        };
        Self::new(code, error.to_string())
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> axum::response::Response {
        tracing::warn!(
            code = %self.code,
            error = %self.error,
            correlation_id = ?self.correlation_id,
            "Request error"
        );
        (StatusCode::BAD_REQUEST, Json(self)).into_response()
    }
}

fn trace_id(headers: &HeaderMap) -> String {
    headers
        .get(TRACE_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split('/').next())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Verify a payload against every requested provider.
///
/// Providers run concurrently; one failing does not affect the others.
async fn verify_handler(
    State(state): State<Arc<ServiceState>>,
    headers: HeaderMap,
    Json(request): Json<VerifyRequest>,
) -> Result<Json<VerifyResponse>, ErrorResponse> {
    let trace_id = trace_id(&headers);
    let ids = request.provider_ids();
    if ids.is_empty() {
        return Err(ErrorResponse::new("MISSING_PROVIDER", "No provider type requested")
            .with_correlation_id(trace_id));
    }

    let start = Instant::now();
    let ctx = state.context.clone().with_trace_id(trace_id.clone());
    let mut outcomes = state.registry.verify_many(&ids, &request.payload, &ctx).await;

    let results: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let outcome = outcomes.remove(&id);
            let (result, error) = match outcome {
                Some(Ok(result)) => (Some(result), None),
                Some(Err(e)) => (
                    None,
                    Some(ErrorResponse::from_provider_error(&e).with_correlation_id(trace_id.clone())),
                ),
                None => (
                    None,
                    Some(
                        ErrorResponse::from_provider_error(&ProviderError::UnknownProvider(id.clone()))
                            .with_correlation_id(trace_id.clone()),
                    ),
                ),
            };
            ProviderVerification {
                provider: id,
                result,
                error,
            }
        })
        .collect();

    let valid_count = results
        .iter()
        .filter(|r| r.result.as_ref().is_some_and(VerificationResult::is_valid))
        .count();
    record_batch_verification(results.len(), valid_count, start.elapsed().as_millis() as u64);

    Ok(Json(VerifyResponse { results }))
}

/// List registered providers and platforms.
async fn list_providers_handler(
    State(state): State<Arc<ServiceState>>,
) -> Result<Json<ProviderListResponse>, ErrorResponse> {
    let registry_fingerprint = state
        .registry
        .fingerprint()
        .map_err(|e| ErrorResponse::new("FINGERPRINT_ERROR", "Failed to fingerprint registry").with_details(e.to_string()))?;

    Ok(Json(ProviderListResponse {
        providers: state.registry.list(),
        platforms: state.registry.platforms().cloned().collect(),
        registry_fingerprint,
    }))
}

/// Score platforms and order them for display.
async fn score_handler(
    State(state): State<Arc<ServiceState>>,
    Json(request): Json<ScoreRequest>,
) -> Json<AggregateView> {
    let platforms = if request.platforms.is_empty() {
        state.registry.platforms().cloned().collect()
    } else {
        request.platforms
    };

    let scores = score_platforms(&platforms, &request.weights, &request.verified);

    let mut selected = selected_providers(&platforms, &request.verified);
    for (platform, providers) in request.selected {
        selected.entry(platform).or_default().extend(providers);
    }

    Json(state.aggregator.aggregate(&scores, &selected))
}

/// Redirect landing for authorization flows.
///
/// Hands the query fields to the flow waiting on the signed `state`.
async fn callback_handler(
    State(state): State<Arc<ServiceState>>,
    Query(fields): Query<CallbackFields>,
) -> (StatusCode, Json<CallbackResponse>) {
    let (status, outcome) = match state.router.deliver(fields) {
        Delivery::Delivered => (StatusCode::OK, "delivered"),
        Delivery::UnknownCorrelation => (StatusCode::GONE, "unknown_correlation"),
        Delivery::BadSignature => (StatusCode::BAD_REQUEST, "bad_signature"),
    };
    record_callback(outcome);
    (
        status,
        Json(CallbackResponse {
            status: outcome.to_string(),
        }),
    )
}

/// Detailed health check.
async fn health_handler(
    State(state): State<Arc<ServiceState>>,
) -> Json<HealthResponse> {
    let sessions_healthy = state.sessions_healthy().await;

    Json(HealthResponse {
        status: if sessions_healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        schema_version: STAMP_KERNEL_SCHEMA_VERSION.to_string(),
        provider_count: state.registry.len(),
        platform_count: state.registry.platforms().count(),
        registry_fingerprint: state.registry.fingerprint().unwrap_or_default(),
        pending_flows: state.router.pending_count(),
        sessions_healthy,
    })
}

/// Liveness probe endpoint.
///
/// Does NOT check dependencies.
async fn liveness_handler() -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "alive".to_string(),
    })
}

/// Readiness probe endpoint.
///
/// Returns 200 if the session store answers, 503 otherwise.
async fn readiness_handler(
    State(state): State<Arc<ServiceState>>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    if state.sessions_healthy().await {
        Ok(Json(ReadinessResponse {
            ready: true,
            sessions: true,
            details: None,
        }))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                ready: false,
                sessions: false,
                details: Some("Session store unavailable".to_string()),
            }),
        ))
    }
}

/// Startup probe endpoint.
async fn startup_handler(
    State(state): State<Arc<ServiceState>>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    if state.sessions_healthy().await {
        Ok(Json(ReadinessResponse {
            ready: true,
            sessions: true,
            details: Some("Service started successfully".to_string()),
        }))
    } else {
        Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                ready: false,
                sessions: false,
                details: Some("Session store not yet available".to_string()),
            }),
        ))
    }
}

// ============================================================================
// Router Construction
// ============================================================================

/// Create the Axum router for the Stamp Kernel service.
pub fn create_router(state: ServiceState) -> Router {
    let state = Arc::new(state);

    Router::new()
        // Verification
        .route("/api/verify", post(verify_handler))
        .route("/api/providers", get(list_providers_handler))
        // Scoring
        .route("/api/score", post(score_handler))
        // Authorization flows
        .route("/api/flows", post(start_flow_handler))
        .route("/api/flows/:id", get(flow_status_handler).delete(cancel_flow_handler))
        .route("/api/callback", get(callback_handler))
        // Health checks (Cloud Run compatible)
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/ready", get(readiness_handler))
        .route("/health/startup", get(startup_handler))
        .layer(axum::middleware::from_fn(super::middleware::metrics_middleware))
        .with_state(state)
}
