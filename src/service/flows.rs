//! Authorization flows driven over HTTP.
//!
//! The caller starts a flow, opens the returned authorization URL in a
//! browser and polls the flow until it leaves `pending`. The redirect lands
//! on `/api/callback`, which wakes the flow's background task; a closed popup
//! is reported with `DELETE /api/flows/:id`.

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
};
use async_trait::async_trait;
use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::flow::{
    AuthFlowController, AuthorizationSurface, AuthorizationUrl, CancelHandle, CancelReason, FlowEnvironment,
    FlowOutcome, FlowRequest, SurfaceError, SurfaceHandle,
};
use crate::types::{RequestPayload, VerificationResult};

use super::routes::ErrorResponse;
use super::state::ServiceState;

const FALLBACK_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1_000) {
    Some(n) => n,
    None => NonZeroUsize::MIN,
};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// How the service starts the flow for one provider.
#[derive(Debug, Clone)]
pub struct FlowTemplate {
    /// Platform id handed to connect services and logs.
    pub platform: String,
    /// Authorization URL source.
    pub authorization: AuthorizationUrl,
}

impl FlowTemplate {
    /// Create a template.
    pub fn new(platform: impl Into<String>, authorization: AuthorizationUrl) -> Self {
        Self {
            platform: platform.into(),
            authorization,
        }
    }
}

/// Where a flow started over HTTP stands.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FlowStatus {
    /// Waiting for the redirect.
    Pending,
    /// The provider produced a verdict.
    Completed {
        /// The verdict.
        result: VerificationResult,
    },
    /// The flow ended without a redirect.
    Cancelled {
        /// Why.
        reason: CancelReason,
    },
    /// The provider or the session store failed.
    Failed {
        /// Error message.
        error: String,
    },
}

struct FlowEntry {
    status: FlowStatus,
    cancel: CancelHandle,
}

/// Flows started over HTTP, keyed by flow id.
///
/// Bounded like the session cache; the least recently touched flow is
/// forgotten first.
pub struct FlowTable {
    entries: Mutex<LruCache<String, FlowEntry>>,
}

impl FlowTable {
    /// Create a table holding at most `capacity` flows.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(FALLBACK_CAPACITY);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    fn insert(&self, id: &str, cancel: CancelHandle) {
        self.entries.lock().put(
            id.to_string(),
            FlowEntry {
                status: FlowStatus::Pending,
                cancel,
            },
        );
    }

    fn finish(&self, id: &str, status: FlowStatus) {
        if let Some(entry) = self.entries.lock().get_mut(id) {
            entry.status = status;
        }
    }

    /// Current status of a flow.
    pub fn status(&self, id: &str) -> Option<FlowStatus> {
        self.entries.lock().get(id).map(|entry| entry.status.clone())
    }

    /// Signal a pending flow. Returns the status at the time of the call, or
    /// `None` for an unknown flow.
    pub fn cancel(&self, id: &str, reason: CancelReason) -> Option<FlowStatus> {
        let mut entries = self.entries.lock();
        let entry = entries.get(id)?;
        if entry.status == FlowStatus::Pending {
            entry.cancel.cancel(reason);
        }
        Some(entry.status.clone())
    }

    /// Number of tracked flows.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no flow is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FlowTable {
    fn default() -> Self {
        Self::new(FALLBACK_CAPACITY.get())
    }
}

/// Surface for HTTP callers: the URL goes back in the response and the
/// browser is the caller's business.
#[derive(Default)]
struct ReturnedUrl(Mutex<Option<String>>);

impl ReturnedUrl {
    fn take(&self) -> Option<String> {
        self.0.lock().take()
    }
}

#[async_trait]
impl AuthorizationSurface for ReturnedUrl {
    async fn open(&self, url: &str, _cancel: CancelHandle) -> Result<Box<dyn SurfaceHandle>, SurfaceError> {
        *self.0.lock() = Some(url.to_string());
        Ok(Box::new(Detached))
    }
}

struct Detached;

impl SurfaceHandle for Detached {
    fn close(&self) {}
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request to start a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartFlowRequest {
    /// Provider that verifies the redirect.
    #[serde(rename = "type")]
    pub provider: String,
    /// Address making the claim.
    pub address: String,
    /// Proofs passed through to the provider.
    #[serde(default)]
    pub proofs: BTreeMap<String, String>,
    /// Fields stored in the flow session before the redirect.
    #[serde(default)]
    pub session_fields: BTreeMap<String, String>,
}

/// A started flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartFlowResponse {
    /// Flow id, used to poll and cancel.
    pub flow_id: String,
    /// URL the user must visit.
    pub authorization_url: String,
}

/// Status of one flow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowStatusResponse {
    /// Flow id.
    pub flow_id: String,
    /// Status and, once terminal, its payload.
    #[serde(flatten)]
    pub status: FlowStatus,
}

fn not_found(flow_id: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse::new("FLOW_NOT_FOUND", format!("Flow not found: {}", flow_id))),
    )
}

// ============================================================================
// Route Handlers
// ============================================================================

/// Start a flow and hand back its authorization URL.
///
/// The flow waits for its redirect in a background task.
pub(crate) async fn start_flow_handler(
    State(state): State<Arc<ServiceState>>,
    Json(request): Json<StartFlowRequest>,
) -> Result<(StatusCode, Json<StartFlowResponse>), ApiError> {
    let template = state.flow_templates.get(&request.provider).cloned().ok_or_else(|| {
        (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::new(
                "FLOW_NOT_AVAILABLE",
                format!("No authorization flow for provider: {}", request.provider),
            )),
        )
    })?;

    let surface = Arc::new(ReturnedUrl::default());
    let env = Arc::new(FlowEnvironment {
        registry: Arc::clone(&state.registry),
        sessions: Arc::clone(&state.sessions),
        router: Arc::clone(&state.router),
        surface: surface.clone(),
        callback_base_url: state.config.callback_base_url.clone(),
        timeout: state.config.flow_timeout(),
        context: state.context.clone(),
    });

    let mut payload = RequestPayload::new(request.address).with_provider(request.provider.clone());
    payload.proofs = request.proofs;
    let mut flow = FlowRequest::new(template.platform, request.provider, payload, template.authorization);
    flow.initial_fields = request.session_fields;

    let mut controller = AuthFlowController::new(env, flow);
    controller.start().await.map_err(|e| {
        (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse::new("FLOW_START_FAILED", "Failed to start authorization flow").with_details(e.to_string())),
        )
    })?;

    let (flow_id, authorization_url) = match (controller.session_key(), surface.take()) {
        (Some(key), Some(url)) => (key.to_string(), url),
        _ => {
            return Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("FLOW_START_FAILED", "Flow started without an authorization URL")),
            ))
        }
    };

    state.flows.insert(&flow_id, controller.cancel_handle());

    let flows = Arc::clone(&state.flows);
    let id = flow_id.clone();
    tokio::spawn(async move {
        let status = match controller.wait().await {
            Ok(FlowOutcome::Completed(result)) => FlowStatus::Completed { result },
            Ok(FlowOutcome::Cancelled(reason)) => FlowStatus::Cancelled { reason },
            Err(e) => FlowStatus::Failed { error: e.to_string() },
        };
        flows.finish(&id, status);
    });

    Ok((
        StatusCode::CREATED,
        Json(StartFlowResponse {
            flow_id,
            authorization_url,
        }),
    ))
}

/// Poll a flow.
pub(crate) async fn flow_status_handler(
    State(state): State<Arc<ServiceState>>,
    Path(flow_id): Path<String>,
) -> Result<Json<FlowStatusResponse>, ApiError> {
    let status = state.flows.status(&flow_id).ok_or_else(|| not_found(&flow_id))?;
    Ok(Json(FlowStatusResponse { flow_id, status }))
}

/// Report that the user closed the authorization surface.
///
/// Terminal flows are left as they are.
pub(crate) async fn cancel_flow_handler(
    State(state): State<Arc<ServiceState>>,
    Path(flow_id): Path<String>,
) -> Result<(StatusCode, Json<FlowStatusResponse>), ApiError> {
    let status = state
        .flows
        .cancel(&flow_id, CancelReason::UserClosed)
        .ok_or_else(|| not_found(&flow_id))?;
    Ok((StatusCode::ACCEPTED, Json(FlowStatusResponse { flow_id, status })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_only_signals_pending_flows() {
        let table = FlowTable::new(4);
        let handle = CancelHandle::new();
        table.insert("a", handle.clone());

        assert_eq!(table.cancel("a", CancelReason::UserClosed), Some(FlowStatus::Pending));
        assert_eq!(handle.reason(), Some(CancelReason::UserClosed));

        let done = CancelHandle::new();
        table.insert("b", done.clone());
        table.finish(
            "b",
            FlowStatus::Failed {
                error: "boom".to_string(),
            },
        );
        assert!(matches!(table.cancel("b", CancelReason::UserClosed), Some(FlowStatus::Failed { .. })));
        assert!(!done.is_cancelled());

        assert_eq!(table.cancel("missing", CancelReason::UserClosed), None);
    }

    #[test]
    fn test_table_is_bounded() {
        let table = FlowTable::new(2);
        for id in ["a", "b", "c"] {
            table.insert(id, CancelHandle::new());
        }
        assert_eq!(table.len(), 2);
        assert!(table.status("a").is_none());
    }

    #[test]
    fn test_status_serializes_with_tag() {
        let response = FlowStatusResponse {
            flow_id: "f".to_string(),
            status: FlowStatus::Cancelled {
                reason: CancelReason::UserClosed,
            },
        };
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            serde_json::json!({"flowId": "f", "status": "cancelled", "reason": "user_closed"})
        );
    }
}
