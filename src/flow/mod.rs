//! Externally-redirected authorization flows.
//!
//! An [`AuthFlowController`] drives one flow through
//!
//! ```text
//! Idle ──start──▶ AwaitingRedirect ──callback──▶ Resolved
//!                        │
//!                        └──closed / cancel / timeout──▶ Cancelled
//! ```
//!
//! `start` creates a session under a fresh key, signs the key into the
//! callback `state`, registers with the [`CallbackRouter`] and only then
//! opens the authorization surface, so a fast redirect can never arrive
//! before anyone listens for it. `wait` races the callback against the
//! cancel signal and the flow timeout. A resolved flow forwards the callback
//! query fields, plus `sessionKey` (and `requestID` for connect flows), as
//! proofs to the target provider.
//!
//! Controllers are single-use; [`AuthFlowController::run`] consumes one.
//! Any number may run concurrently against the same environment.

pub mod callback;
pub mod surface;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::evidence::EvidenceError;
use crate::provider::{FlowContext, ProviderError, ProviderRegistry};
use crate::session::{SessionCache, SessionError, SessionKey};
use crate::telemetry;
use crate::types::{proof_keys, RequestPayload, VerificationResult};

pub use callback::{CallbackFields, CallbackRouter, Delivery, SigningError, StateSigner, STATE_PARAM};
pub use surface::{
    AuthorizationSurface, CancelHandle, CancelReason, ConnectGrant, ConnectService, SurfaceError,
    SurfaceHandle,
};

/// Default maximum wait for a redirect.
pub const DEFAULT_FLOW_TIMEOUT: Duration = Duration::from_secs(300);

/// Errors that abort a flow. Cancellation is not one of them.
#[derive(Debug, thiserror::Error)]
pub enum FlowError {
    /// The session cache failed.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
    /// The target provider failed externally.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
    /// The surface could not be opened.
    #[error(transparent)]
    Surface(#[from] SurfaceError),
    /// The connect service could not begin the flow.
    #[error("Connect service error: {0}")]
    Connect(EvidenceError),
    /// The callback state could not be signed.
    #[error(transparent)]
    Signing(#[from] SigningError),
    /// The controller was driven out of order.
    #[error("Flow is {actual}, expected {expected}")]
    InvalidState {
        /// State the operation needs.
        expected: FlowState,
        /// Current state.
        actual: FlowState,
    },
}

/// Lifecycle state of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Not started.
    Idle,
    /// Surface open, waiting for the redirect.
    AwaitingRedirect,
    /// Redirect received and verified.
    Resolved,
    /// Abandoned before a redirect arrived.
    Cancelled,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::AwaitingRedirect => "awaiting_redirect",
            Self::Resolved => "resolved",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Terminal result of a flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// The provider produced a verdict.
    Completed(VerificationResult),
    /// The flow ended without a redirect. Not a failure.
    Cancelled(CancelReason),
}

impl FlowOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Completed(result) if result.is_valid() => "completed_valid",
            Self::Completed(_) => "completed_invalid",
            Self::Cancelled(reason) => reason.as_str(),
        }
    }
}

/// How the authorization URL is obtained.
#[derive(Clone)]
pub enum AuthorizationUrl {
    /// URL template; `{state}` and `{redirect_uri}` are substituted
    /// (percent-encoded).
    Template(String),
    /// Ask an external connect service, which issues its own request id.
    Connect(Arc<dyn ConnectService>),
}

impl fmt::Debug for AuthorizationUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Template(template) => f.debug_tuple("Template").field(template).finish(),
            Self::Connect(_) => f.write_str("Connect(..)"),
        }
    }
}

/// One flow to run.
#[derive(Debug, Clone)]
pub struct FlowRequest {
    /// Platform id, passed to connect services and logs.
    pub platform: String,
    /// Provider that verifies the redirect.
    pub provider_id: String,
    /// Base payload; callback fields are added as proofs.
    pub payload: RequestPayload,
    /// Fields stored in the session before the surface opens.
    pub initial_fields: BTreeMap<String, String>,
    /// Authorization URL source.
    pub authorization: AuthorizationUrl,
}

impl FlowRequest {
    /// Create a request.
    pub fn new(
        platform: impl Into<String>,
        provider_id: impl Into<String>,
        payload: RequestPayload,
        authorization: AuthorizationUrl,
    ) -> Self {
        Self {
            platform: platform.into(),
            provider_id: provider_id.into(),
            payload,
            initial_fields: BTreeMap::new(),
            authorization,
        }
    }

    /// Store a field in the session when the flow starts.
    pub fn with_session_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.initial_fields.insert(name.into(), value.into());
        self
    }
}

/// Collaborators shared by every flow.
pub struct FlowEnvironment {
    /// Providers verifying the redirects.
    pub registry: Arc<ProviderRegistry>,
    /// Session storage.
    pub sessions: Arc<dyn SessionCache>,
    /// Callback routing.
    pub router: Arc<CallbackRouter>,
    /// Surface presenting authorization URLs.
    pub surface: Arc<dyn AuthorizationSurface>,
    /// Redirect landing URL (e.g. `https://kernel.example/api/callback`).
    pub callback_base_url: String,
    /// Maximum wait for a redirect.
    pub timeout: Duration,
    /// Context handed to providers.
    pub context: FlowContext,
}

impl FlowEnvironment {
    /// Callback URL carrying a signed `state`.
    pub fn callback_url(&self, state: &str) -> String {
        let separator = if self.callback_base_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{}{}={}",
            self.callback_base_url,
            separator,
            STATE_PARAM,
            urlencoding::encode(state)
        )
    }
}

/// Drives one externally-redirected flow.
pub struct AuthFlowController {
    env: Arc<FlowEnvironment>,
    request: FlowRequest,
    state: FlowState,
    cancel: CancelHandle,
    session_key: Option<SessionKey>,
    receiver: Option<tokio::sync::oneshot::Receiver<CallbackFields>>,
    surface: Option<Box<dyn SurfaceHandle>>,
    started: Instant,
}

enum Wake {
    Callback(CallbackFields),
    Cancel(CancelReason),
}

impl AuthFlowController {
    /// Create an idle controller.
    pub fn new(env: Arc<FlowEnvironment>, request: FlowRequest) -> Self {
        Self {
            env,
            request,
            state: FlowState::Idle,
            cancel: CancelHandle::new(),
            session_key: None,
            receiver: None,
            surface: None,
            started: Instant::now(),
        }
    }

    /// Handle that cancels this flow.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Current state.
    pub fn state(&self) -> FlowState {
        self.state
    }

    /// Session key, once started.
    pub fn session_key(&self) -> Option<&SessionKey> {
        self.session_key.as_ref()
    }

    /// Start and wait for the terminal outcome.
    pub async fn run(mut self) -> Result<FlowOutcome, FlowError> {
        self.start().await?;
        self.wait().await
    }

    fn expect_state(&self, expected: FlowState) -> Result<(), FlowError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(FlowError::InvalidState {
                expected,
                actual: self.state,
            })
        }
    }

    /// Create the session and open the authorization surface.
    pub async fn start(&mut self) -> Result<(), FlowError> {
        self.expect_state(FlowState::Idle)?;
        self.started = Instant::now();

        let key = SessionKey::generate();
        let sessions = Arc::clone(&self.env.sessions);
        sessions.create(&key).await?;
        self.session_key = Some(key.clone());

        match self.open(&key).await {
            Ok(()) => {
                self.state = FlowState::AwaitingRedirect;
                tracing::info!(
                    target: "stamp_kernel::flow",
                    platform = %self.request.platform,
                    provider = %self.request.provider_id,
                    session_key = %key,
                    "authorization flow started"
                );
                Ok(())
            }
            Err(err) => {
                self.env.router.deregister(key.as_str());
                discard_session(sessions.as_ref(), &key).await;
                self.state = FlowState::Cancelled;
                Err(err)
            }
        }
    }

    async fn open(&mut self, key: &SessionKey) -> Result<(), FlowError> {
        let env = Arc::clone(&self.env);

        for (name, value) in &self.request.initial_fields {
            env.sessions.set(key, name, value).await?;
        }

        let state = env.router.sign(key.as_str())?;
        let callback_url = env.callback_url(&state);

        let url = match &self.request.authorization {
            AuthorizationUrl::Template(template) => template
                .replace("{state}", &urlencoding::encode(&state))
                .replace("{redirect_uri}", &urlencoding::encode(&env.callback_base_url)),
            AuthorizationUrl::Connect(service) => {
                let grant = service
                    .begin(&self.request.platform, &callback_url)
                    .await
                    .map_err(FlowError::Connect)?;
                env.sessions
                    .set(key, proof_keys::REQUEST_ID, &grant.request_id)
                    .await?;
                grant.authorization_url
            }
        };

        // Listen before the surface can trigger a redirect.
        self.receiver = Some(env.router.register(key.as_str()));
        let handle = env.surface.open(&url, self.cancel.clone()).await?;
        self.surface = Some(handle);
        Ok(())
    }

    /// Wait for the redirect, a cancel signal or the timeout.
    pub async fn wait(&mut self) -> Result<FlowOutcome, FlowError> {
        self.expect_state(FlowState::AwaitingRedirect)?;
        let (key, receiver) = match (self.session_key.clone(), self.receiver.take()) {
            (Some(key), Some(receiver)) => (key, receiver),
            _ => {
                return Err(FlowError::InvalidState {
                    expected: FlowState::AwaitingRedirect,
                    actual: self.state,
                })
            }
        };

        let cancel = self.cancel.clone();
        let wake = tokio::select! {
            fields = receiver => match fields {
                Ok(fields) => Wake::Callback(fields),
                // Waiter replaced or router dropped.
                Err(_) => Wake::Cancel(CancelReason::Requested),
            },
            reason = cancel.cancelled() => Wake::Cancel(reason),
            _ = tokio::time::sleep(self.env.timeout) => Wake::Cancel(CancelReason::Timeout),
        };

        self.close_surface();

        let outcome = match wake {
            Wake::Cancel(reason) => {
                self.cancel.cancel(reason);
                let reason = self.cancel.reason().unwrap_or(reason);
                self.env.router.deregister(key.as_str());
                discard_session(self.env.sessions.as_ref(), &key).await;
                self.state = FlowState::Cancelled;
                FlowOutcome::Cancelled(reason)
            }
            Wake::Callback(fields) => {
                self.state = FlowState::Resolved;
                let result = self.resolve(&key, fields).await;
                discard_session(self.env.sessions.as_ref(), &key).await;
                FlowOutcome::Completed(result?)
            }
        };

        telemetry::record_flow_outcome(
            &self.request.platform,
            outcome.label(),
            self.started.elapsed().as_millis() as u64,
        );
        Ok(outcome)
    }

    async fn resolve(
        &self,
        key: &SessionKey,
        fields: CallbackFields,
    ) -> Result<VerificationResult, FlowError> {
        let mut payload = self.request.payload.clone();
        payload.proofs.extend(fields.into_iter().filter(|(name, _)| name != STATE_PARAM));
        payload
            .proofs
            .insert(proof_keys::SESSION_KEY.to_string(), key.to_string());

        if let Ok(session) = self.env.sessions.load(key).await {
            if let Some(request_id) = session.field(proof_keys::REQUEST_ID) {
                payload
                    .proofs
                    .insert(proof_keys::REQUEST_ID.to_string(), request_id.to_string());
            }
        }

        let result = self
            .env
            .registry
            .verify(&self.request.provider_id, &payload, &self.env.context)
            .await?;
        Ok(result)
    }

    fn close_surface(&mut self) {
        if let Some(handle) = self.surface.take() {
            handle.close();
        }
    }
}

/// Dropping a flow that still awaits its redirect deregisters the waiter,
/// closes the surface and discards the session on the current Tokio runtime.
/// Outside a runtime the session is left to expire with its TTL.
impl Drop for AuthFlowController {
    fn drop(&mut self) {
        if self.state != FlowState::AwaitingRedirect {
            return;
        }
        self.close_surface();
        if let Some(key) = self.session_key.take() {
            self.env.router.deregister(key.as_str());
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                let sessions = Arc::clone(&self.env.sessions);
                runtime.spawn(async move {
                    discard_session(sessions.as_ref(), &key).await;
                });
            }
        }
    }
}

async fn discard_session(sessions: &dyn SessionCache, key: &SessionKey) {
    match sessions.consume(key).await {
        Ok(_) => {}
        Err(err) if err.is_missing() => {}
        Err(err) => tracing::warn!(
            target: "stamp_kernel::session",
            session_key = %key,
            error = %err,
            "failed to discard flow session"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_url_appends_state() {
        let env = FlowEnvironment {
            registry: Arc::new(ProviderRegistry::new()),
            sessions: Arc::new(crate::session::InMemorySessionCache::default()),
            router: Arc::new(CallbackRouter::new(b"secret".to_vec())),
            surface: Arc::new(NoSurface),
            callback_base_url: "https://kernel.example/api/callback".to_string(),
            timeout: DEFAULT_FLOW_TIMEOUT,
            context: FlowContext::default(),
        };

        assert_eq!(
            env.callback_url("abc.def"),
            "https://kernel.example/api/callback?state=abc.def"
        );
    }

    struct NoSurface;

    #[async_trait::async_trait]
    impl AuthorizationSurface for NoSurface {
        async fn open(&self, _url: &str, _cancel: CancelHandle) -> Result<Box<dyn SurfaceHandle>, SurfaceError> {
            Err(SurfaceError("no display".to_string()))
        }
    }

    #[tokio::test]
    async fn test_surface_failure_cleans_up() {
        let sessions = Arc::new(crate::session::InMemorySessionCache::default());
        let router = Arc::new(CallbackRouter::new(b"secret".to_vec()));
        let env = Arc::new(FlowEnvironment {
            registry: Arc::new(ProviderRegistry::new()),
            sessions: sessions.clone(),
            router: router.clone(),
            surface: Arc::new(NoSurface),
            callback_base_url: "https://kernel.example/api/callback".to_string(),
            timeout: DEFAULT_FLOW_TIMEOUT,
            context: FlowContext::default(),
        });

        let request = FlowRequest::new(
            "Google",
            "Google",
            RequestPayload::new("0xabc"),
            AuthorizationUrl::Template("https://auth.example/?state={state}".to_string()),
        );
        let mut controller = AuthFlowController::new(env, request);

        assert!(matches!(controller.start().await, Err(FlowError::Surface(_))));
        assert_eq!(controller.state(), FlowState::Cancelled);
        assert_eq!(router.pending_count(), 0);
        assert!(sessions.is_empty());
        assert!(matches!(
            controller.start().await,
            Err(FlowError::InvalidState { .. })
        ));
    }
}
