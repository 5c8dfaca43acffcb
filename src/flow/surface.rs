//! Authorization surfaces, connect services and cancellation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;

use crate::evidence::EvidenceError;

/// Why a flow was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The user closed the authorization surface.
    UserClosed,
    /// No callback arrived before the flow timeout.
    Timeout,
    /// The caller cancelled the flow.
    Requested,
}

impl CancelReason {
    /// Label for logs and responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UserClosed => "user_closed",
            Self::Timeout => "timeout",
            Self::Requested => "requested",
        }
    }
}

/// Cloneable cancellation signal for one flow.
///
/// The first reason wins; later calls to [`CancelHandle::cancel`] are
/// ignored.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<Option<CancelReason>>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelHandle {
    /// Create an untriggered handle.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Trigger cancellation. Returns `false` if already cancelled.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    /// Reason, once cancelled.
    pub fn reason(&self) -> Option<CancelReason> {
        *self.tx.borrow()
    }

    /// Whether cancellation was triggered.
    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolve once cancellation is triggered.
    pub async fn cancelled(&self) -> CancelReason {
        let mut rx = self.tx.subscribe();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            // The sender lives in `self`, so `changed` cannot fail here.
            if rx.changed().await.is_err() {
                return CancelReason::Requested;
            }
        }
    }
}

/// An open authorization surface (popup, browser tab, device prompt).
pub trait SurfaceHandle: Send + Sync {
    /// Close the surface. Must be idempotent.
    fn close(&self);
}

/// Error opening a surface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Authorization surface failed: {0}")]
pub struct SurfaceError(pub String);

/// Something that can present an authorization URL to the user.
///
/// Implementations watch for the user abandoning the surface and report it
/// through `cancel` with [`CancelReason::UserClosed`].
#[async_trait]
pub trait AuthorizationSurface: Send + Sync {
    /// Present `url`.
    async fn open(&self, url: &str, cancel: CancelHandle) -> Result<Box<dyn SurfaceHandle>, SurfaceError>;
}

/// Grant returned by an external connect service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectGrant {
    /// Request id the service will report back on the redirect.
    pub request_id: String,
    /// URL the user must visit.
    pub authorization_url: String,
}

/// External service that issues its own request id for a connect flow.
#[async_trait]
pub trait ConnectService: Send + Sync {
    /// Begin a flow that redirects to `callback_url` when done.
    async fn begin(&self, platform: &str, callback_url: &str) -> Result<ConnectGrant, EvidenceError>;
}
