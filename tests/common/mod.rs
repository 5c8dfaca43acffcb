//! Shared collaborators for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use stamp_kernel::{
    AccessToken, AuthorizationSurface, CancelHandle, ConnectGrant, ConnectService, EvidenceError,
    EvidenceRequest, EvidenceSource, FlowContext, ManualClock, OAuthClient, RawEvidence, SurfaceError,
    SurfaceHandle,
};

type Responder = Box<dyn Fn(&EvidenceRequest) -> Result<RawEvidence, EvidenceError> + Send + Sync>;

/// Evidence source answering from a closure and counting lookups.
pub struct MockEvidenceSource {
    respond: Responder,
    calls: AtomicUsize,
    requests: Mutex<Vec<EvidenceRequest>>,
}

impl MockEvidenceSource {
    pub fn with(respond: impl Fn(&EvidenceRequest) -> Result<RawEvidence, EvidenceError> + Send + Sync + 'static) -> Arc<Self> {
        Arc::new(Self {
            respond: Box::new(respond),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn ok(evidence: Value) -> Arc<Self> {
        Self::with(move |_| Ok(evidence.clone()))
    }

    pub fn failing(error: EvidenceError) -> Arc<Self> {
        Self::with(move |_| Err(error.clone()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<EvidenceRequest> {
        self.requests.lock().last().cloned()
    }
}

#[async_trait]
impl EvidenceSource for MockEvidenceSource {
    async fn fetch_evidence(&self, request: &EvidenceRequest) -> Result<RawEvidence, EvidenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        (self.respond)(request)
    }
}

/// OAuth client with a fixed code → profile table.
pub struct MockOAuthClient {
    profiles: BTreeMap<String, Value>,
    exchanges: AtomicUsize,
    profile_fetches: AtomicUsize,
}

impl MockOAuthClient {
    pub fn new(profiles: impl IntoIterator<Item = (&'static str, Value)>) -> Arc<Self> {
        Arc::new(Self {
            profiles: profiles.into_iter().map(|(code, p)| (code.to_string(), p)).collect(),
            exchanges: AtomicUsize::new(0),
            profile_fetches: AtomicUsize::new(0),
        })
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn profile_fetches(&self) -> usize {
        self.profile_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OAuthClient for MockOAuthClient {
    async fn exchange_code(&self, code: &str) -> Result<AccessToken, EvidenceError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if self.profiles.contains_key(code) {
            Ok(AccessToken::new(format!("token-{}", code)))
        } else {
            Err(EvidenceError::Status {
                status: 400,
                body: "invalid_grant".to_string(),
            })
        }
    }

    async fn fetch_profile(&self, token: &AccessToken) -> Result<RawEvidence, EvidenceError> {
        self.profile_fetches.fetch_add(1, Ordering::SeqCst);
        let code = token.secret().trim_start_matches("token-");
        self.profiles
            .get(code)
            .cloned()
            .ok_or_else(|| EvidenceError::Status {
                status: 401,
                body: "unauthorized".to_string(),
            })
    }
}

/// A surface opening.
pub struct Opened {
    pub url: String,
    pub cancel: CancelHandle,
}

/// Surface that reports every opened URL and counts closes.
pub struct RecordingSurface {
    opened: mpsc::UnboundedSender<Opened>,
    closed: Arc<AtomicUsize>,
}

impl RecordingSurface {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Opened>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                opened: tx,
                closed: Arc::new(AtomicUsize::new(0)),
            }),
            rx,
        )
    }

    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

struct RecordingHandle {
    closed: Arc<AtomicUsize>,
}

impl SurfaceHandle for RecordingHandle {
    fn close(&self) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AuthorizationSurface for RecordingSurface {
    async fn open(&self, url: &str, cancel: CancelHandle) -> Result<Box<dyn SurfaceHandle>, SurfaceError> {
        self.opened
            .send(Opened {
                url: url.to_string(),
                cancel,
            })
            .map_err(|_| SurfaceError("recorder dropped".to_string()))?;
        Ok(Box::new(RecordingHandle {
            closed: Arc::clone(&self.closed),
        }))
    }
}

/// Connect service issuing sequential request ids.
pub struct MockConnectService {
    issued: AtomicUsize,
    callbacks: Mutex<Vec<String>>,
}

impl MockConnectService {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            issued: AtomicUsize::new(0),
            callbacks: Mutex::new(Vec::new()),
        })
    }

    pub fn callbacks(&self) -> Vec<String> {
        self.callbacks.lock().clone()
    }
}

#[async_trait]
impl ConnectService for MockConnectService {
    async fn begin(&self, platform: &str, callback_url: &str) -> Result<ConnectGrant, EvidenceError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        self.callbacks.lock().push(callback_url.to_string());
        Ok(ConnectGrant {
            request_id: format!("req-{}", n),
            authorization_url: format!(
                "https://connect.example/{}?redirect={}",
                platform,
                urlencoding::encode(callback_url)
            ),
        })
    }
}

/// Extract and decode a query parameter from a URL.
pub fn query_param(url: &str, name: &str) -> Option<String> {
    let query = url.split_once('?')?.1;
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| urlencoding::decode(value).ok().map(|v| v.into_owned()))?
    })
}

/// A fixed point in time: 2024-01-01T00:00:00Z.
pub fn epoch() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
}

/// Context pinned to [`epoch`].
pub fn pinned_context() -> (FlowContext, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(epoch()));
    (FlowContext::new(clock.clone()), clock)
}

pub const ADDRESS: &str = "0x5867B46bD12E476F32dF4Aaf0F8E8d1A3E2cC9a6";
pub const ADDRESS_LOWER: &str = "0x5867b46bd12e476f32df4aaf0f8e8d1a3e2cc9a6";
