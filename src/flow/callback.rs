//! Redirect callback routing.
//!
//! A flow waiting for an external redirect registers its correlation id with
//! the [`CallbackRouter`] and receives the redirect's query fields through a
//! oneshot channel. The correlation id travels through the external service
//! inside a signed `state` parameter:
//!
//! ```text
//! state = <correlation id> "." hex(HMAC-SHA256(secret, correlation id)[..16])
//! ```
//!
//! Callbacks whose state does not verify are dropped without touching any
//! waiter.

use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::oneshot;

type HmacSha256 = Hmac<Sha256>;

/// Query parameter carrying the signed correlation id.
pub const STATE_PARAM: &str = "state";

/// Length of the truncated signature in bytes.
const SIGNATURE_LEN: usize = 16;

/// Query fields of a redirect callback.
pub type CallbackFields = BTreeMap<String, String>;

/// Error signing a correlation id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Callback signing key rejected: {0}")]
pub struct SigningError(String);

/// What happened to a delivered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Routed to its waiting flow.
    Delivered,
    /// Signature valid, but no flow is waiting for the id.
    UnknownCorrelation,
    /// Missing or forged `state`.
    BadSignature,
}

/// Signs and verifies correlation ids.
#[derive(Clone)]
pub struct StateSigner {
    secret: Vec<u8>,
}

impl std::fmt::Debug for StateSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("StateSigner(***)")
    }
}

impl StateSigner {
    /// Create a signer.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn mac(&self, correlation_id: &str) -> Result<HmacSha256, SigningError> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| SigningError(e.to_string()))?;
        mac.update(correlation_id.as_bytes());
        Ok(mac)
    }

    /// Produce the `state` value for a correlation id.
    pub fn sign(&self, correlation_id: &str) -> Result<String, SigningError> {
        let tag = self.mac(correlation_id)?.finalize().into_bytes();
        Ok(format!("{}.{}", correlation_id, hex::encode(&tag[..SIGNATURE_LEN])))
    }

    /// Extract the correlation id from a `state` value if its signature holds.
    ///
    /// Comparison is constant-time.
    pub fn verify<'a>(&self, state: &'a str) -> Option<&'a str> {
        let (correlation_id, signature) = state.rsplit_once('.')?;
        let signature = hex::decode(signature).ok()?;
        if signature.len() != SIGNATURE_LEN {
            return None;
        }
        self.mac(correlation_id)
            .ok()?
            .verify_truncated_left(&signature)
            .ok()
            .map(|_| correlation_id)
    }
}

/// Routes redirect callbacks to the flows waiting for them.
#[derive(Debug)]
pub struct CallbackRouter {
    signer: StateSigner,
    pending: Mutex<HashMap<String, oneshot::Sender<CallbackFields>>>,
}

impl CallbackRouter {
    /// Create a router signing with `secret`.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            signer: StateSigner::new(secret),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Signed `state` value for a correlation id.
    pub fn sign(&self, correlation_id: &str) -> Result<String, SigningError> {
        self.signer.sign(correlation_id)
    }

    /// Wait for the callback of `correlation_id`.
    ///
    /// Registering the same id twice replaces the earlier waiter, whose
    /// receiver then resolves with an error.
    pub fn register(&self, correlation_id: &str) -> oneshot::Receiver<CallbackFields> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(correlation_id.to_string(), tx);
        rx
    }

    /// Stop waiting for `correlation_id`.
    pub fn deregister(&self, correlation_id: &str) -> bool {
        self.pending.lock().remove(correlation_id).is_some()
    }

    /// Number of flows waiting for a callback.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Deliver the query fields of a redirect.
    pub fn deliver(&self, fields: CallbackFields) -> Delivery {
        let correlation_id = match fields
            .get(STATE_PARAM)
            .and_then(|state| self.signer.verify(state))
        {
            Some(id) => id.to_string(),
            None => {
                tracing::warn!(target: "stamp_kernel::flow", "callback rejected: bad state signature");
                return Delivery::BadSignature;
            }
        };

        let waiter = self.pending.lock().remove(&correlation_id);
        match waiter {
            Some(tx) => match tx.send(fields) {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::UnknownCorrelation,
            },
            None => {
                tracing::debug!(
                    target: "stamp_kernel::flow",
                    correlation_id = %correlation_id,
                    "callback for unknown correlation id"
                );
                Delivery::UnknownCorrelation
            }
        }
    }
}
