//! Providers resuming a cached sign-in session.
//!
//! The session is created in an earlier step (for example a signed
//! challenge) and carries the subject address plus whatever the evidence
//! source needs. Verification does not consume it, so one sign-in can back
//! several tier providers of the same platform.

use std::sync::Arc;

use super::{FlowContext, ProviderConfig, ProviderError, SESSION_UNAVAILABLE};
use crate::evidence::{EvidenceRequest, EvidenceSource};
use crate::session::{SessionCache, SessionKey};
use crate::telemetry;
use crate::types::{normalize_address, proof_keys, RequestPayload, VerificationResult};

/// Session field holding the signed-in address.
pub const ADDRESS_FIELD: &str = "address";

/// Provider backed by a session cache entry.
#[derive(Clone)]
pub struct SessionBackedProvider {
    config: ProviderConfig,
    source: Arc<dyn EvidenceSource>,
    sessions: Arc<dyn SessionCache>,
}

impl SessionBackedProvider {
    /// Create a provider. The `sessionKey` proof is always required.
    pub fn new(
        config: ProviderConfig,
        source: Arc<dyn EvidenceSource>,
        sessions: Arc<dyn SessionCache>,
    ) -> Self {
        Self {
            config: config.requires_proof(proof_keys::SESSION_KEY),
            source,
            sessions,
        }
    }

    /// Declarative definition.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Verify a payload referring to a cached session.
    pub async fn verify(
        &self,
        payload: &RequestPayload,
        ctx: &FlowContext,
    ) -> Result<VerificationResult, ProviderError> {
        if let Some(verdict) = self.config.missing_proof(payload) {
            return Ok(verdict);
        }
        let key = match payload.proof(proof_keys::SESSION_KEY) {
            Some(key) => SessionKey::new(key),
            None => return Ok(VerificationResult::claim_not_met(SESSION_UNAVAILABLE)),
        };

        let session = match self.sessions.load(&key).await {
            Ok(session) => session,
            Err(err) if err.is_missing() => {
                telemetry::record_session_miss(&self.config.id, key.as_str(), err.kind());
                return Ok(VerificationResult::claim_not_met(SESSION_UNAVAILABLE));
            }
            Err(err) => {
                return Err(self
                    .config
                    .external_cause(&payload.normalized_address(), err))
            }
        };

        let subject = session
            .field(ADDRESS_FIELD)
            .map(normalize_address)
            .unwrap_or_else(|| payload.normalized_address());
        if let Some(verdict) = self.config.invalid_subject(&subject) {
            return Ok(verdict);
        }

        let mut params = payload.proofs.clone();
        params.extend(session.fields().iter().map(|(k, v)| (k.clone(), v.clone())));

        let request = EvidenceRequest::new(&self.config.id, &subject).with_params(params);
        let evidence = self
            .source
            .fetch_evidence(&request)
            .await
            .map_err(|e| self.config.external_cause(&subject, e))?;

        self.config.conclude(&subject, payload, &evidence, ctx)
    }
}
