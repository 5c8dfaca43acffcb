//! Providers answered by a single evidence lookup.

use std::sync::Arc;

use super::{FlowContext, ProviderConfig, ProviderError};
use crate::evidence::{EvidenceRequest, EvidenceSource};
use crate::types::{RequestPayload, VerificationResult};

/// Provider performing exactly one evidence lookup per verification.
#[derive(Clone)]
pub struct StatelessProvider {
    config: ProviderConfig,
    source: Arc<dyn EvidenceSource>,
}

impl StatelessProvider {
    /// Create a provider.
    pub fn new(config: ProviderConfig, source: Arc<dyn EvidenceSource>) -> Self {
        Self { config, source }
    }

    /// Declarative definition.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Verify a payload. The payload proofs travel as request parameters.
    pub async fn verify(
        &self,
        payload: &RequestPayload,
        ctx: &FlowContext,
    ) -> Result<VerificationResult, ProviderError> {
        if let Some(verdict) = self.config.missing_proof(payload) {
            return Ok(verdict);
        }

        let subject = payload.normalized_address();
        if let Some(verdict) = self.config.invalid_subject(&subject) {
            return Ok(verdict);
        }

        let request = EvidenceRequest::new(&self.config.id, &subject).with_params(payload.proofs.clone());
        let evidence = self
            .source
            .fetch_evidence(&request)
            .await
            .map_err(|e| self.config.external_cause(&subject, e))?;

        self.config.conclude(&subject, payload, &evidence, ctx)
    }
}
