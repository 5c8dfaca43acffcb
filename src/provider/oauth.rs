//! OAuth authorization-code providers.
//!
//! The redirect delivers a `code` proof. Verification exchanges it for an
//! access token and then reads the user's profile; the second request needs
//! the first one's answer, so the steps never overlap.

use std::sync::Arc;

use super::{FlowContext, ProviderConfig, ProviderError};
use crate::evidence::OAuthClient;
use crate::types::{proof_keys, RequestPayload, VerificationResult};

/// Provider verifying an OAuth authorization code.
#[derive(Clone)]
pub struct OAuthExchangeProvider {
    config: ProviderConfig,
    client: Arc<dyn OAuthClient>,
}

impl OAuthExchangeProvider {
    /// Create a provider. The `code` proof is always required.
    pub fn new(config: ProviderConfig, client: Arc<dyn OAuthClient>) -> Self {
        Self {
            config: config.requires_proof(proof_keys::CODE),
            client,
        }
    }

    /// Declarative definition.
    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Verify a payload carrying an authorization code.
    pub async fn verify(
        &self,
        payload: &RequestPayload,
        ctx: &FlowContext,
    ) -> Result<VerificationResult, ProviderError> {
        if let Some(verdict) = self.config.missing_proof(payload) {
            return Ok(verdict);
        }
        let code = match payload.proof(proof_keys::CODE) {
            Some(code) => code,
            None => return Ok(VerificationResult::claim_not_met("Missing required proof: code")),
        };

        let subject = payload.normalized_address();
        if let Some(verdict) = self.config.invalid_subject(&subject) {
            return Ok(verdict);
        }

        let token = self
            .client
            .exchange_code(code)
            .await
            .map_err(|e| {
                self.config
                    .external_cause(&subject, format!("error requesting access token: {}", e))
            })?;
        let profile = self
            .client
            .fetch_profile(&token)
            .await
            .map_err(|e| {
                self.config
                    .external_cause(&subject, format!("error getting user info: {}", e))
            })?;

        self.config.conclude(&subject, payload, &profile, ctx)
    }
}
