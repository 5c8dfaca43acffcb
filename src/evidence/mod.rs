//! External evidence capabilities.
//!
//! Providers never talk to third-party APIs directly. They go through one of
//! two collaborator traits:
//!
//! - [`EvidenceSource`] - a single "fetch verification evidence" lookup
//! - [`OAuthClient`] - authorization code exchange followed by a profile lookup
//!
//! Concrete HTTP implementations live in [`http`] behind the `http` feature.

#[cfg(feature = "http")]
pub mod http;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "http")]
pub use http::{HttpEvidenceSource, HttpOAuthClient, OAuthEndpoints};

/// Raw evidence as returned by the external source.
pub type RawEvidence = serde_json::Value;

/// Error reported by an evidence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvidenceError {
    /// The request never completed (network, DNS, timeout).
    #[error("Transport error: {0}")]
    Transport(String),
    /// The source answered with a non-success status.
    #[error("Status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },
    /// The response could not be understood.
    #[error("Malformed response: {0}")]
    Malformed(String),
}

/// One evidence lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvidenceRequest {
    /// Provider asking for evidence.
    pub provider: String,
    /// Normalized subject address.
    pub address: String,
    /// Extra parameters (proofs or session fields).
    pub params: BTreeMap<String, String>,
}

impl EvidenceRequest {
    /// Create a request without parameters.
    pub fn new(provider: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            address: address.into(),
            params: BTreeMap::new(),
        }
    }

    /// Attach parameters.
    pub fn with_params(mut self, params: BTreeMap<String, String>) -> Self {
        self.params = params;
        self
    }
}

/// Capability to fetch raw verification evidence.
#[async_trait]
pub trait EvidenceSource: Send + Sync {
    /// Perform exactly one lookup for `request`.
    async fn fetch_evidence(&self, request: &EvidenceRequest) -> Result<RawEvidence, EvidenceError>;
}

/// OAuth access token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    /// Wrap a token string.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Token value for the `Authorization` header.
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

/// Capability to complete an OAuth authorization-code exchange.
///
/// The two steps are strictly ordered: the profile request needs the token.
#[async_trait]
pub trait OAuthClient: Send + Sync {
    /// Exchange an authorization code for an access token.
    async fn exchange_code(&self, code: &str) -> Result<AccessToken, EvidenceError>;

    /// Fetch the authorized user's profile.
    async fn fetch_profile(&self, token: &AccessToken) -> Result<RawEvidence, EvidenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_token_is_redacted() {
        let token = AccessToken::new("secret access token");
        assert_eq!(format!("{:?}", token), "AccessToken(***)");
        assert_eq!(token.secret(), "secret access token");
    }

    #[test]
    fn test_evidence_error_messages() {
        let err = EvidenceError::Status {
            status: 503,
            body: "unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "Status 503: unavailable");
    }
}
