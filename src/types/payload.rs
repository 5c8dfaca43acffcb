//! Verification request payloads.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Well-known proof keys shared between flows and providers.
pub mod proof_keys {
    /// OAuth authorization code returned on the redirect.
    pub const CODE: &str = "code";
    /// Session key of a cached sign-in challenge.
    pub const SESSION_KEY: &str = "sessionKey";
    /// Request id issued by an external connect service.
    pub const REQUEST_ID: &str = "requestID";
    /// Allow-list name an address is checked against.
    pub const ALLOW_LIST: &str = "allowList";
}

/// Caller-supplied input for one verification attempt.
///
/// The payload is never mutated by providers; normalization happens on read
/// (see [`RequestPayload::normalized_address`]).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestPayload {
    /// Address (or other subject identifier) making the claim.
    pub address: String,
    /// Proof values keyed by name (OAuth code, session key, ...).
    #[serde(default)]
    pub proofs: BTreeMap<String, String>,
    /// Payload format version.
    #[serde(default)]
    pub version: String,
    /// Target provider id, when the payload travels without an envelope.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
}

impl RequestPayload {
    /// Current payload version.
    pub const VERSION: &'static str = "0.0.0";

    /// Create a payload for an address with no proofs.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            proofs: BTreeMap::new(),
            version: Self::VERSION.to_string(),
            provider: None,
        }
    }

    /// Add a proof value.
    pub fn with_proof(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.proofs.insert(key.into(), value.into());
        self
    }

    /// Set the target provider id.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    /// Lowercase, trimmed address.
    pub fn normalized_address(&self) -> String {
        normalize_address(&self.address)
    }

    /// Get a non-empty proof value.
    pub fn proof(&self, key: &str) -> Option<&str> {
        self.proofs
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Whether the address is a 20-byte hex EVM address.
    pub fn has_evm_address(&self) -> bool {
        is_evm_address(self.address.trim())
    }
}

/// Lowercase and trim an address.
pub fn normalize_address(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Check whether `address` is `0x` followed by 40 hex characters.
pub fn is_evm_address(address: &str) -> bool {
    static PATTERN: OnceLock<Option<regex_lite::Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| regex_lite::Regex::new(r"^0x[0-9a-fA-F]{40}$").ok())
        .as_ref()
        .map(|re| re.is_match(address))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_address_does_not_mutate() {
        let payload = RequestPayload::new(" 0xcF314CE817E25b4F784bC1f24c9A79A525fEC50f ");
        assert_eq!(
            payload.normalized_address(),
            "0xcf314ce817e25b4f784bc1f24c9a79a525fec50f"
        );
        assert_eq!(payload.address, " 0xcF314CE817E25b4F784bC1f24c9A79A525fEC50f ");
    }

    #[test]
    fn test_empty_proof_is_absent() {
        let payload = RequestPayload::new("0x0")
            .with_proof(proof_keys::CODE, "   ")
            .with_proof(proof_keys::SESSION_KEY, "abc");

        assert_eq!(payload.proof(proof_keys::CODE), None);
        assert_eq!(payload.proof(proof_keys::SESSION_KEY), Some("abc"));
        assert_eq!(payload.proof("missing"), None);
    }

    #[test]
    fn test_evm_address_format() {
        assert!(is_evm_address("0x000aB43e658935BA39504a1424b01756c1E9644c"));
        assert!(!is_evm_address("FAKE_ADDRESS"));
        assert!(!is_evm_address("0x0"));
    }

    #[test]
    fn test_payload_wire_format() {
        let payload: RequestPayload = serde_json::from_str(
            r#"{"address":"0xabc","type":"Google","proofs":{"code":"c"},"version":"0.0.0"}"#,
        )
        .unwrap();

        assert_eq!(payload.provider.as_deref(), Some("Google"));
        assert_eq!(payload.proof("code"), Some("c"));
    }
}
