//! The provider contract.
//!
//! A provider is a single verification unit: given a [`RequestPayload`] it
//! produces a [`VerificationResult`]. There are three kinds, dispatched by
//! the [`Provider`] enum:
//!
//! | Kind | External calls | Required proof |
//! |------|----------------|----------------|
//! | [`StatelessProvider`] | one evidence lookup | per config |
//! | [`OAuthExchangeProvider`] | code exchange, then profile lookup | `code` |
//! | [`SessionBackedProvider`] | session load, then one evidence lookup | `sessionKey` |
//!
//! ## Error semantics
//!
//! - Claim not met: `Ok` with `valid: false` and human-readable errors
//! - Malformed payload (missing proof, bad address): `Ok` with `valid: false`,
//!   no external call
//! - Missing or expired session: `Ok` with `valid: false`
//!   ([`SESSION_UNAVAILABLE`]), no evidence lookup
//! - Evidence source failure or unusable evidence:
//!   `Err(ProviderError::ExternalVerification)`
//!
//! Providers are declared as data ([`ProviderConfig`]): an [`EvidenceCheck`],
//! a [`RecordPolicy`] and an optional [`ExpiryRule`].

pub mod check;
pub mod oauth;
pub mod record;
pub mod registry;
pub mod session_backed;
pub mod stateless;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::clock::{Clock, SystemClock};
use crate::evidence::RawEvidence;
use crate::telemetry::{self, VerificationOutcome};
use crate::types::{is_evm_address, RequestPayload, VerificationResult};

pub use check::{CheckError, CheckOutcome, EvidenceCheck};
pub use oauth::OAuthExchangeProvider;
pub use record::{ExpiryRule, RecordPolicy, RecordWhen};
pub use registry::{ProviderDescriptor, ProviderRegistry};
pub use session_backed::SessionBackedProvider;
pub use stateless::StatelessProvider;

/// Error reported when a session-backed provider finds no usable session.
pub const SESSION_UNAVAILABLE: &str = "Session expired or not found";

/// Error reported when the subject is not an EVM address.
pub const INVALID_ADDRESS: &str = "Address is not a valid EVM address";

/// Provider failures that are not a verdict.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// The evidence source failed or returned unusable evidence.
    #[error("{message}")]
    ExternalVerification {
        /// Provider id.
        provider: String,
        /// Message naming the platform and the underlying cause.
        message: String,
    },
    /// No provider is registered under the id.
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),
    /// A provider with the same id is already registered.
    #[error("Provider already registered: {0}")]
    DuplicateProvider(String),
    /// The provider declaration can never evaluate.
    #[error("Invalid configuration for {provider}: {message}")]
    InvalidConfig {
        /// Provider id.
        provider: String,
        /// What is wrong.
        message: String,
    },
    /// The claim was met but the record policy produced no fields.
    #[error("Provider {provider} met its claim without producing a record")]
    EmptyRecord {
        /// Provider id.
        provider: String,
    },
}

impl ProviderError {
    /// Whether the error comes from an external collaborator.
    pub fn is_external(&self) -> bool {
        matches!(self, Self::ExternalVerification { .. })
    }
}

/// Per-request context shared with providers.
#[derive(Debug, Clone)]
pub struct FlowContext {
    clock: Arc<dyn Clock>,
    trace_id: Option<String>,
}

impl FlowContext {
    /// Context with an explicit clock.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            trace_id: None,
        }
    }

    /// Attach a trace id used in log events.
    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    /// Current time according to the context clock.
    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    /// Clock handle.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Trace id, if any.
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }
}

impl Default for FlowContext {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

/// Provider kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// One evidence lookup per call.
    Stateless,
    /// OAuth code exchange.
    OAuthExchange,
    /// Resumes a cached session.
    SessionBacked,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stateless => "stateless",
            Self::OAuthExchange => "oauth_exchange",
            Self::SessionBacked => "session_backed",
        })
    }
}

/// Declarative provider definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider id ("IdenaState#Verified").
    pub id: String,
    /// Platform display name ("Idena").
    pub platform: String,
    /// Name used in external error messages when it differs from the
    /// platform ("Idena Status").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_label: Option<String>,
    /// Claim tested against the evidence.
    pub check: EvidenceCheck,
    /// Record contents.
    #[serde(default)]
    pub record: RecordPolicy,
    /// Credential lifetime for valid verdicts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<ExpiryRule>,
    /// Proofs that must be present and non-empty.
    #[serde(default)]
    pub required_proofs: Vec<String>,
    /// Replaces check errors on a failed verdict.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
    /// Reject subjects that are not EVM addresses before any lookup.
    #[serde(default)]
    pub require_evm_address: bool,
}

impl ProviderConfig {
    /// Create a config with an address-only record.
    pub fn new(id: impl Into<String>, platform: impl Into<String>, check: EvidenceCheck) -> Self {
        Self {
            id: id.into(),
            platform: platform.into(),
            error_label: None,
            check,
            record: RecordPolicy::address_only(),
            expiry: None,
            required_proofs: Vec::new(),
            failure_message: None,
            require_evm_address: false,
        }
    }

    /// Set the record policy.
    pub fn with_record(mut self, record: RecordPolicy) -> Self {
        self.record = record;
        self
    }

    /// Set the expiry rule.
    pub fn with_expiry(mut self, expiry: ExpiryRule) -> Self {
        self.expiry = Some(expiry);
        self
    }

    /// Require a proof.
    pub fn requires_proof(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.required_proofs.contains(&key) {
            self.required_proofs.push(key);
        }
        self
    }

    /// Name the provider differently in external error messages.
    pub fn with_error_label(mut self, label: impl Into<String>) -> Self {
        self.error_label = Some(label.into());
        self
    }

    /// Replace check errors with a fixed message.
    pub fn with_failure_message(mut self, message: impl Into<String>) -> Self {
        self.failure_message = Some(message.into());
        self
    }

    /// Require the subject to be an EVM address.
    pub fn requiring_evm_address(mut self) -> Self {
        self.require_evm_address = true;
        self
    }

    /// Reject declarations that can never evaluate.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.id.trim().is_empty() {
            return Err(ProviderError::InvalidConfig {
                provider: self.id.clone(),
                message: "provider id is empty".to_string(),
            });
        }
        self.check
            .validate()
            .map_err(|e| ProviderError::InvalidConfig {
                provider: self.id.clone(),
                message: e.to_string(),
            })
    }

    /// Malformed-payload verdict, if the payload lacks a required proof.
    pub(crate) fn missing_proof(&self, payload: &RequestPayload) -> Option<VerificationResult> {
        self.required_proofs
            .iter()
            .find(|key| payload.proof(key).is_none())
            .map(|key| VerificationResult::claim_not_met(format!("Missing required proof: {}", key)))
    }

    /// Malformed-payload verdict, if the subject must be an EVM address and is not.
    pub(crate) fn invalid_subject(&self, subject: &str) -> Option<VerificationResult> {
        (self.require_evm_address && !is_evm_address(subject))
            .then(|| VerificationResult::claim_not_met(INVALID_ADDRESS))
    }

    /// External verification error carrying the source's error and the subject:
    ///
    /// ```text
    /// Error verifying Idena Status. It is likely that you do not qualify for this stamp. {"error":{"message":"no data found"},"address":"0x11..."}
    /// ```
    pub(crate) fn external(&self, subject: &str, error: Value) -> ProviderError {
        let label = self.error_label.as_deref().unwrap_or(self.platform.as_str());
        ProviderError::ExternalVerification {
            provider: self.id.clone(),
            message: format!(
                "Error verifying {}. It is likely that you do not qualify for this stamp. {{\"error\":{},\"address\":{}}}",
                label,
                error,
                Value::from(subject)
            ),
        }
    }

    /// External verification error for a failed collaborator call.
    pub(crate) fn external_cause(&self, subject: &str, cause: impl fmt::Display) -> ProviderError {
        self.external(subject, json!({ "message": cause.to_string() }))
    }

    fn unusable(&self, subject: &str, err: CheckError) -> ProviderError {
        match err {
            CheckError::Missing {
                reported: Some(reported),
                ..
            } => self.external(subject, reported),
            other => self.external_cause(subject, other),
        }
    }

    /// Turn fetched evidence into a verdict.
    pub(crate) fn conclude(
        &self,
        subject: &str,
        payload: &RequestPayload,
        evidence: &RawEvidence,
        ctx: &FlowContext,
    ) -> Result<VerificationResult, ProviderError> {
        let outcome = self.check.evaluate(evidence).map_err(|e| self.unusable(subject, e))?;

        match outcome {
            CheckOutcome::Met { captured } => {
                let record = self
                    .record
                    .build(subject, payload, evidence, &captured)
                    .map_err(|e| self.unusable(subject, e))?;
                let result = VerificationResult::valid(record).map_err(|_| ProviderError::EmptyRecord {
                    provider: self.id.clone(),
                })?;

                match &self.expiry {
                    Some(rule) => {
                        let seconds = rule
                            .seconds_from(evidence, ctx.now())
                            .map_err(|e| self.unusable(subject, e))?;
                        Ok(result.with_expiry(seconds))
                    }
                    None => Ok(result),
                }
            }
            CheckOutcome::NotMet { errors } => {
                let errors = match &self.failure_message {
                    Some(message) => vec![message.clone()],
                    None => errors,
                };
                match self.record.when {
                    RecordWhen::OnSuccess => Ok(VerificationResult::invalid(errors)),
                    RecordWhen::Always => {
                        let record = self
                            .record
                            .build(subject, payload, evidence, &Default::default())
                            .map_err(|e| self.unusable(subject, e))?;
                        Ok(VerificationResult::invalid_with_record(record, errors))
                    }
                }
            }
        }
    }
}

/// A verification unit.
#[derive(Clone)]
pub enum Provider {
    /// One evidence lookup per call.
    Stateless(StatelessProvider),
    /// OAuth code exchange followed by a profile lookup.
    OAuthExchange(OAuthExchangeProvider),
    /// Resumes a cached multi-step session.
    SessionBacked(SessionBackedProvider),
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Provider")
            .field("id", &self.id())
            .field("kind", &self.kind())
            .finish()
    }
}

impl Provider {
    /// Declarative definition.
    pub fn config(&self) -> &ProviderConfig {
        match self {
            Self::Stateless(p) => p.config(),
            Self::OAuthExchange(p) => p.config(),
            Self::SessionBacked(p) => p.config(),
        }
    }

    /// Provider id.
    pub fn id(&self) -> &str {
        &self.config().id
    }

    /// Platform display name.
    pub fn platform(&self) -> &str {
        &self.config().platform
    }

    /// Provider kind.
    pub fn kind(&self) -> ProviderKind {
        match self {
            Self::Stateless(_) => ProviderKind::Stateless,
            Self::OAuthExchange(_) => ProviderKind::OAuthExchange,
            Self::SessionBacked(_) => ProviderKind::SessionBacked,
        }
    }

    /// Verify a payload.
    ///
    /// `Err` is reserved for external failures; every other outcome is a
    /// verdict.
    pub async fn verify(
        &self,
        payload: &RequestPayload,
        ctx: &FlowContext,
    ) -> Result<VerificationResult, ProviderError> {
        let started = Instant::now();

        let result = match self {
            Self::Stateless(p) => p.verify(payload, ctx).await,
            Self::OAuthExchange(p) => p.verify(payload, ctx).await,
            Self::SessionBacked(p) => p.verify(payload, ctx).await,
        };

        let outcome = match &result {
            Ok(r) if r.is_valid() => VerificationOutcome::Valid,
            Ok(_) => VerificationOutcome::Invalid,
            Err(_) => VerificationOutcome::Error,
        };
        telemetry::record_verification(self.id(), outcome, started.elapsed().as_millis() as u64);

        if let Err(err) = &result {
            tracing::warn!(
                provider = self.id(),
                trace_id = ctx.trace_id().unwrap_or(""),
                error = %err,
                "provider verification failed"
            );
        }
        result
    }
}

impl From<StatelessProvider> for Provider {
    fn from(p: StatelessProvider) -> Self {
        Self::Stateless(p)
    }
}

impl From<OAuthExchangeProvider> for Provider {
    fn from(p: OAuthExchangeProvider) -> Self {
        Self::OAuthExchange(p)
    }
}

impl From<SessionBackedProvider> for Provider {
    fn from(p: SessionBackedProvider) -> Self {
        Self::SessionBacked(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn allow_list_config() -> ProviderConfig {
        ProviderConfig::new(
            "AllowList",
            "AllowList",
            EvidenceCheck::Flag {
                pointer: "/on_list".to_string(),
            },
        )
        .with_record(RecordPolicy::address_only().with_proof("allowList").always())
        .requires_proof("allowList")
    }

    #[test]
    fn test_missing_proof_verdict() {
        let config = allow_list_config();
        let verdict = config.missing_proof(&RequestPayload::new("0x1")).unwrap();
        assert!(!verdict.is_valid());
        assert_eq!(verdict.errors(), &["Missing required proof: allowList".to_string()]);

        let payload = RequestPayload::new("0x1").with_proof("allowList", "test");
        assert!(config.missing_proof(&payload).is_none());
    }

    #[test]
    fn test_conclude_always_attaches_record() {
        let config = allow_list_config();
        let payload = RequestPayload::new("0xAbC").with_proof("allowList", "test");

        let verdict = config
            .conclude("0xabc", &payload, &json!({"on_list": false}), &FlowContext::default())
            .unwrap();

        assert!(!verdict.is_valid());
        let record = verdict.record().unwrap();
        assert_eq!(record.get("address").map(String::as_str), Some("0xabc"));
        assert_eq!(record.get("allowList").map(String::as_str), Some("test"));
    }

    #[test]
    fn test_conclude_maps_unusable_evidence_to_external_error() {
        let config = allow_list_config();
        let payload = RequestPayload::new("0x1").with_proof("allowList", "test");

        let err = config
            .conclude("0x1", &payload, &json!({"unexpected": 1}), &FlowContext::default())
            .unwrap_err();
        assert!(err.is_external());
        assert_eq!(
            err.to_string(),
            "Error verifying AllowList. It is likely that you do not qualify for this stamp. \
             {\"error\":{\"message\":\"Evidence is missing /on_list\"},\"address\":\"0x1\"}"
        );
    }

    #[test]
    fn test_empty_record_policy_is_reported() {
        let config = ProviderConfig::new(
            "Bare",
            "Bare",
            EvidenceCheck::Flag {
                pointer: "/ok".to_string(),
            },
        )
        .with_record(RecordPolicy::default());

        let err = config
            .conclude("0x1", &RequestPayload::new("0x1"), &json!({"ok": true}), &FlowContext::default())
            .unwrap_err();
        assert_eq!(
            err,
            ProviderError::EmptyRecord {
                provider: "Bare".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_subject() {
        let config = allow_list_config().requiring_evm_address();
        assert!(config.invalid_subject("fake_address").is_some());
        assert!(config
            .invalid_subject("0x000ab43e658935ba39504a1424b01756c1e9644c")
            .is_none());
    }

    #[test]
    fn test_validate_rejects_empty_id() {
        let config = ProviderConfig::new(
            " ",
            "X",
            EvidenceCheck::Flag {
                pointer: "/ok".to_string(),
            },
        );
        assert!(matches!(config.validate(), Err(ProviderError::InvalidConfig { .. })));
    }
}
