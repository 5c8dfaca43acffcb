//! Verification verdicts.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Minimal evidence explaining why a claim succeeded.
pub type VerificationRecord = BTreeMap<String, String>;

/// Error building a [`VerificationResult`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResultError {
    /// A valid verdict was built without evidence.
    #[error("A valid verification result must carry a non-empty record")]
    EmptyRecord,
}

/// Verdict of a single provider verification.
///
/// A valid result always carries a non-empty record; the only way to build
/// one is [`VerificationResult::valid`], which enforces that. Deserialization
/// goes through the same check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "WireVerificationResult")]
pub struct VerificationResult {
    valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    record: Option<VerificationRecord>,
    #[serde(default)]
    errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_in_seconds: Option<i64>,
}

/// Unchecked wire shape of [`VerificationResult`].
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireVerificationResult {
    valid: bool,
    #[serde(default)]
    record: Option<VerificationRecord>,
    #[serde(default)]
    errors: Vec<String>,
    #[serde(default)]
    expires_in_seconds: Option<i64>,
}

impl TryFrom<WireVerificationResult> for VerificationResult {
    type Error = ResultError;

    fn try_from(wire: WireVerificationResult) -> Result<Self, Self::Error> {
        if wire.valid && wire.record.as_ref().map_or(true, |r| r.is_empty()) {
            return Err(ResultError::EmptyRecord);
        }
        Ok(Self {
            valid: wire.valid,
            record: wire.record,
            errors: wire.errors,
            expires_in_seconds: wire.expires_in_seconds,
        })
    }
}

impl VerificationResult {
    /// Successful verdict with its evidence record.
    pub fn valid(record: VerificationRecord) -> Result<Self, ResultError> {
        if record.is_empty() {
            return Err(ResultError::EmptyRecord);
        }
        Ok(Self {
            valid: true,
            record: Some(record),
            errors: Vec::new(),
            expires_in_seconds: None,
        })
    }

    /// Failed verdict with human-readable reasons.
    pub fn invalid(errors: Vec<String>) -> Self {
        Self {
            valid: false,
            record: None,
            errors,
            expires_in_seconds: None,
        }
    }

    /// Failed verdict with a single reason.
    pub fn claim_not_met(error: impl Into<String>) -> Self {
        Self::invalid(vec![error.into()])
    }

    /// Failed verdict that still reports the evidence it was checked with.
    ///
    /// Only providers that opt into `RecordWhen::Always` produce this shape.
    pub(crate) fn invalid_with_record(record: VerificationRecord, errors: Vec<String>) -> Self {
        Self {
            valid: false,
            record: Some(record),
            errors,
            expires_in_seconds: None,
        }
    }

    /// Attach a credential lifetime. Ignored on failed verdicts.
    pub fn with_expiry(mut self, seconds: i64) -> Self {
        if self.valid {
            self.expires_in_seconds = Some(seconds);
        }
        self
    }

    /// Whether the claim was met.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Evidence record, if any.
    pub fn record(&self) -> Option<&VerificationRecord> {
        self.record.as_ref()
    }

    /// Failure reasons (empty on success).
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Credential lifetime in seconds, if the provider sets one.
    pub fn expires_in_seconds(&self) -> Option<i64> {
        self.expires_in_seconds
    }
}
