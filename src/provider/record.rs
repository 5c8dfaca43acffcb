//! Record and credential-lifetime policies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::check::{lookup, scalar_to_string, CheckError};
use crate::evidence::RawEvidence;
use crate::types::{RequestPayload, VerificationRecord};

/// When a record is attached to the verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordWhen {
    /// Only on valid verdicts.
    #[default]
    OnSuccess,
    /// On every verdict that reached the evidence check.
    Always,
}

/// Which fields make up a provider's evidence record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPolicy {
    /// Include the subject address under `address`.
    #[serde(default)]
    pub address: bool,
    /// Record the address exactly as the caller sent it instead of the
    /// normalized subject.
    #[serde(default)]
    pub address_as_given: bool,
    /// Proof names copied verbatim from the payload.
    #[serde(default)]
    pub proofs: Vec<String>,
    /// Record key → JSON pointer into the evidence.
    #[serde(default)]
    pub evidence: BTreeMap<String, String>,
    /// Constant fields.
    #[serde(default)]
    pub fixed: BTreeMap<String, String>,
    /// When the record is attached.
    #[serde(default)]
    pub when: RecordWhen,
}

impl RecordPolicy {
    /// Record holding only the subject address.
    pub fn address_only() -> Self {
        Self {
            address: true,
            ..Self::default()
        }
    }

    /// Keep the caller's address casing in the record. Lookups still use the
    /// normalized subject.
    pub fn address_as_given(mut self) -> Self {
        self.address_as_given = true;
        self
    }

    /// Copy a proof into the record.
    pub fn with_proof(mut self, name: impl Into<String>) -> Self {
        self.proofs.push(name.into());
        self
    }

    /// Copy an evidence field into the record.
    pub fn with_evidence(mut self, key: impl Into<String>, pointer: impl Into<String>) -> Self {
        self.evidence.insert(key.into(), pointer.into());
        self
    }

    /// Add a constant field.
    pub fn with_fixed(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fixed.insert(key.into(), value.into());
        self
    }

    /// Attach the record on failed verdicts too.
    pub fn always(mut self) -> Self {
        self.when = RecordWhen::Always;
        self
    }

    /// Build the record.
    ///
    /// `subject` is the already-normalized address; `captured` holds fields
    /// contributed by the check.
    pub fn build(
        &self,
        subject: &str,
        payload: &RequestPayload,
        evidence: &RawEvidence,
        captured: &BTreeMap<String, String>,
    ) -> Result<VerificationRecord, CheckError> {
        let mut record = VerificationRecord::new();

        if self.address {
            let address = if self.address_as_given {
                payload.address.trim()
            } else {
                subject
            };
            record.insert("address".to_string(), address.to_string());
        }
        for name in &self.proofs {
            if let Some(value) = payload.proof(name) {
                record.insert(name.clone(), value.to_string());
            }
        }
        for (key, pointer) in &self.evidence {
            let value = lookup(evidence, pointer)?;
            let text = scalar_to_string(value).ok_or_else(|| CheckError::WrongType {
                pointer: pointer.clone(),
                expected: "scalar",
            })?;
            record.insert(key.clone(), text);
        }
        for (key, value) in self.fixed.iter().chain(captured) {
            record.insert(key.clone(), value.clone());
        }

        Ok(record)
    }
}

/// Lifetime of the credential a valid verdict backs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExpiryRule {
    /// Fixed number of seconds.
    Fixed {
        /// Lifetime in seconds.
        seconds: i64,
    },
    /// Until an RFC 3339 timestamp found in the evidence.
    UntilEvidence {
        /// JSON pointer to the timestamp.
        pointer: String,
    },
}

impl ExpiryRule {
    /// Seconds from `now` until expiry, floored at zero.
    pub fn seconds_from(&self, evidence: &RawEvidence, now: DateTime<Utc>) -> Result<i64, CheckError> {
        match self {
            Self::Fixed { seconds } => Ok((*seconds).max(0)),
            Self::UntilEvidence { pointer } => {
                let until = lookup(evidence, pointer)?
                    .as_str()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .ok_or_else(|| CheckError::WrongType {
                        pointer: pointer.clone(),
                        expected: "RFC 3339 timestamp",
                    })?;
                Ok((until.with_timezone(&Utc) - now).num_seconds().max(0))
            }
        }
    }
}
