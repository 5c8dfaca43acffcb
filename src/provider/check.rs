//! Evidence checks.
//!
//! A check reads one field of the raw evidence (addressed by a JSON pointer,
//! RFC 6901) and decides whether the claim is met. Checks never fail on a
//! negative answer; they fail only when the evidence itself is unusable.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::evidence::RawEvidence;
use crate::types::{TierHierarchy, UnknownTier};

/// The claim a provider tests its evidence against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvidenceCheck {
    /// Boolean at `pointer` must be `true`.
    Flag {
        /// JSON pointer into the evidence.
        pointer: String,
    },
    /// Tier name at `pointer` must rank at or above `required`.
    ///
    /// On success the *required* tier is captured under the hierarchy's
    /// record key.
    Tier {
        /// JSON pointer into the evidence.
        pointer: String,
        /// Ordered tiers.
        hierarchy: TierHierarchy,
        /// Minimum accepted tier.
        required: String,
    },
    /// Number (or numeric string) at `pointer` must be `>= minimum`.
    Threshold {
        /// JSON pointer into the evidence.
        pointer: String,
        /// Inclusive lower bound.
        minimum: f64,
        /// Quantity name used in rejections ("Stake").
        label: String,
    },
    /// String at `pointer` must equal `expected`.
    Equals {
        /// JSON pointer into the evidence.
        pointer: String,
        /// Expected value.
        expected: String,
    },
}

/// Result of evaluating a check against usable evidence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Claim met. `captured` is merged into the record.
    Met {
        /// Fields contributed by the check itself.
        captured: BTreeMap<String, String>,
    },
    /// Claim not met.
    NotMet {
        /// Human-readable reasons.
        errors: Vec<String>,
    },
}

impl CheckOutcome {
    fn met() -> Self {
        Self::Met {
            captured: BTreeMap::new(),
        }
    }

    fn not_met(error: impl Into<String>) -> Self {
        Self::NotMet {
            errors: vec![error.into()],
        }
    }

    /// Whether the claim was met.
    pub fn is_met(&self) -> bool {
        matches!(self, Self::Met { .. })
    }
}

/// The evidence could not be evaluated.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    /// The pointer resolved to nothing.
    #[error("Evidence is missing {pointer}")]
    Missing {
        /// Pointer that failed to resolve.
        pointer: String,
        /// The `error` member of the evidence, when the source answered with
        /// an error envelope instead of data.
        reported: Option<Value>,
    },
    /// The pointer resolved to a value of the wrong type.
    #[error("Evidence at {pointer} is not a {expected}")]
    WrongType {
        /// Pointer that resolved.
        pointer: String,
        /// Expected JSON type.
        expected: &'static str,
    },
}

/// Resolve `pointer` in `evidence`, keeping the source-side error when the
/// evidence is an `{"error": ...}` envelope.
pub(crate) fn lookup<'a>(evidence: &'a RawEvidence, pointer: &str) -> Result<&'a Value, CheckError> {
    evidence.pointer(pointer).ok_or_else(|| CheckError::Missing {
        pointer: pointer.to_string(),
        reported: evidence.get("error").cloned(),
    })
}

/// Render a scalar evidence value as a record string.
pub(crate) fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

impl EvidenceCheck {
    /// Pointer the check reads.
    pub fn pointer(&self) -> &str {
        match self {
            Self::Flag { pointer }
            | Self::Tier { pointer, .. }
            | Self::Threshold { pointer, .. }
            | Self::Equals { pointer, .. } => pointer,
        }
    }

    /// Reject configurations that can never evaluate.
    pub fn validate(&self) -> Result<(), UnknownTier> {
        match self {
            Self::Tier {
                hierarchy, required, ..
            } => hierarchy.acceptable(required).map(|_| ()),
            _ => Ok(()),
        }
    }

    /// Evaluate the check against raw evidence.
    pub fn evaluate(&self, evidence: &RawEvidence) -> Result<CheckOutcome, CheckError> {
        match self {
            Self::Flag { pointer } => {
                let flag = lookup(evidence, pointer)?
                    .as_bool()
                    .ok_or_else(|| wrong_type(pointer, "boolean"))?;
                if flag {
                    Ok(CheckOutcome::met())
                } else {
                    Ok(CheckOutcome::not_met(format!("{} is not satisfied", pointer)))
                }
            }
            Self::Tier {
                pointer,
                hierarchy,
                required,
            } => {
                let tier = lookup(evidence, pointer)?
                    .as_str()
                    .ok_or_else(|| wrong_type(pointer, "string"))?;
                // Unknown required tiers are rejected at registration.
                match hierarchy.evaluate(required, tier) {
                    Ok(Ok(())) => {
                        let mut captured = BTreeMap::new();
                        captured.insert(hierarchy.record_key().to_string(), required.clone());
                        Ok(CheckOutcome::Met { captured })
                    }
                    Ok(Err(message)) => Ok(CheckOutcome::not_met(message)),
                    Err(unknown) => Ok(CheckOutcome::not_met(unknown.to_string())),
                }
            }
            Self::Threshold {
                pointer,
                minimum,
                label,
            } => {
                let value = lookup(evidence, pointer)?;
                let amount = as_number(value).ok_or_else(|| wrong_type(pointer, "number"))?;
                if amount >= *minimum {
                    Ok(CheckOutcome::met())
                } else {
                    Ok(CheckOutcome::not_met(format!(
                        "{} {} is below the required {}",
                        label, amount, minimum
                    )))
                }
            }
            Self::Equals { pointer, expected } => {
                let actual = lookup(evidence, pointer)?
                    .as_str()
                    .ok_or_else(|| wrong_type(pointer, "string"))?;
                if actual == expected {
                    Ok(CheckOutcome::met())
                } else {
                    Ok(CheckOutcome::not_met(format!(
                        "Expected {} but found {}",
                        expected, actual
                    )))
                }
            }
        }
    }
}

fn wrong_type(pointer: &str, expected: &'static str) -> CheckError {
    CheckError::WrongType {
        pointer: pointer.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn idena_state(required: &str) -> EvidenceCheck {
        EvidenceCheck::Tier {
            pointer: "/state".to_string(),
            hierarchy: TierHierarchy::new("State", "state", ["Newbie", "Verified", "Human"]),
            required: required.to_string(),
        }
    }

    #[test]
    fn test_flag() {
        let check = EvidenceCheck::Flag {
            pointer: "/on_list".to_string(),
        };
        assert!(check.evaluate(&json!({"on_list": true})).unwrap().is_met());
        assert_eq!(
            check.evaluate(&json!({"on_list": false})).unwrap(),
            CheckOutcome::NotMet {
                errors: vec!["/on_list is not satisfied".to_string()]
            }
        );
        assert!(matches!(
            check.evaluate(&json!({"on_list": "yes"})),
            Err(CheckError::WrongType { .. })
        ));
    }

    #[test]
    fn test_tier_captures_required_tier() {
        let outcome = idena_state("Verified").evaluate(&json!({"state": "Human"})).unwrap();
        let CheckOutcome::Met { captured } = outcome else {
            panic!("expected met");
        };
        assert_eq!(captured.get("state").map(String::as_str), Some("Verified"));
    }

    #[test]
    fn test_tier_rejection_message() {
        let outcome = idena_state("Verified").evaluate(&json!({"state": "Newbie"})).unwrap();
        assert_eq!(
            outcome,
            CheckOutcome::NotMet {
                errors: vec![
                    "State \"Newbie\" does not match acceptable state(s) Verified, Human".to_string()
                ]
            }
        );
    }

    #[test]
    fn test_threshold_is_inclusive_and_accepts_numeric_strings() {
        let check = EvidenceCheck::Threshold {
            pointer: "/stake".to_string(),
            minimum: 10_000.0,
            label: "Stake".to_string(),
        };
        assert!(check.evaluate(&json!({"stake": 10000})).unwrap().is_met());
        assert!(check.evaluate(&json!({"stake": "105000.123"})).unwrap().is_met());
        assert!(!check.evaluate(&json!({"stake": "9999.99"})).unwrap().is_met());
    }

    #[test]
    fn test_equals() {
        let check = EvidenceCheck::Equals {
            pointer: "/tier".to_string(),
            expected: "premium".to_string(),
        };
        assert!(check.evaluate(&json!({"tier": "premium"})).unwrap().is_met());
        assert!(!check.evaluate(&json!({"tier": "free"})).unwrap().is_met());
    }

    #[test]
    fn test_missing_pointer_reports_source_error() {
        let err = idena_state("Newbie")
            .evaluate(&json!({"error": {"message": "no data found"}}))
            .unwrap_err();
        assert_eq!(
            err,
            CheckError::Missing {
                pointer: "/state".to_string(),
                reported: Some(json!({"message": "no data found"})),
            }
        );
    }

    #[test]
    fn test_validate_rejects_unknown_required_tier() {
        assert!(idena_state("Human").validate().is_ok());
        assert!(idena_state("Robot").validate().is_err());
    }

    #[test]
    fn test_serde_tagging() {
        let check = EvidenceCheck::Flag {
            pointer: "/on_list".to_string(),
        };
        let json = serde_json::to_value(&check).unwrap();
        assert_eq!(json, json!({"kind": "flag", "pointer": "/on_list"}));
        let back: EvidenceCheck = serde_json::from_value(json).unwrap();
        assert_eq!(back, check);
    }
}
