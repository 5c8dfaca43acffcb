//! Ordered tier hierarchies for threshold providers.
//!
//! A provider for tier T accepts evidence at T or any higher tier. Rejections
//! list every acceptable tier in hierarchy order, e.g.
//!
//! ```text
//! State "Newbie" does not match acceptable state(s) Verified, Human
//! ```

use serde::{Deserialize, Serialize};

/// Error declaring a tier that the hierarchy does not contain.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Tier {tier} is not part of the {label} hierarchy")]
pub struct UnknownTier {
    /// Requested tier name.
    pub tier: String,
    /// Hierarchy label.
    pub label: String,
}

/// An ordered enumeration of tiers, lowest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierHierarchy {
    /// Human label used in rejection messages ("State").
    label: String,
    /// Record key the accepted tier is stored under ("state").
    record_key: String,
    /// Tier names, lowest rank first.
    tiers: Vec<String>,
}

impl TierHierarchy {
    /// Create a hierarchy. `tiers` are listed lowest first.
    pub fn new<I, S>(label: impl Into<String>, record_key: impl Into<String>, tiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            label: label.into(),
            record_key: record_key.into(),
            tiers: tiers.into_iter().map(Into::into).collect(),
        }
    }

    /// Label used in messages.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Record key for the accepted tier.
    pub fn record_key(&self) -> &str {
        &self.record_key
    }

    /// All tiers, lowest first.
    pub fn tiers(&self) -> &[String] {
        &self.tiers
    }

    /// Rank of a tier (0 = lowest), or `None` when unknown.
    pub fn rank(&self, tier: &str) -> Option<usize> {
        self.tiers.iter().position(|t| t == tier)
    }

    /// Tiers at or above `required`, in hierarchy order.
    pub fn acceptable(&self, required: &str) -> Result<&[String], UnknownTier> {
        let rank = self.require_rank(required)?;
        Ok(&self.tiers[rank..])
    }

    /// Compare fetched evidence against a required tier.
    ///
    /// Returns `Ok(Ok(()))` when `evidence` ranks at or above `required`,
    /// `Ok(Err(message))` with the rejection message otherwise. Evidence tiers
    /// outside the hierarchy are rejected.
    pub fn evaluate(&self, required: &str, evidence: &str) -> Result<Result<(), String>, UnknownTier> {
        let required_rank = self.require_rank(required)?;
        match self.rank(evidence) {
            Some(rank) if rank >= required_rank => Ok(Ok(())),
            _ => Ok(Err(format!(
                "{} \"{}\" does not match acceptable {}(s) {}",
                self.label,
                evidence,
                self.label.to_lowercase(),
                self.tiers[required_rank..].join(", ")
            ))),
        }
    }

    fn require_rank(&self, required: &str) -> Result<usize, UnknownTier> {
        self.rank(required).ok_or_else(|| UnknownTier {
            tier: required.to_string(),
            label: self.label.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn states() -> TierHierarchy {
        TierHierarchy::new("State", "state", ["Newbie", "Verified", "Human"])
    }

    #[test]
    fn test_higher_tier_is_accepted() {
        let hierarchy = states();
        assert_eq!(hierarchy.evaluate("Verified", "Human"), Ok(Ok(())));
        assert_eq!(hierarchy.evaluate("Verified", "Verified"), Ok(Ok(())));
        assert_eq!(hierarchy.evaluate("Newbie", "Human"), Ok(Ok(())));
    }

    #[test]
    fn test_lower_tier_lists_acceptable_tiers_in_order() {
        let hierarchy = states();
        assert_eq!(
            hierarchy.evaluate("Verified", "Newbie"),
            Ok(Err(
                "State \"Newbie\" does not match acceptable state(s) Verified, Human".to_string()
            ))
        );
    }

    #[test]
    fn test_unknown_evidence_tier_is_rejected() {
        let hierarchy = states();
        let verdict = hierarchy.evaluate("Newbie", "Suspended").unwrap();
        assert!(verdict.is_err());
    }

    #[test]
    fn test_unknown_required_tier_is_a_configuration_error() {
        let hierarchy = states();
        assert!(hierarchy.evaluate("Alien", "Human").is_err());
        assert_eq!(
            hierarchy.acceptable("Human").unwrap(),
            &["Human".to_string()][..]
        );
    }
}
