//! Stamp scoring.
//!
//! Turns verification outcomes into per-platform points and then into the
//! ranked, categorized view shown to users:
//!
//! ```text
//! StampWeights + verified providers ──score_platforms──▶ [PlatformScoreSpec]
//!                                                              │
//!                                              ScoringAggregator::aggregate
//!                                                              ▼
//!                                                       AggregateView
//! ```
//!
//! Nothing here fails. Missing weights, unknown platforms and empty inputs
//! all degrade to zero points.

pub mod aggregator;
pub mod categories;
pub mod weights;

use std::collections::BTreeSet;

use crate::types::{PlatformGroupSpec, PlatformScoreSpec, PlatformSpec};

pub use aggregator::{AggregateView, ScoringAggregator, SelectedProviders, FEATURED_PREFIX};
pub use categories::default_platform_categories;
pub use weights::{display_weight, StampWeights, WeightValue};

/// Points per platform.
///
/// `possible` sums the weights of every provider the platform offers;
/// `earned` sums the weights of the providers in `verified`.
pub fn score_platforms(
    platforms: &[PlatformSpec],
    weights: &StampWeights,
    verified: &BTreeSet<String>,
) -> Vec<PlatformScoreSpec> {
    platforms
        .iter()
        .map(|platform| {
            let (earned, possible) = platform.provider_ids().fold((0.0, 0.0), |(earned, possible), id| {
                let weight = weights.weight(id);
                let earned = if verified.contains(id) { earned + weight } else { earned };
                (earned, possible + weight)
            });
            PlatformScoreSpec::new(&platform.platform, earned, possible)
                .with_display(&platform.name, &platform.description)
        })
        .collect()
}

/// Provider groups restricted to providers with a positive weight.
///
/// Groups left without providers are dropped.
pub fn included_providers(groups: &[PlatformGroupSpec], weights: &StampWeights) -> Vec<PlatformGroupSpec> {
    groups
        .iter()
        .filter_map(|group| {
            let providers: Vec<_> = group
                .providers
                .iter()
                .filter(|provider| weights.includes(&provider.name))
                .cloned()
                .collect();
            (!providers.is_empty()).then(|| PlatformGroupSpec::new(&group.platform_group, providers))
        })
        .collect()
}

/// Platform ids with at least one verified provider.
pub fn selected_providers(platforms: &[PlatformSpec], verified: &BTreeSet<String>) -> SelectedProviders {
    platforms
        .iter()
        .map(|platform| {
            let ids = platform
                .provider_ids()
                .filter(|id| verified.contains(*id))
                .map(str::to_string)
                .collect();
            (platform.platform.clone(), ids)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProviderSpec;

    fn idena() -> PlatformSpec {
        PlatformSpec {
            platform: "Idena".to_string(),
            name: "Idena".to_string(),
            description: "Connect to Idena to verify your identity".to_string(),
            website: None,
            groups: vec![
                PlatformGroupSpec::new(
                    "Identity State",
                    vec![
                        ProviderSpec::new("IdenaState#Newbie", "Newbie"),
                        ProviderSpec::new("IdenaState#Verified", "Verified"),
                        ProviderSpec::new("IdenaState#Human", "Human"),
                    ],
                ),
                PlatformGroupSpec::new(
                    "Identity Stake",
                    vec![ProviderSpec::new("IdenaStake#1k", "more than 1k iDna")],
                ),
            ],
        }
    }

    #[test]
    fn test_score_platforms() {
        let weights = StampWeights::new()
            .with("IdenaState#Newbie", "1")
            .with("IdenaState#Verified", "2")
            .with("IdenaState#Human", 3.0)
            .with("IdenaStake#1k", "garbage");
        let verified: BTreeSet<String> = ["IdenaState#Verified".to_string()].into_iter().collect();

        let scores = score_platforms(&[idena()], &weights, &verified);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].possible_points(), 6.0);
        assert_eq!(scores[0].earned_points(), 2.0);
        assert_eq!(scores[0].name(), Some("Idena"));
    }

    #[test]
    fn test_included_providers_drops_zero_weights_and_empty_groups() {
        let weights = StampWeights::new()
            .with("IdenaState#Human", "0.5")
            .with("IdenaState#Newbie", "0");

        let groups = included_providers(&idena().groups, &weights);
        assert_eq!(groups.len(), 1);
        let ids: Vec<_> = groups[0].provider_ids().collect();
        assert_eq!(ids, vec!["IdenaState#Human"]);
    }

    #[test]
    fn test_selected_providers() {
        let verified: BTreeSet<String> = ["IdenaStake#1k".to_string()].into_iter().collect();
        let selected = selected_providers(&[idena()], &verified);
        assert_eq!(selected["Idena"], vec!["IdenaStake#1k".to_string()]);
    }
}
