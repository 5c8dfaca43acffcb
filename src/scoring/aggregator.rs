//! Ranking and categorization of platform scores.
//!
//! ## Ordering
//!
//! 1. Partition: a platform is *unverified* when it earned nothing and has
//!    no selected provider; everything else is *verified*.
//! 2. Unverified platforms come first, by possible points, highest first.
//! 3. Verified platforms follow, by remaining points (possible − earned),
//!    highest first.
//!
//! Both sorts are stable, so ties keep their input order.
//!
//! ## Grouping
//!
//! Categories are listed in configuration order; a platform appears in every
//! category that names it. A category is shown only if at least one of its
//! platforms offers points.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use super::categories::default_platform_categories;
use crate::fingerprint::fingerprint_hex;
use crate::types::{Category, PlatformCategory, PlatformScoreSpec};

/// Platform id prefix of the featured allow-list platform.
pub const FEATURED_PREFIX: &str = "AllowList";

/// Platform id → providers the user has selected or verified.
pub type SelectedProviders = BTreeMap<String, Vec<String>>;

/// Display-ready aggregation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateView {
    /// The allow-list platform, shown apart from the categories.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub featured: Option<PlatformScoreSpec>,
    /// Visible categories in display order.
    pub categories: Vec<Category>,
}

/// Folds platform scores into ordered categories.
#[derive(Debug, Clone)]
pub struct ScoringAggregator {
    categories: Vec<PlatformCategory>,
}

impl Default for ScoringAggregator {
    fn default() -> Self {
        Self::new(default_platform_categories())
    }
}

fn is_unverified(score: &PlatformScoreSpec, selected: &SelectedProviders) -> bool {
    score.earned_points() == 0.0
        && selected
            .get(score.platform())
            .map_or(true, |providers| providers.is_empty())
}

fn descending(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

impl ScoringAggregator {
    /// Aggregator over explicit categories.
    pub fn new(categories: Vec<PlatformCategory>) -> Self {
        Self { categories }
    }

    /// Configured categories.
    pub fn categories(&self) -> &[PlatformCategory] {
        &self.categories
    }

    /// Fingerprint of the category configuration.
    pub fn fingerprint(&self) -> Result<String, serde_json::Error> {
        fingerprint_hex(&self.categories)
    }

    /// Canonical display order.
    pub fn order(&self, scores: &[PlatformScoreSpec], selected: &SelectedProviders) -> Vec<PlatformScoreSpec> {
        let (mut unverified, mut verified): (Vec<_>, Vec<_>) = scores
            .iter()
            .cloned()
            .partition(|score| is_unverified(score, selected));

        unverified.sort_by(|a, b| descending(a.possible_points(), b.possible_points()));
        verified.sort_by(|a, b| descending(a.headroom(), b.headroom()));

        unverified.extend(verified);
        unverified
    }

    /// Group ordered scores into visible categories.
    pub fn group(&self, ordered: &[PlatformScoreSpec]) -> Vec<Category> {
        self.categories
            .iter()
            .map(|category| Category {
                name: category.name.clone(),
                description: category.description.clone(),
                platforms: ordered
                    .iter()
                    .filter(|score| category.platforms.iter().any(|p| p == score.platform()))
                    .cloned()
                    .collect(),
            })
            .filter(|category| category.platforms.iter().any(|p| p.possible_points() > 0.0))
            .collect()
    }

    /// Order, pick the featured platform and group.
    pub fn aggregate(&self, scores: &[PlatformScoreSpec], selected: &SelectedProviders) -> AggregateView {
        let ordered = self.order(scores, selected);
        let featured = scores
            .iter()
            .find(|score| score.platform().starts_with(FEATURED_PREFIX))
            .cloned();

        AggregateView {
            featured,
            categories: self.group(&ordered),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn category(name: &str, platforms: &[&str]) -> PlatformCategory {
        PlatformCategory {
            name: name.to_string(),
            description: format!("{} description", name),
            platforms: platforms.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn ids(scores: &[PlatformScoreSpec]) -> Vec<&str> {
        scores.iter().map(PlatformScoreSpec::platform).collect()
    }

    #[test]
    fn test_unverified_first_then_by_headroom() {
        let scores = vec![
            PlatformScoreSpec::new("A", 0.0, 10.0),
            PlatformScoreSpec::new("B", 0.0, 5.0),
            PlatformScoreSpec::new("C", 5.0, 8.0),
            PlatformScoreSpec::new("D", 2.0, 12.0),
        ];

        let ordered = ScoringAggregator::default().order(&scores, &SelectedProviders::new());
        assert_eq!(ids(&ordered), vec!["A", "B", "D", "C"]);
    }

    #[test]
    fn test_completed_platform_sinks_to_the_bottom() {
        let scores = vec![
            PlatformScoreSpec::new("C", 8.0, 8.0),
            PlatformScoreSpec::new("A", 0.0, 10.0),
            PlatformScoreSpec::new("D", 2.0, 6.0),
            PlatformScoreSpec::new("B", 0.0, 5.0),
        ];

        let ordered = ScoringAggregator::default().order(&scores, &SelectedProviders::new());
        assert_eq!(ids(&ordered), vec!["A", "B", "D", "C"]);
        assert_eq!(ordered[3].headroom(), 0.0);
    }

    #[test]
    fn test_selected_provider_counts_as_verified() {
        let scores = vec![
            PlatformScoreSpec::new("A", 0.0, 10.0),
            PlatformScoreSpec::new("B", 0.0, 5.0),
        ];
        let mut selected = SelectedProviders::new();
        selected.insert("A".to_string(), vec!["A#1".to_string()]);
        selected.insert("B".to_string(), vec![]);

        let ordered = ScoringAggregator::default().order(&scores, &selected);
        assert_eq!(ids(&ordered), vec!["B", "A"]);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let scores = vec![
            PlatformScoreSpec::new("X", 0.0, 3.0),
            PlatformScoreSpec::new("Y", 0.0, 3.0),
            PlatformScoreSpec::new("Z", 0.0, 3.0),
        ];
        let ordered = ScoringAggregator::default().order(&scores, &SelectedProviders::new());
        assert_eq!(ids(&ordered), vec!["X", "Y", "Z"]);
    }

    #[test]
    fn test_group_suppresses_pointless_categories() {
        let aggregator = ScoringAggregator::new(vec![
            category("Social", &["Google", "Github"]),
            category("Chain", &["ETH"]),
            category("Both", &["Google", "ETH"]),
        ]);
        let scores = vec![
            PlatformScoreSpec::new("Google", 0.0, 4.0),
            PlatformScoreSpec::new("Github", 0.0, 0.0),
            PlatformScoreSpec::new("ETH", 0.0, 0.0),
        ];

        let groups = aggregator.group(&scores);
        let names: Vec<_> = groups.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Social", "Both"]);
        assert_eq!(ids(&groups[0].platforms), vec!["Google", "Github"]);
        assert_eq!(ids(&groups[1].platforms), vec!["Google", "ETH"]);
    }

    #[test]
    fn test_featured_allow_list() {
        let aggregator = ScoringAggregator::new(vec![category("Social", &["Google"])]);
        let scores = vec![
            PlatformScoreSpec::new("Google", 1.0, 4.0),
            PlatformScoreSpec::new("AllowListTest", 0.0, 10.0),
        ];

        let view = aggregator.aggregate(&scores, &SelectedProviders::new());
        assert_eq!(view.featured.as_ref().map(PlatformScoreSpec::platform), Some("AllowListTest"));
        assert_eq!(view.categories.len(), 1);
    }

    #[test]
    fn test_empty_input() {
        let view = ScoringAggregator::default().aggregate(&[], &SelectedProviders::new());
        assert!(view.featured.is_none());
        assert!(view.categories.is_empty());
    }
}
