//! Property tests for scoring and session expiry.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use stamp_kernel::{
    score_platforms, Clock, InMemorySessionCache, ManualClock, PlatformGroupSpec, PlatformScoreSpec,
    PlatformSpec, ProviderSpec, ScoringAggregator, SelectedProviders, SessionCache, SessionConfig,
    SessionKey, StampWeights,
};

fn platform(id: String, providers: Vec<String>) -> PlatformSpec {
    PlatformSpec {
        platform: id.clone(),
        name: id,
        description: String::new(),
        website: None,
        groups: vec![PlatformGroupSpec::new(
            "Group",
            providers.into_iter().map(|p| ProviderSpec::new(p.clone(), p)).collect(),
        )],
    }
}

fn arb_scores() -> impl Strategy<Value = Vec<PlatformScoreSpec>> {
    prop::collection::vec((0.0f64..100.0, 0.0f64..100.0), 0..12).prop_map(|points| {
        points
            .into_iter()
            .enumerate()
            .map(|(i, (earned, possible))| PlatformScoreSpec::new(format!("P{}", i), earned, possible))
            .collect()
    })
}

proptest! {
    #[test]
    fn earned_never_exceeds_possible(
        weights in prop::collection::btree_map("[a-e]", -5.0f64..20.0, 0..5),
        held in prop::collection::btree_set("[a-f]", 0..6),
    ) {
        let weights: StampWeights = weights.into_iter().collect();
        let providers: Vec<String> = ["a", "b", "c", "d", "e", "f"].iter().map(|s| s.to_string()).collect();
        let scores = score_platforms(&[platform("X".to_string(), providers)], &weights, &held);

        prop_assert_eq!(scores.len(), 1);
        prop_assert!(scores[0].earned_points() >= 0.0);
        prop_assert!(scores[0].earned_points() <= scores[0].possible_points() + 1e-9);
    }

    #[test]
    fn order_is_a_permutation_with_unverified_first(scores in arb_scores()) {
        let ordered = ScoringAggregator::default().order(&scores, &SelectedProviders::new());

        let input: BTreeSet<_> = scores.iter().map(|s| s.platform().to_string()).collect();
        let output: BTreeSet<_> = ordered.iter().map(|s| s.platform().to_string()).collect();
        prop_assert_eq!(input, output);
        prop_assert_eq!(ordered.len(), scores.len());

        let split = ordered.iter().position(|s| s.earned_points() > 0.0).unwrap_or(ordered.len());
        let (unverified, verified) = ordered.split_at(split);
        prop_assert!(unverified.iter().all(|s| s.earned_points() == 0.0));
        prop_assert!(verified.iter().all(|s| s.earned_points() > 0.0));
        prop_assert!(unverified.windows(2).all(|w| w[0].possible_points() >= w[1].possible_points()));
        prop_assert!(verified.windows(2).all(|w| w[0].headroom() >= w[1].headroom()));
    }

    #[test]
    fn session_lives_exactly_ttl_seconds(ttl in 1i64..100_000, elapsed in 0i64..200_000) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
        let cache = InMemorySessionCache::with_clock(
            SessionConfig { ttl_seconds: ttl, capacity: 16 },
            clock.clone(),
        );
        let key = SessionKey::generate();

        let loaded = runtime.block_on(async {
            cache.create(&key).await.unwrap();
            clock.advance_secs(elapsed);
            cache.load(&key).await
        });

        prop_assert_eq!(loaded.is_ok(), elapsed < ttl);
        if let Ok(record) = loaded {
            prop_assert!(!record.is_expired_at(clock.now()));
        }
    }

    #[test]
    fn weights_parse_leniently(text in "\\PC*") {
        let weights: StampWeights = BTreeMap::from([("p".to_string(), text)]).into_iter().collect();
        let weight = weights.weight("p");
        prop_assert!(weight.is_finite());
        prop_assert!(weight >= 0.0);
    }
}
