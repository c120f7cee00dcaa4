//! Property tests over scores, versions and range validation

use chrono::{Duration, Utc};
use proptest::prelude::*;
use tiered_memory::config::DecayConfig;
use tiered_memory::optimizer::retention;
use tiered_memory::{
    EngineConfig, MemoryDraft, MemoryEngine, MemoryError, MemoryPatch, MemoryQuery, MemoryTier,
    QueryKind,
};

fn tier_strategy() -> impl Strategy<Value = MemoryTier> {
    prop::sample::select(MemoryTier::ALL.to_vec())
}

fn kind_strategy() -> impl Strategy<Value = QueryKind> {
    prop::sample::select(vec![
        QueryKind::Exact,
        QueryKind::Fuzzy,
        QueryKind::Semantic,
        QueryKind::Hybrid,
    ])
}

fn content_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z]{2,8}", 1..6).prop_map(|words| words.join(" "))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn scores_stay_in_unit_interval(
        contents in prop::collection::vec(content_strategy(), 1..8),
        text in "[a-z]{1,6}",
        kind in kind_strategy(),
        expansion in 0usize..3,
    ) {
        let engine = MemoryEngine::new(EngineConfig::default());
        for content in &contents {
            engine.store(MemoryDraft::new(MemoryTier::Semantic, content.as_str()), None).unwrap();
        }

        let mut query = MemoryQuery::new(text, kind).expand(expansion);
        query.fuzzy_tolerance = Some(0.5);
        let response = engine.query(&query).unwrap();

        for result in &response.results {
            prop_assert!((0.0..=1.0).contains(&result.score), "score {}", result.score);
        }
    }

    #[test]
    fn versions_never_go_backwards(
        tier in tier_strategy(),
        importances in prop::collection::vec(-0.5f32..1.5, 1..12),
    ) {
        let engine = MemoryEngine::new(EngineConfig::default());
        let record = engine.store(MemoryDraft::new(tier, "versioned"), None).unwrap();
        let mut version = record.version;

        for importance in importances {
            let patch = MemoryPatch { importance: Some(importance), ..Default::default() };
            match engine.update(&record.id, &patch) {
                Ok(updated) => {
                    prop_assert!((0.0..=1.0).contains(&importance));
                    prop_assert!(updated.version > version);
                    version = updated.version;
                }
                Err(err) => {
                    prop_assert!(matches!(err, MemoryError::Validation(_)));
                    prop_assert_eq!(engine.get(&record.id).unwrap().version, version);
                }
            }
        }
    }

    #[test]
    fn query_threshold_must_be_a_unit_score(threshold in -2.0f32..3.0) {
        let engine = MemoryEngine::new(EngineConfig::default());
        let outcome = engine.query(&MemoryQuery::exact("anything").with_threshold(threshold));
        if (0.0..=1.0).contains(&threshold) {
            prop_assert!(outcome.is_ok());
        } else {
            prop_assert!(matches!(outcome, Err(MemoryError::InvalidQuery(_))));
        }
    }

    #[test]
    fn draft_scores_are_range_checked(confidence in -1.0f32..2.0, intensity in -1.0f32..2.0) {
        let draft = MemoryDraft::builder()
            .tier(MemoryTier::Episodic)
            .content("range checked")
            .confidence(confidence)
            .affect(0.0, intensity)
            .build()
            .unwrap();

        let in_range = (0.0..=1.0).contains(&confidence) && (0.0..=1.0).contains(&intensity);
        prop_assert_eq!(draft.validate().is_ok(), in_range);
    }

    #[test]
    fn retention_is_bounded_and_non_increasing(
        importance in 0.0f32..=1.0,
        confidence in 0.0f32..=1.0,
        accesses in 0u64..200,
        reinforcements in 0u64..10,
        days in 0i64..2000,
    ) {
        let engine = MemoryEngine::new(EngineConfig::default());
        let now = Utc::now();
        let draft = MemoryDraft::builder()
            .tier(MemoryTier::Semantic)
            .content("forgetting curve")
            .importance(importance)
            .confidence(confidence)
            .access_count(accesses)
            .reinforcement_count(reinforcements)
            .build()
            .unwrap();
        let record = engine.store_at(draft, None, now).unwrap();

        let config = DecayConfig::default();
        let earlier = retention(&record, now + Duration::days(days), &config);
        let later = retention(&record, now + Duration::days(days + 1), &config);

        prop_assert!((0.0..=1.0).contains(&earlier));
        prop_assert!(later <= earlier);
    }
}
