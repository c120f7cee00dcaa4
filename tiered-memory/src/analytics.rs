//! Read-only aggregates over a snapshot of the graph

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::association::RelationType;
use crate::config::EngineConfig;
use crate::optimizer::retention;
use crate::record::MemoryTier;
use crate::store::MemoryGraph;

/// How many tags `top_tags` keeps
const TOP_TAGS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierUsage {
    pub tier: MemoryTier,
    pub count: usize,
    pub capacity: usize,
    /// count / capacity; the raw count when the capacity is 0
    pub utilisation: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

/// Health and quality figures for dashboards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub generated_at: DateTime<Utc>,
    pub total_records: usize,
    pub by_tier: BTreeMap<MemoryTier, usize>,
    pub by_state: BTreeMap<String, usize>,
    pub by_source: BTreeMap<String, usize>,
    pub mean_confidence: f64,
    pub mean_importance: f64,
    pub mean_clarity: f64,
    pub mean_stability: f64,
    pub mean_retention: f64,
    pub compressed_records: usize,
    pub total_associations: usize,
    pub associations_by_relation: BTreeMap<RelationType, usize>,
    pub mean_association_strength: f64,
    pub capacity: Vec<TierUsage>,
    pub pending_transitions: usize,
    /// 0.4·live share + 0.4·mean quality factor + 0.2·share of tiers within capacity
    pub health_score: f64,
    pub top_tags: Vec<TagCount>,
}

impl MemoryStats {
    /// Aggregate a graph snapshot
    pub fn compute(graph: &MemoryGraph, config: &EngineConfig, now: DateTime<Utc>) -> Self {
        let total = graph.len();

        let mut by_tier: BTreeMap<MemoryTier, usize> = MemoryTier::ALL.iter().map(|t| (*t, 0)).collect();
        let mut by_state: BTreeMap<String, usize> = BTreeMap::new();
        let mut by_source: BTreeMap<String, usize> = BTreeMap::new();
        let mut tags: HashMap<&str, usize> = HashMap::new();

        let (mut confidence, mut importance, mut clarity, mut stability) = (0.0, 0.0, 0.0, 0.0);
        let (mut retained, mut quality) = (0.0, 0.0);
        let mut live = 0usize;
        let mut compressed = 0usize;

        for record in graph.records() {
            *by_tier.entry(record.tier).or_default() += 1;
            *by_state.entry(record.state.as_str().to_string()).or_default() += 1;
            *by_source.entry(record.provenance.kind.as_str().to_string()).or_default() += 1;
            for tag in &record.tags {
                *tags.entry(tag.as_str()).or_default() += 1;
            }

            confidence += f64::from(record.scores.confidence);
            importance += f64::from(record.scores.importance);
            clarity += f64::from(record.scores.clarity);
            stability += f64::from(record.scores.stability);
            quality += f64::from(record.quality_factor());
            retained += retention(record, now, &config.decay);
            if record.state.is_live() {
                live += 1;
            }
            if record.compression_level > 0 {
                compressed += 1;
            }
        }

        let mean = |sum: f64| if total == 0 { 0.0 } else { sum / total as f64 };

        let mut associations_by_relation: BTreeMap<RelationType, usize> = BTreeMap::new();
        let mut strength = 0.0;
        for association in graph.associations().iter() {
            *associations_by_relation.entry(association.relation).or_default() += 1;
            strength += f64::from(association.strength);
        }
        let total_associations = graph.associations().len();

        let capacity: Vec<TierUsage> = MemoryTier::ALL
            .iter()
            .map(|tier| {
                let count = by_tier.get(tier).copied().unwrap_or(0);
                let capacity = config.capacity.get(*tier);
                let utilisation = if capacity == 0 {
                    count as f64
                } else {
                    count as f64 / capacity as f64
                };
                TierUsage {
                    tier: *tier,
                    count,
                    capacity,
                    utilisation,
                }
            })
            .collect();

        let within_capacity = capacity.iter().filter(|u| u.count <= u.capacity).count() as f64;
        let health_score = if total == 0 {
            1.0
        } else {
            0.4 * (live as f64 / total as f64)
                + 0.4 * mean(quality)
                + 0.2 * (within_capacity / MemoryTier::ALL.len() as f64)
        };

        let mut top_tags: Vec<TagCount> = tags
            .into_iter()
            .map(|(tag, count)| TagCount {
                tag: tag.to_string(),
                count,
            })
            .collect();
        top_tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
        top_tags.truncate(TOP_TAGS);

        Self {
            generated_at: now,
            total_records: total,
            by_tier,
            by_state,
            by_source,
            mean_confidence: mean(confidence),
            mean_importance: mean(importance),
            mean_clarity: mean(clarity),
            mean_stability: mean(stability),
            mean_retention: mean(retained),
            compressed_records: compressed,
            total_associations,
            associations_by_relation,
            mean_association_strength: if total_associations == 0 {
                0.0
            } else {
                strength / total_associations as f64
            },
            capacity,
            pending_transitions: graph.pending_transitions().len(),
            health_score: health_score.clamp(0.0, 1.0),
            top_tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AssociationConfig;
    use crate::record::MemoryDraft;

    #[test]
    fn test_empty_graph_is_healthy() {
        let stats = MemoryStats::compute(&MemoryGraph::new(), &EngineConfig::default(), Utc::now());
        assert_eq!(stats.total_records, 0);
        assert_eq!(stats.health_score, 1.0);
        assert_eq!(stats.by_tier.len(), 5);
        assert!(stats.top_tags.is_empty());
    }

    #[test]
    fn test_counts_and_top_tags() {
        let now = Utc::now();
        let mut graph = MemoryGraph::new();
        let config = AssociationConfig::default();
        for (content, tag) in [("deploy steps", "ops"), ("deploy rollback", "ops"), ("team lunch", "social")] {
            let draft = MemoryDraft::builder()
                .tier(MemoryTier::Episodic)
                .content(content)
                .tag(tag)
                .build()
                .unwrap();
            graph.store(draft, None, &config, now).unwrap();
        }

        let stats = MemoryStats::compute(&graph, &EngineConfig::default(), now);
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.by_tier[&MemoryTier::Episodic], 3);
        assert_eq!(stats.by_state["active"], 3);
        assert_eq!(stats.top_tags[0], TagCount { tag: "ops".into(), count: 2 });
        assert_eq!(stats.mean_retention, 1.0);
        assert!(stats.total_associations >= 1);
        assert!(stats.health_score > 0.0 && stats.health_score <= 1.0);
    }
}
