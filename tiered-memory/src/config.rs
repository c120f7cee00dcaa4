//! Engine configuration
//!
//! Every threshold used by retrieval, activation spreading and the optimizer
//! is a named field with a default. All structs deserialize with
//! `#[serde(default)]`, so a partial JSON document overrides only what it
//! names.

use serde::{Deserialize, Serialize};

use crate::record::MemoryTier;

/// Top-level configuration for a [`crate::MemoryEngine`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retrieval: RetrievalConfig,
    pub activation: ActivationConfig,
    pub association: AssociationConfig,
    pub decay: DecayConfig,
    pub compression: CompressionConfig,
    pub consolidation: ConsolidationConfig,
    pub reinforcement: ReinforcementConfig,
    pub deduplication: DeduplicationConfig,
    pub capacity: TierCapacities,
}

impl EngineConfig {
    /// Parse a (possibly partial) JSON configuration document
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Per-tier multipliers applied to a relevance score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierWeights {
    pub working: f32,
    pub episodic: f32,
    pub semantic: f32,
    pub procedural: f32,
    pub emotional: f32,
}

impl TierWeights {
    pub const fn uniform(weight: f32) -> Self {
        Self {
            working: weight,
            episodic: weight,
            semantic: weight,
            procedural: weight,
            emotional: weight,
        }
    }

    /// Weight for a tier, clamped to [0, 1] so scores stay bounded
    pub fn get(&self, tier: MemoryTier) -> f32 {
        let weight = match tier {
            MemoryTier::Working => self.working,
            MemoryTier::Episodic => self.episodic,
            MemoryTier::Semantic => self.semantic,
            MemoryTier::Procedural => self.procedural,
            MemoryTier::Emotional => self.emotional,
        };
        weight.clamp(0.0, 1.0)
    }
}

impl Default for TierWeights {
    fn default() -> Self {
        Self::uniform(1.0)
    }
}

/// Retrieval scoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Weight for substring/exact containment (default: 0.4)
    pub text_weight: f32,
    /// Weight for embedding similarity (default: 0.4)
    pub semantic_weight: f32,
    /// Weight for fuzzy token similarity in hybrid queries (default: 0.2)
    pub fuzzy_weight: f32,
    /// Results returned when a query does not say (default: 10)
    pub default_limit: usize,
    /// Fuzzy tolerance when a query does not say (default: 0.3)
    pub default_fuzzy_tolerance: f32,
    pub exact_tier_weights: TierWeights,
    pub fuzzy_tier_weights: TierWeights,
    pub semantic_tier_weights: TierWeights,
    pub hybrid_tier_weights: TierWeights,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            text_weight: 0.4,
            semantic_weight: 0.4,
            fuzzy_weight: 0.2,
            default_limit: 10,
            default_fuzzy_tolerance: 0.3,
            exact_tier_weights: TierWeights::uniform(1.0),
            fuzzy_tier_weights: TierWeights::uniform(1.0),
            semantic_tier_weights: TierWeights {
                working: 0.8,
                episodic: 0.9,
                semantic: 1.0,
                procedural: 0.85,
                emotional: 0.8,
            },
            hybrid_tier_weights: TierWeights {
                working: 0.9,
                episodic: 0.95,
                semantic: 1.0,
                procedural: 0.95,
                emotional: 0.9,
            },
        }
    }
}

/// Activation spreading parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    /// Multiplier applied per hop (default: 0.8)
    pub decay_factor: f32,
    /// Frontier ids at or below this activation stop propagating (default: 0.3)
    pub threshold: f32,
    /// Maximum hops from a seed (default: 3)
    pub max_depth: usize,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            decay_factor: 0.8,
            threshold: 0.3,
            max_depth: 3,
        }
    }
}

/// Association establishment on store
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssociationConfig {
    /// Minimum token Jaccard similarity for an automatic similarity link
    pub similarity_threshold: f32,
    /// Upper bound on automatic similarity links per stored record
    pub max_auto_links: usize,
    /// Strength of links to context records
    pub context_strength: f32,
    /// Strength of links to derived-from records
    pub derivation_strength: f32,
    /// Below this strength an association is removed by reinforcement
    pub strength_floor: f32,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.3,
            max_auto_links: 8,
            context_strength: 0.6,
            derivation_strength: 0.8,
            strength_floor: 0.1,
        }
    }
}

/// Forgetting-curve parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecayConfig {
    /// Retention below this deletes the record (default: 0.1)
    pub delete_threshold: f64,
    /// Retention below this archives the record (default: 0.3)
    pub archive_threshold: f64,
    /// Retention above this, with enough accesses, strengthens the record
    pub strengthen_threshold: f64,
    /// Accesses required (strictly more than) for strengthening
    pub strengthen_min_access: u64,
    /// Multiplier applied to confidence and importance on strengthening
    pub strengthen_factor: f32,
    /// Retention bonus per reinforcement
    pub reinforcement_bonus: f64,
    /// Cap on the total reinforcement bonus
    pub max_reinforcement_bonus: f64,
    /// Access count at which the access component saturates
    pub access_saturation: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            delete_threshold: 0.1,
            archive_threshold: 0.3,
            strengthen_threshold: 0.7,
            strengthen_min_access: 5,
            strengthen_factor: 1.1,
            reinforcement_bonus: 0.1,
            max_reinforcement_bonus: 0.5,
            access_saturation: 100.0,
        }
    }
}

/// Compression eligibility and transforms
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub min_age_days: f64,
    /// Records accessed fewer times than this qualify once old enough
    pub max_access_count: u64,
    /// Content longer than this (in chars) qualifies when unimportant
    pub long_content_chars: usize,
    pub importance_ceiling: f32,
    pub max_level: u8,
    /// Fraction of sentences retained at level 2
    pub sentence_keep_ratio: f64,
    pub summary_head_chars: usize,
    pub summary_tail_chars: usize,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            min_age_days: 30.0,
            max_access_count: 5,
            long_content_chars: 1000,
            importance_ceiling: 0.6,
            max_level: 3,
            sentence_keep_ratio: 0.6,
            summary_head_chars: 160,
            summary_tail_chars: 80,
        }
    }
}

/// Clustering parameters for consolidation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsolidationConfig {
    pub similarity_threshold: f64,
    pub min_cluster_size: usize,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            min_cluster_size: 2,
        }
    }
}

/// Association strength maintenance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReinforcementConfig {
    /// Associations idle longer than this weaken
    pub stale_after_days: f64,
    pub stale_penalty: f32,
    /// Activations inside the hot window needed for a boost
    pub hot_min_activations: u64,
    pub hot_window_days: f64,
    pub hot_bonus: f32,
}

impl Default for ReinforcementConfig {
    fn default() -> Self {
        Self {
            stale_after_days: 30.0,
            stale_penalty: 0.1,
            hot_min_activations: 10,
            hot_window_days: 7.0,
            hot_bonus: 0.05,
        }
    }
}

/// Duplicate detection
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeduplicationConfig {
    /// Similarity strictly above which same-tier, same-source records collapse
    pub similarity_threshold: f64,
}

impl Default for DeduplicationConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.95,
        }
    }
}

/// Soft per-tier record targets enforced by the optimizer
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierCapacities {
    pub working: usize,
    pub episodic: usize,
    pub semantic: usize,
    pub procedural: usize,
    pub emotional: usize,
}

impl TierCapacities {
    pub fn get(&self, tier: MemoryTier) -> usize {
        match tier {
            MemoryTier::Working => self.working,
            MemoryTier::Episodic => self.episodic,
            MemoryTier::Semantic => self.semantic,
            MemoryTier::Procedural => self.procedural,
            MemoryTier::Emotional => self.emotional,
        }
    }
}

impl Default for TierCapacities {
    fn default() -> Self {
        Self {
            working: 100,
            episodic: 10_000,
            semantic: 50_000,
            procedural: 5_000,
            emotional: 5_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.retrieval.text_weight, 0.4);
        assert_eq!(config.retrieval.semantic_weight, 0.4);
        assert_eq!(config.activation.decay_factor, 0.8);
        assert_eq!(config.activation.threshold, 0.3);
        assert_eq!(config.decay.delete_threshold, 0.1);
        assert_eq!(config.decay.archive_threshold, 0.3);
        assert_eq!(config.consolidation.similarity_threshold, 0.8);
        assert_eq!(config.association.strength_floor, 0.1);
        assert_eq!(config.capacity.get(MemoryTier::Working), 100);
    }

    #[test]
    fn test_partial_json_override() {
        let config =
            EngineConfig::from_json(r#"{"decay": {"archive_threshold": 0.25}, "capacity": {"working": 7}}"#)
                .unwrap();
        assert_eq!(config.decay.archive_threshold, 0.25);
        assert_eq!(config.decay.delete_threshold, 0.1);
        assert_eq!(config.capacity.working, 7);
        assert_eq!(config.capacity.semantic, 50_000);
    }

    #[test]
    fn test_tier_weights_are_clamped() {
        let weights = TierWeights {
            semantic: 1.7,
            ..TierWeights::default()
        };
        assert_eq!(weights.get(MemoryTier::Semantic), 1.0);
    }
}
