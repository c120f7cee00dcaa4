//! Association index
//!
//! A directed, weighted graph over record ids. Edges are owned here and
//! referenced from records by [`AssociationId`] only.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ActivationConfig;
use crate::error::{MemoryError, Result};
use crate::record::MemoryId;

/// Unique identifier for associations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AssociationId(pub Uuid);

impl AssociationId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for AssociationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AssociationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Kind of relationship an association captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Temporal,
    Causal,
    Semantic,
    Hierarchical,
    Similarity,
    Contrast,
    Dependency,
    Reinforcement,
    Inhibition,
    Contextual,
}

impl RelationType {
    pub const ALL: [RelationType; 10] = [
        RelationType::Temporal,
        RelationType::Causal,
        RelationType::Semantic,
        RelationType::Hierarchical,
        RelationType::Similarity,
        RelationType::Contrast,
        RelationType::Dependency,
        RelationType::Reinforcement,
        RelationType::Inhibition,
        RelationType::Contextual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Temporal => "temporal",
            Self::Causal => "causal",
            Self::Semantic => "semantic",
            Self::Hierarchical => "hierarchical",
            Self::Similarity => "similarity",
            Self::Contrast => "contrast",
            Self::Dependency => "dependency",
            Self::Reinforcement => "reinforcement",
            Self::Inhibition => "inhibition",
            Self::Contextual => "contextual",
        }
    }
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RelationType {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|r| r.as_str() == name)
            .ok_or_else(|| MemoryError::validation(format!("unknown relation type '{}'", s)))
    }
}

/// Directed edge between two records
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Association {
    pub id: AssociationId,
    pub source: MemoryId,
    pub target: MemoryId,
    pub relation: RelationType,
    /// Strength in [0, 1]
    pub strength: f32,
    /// Confidence in [0, 1]
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activated: Option<DateTime<Utc>>,
    pub activation_count: u64,
    /// Most recent activation instants, oldest first, capped at
    /// [`RECENT_ACTIVATIONS`]
    #[serde(default, skip_serializing_if = "VecDeque::is_empty")]
    pub recent_activations: VecDeque<DateTime<Utc>>,
    pub bidirectional: bool,
}

/// Activation instants kept per association
pub const RECENT_ACTIVATIONS: usize = 32;

impl Association {
    pub(crate) fn new(
        source: MemoryId,
        target: MemoryId,
        relation: RelationType,
        strength: f32,
        confidence: f32,
        bidirectional: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AssociationId::new(),
            source,
            target,
            relation,
            strength,
            confidence,
            created_at: now,
            last_activated: None,
            activation_count: 0,
            recent_activations: VecDeque::new(),
            bidirectional,
        }
    }

    /// The endpoint opposite `id`, if `id` is an endpoint
    pub fn other_end(&self, id: &MemoryId) -> Option<MemoryId> {
        if &self.source == id {
            Some(self.target)
        } else if &self.target == id {
            Some(self.source)
        } else {
            None
        }
    }

    /// Most recent activation, falling back to creation
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activated.unwrap_or(self.created_at)
    }

    /// Activations at or after `since`, as far back as the kept history goes
    pub fn activations_since(&self, since: DateTime<Utc>) -> usize {
        self.recent_activations.iter().filter(|&&at| at >= since).count()
    }

    pub(crate) fn record_activation(&mut self, now: DateTime<Utc>) {
        self.activation_count += 1;
        match self.last_activated {
            Some(previous) if previous >= now => {}
            _ => self.last_activated = Some(now),
        }
        if self.recent_activations.len() == RECENT_ACTIVATIONS {
            self.recent_activations.pop_front();
        }
        self.recent_activations.push_back(now);
    }
}

/// Check strength/confidence before creating an edge
pub fn validate_link(strength: f32, confidence: f32) -> Result<()> {
    for (field, value) in [("strength", strength), ("confidence", confidence)] {
        if !value.is_finite() || !(0.0..=1.0).contains(&value) {
            return Err(MemoryError::validation(format!(
                "association {} must be within [0, 1], got {}",
                field, value
            )));
        }
    }
    Ok(())
}

/// Result of an activation-spreading query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Activation {
    /// Reached id → maximum activation (seeds included)
    pub levels: HashMap<MemoryId, f32>,
    /// Associations that carried activation
    pub traversed: Vec<AssociationId>,
}

impl Activation {
    /// Reached ids other than the seeds, strongest first
    pub fn reached(&self, seeds: &[MemoryId]) -> Vec<(MemoryId, f32)> {
        let mut reached: Vec<(MemoryId, f32)> = self
            .levels
            .iter()
            .filter(|(id, _)| !seeds.contains(id))
            .map(|(id, level)| (*id, *level))
            .collect();
        reached.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        reached
    }
}

/// Edge storage with adjacency lists in both directions
#[derive(Debug, Clone, Default)]
pub struct AssociationIndex {
    edges: HashMap<AssociationId, Association>,
    outgoing: HashMap<MemoryId, Vec<AssociationId>>,
    incoming: HashMap<MemoryId, Vec<AssociationId>>,
}

impl AssociationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn get(&self, id: &AssociationId) -> Option<&Association> {
        self.edges.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: &AssociationId) -> Option<&mut Association> {
        self.edges.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Association> {
        self.edges.values()
    }

    /// Insert an edge; endpoint existence is checked by the graph
    pub(crate) fn insert(&mut self, association: Association) {
        self.outgoing
            .entry(association.source)
            .or_default()
            .push(association.id);
        self.incoming
            .entry(association.target)
            .or_default()
            .push(association.id);
        self.edges.insert(association.id, association);
    }

    /// Remove an edge
    pub(crate) fn remove(&mut self, id: &AssociationId) -> Option<Association> {
        let association = self.edges.remove(id)?;
        if let Some(ids) = self.outgoing.get_mut(&association.source) {
            ids.retain(|a| a != id);
            if ids.is_empty() {
                self.outgoing.remove(&association.source);
            }
        }
        if let Some(ids) = self.incoming.get_mut(&association.target) {
            ids.retain(|a| a != id);
            if ids.is_empty() {
                self.incoming.remove(&association.target);
            }
        }
        Some(association)
    }

    /// Remove every edge touching a record
    pub(crate) fn remove_record(&mut self, id: &MemoryId) -> Vec<Association> {
        let mut ids: Vec<AssociationId> = self.outgoing.get(id).cloned().unwrap_or_default();
        ids.extend(self.incoming.get(id).cloned().unwrap_or_default());
        ids.sort_unstable();
        ids.dedup();

        ids.iter().filter_map(|a| self.remove(a)).collect()
    }

    /// Every edge touching a record, outgoing first
    pub fn neighbors(&self, id: &MemoryId) -> Vec<&Association> {
        let outgoing = self.outgoing.get(id).into_iter().flatten();
        let incoming = self.incoming.get(id).into_iter().flatten();
        outgoing
            .chain(incoming)
            .filter_map(|a| self.edges.get(a))
            .collect()
    }

    /// Number of edges touching a record
    pub fn degree(&self, id: &MemoryId) -> usize {
        self.outgoing.get(id).map_or(0, Vec::len) + self.incoming.get(id).map_or(0, Vec::len)
    }

    /// Whether an edge of this relation already joins the two records
    pub fn contains_link(&self, source: &MemoryId, target: &MemoryId, relation: RelationType) -> bool {
        self.neighbors(source).into_iter().any(|a| {
            a.relation == relation
                && ((a.source == *source && a.target == *target)
                    || (a.bidirectional && a.source == *target && a.target == *source))
        })
    }

    /// Edges activation may follow from `id`: outgoing, plus incoming
    /// bidirectional ones
    fn traversable(&self, id: &MemoryId) -> impl Iterator<Item = (&Association, MemoryId)> + '_ {
        let outgoing = self
            .outgoing
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|a| self.edges.get(a))
            .map(|a| (a, a.target));
        let incoming = self
            .incoming
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|a| self.edges.get(a))
            .filter(|a| a.bidirectional)
            .map(|a| (a, a.source));
        outgoing.chain(incoming)
    }

    /// Spread activation outward from seed ids
    ///
    /// Each hop multiplies by edge strength and the decay factor. An id keeps
    /// the maximum activation it receives; only frontier ids above the
    /// threshold propagate further, and each id appears at most once per
    /// depth level.
    pub fn spread_activation(&self, seeds: &[MemoryId], config: &ActivationConfig) -> Activation {
        let mut levels: HashMap<MemoryId, f32> = HashMap::new();
        let mut traversed: HashSet<AssociationId> = HashSet::new();
        let mut frontier: HashMap<MemoryId, f32> = HashMap::new();

        for seed in seeds {
            levels.insert(*seed, 1.0);
            frontier.insert(*seed, 1.0);
        }

        for _depth in 0..config.max_depth {
            let active: Vec<(MemoryId, f32)> = frontier
                .iter()
                .filter(|(_, level)| **level > config.threshold)
                .map(|(id, level)| (*id, *level))
                .collect();
            if active.is_empty() {
                break;
            }

            let mut next: HashMap<MemoryId, f32> = HashMap::new();
            for (id, level) in active {
                for (association, reached) in self.traversable(&id) {
                    let propagated = level * association.strength * config.decay_factor;
                    if propagated <= 0.0 {
                        continue;
                    }
                    let best = levels.entry(reached).or_insert(0.0);
                    if propagated > *best {
                        *best = propagated;
                        traversed.insert(association.id);
                        let slot = next.entry(reached).or_insert(0.0);
                        *slot = slot.max(propagated);
                    }
                }
            }
            frontier = next;
        }

        let mut traversed: Vec<AssociationId> = traversed.into_iter().collect();
        traversed.sort_unstable();
        Activation { levels, traversed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn link(index: &mut AssociationIndex, a: MemoryId, b: MemoryId, strength: f32) -> AssociationId {
        let association = Association::new(a, b, RelationType::Semantic, strength, 1.0, false, Utc::now());
        let id = association.id;
        index.insert(association);
        id
    }

    #[test]
    fn test_insert_and_neighbors() {
        let mut index = AssociationIndex::new();
        let (a, b, c) = (MemoryId::new(), MemoryId::new(), MemoryId::new());
        link(&mut index, a, b, 0.9);
        link(&mut index, c, a, 0.5);

        assert_eq!(index.len(), 2);
        assert_eq!(index.neighbors(&a).len(), 2);
        assert_eq!(index.degree(&b), 1);
        assert!(index.contains_link(&a, &b, RelationType::Semantic));
        assert!(!index.contains_link(&b, &a, RelationType::Semantic));
    }

    #[test]
    fn test_remove_record_cascades() {
        let mut index = AssociationIndex::new();
        let (a, b, c) = (MemoryId::new(), MemoryId::new(), MemoryId::new());
        link(&mut index, a, b, 0.9);
        link(&mut index, b, c, 0.9);
        link(&mut index, a, c, 0.9);

        let removed = index.remove_record(&b);
        assert_eq!(removed.len(), 2);
        assert_eq!(index.len(), 1);
        assert!(index.neighbors(&b).is_empty());
    }

    #[test]
    fn test_spread_activation_decays_per_hop() {
        let mut index = AssociationIndex::new();
        let (a, b, c) = (MemoryId::new(), MemoryId::new(), MemoryId::new());
        link(&mut index, a, b, 1.0);
        link(&mut index, b, c, 1.0);

        let activation = index.spread_activation(&[a], &ActivationConfig::default());
        assert_eq!(activation.levels[&a], 1.0);
        assert!((activation.levels[&b] - 0.8).abs() < 1e-6);
        assert!((activation.levels[&c] - 0.64).abs() < 1e-6);
        assert_eq!(activation.traversed.len(), 2);
    }

    #[test]
    fn test_spread_activation_stops_below_threshold() {
        let mut index = AssociationIndex::new();
        let (a, b, c) = (MemoryId::new(), MemoryId::new(), MemoryId::new());
        link(&mut index, a, b, 0.3);
        link(&mut index, b, c, 1.0);

        // b receives 0.24, which does not exceed the 0.3 threshold
        let activation = index.spread_activation(&[a], &ActivationConfig::default());
        assert!((activation.levels[&b] - 0.24).abs() < 1e-6);
        assert!(!activation.levels.contains_key(&c));
    }

    #[test]
    fn test_spread_activation_keeps_maximum() {
        let mut index = AssociationIndex::new();
        let (a, b, c) = (MemoryId::new(), MemoryId::new(), MemoryId::new());
        link(&mut index, a, c, 0.5);
        link(&mut index, a, b, 1.0);
        link(&mut index, b, c, 1.0);

        let activation = index.spread_activation(&[a], &ActivationConfig::default());
        // Direct path gives 0.4, the two-hop path 0.64
        assert!((activation.levels[&c] - 0.64).abs() < 1e-6);
    }

    #[test]
    fn test_bidirectional_edges_traverse_backwards() {
        let mut index = AssociationIndex::new();
        let (a, b) = (MemoryId::new(), MemoryId::new());
        index.insert(Association::new(b, a, RelationType::Temporal, 1.0, 1.0, true, Utc::now()));

        let activation = index.spread_activation(&[a], &ActivationConfig::default());
        assert!(activation.levels.contains_key(&b));
        assert_eq!(activation.reached(&[a]).len(), 1);
    }

    #[test]
    fn test_validate_link() {
        assert!(validate_link(0.5, 1.0).is_ok());
        assert!(validate_link(1.5, 1.0).is_err());
        assert!(validate_link(0.5, f32::NAN).is_err());
    }

    #[test]
    fn test_relation_type_parse() {
        assert_eq!("Causal".parse::<RelationType>().unwrap(), RelationType::Causal);
        assert!("friendship".parse::<RelationType>().is_err());
    }
}
