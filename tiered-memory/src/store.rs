//! Record store
//!
//! The in-memory arena that owns every record plus the association index.
//! Records are keyed by id and partitioned by tier; associations refer to
//! records by id only.
//!
//! The graph has no locking of its own; [`crate::MemoryEngine`] wraps it in
//! a single `RwLock` so that at most one mutation is in flight.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::association::{validate_link, Association, AssociationId, AssociationIndex, RelationType};
use crate::config::AssociationConfig;
use crate::error::{MemoryError, Result};
use crate::record::{MemoryContext, MemoryDraft, MemoryId, MemoryPatch, MemoryRecord, MemoryTier};
use crate::text::{jaccard, token_set};

/// A transition queued by the store-time condition check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransition {
    pub id: MemoryId,
    pub target: MemoryTier,
}

/// Owned record table, tier index and association graph
#[derive(Debug, Clone, Default)]
pub struct MemoryGraph {
    records: HashMap<MemoryId, MemoryRecord>,
    tiers: HashMap<MemoryTier, HashSet<MemoryId>>,
    associations: AssociationIndex,
    pending: Vec<PendingTransition>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Record Store ====================

    /// Validate a draft, assign identity and insert it, then run the
    /// association establishment pass
    pub fn store(
        &mut self,
        draft: MemoryDraft,
        context: Option<&MemoryContext>,
        config: &AssociationConfig,
        now: DateTime<Utc>,
    ) -> Result<MemoryRecord> {
        draft.validate()?;

        let record = MemoryRecord::from_draft(draft, context, now);
        let id = record.id;
        self.insert_record(record);
        let links = self.establish_associations(&id, config, now);

        log::debug!("Stored memory {} ({} associations)", id, links);
        self.get(&id).cloned()
    }

    /// Get a record by id
    pub fn get(&self, id: &MemoryId) -> Result<&MemoryRecord> {
        self.records
            .get(id)
            .ok_or_else(|| MemoryError::not_found(id.to_string()))
    }

    /// Get a record by id, if present
    pub fn record(&self, id: &MemoryId) -> Option<&MemoryRecord> {
        self.records.get(id)
    }

    pub(crate) fn record_mut(&mut self, id: &MemoryId) -> Option<&mut MemoryRecord> {
        self.records.get_mut(id)
    }

    pub fn contains(&self, id: &MemoryId) -> bool {
        self.records.contains_key(id)
    }

    /// Merge a patch into a record
    ///
    /// The patch is applied to a copy and validated before anything is
    /// written, so a failed update leaves the record untouched.
    pub fn update(&mut self, id: &MemoryId, patch: &MemoryPatch, now: DateTime<Utc>) -> Result<MemoryRecord> {
        let current = self.get(id)?;
        let mut updated = current.clone();

        let changed = patch.apply_to(&mut updated);
        updated.validate()?;
        updated.mark_mutated(now);

        log::debug!("Updated memory {} (v{}): {:?}", id, updated.version, changed);
        self.records.insert(*id, updated.clone());
        Ok(updated)
    }

    /// Remove a record and every association touching it
    ///
    /// Returns false if the id is unknown.
    pub fn delete(&mut self, id: &MemoryId, now: DateTime<Utc>) -> bool {
        let Some(record) = self.records.remove(id) else {
            return false;
        };

        if let Some(ids) = self.tiers.get_mut(&record.tier) {
            ids.remove(id);
        }
        for association in self.associations.remove_record(id) {
            if association.source != *id {
                self.detach_association(&association.source, &association.id, now);
            }
        }
        self.pending.retain(|p| p.id != *id);

        log::debug!("Deleted memory {} from {}", id, record.tier);
        true
    }

    /// Records of one tier, oldest first
    pub fn list_by_tier(&self, tier: MemoryTier) -> Vec<&MemoryRecord> {
        let mut records: Vec<&MemoryRecord> = self
            .tiers
            .get(&tier)
            .into_iter()
            .flatten()
            .filter_map(|id| self.records.get(id))
            .collect();
        records.sort_by(|a, b| {
            a.temporal
                .created_at
                .cmp(&b.temporal.created_at)
                .then(a.id.cmp(&b.id))
        });
        records
    }

    /// Number of records in a tier
    pub fn tier_len(&self, tier: MemoryTier) -> usize {
        self.tiers.get(&tier).map_or(0, HashSet::len)
    }

    pub fn records(&self) -> impl Iterator<Item = &MemoryRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert a fully formed record (store, transitions, consolidation)
    pub(crate) fn insert_record(&mut self, record: MemoryRecord) {
        self.tiers.entry(record.tier).or_default().insert(record.id);
        self.records.insert(record.id, record);
    }

    // ==================== Association Index ====================

    pub fn associations(&self) -> &AssociationIndex {
        &self.associations
    }

    /// Create a directed association between two existing records
    #[allow(clippy::too_many_arguments)]
    pub fn link(
        &mut self,
        source: &MemoryId,
        target: &MemoryId,
        relation: RelationType,
        strength: f32,
        confidence: f32,
        bidirectional: bool,
        now: DateTime<Utc>,
    ) -> Result<Association> {
        validate_link(strength, confidence)?;
        if source == target {
            return Err(MemoryError::validation("cannot link a memory to itself"));
        }
        self.get(source)?;
        self.get(target)?;

        let association = Association::new(*source, *target, relation, strength, confidence, bidirectional, now);
        self.attach_association(association.clone(), now);
        Ok(association)
    }

    /// Remove an association; false if it does not exist
    pub fn unlink(&mut self, id: &AssociationId, now: DateTime<Utc>) -> bool {
        match self.associations.remove(id) {
            Some(association) => {
                self.detach_association(&association.source, id, now);
                true
            }
            None => false,
        }
    }

    /// Every association touching a record
    pub fn neighbors(&self, id: &MemoryId) -> Result<Vec<Association>> {
        self.get(id)?;
        Ok(self.associations.neighbors(id).into_iter().cloned().collect())
    }

    /// Hierarchical edge from a freshly written record to its origin; the
    /// new record stays at version 1
    pub(crate) fn link_lineage(
        &mut self,
        id: &MemoryId,
        origin: &MemoryId,
        strength: f32,
        now: DateTime<Utc>,
    ) -> Result<AssociationId> {
        validate_link(strength, 1.0)?;
        if !self.records.contains_key(origin) {
            return Err(MemoryError::not_found(origin.to_string()));
        }
        if !self.records.contains_key(id) {
            return Err(MemoryError::not_found(id.to_string()));
        }
        let association = Association::new(*id, *origin, RelationType::Hierarchical, strength, 1.0, false, now);
        let association_id = association.id;
        self.attach_established(association);
        Ok(association_id)
    }

    pub(crate) fn association_mut(&mut self, id: &AssociationId) -> Option<&mut Association> {
        self.associations.get_mut(id)
    }

    fn attach_association(&mut self, association: Association, now: DateTime<Utc>) {
        if let Some(source) = self.records.get_mut(&association.source) {
            source.relations.association_ids.push(association.id);
            source.mark_mutated(now);
        }
        self.associations.insert(association);
    }

    /// Attach an edge created by the establishment pass; the new record is
    /// still at version 1
    fn attach_established(&mut self, association: Association) {
        if let Some(source) = self.records.get_mut(&association.source) {
            source.relations.association_ids.push(association.id);
        }
        self.associations.insert(association);
    }

    fn detach_association(&mut self, source: &MemoryId, id: &AssociationId, now: DateTime<Utc>) {
        if let Some(record) = self.records.get_mut(source) {
            let before = record.relations.association_ids.len();
            record.relations.association_ids.retain(|a| a != id);
            if record.relations.association_ids.len() != before {
                record.mark_mutated(now);
            }
        }
    }

    /// Link a freshly stored record to its derivation sources, its context
    /// records and its most similar same-tier peers
    fn establish_associations(&mut self, id: &MemoryId, config: &AssociationConfig, now: DateTime<Utc>) -> usize {
        let Some(record) = self.records.get(id) else {
            return 0;
        };
        let tier = record.tier;
        let derived_from = record.relations.derived_from.clone();
        let context_ids = record.relations.context_ids.clone();
        let tokens = token_set(&record.searchable_text());

        let mut created = 0;

        for source in derived_from {
            if source == *id || !self.records.contains_key(&source) {
                continue;
            }
            let association = Association::new(
                *id,
                source,
                RelationType::Hierarchical,
                config.derivation_strength,
                1.0,
                false,
                now,
            );
            self.attach_established(association);
            if let Some(origin) = self.records.get_mut(&source) {
                origin.relations.influenced_ids.push(*id);
                origin.mark_mutated(now);
            }
            created += 1;
        }

        for context in context_ids {
            if context == *id || !self.records.contains_key(&context) {
                continue;
            }
            let association = Association::new(
                *id,
                context,
                RelationType::Temporal,
                config.context_strength,
                1.0,
                true,
                now,
            );
            self.attach_established(association);
            created += 1;
        }

        let mut similar: Vec<(MemoryId, f64)> = self
            .tiers
            .get(&tier)
            .into_iter()
            .flatten()
            .filter(|other| *other != id)
            .filter_map(|other| {
                let peer = self.records.get(other)?;
                let similarity = jaccard(&tokens, &token_set(&peer.searchable_text()));
                (similarity >= f64::from(config.similarity_threshold)).then_some((*other, similarity))
            })
            .collect();
        similar.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        similar.truncate(config.max_auto_links);

        for (other, similarity) in similar {
            let association = Association::new(
                *id,
                other,
                RelationType::Similarity,
                (similarity as f32).clamp(0.0, 1.0),
                1.0,
                true,
                now,
            );
            self.attach_established(association);
            created += 1;
        }

        created
    }

    // ==================== Pending transitions ====================

    pub(crate) fn queue_transition(&mut self, id: MemoryId, target: MemoryTier) {
        if !self.pending.iter().any(|p| p.id == id) {
            self.pending.push(PendingTransition { id, target });
        }
    }

    /// Transitions queued by store-time condition checks
    pub fn pending_transitions(&self) -> &[PendingTransition] {
        &self.pending
    }

    pub(crate) fn clear_pending(&mut self, id: &MemoryId) {
        self.pending.retain(|p| p.id != *id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LifecycleState;

    fn store(graph: &mut MemoryGraph, tier: MemoryTier, content: &str) -> MemoryRecord {
        graph
            .store(
                MemoryDraft::new(tier, content),
                None,
                &AssociationConfig::default(),
                Utc::now(),
            )
            .unwrap()
    }

    #[test]
    fn test_store_and_get() {
        let mut graph = MemoryGraph::new();
        let record = store(&mut graph, MemoryTier::Semantic, "water boils at 100C");

        let fetched = graph.get(&record.id).unwrap();
        assert_eq!(fetched, &record);
        assert_eq!(fetched.version, 1);
        assert_eq!(fetched.state, LifecycleState::Active);
        assert_eq!(graph.tier_len(MemoryTier::Semantic), 1);
    }

    #[test]
    fn test_store_rejects_invalid_draft() {
        let mut graph = MemoryGraph::new();
        let mut draft = MemoryDraft::new(MemoryTier::Working, "x");
        draft.scores.clarity = 2.0;

        let result = graph.store(draft, None, &AssociationConfig::default(), Utc::now());
        assert!(matches!(result, Err(MemoryError::Validation(_))));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_update_bumps_version_and_rejects_bad_patch() {
        let mut graph = MemoryGraph::new();
        let record = store(&mut graph, MemoryTier::Episodic, "met the team");
        let now = Utc::now();

        let patch = MemoryPatch {
            importance: Some(0.9),
            ..Default::default()
        };
        let updated = graph.update(&record.id, &patch, now).unwrap();
        assert_eq!(updated.version, 2);
        assert!(updated.temporal.updated_at >= record.temporal.updated_at);

        let bad = MemoryPatch {
            confidence: Some(-0.1),
            ..Default::default()
        };
        assert!(graph.update(&record.id, &bad, now).is_err());
        assert_eq!(graph.get(&record.id).unwrap().version, 2);

        let missing = graph.update(&MemoryId::new(), &patch, now);
        assert!(matches!(missing, Err(MemoryError::NotFound(_))));
    }

    #[test]
    fn test_delete_is_idempotent_and_cascades() {
        let mut graph = MemoryGraph::new();
        let a = store(&mut graph, MemoryTier::Semantic, "alpha");
        let b = store(&mut graph, MemoryTier::Semantic, "beta");
        let now = Utc::now();

        let association = graph
            .link(&a.id, &b.id, RelationType::Causal, 0.7, 0.9, false, now)
            .unwrap();
        assert!(graph.get(&a.id).unwrap().relations.association_ids.contains(&association.id));

        assert!(graph.delete(&b.id, now));
        assert!(!graph.delete(&b.id, now));
        assert!(graph.associations().is_empty());
        assert!(graph.get(&a.id).unwrap().relations.association_ids.is_empty());
    }

    #[test]
    fn test_link_requires_existing_records() {
        let mut graph = MemoryGraph::new();
        let a = store(&mut graph, MemoryTier::Semantic, "alpha");
        let now = Utc::now();

        let missing = graph.link(&a.id, &MemoryId::new(), RelationType::Causal, 0.5, 0.5, false, now);
        assert!(matches!(missing, Err(MemoryError::NotFound(_))));

        let self_loop = graph.link(&a.id, &a.id, RelationType::Causal, 0.5, 0.5, false, now);
        assert!(matches!(self_loop, Err(MemoryError::Validation(_))));
    }

    #[test]
    fn test_establishment_links_context_derivation_and_similarity() {
        let mut graph = MemoryGraph::new();
        let config = AssociationConfig::default();
        let now = Utc::now();

        let source = store(&mut graph, MemoryTier::Semantic, "rust ownership rules");
        let context = store(&mut graph, MemoryTier::Episodic, "reading the book");

        let draft = MemoryDraft::builder()
            .tier(MemoryTier::Semantic)
            .content("rust ownership rules explained")
            .derived_from(source.id)
            .context(context.id)
            .context(MemoryId::new())
            .build()
            .unwrap();
        let record = graph.store(draft, None, &config, now).unwrap();

        let relations: Vec<RelationType> = graph
            .neighbors(&record.id)
            .unwrap()
            .into_iter()
            .map(|a| a.relation)
            .collect();
        assert!(relations.contains(&RelationType::Hierarchical));
        assert!(relations.contains(&RelationType::Temporal));
        assert!(relations.contains(&RelationType::Similarity));
        // The unknown context id is skipped
        assert_eq!(relations.len(), 3);

        let origin = graph.get(&source.id).unwrap();
        assert_eq!(origin.relations.influenced_ids, vec![record.id]);
        assert!(origin.version > 1);
    }

    #[test]
    fn test_list_by_tier() {
        let mut graph = MemoryGraph::new();
        store(&mut graph, MemoryTier::Working, "one");
        store(&mut graph, MemoryTier::Working, "two");
        store(&mut graph, MemoryTier::Procedural, "three");

        assert_eq!(graph.list_by_tier(MemoryTier::Working).len(), 2);
        assert_eq!(graph.list_by_tier(MemoryTier::Emotional).len(), 0);
    }
}
