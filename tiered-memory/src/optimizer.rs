//! Optimizer
//!
//! Batch maintenance over the record graph. Every sub-pass is split into a
//! plan computed against a read view and an apply step that runs in one
//! write. Plan entries carry the record version they were computed from;
//! an entry whose record changed in between is skipped rather than applied
//! to state it never saw.
//!
//! Passes run in a fixed order: decay, compression, consolidation,
//! reinforcement, deduplication, capacity, transitions.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::association::{Association, AssociationId};
use crate::config::{DecayConfig, EngineConfig};
use crate::embedding::EmbeddingEngine;
use crate::error::{MemoryError, Result};
use crate::record::{ContentKind, LifecycleState, MemoryDraft, MemoryId, MemoryRecord, MemoryTier};
use crate::store::MemoryGraph;
use crate::temporal::days_between;
use crate::text::{head_tail_summary, jaccard, keep_longest_sentences, normalize_whitespace, token_set};
use crate::transition::{TransitionEngine, TransitionRule};

/// A sub-pass of the optimizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationPass {
    Decay,
    Compression,
    Consolidation,
    Reinforcement,
    Deduplication,
    Capacity,
    Transitions,
}

impl OptimizationPass {
    /// Passes in execution order
    pub const ALL: [OptimizationPass; 7] = [
        OptimizationPass::Decay,
        OptimizationPass::Compression,
        OptimizationPass::Consolidation,
        OptimizationPass::Reinforcement,
        OptimizationPass::Deduplication,
        OptimizationPass::Capacity,
        OptimizationPass::Transitions,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decay => "decay",
            Self::Compression => "compression",
            Self::Consolidation => "consolidation",
            Self::Reinforcement => "reinforcement",
            Self::Deduplication => "deduplication",
            Self::Capacity => "capacity",
            Self::Transitions => "transitions",
        }
    }
}

impl fmt::Display for OptimizationPass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OptimizationPass {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|pass| pass.as_str() == s.to_lowercase())
            .ok_or_else(|| MemoryError::validation(format!("unknown optimization pass '{}'", s)))
    }
}

/// Counters reported by a pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassCounts {
    pub archived: usize,
    pub deleted: usize,
    pub compressed: usize,
    /// Originals merged away by consolidation
    pub consolidated: usize,
    /// Records created by consolidation
    pub created: usize,
    pub strengthened: usize,
    pub weakened: usize,
    pub associations_removed: usize,
    pub transitioned: usize,
    /// Plan entries dropped because the graph moved on
    pub skipped: usize,
}

impl PassCounts {
    fn absorb(&mut self, other: &PassCounts) {
        self.archived += other.archived;
        self.deleted += other.deleted;
        self.compressed += other.compressed;
        self.consolidated += other.consolidated;
        self.created += other.created;
        self.strengthened += other.strengthened;
        self.weakened += other.weakened;
        self.associations_removed += other.associations_removed;
        self.transitioned += other.transitioned;
        self.skipped += other.skipped;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassReport {
    pub pass: OptimizationPass,
    #[serde(flatten)]
    pub counts: PassCounts,
    pub duration_ms: f64,
}

/// A sub-pass failure captured in the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    pub task: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationReport {
    pub started_at: DateTime<Utc>,
    pub dry_run: bool,
    pub cancelled: bool,
    /// Completed passes, in order
    pub passes: Vec<PassReport>,
    pub totals: PassCounts,
    pub errors: Vec<TaskError>,
    pub duration_ms: f64,
}

impl OptimizationReport {
    fn new(started_at: DateTime<Utc>, dry_run: bool) -> Self {
        Self {
            started_at,
            dry_run,
            cancelled: false,
            passes: Vec::new(),
            totals: PassCounts::default(),
            errors: Vec::new(),
            duration_ms: 0.0,
        }
    }

    fn push(&mut self, report: PassReport) {
        self.totals.absorb(&report.counts);
        self.passes.push(report);
    }

    pub fn pass(&self, pass: OptimizationPass) -> Option<&PassReport> {
        self.passes.iter().find(|p| p.pass == pass)
    }
}

/// Retained strength of a record on the forgetting curve
///
/// strength = 0.4·importance + 0.3·confidence + 0.3·min(access/saturation, 1),
/// retention = exp(−age · decay_rate / (strength · 10)) plus the capped
/// reinforcement bonus, clamped to [0, 1].
pub fn retention(record: &MemoryRecord, now: DateTime<Utc>, config: &DecayConfig) -> f64 {
    let access = if config.access_saturation > 0.0 {
        (record.activity.access_count as f64 / config.access_saturation).min(1.0)
    } else {
        1.0
    };
    let strength = 0.4 * f64::from(record.scores.importance)
        + 0.3 * f64::from(record.scores.confidence)
        + 0.3 * access;

    let age = record.temporal.age_days(now);
    let curve = if strength <= 0.0 {
        if age <= 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        let rate = f64::from(record.activity.decay_rate) / (strength * 10.0);
        (-age * rate).exp()
    };

    let bonus = (record.activity.reinforcement_count as f64 * config.reinforcement_bonus)
        .min(config.max_reinforcement_bonus);
    (curve + bonus).clamp(0.0, 1.0)
}

// ==================== Plans ====================

#[derive(Debug, Clone, Copy, PartialEq)]
enum DecayAction {
    Expire,
    Delete,
    Archive(f64),
    Strengthen(f64),
    Retain(f64),
}

#[derive(Debug, Clone)]
struct Planned<T> {
    id: MemoryId,
    version: u64,
    action: T,
}

#[derive(Debug, Clone)]
struct Compression {
    level: u8,
    content: String,
}

#[derive(Debug, Clone)]
struct Cluster {
    members: Vec<(MemoryId, u64)>,
    merged: MemoryDraft,
    priority: f64,
}

#[derive(Debug, Clone, Copy)]
struct StrengthChange {
    id: AssociationId,
    delta: f32,
    remove: bool,
}

#[derive(Debug, Clone)]
struct DuplicateGroup {
    keep: MemoryId,
    remove: Vec<(MemoryId, u64)>,
}

#[derive(Debug, Clone)]
struct PlannedTransition {
    id: MemoryId,
    version: u64,
    rule: TransitionRule,
}

/// Work computed against a read view of the graph
#[derive(Debug, Clone)]
enum PassPlan {
    Decay(Vec<Planned<DecayAction>>),
    Compression(Vec<Planned<Compression>>),
    Consolidation(Vec<Cluster>),
    Reinforcement(Vec<StrengthChange>),
    Deduplication(Vec<DuplicateGroup>),
    Capacity(Vec<(MemoryId, u64)>),
    Transitions {
        planned: Vec<PlannedTransition>,
        stale_pending: Vec<MemoryId>,
    },
}

impl PassPlan {
    /// Counts the plan would produce if applied unchanged
    fn preview(&self) -> PassCounts {
        let mut counts = PassCounts::default();
        match self {
            Self::Decay(entries) => {
                for entry in entries {
                    match entry.action {
                        DecayAction::Expire | DecayAction::Delete => counts.deleted += 1,
                        DecayAction::Archive(_) => counts.archived += 1,
                        DecayAction::Strengthen(_) => counts.strengthened += 1,
                        DecayAction::Retain(_) => {}
                    }
                }
            }
            Self::Compression(entries) => counts.compressed = entries.len(),
            Self::Consolidation(clusters) => {
                counts.created = clusters.len();
                counts.consolidated = clusters.iter().map(|c| c.members.len()).sum();
            }
            Self::Reinforcement(changes) => {
                for change in changes {
                    if change.remove {
                        counts.associations_removed += 1;
                    } else if change.delta > 0.0 {
                        counts.strengthened += 1;
                    } else if change.delta < 0.0 {
                        counts.weakened += 1;
                    }
                }
            }
            Self::Deduplication(groups) => counts.deleted = groups.iter().map(|g| g.remove.len()).sum(),
            Self::Capacity(victims) => counts.deleted = victims.len(),
            Self::Transitions { planned, .. } => counts.transitioned = planned.len(),
        }
        counts
    }
}

/// Runs the maintenance passes
pub struct Optimizer {
    config: EngineConfig,
    embeddings: Arc<EmbeddingEngine>,
    transitions: Arc<TransitionEngine>,
}

impl Optimizer {
    pub fn new(config: EngineConfig, embeddings: Arc<EmbeddingEngine>, transitions: Arc<TransitionEngine>) -> Self {
        Self {
            config,
            embeddings,
            transitions,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run every pass in order
    ///
    /// Cancellation is checked before each pass; a pass that started always
    /// finishes, so the graph is never left half-decayed. A failing pass is
    /// recorded in `errors` and the remaining passes still run.
    pub fn run(
        &self,
        graph: &RwLock<MemoryGraph>,
        now: DateTime<Utc>,
        dry_run: bool,
        cancel: &AtomicBool,
    ) -> OptimizationReport {
        let started = Instant::now();
        let mut report = OptimizationReport::new(now, dry_run);

        for pass in OptimizationPass::ALL {
            if cancel.load(Ordering::SeqCst) {
                log::info!("Optimization cancelled before {} pass", pass);
                report.cancelled = true;
                break;
            }
            match self.run_pass(pass, graph, now, dry_run) {
                Ok(pass_report) => report.push(pass_report),
                Err(e) => {
                    log::warn!("Optimization pass {} failed: {}", pass, e);
                    report.errors.push(TaskError {
                        task: pass.as_str().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        report.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        log::info!(
            "Optimization finished in {:.1}ms{}: {} deleted, {} archived, {} compressed, {} consolidated, {} transitioned",
            report.duration_ms,
            if dry_run { " (dry run)" } else { "" },
            report.totals.deleted,
            report.totals.archived,
            report.totals.compressed,
            report.totals.consolidated,
            report.totals.transitioned,
        );
        report
    }

    /// Plan one pass under a read lock, then apply it under a write lock
    pub fn run_pass(
        &self,
        pass: OptimizationPass,
        graph: &RwLock<MemoryGraph>,
        now: DateTime<Utc>,
        dry_run: bool,
    ) -> Result<PassReport> {
        let started = Instant::now();
        let plan = {
            let view = graph.read();
            self.plan(pass, &view, now)?
        };

        let counts = if dry_run {
            plan.preview()
        } else {
            let mut graph = graph.write();
            self.apply(plan, &mut graph, now)
        };

        Ok(PassReport {
            pass,
            counts,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Plan and apply one pass against a graph the caller owns
    pub fn run_pass_on(&self, pass: OptimizationPass, graph: &mut MemoryGraph, now: DateTime<Utc>) -> Result<PassReport> {
        let started = Instant::now();
        let plan = self.plan(pass, graph, now)?;
        let counts = self.apply(plan, graph, now);
        Ok(PassReport {
            pass,
            counts,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        })
    }

    fn plan(&self, pass: OptimizationPass, graph: &MemoryGraph, now: DateTime<Utc>) -> Result<PassPlan> {
        let plan = match pass {
            OptimizationPass::Decay => self.plan_decay(graph, now),
            OptimizationPass::Compression => self.plan_compression(graph, now),
            OptimizationPass::Consolidation => self.plan_consolidation(graph, now),
            OptimizationPass::Reinforcement => self.plan_reinforcement(graph, now),
            OptimizationPass::Deduplication => self.plan_deduplication(graph),
            OptimizationPass::Capacity => Ok(self.plan_capacity(graph, now)),
            OptimizationPass::Transitions => Ok(self.plan_transitions(graph, now)),
        };
        plan.map_err(|e| match e {
            MemoryError::OptimizationTask { .. } => e,
            other => MemoryError::optimization_task(pass.as_str(), other.to_string()),
        })
    }

    fn apply(&self, plan: PassPlan, graph: &mut MemoryGraph, now: DateTime<Utc>) -> PassCounts {
        match plan {
            PassPlan::Decay(entries) => self.apply_decay(entries, graph, now),
            PassPlan::Compression(entries) => self.apply_compression(entries, graph, now),
            PassPlan::Consolidation(clusters) => self.apply_consolidation(clusters, graph, now),
            PassPlan::Reinforcement(changes) => self.apply_reinforcement(changes, graph, now),
            PassPlan::Deduplication(groups) => self.apply_deduplication(groups, graph, now),
            PassPlan::Capacity(victims) => self.apply_capacity(victims, graph, now),
            PassPlan::Transitions {
                planned,
                stale_pending,
            } => self.apply_transitions(planned, stale_pending, graph, now),
        }
    }

    fn remove_record(&self, graph: &mut MemoryGraph, id: &MemoryId, now: DateTime<Utc>) -> bool {
        let removed = graph.delete(id, now);
        if removed {
            self.embeddings.evict(id);
        }
        removed
    }

    // ==================== Decay ====================

    fn plan_decay(&self, graph: &MemoryGraph, now: DateTime<Utc>) -> Result<PassPlan> {
        let config = &self.config.decay;
        if !(config.delete_threshold.is_finite() && config.archive_threshold.is_finite())
            || config.delete_threshold > config.archive_threshold
        {
            return Err(MemoryError::optimization_task(
                "decay",
                format!(
                    "delete threshold {} must not exceed archive threshold {}",
                    config.delete_threshold, config.archive_threshold
                ),
            ));
        }

        let entries = graph
            .records()
            .map(|record| {
                let action = if record.temporal.is_expired(now) {
                    DecayAction::Expire
                } else {
                    let decayed = retention(record, now, config);
                    if decayed < config.delete_threshold {
                        DecayAction::Delete
                    } else if decayed < config.archive_threshold {
                        DecayAction::Archive(decayed)
                    } else if record.activity.access_count > config.strengthen_min_access
                        && decayed > config.strengthen_threshold
                    {
                        DecayAction::Strengthen(decayed)
                    } else {
                        DecayAction::Retain(decayed)
                    }
                };
                Planned {
                    id: record.id,
                    version: record.version,
                    action,
                }
            })
            .collect();
        Ok(PassPlan::Decay(entries))
    }

    fn apply_decay(&self, entries: Vec<Planned<DecayAction>>, graph: &mut MemoryGraph, now: DateTime<Utc>) -> PassCounts {
        let factor = self.config.decay.strengthen_factor;
        let mut counts = PassCounts::default();

        for entry in entries {
            if graph.record(&entry.id).map(|r| r.version) != Some(entry.version) {
                counts.skipped += 1;
                continue;
            }
            match entry.action {
                DecayAction::Expire | DecayAction::Delete => {
                    if self.remove_record(graph, &entry.id, now) {
                        counts.deleted += 1;
                    }
                }
                DecayAction::Archive(decayed) => {
                    if let Some(record) = graph.record_mut(&entry.id) {
                        if record.state != LifecycleState::Archived {
                            record.state = LifecycleState::Archived;
                            counts.archived += 1;
                        }
                        record.scores.stability = decayed as f32;
                        record.mark_mutated(now);
                    }
                }
                DecayAction::Strengthen(decayed) => {
                    if let Some(record) = graph.record_mut(&entry.id) {
                        record.scores.confidence = (record.scores.confidence * factor).clamp(0.0, 1.0);
                        record.scores.importance = (record.scores.importance * factor).clamp(0.0, 1.0);
                        record.activity.reinforcement_count += 1;
                        record.scores.stability = decayed as f32;
                        record.mark_mutated(now);
                        counts.strengthened += 1;
                    }
                }
                DecayAction::Retain(decayed) => {
                    if let Some(record) = graph.record_mut(&entry.id) {
                        let stability = decayed as f32;
                        if record.scores.stability != stability {
                            record.scores.stability = stability;
                            record.mark_mutated(now);
                        }
                    }
                }
            }
        }

        log::debug!(
            "Decay: {} deleted, {} archived, {} strengthened",
            counts.deleted,
            counts.archived,
            counts.strengthened
        );
        counts
    }

    // ==================== Compression ====================

    fn plan_compression(&self, graph: &MemoryGraph, now: DateTime<Utc>) -> Result<PassPlan> {
        let config = &self.config.compression;
        if config.max_level > 3 {
            return Err(MemoryError::optimization_task(
                "compression",
                format!("max level {} is above the highest level (3)", config.max_level),
            ));
        }

        let entries = graph
            .records()
            .filter(|record| record.content_kind == ContentKind::Text && record.compression_level < config.max_level)
            .filter(|record| {
                let stale = record.temporal.age_days(now) > config.min_age_days
                    && record.activity.access_count < config.max_access_count;
                let bulky = record.content_chars() > config.long_content_chars
                    && record.scores.importance < config.importance_ceiling;
                stale || bulky
            })
            .filter_map(|record| {
                let level = record.compression_level + 1;
                let content = match level {
                    1 => normalize_whitespace(&record.content),
                    2 => keep_longest_sentences(&record.content, config.sentence_keep_ratio),
                    _ => head_tail_summary(&record.content, config.summary_head_chars, config.summary_tail_chars),
                };
                (!content.trim().is_empty()).then(|| Planned {
                    id: record.id,
                    version: record.version,
                    action: Compression { level, content },
                })
            })
            .collect();
        Ok(PassPlan::Compression(entries))
    }

    fn apply_compression(
        &self,
        entries: Vec<Planned<Compression>>,
        graph: &mut MemoryGraph,
        now: DateTime<Utc>,
    ) -> PassCounts {
        let mut counts = PassCounts::default();
        for entry in entries {
            let Some(record) = graph.record_mut(&entry.id).filter(|r| r.version == entry.version) else {
                counts.skipped += 1;
                continue;
            };
            record.content = entry.action.content;
            record.compression_level = entry.action.level;
            record.mark_mutated(now);
            self.embeddings.evict(&entry.id);
            counts.compressed += 1;
        }
        log::debug!("Compression: {} records compressed", counts.compressed);
        counts
    }

    // ==================== Consolidation ====================

    fn plan_consolidation(&self, graph: &MemoryGraph, now: DateTime<Utc>) -> Result<PassPlan> {
        let config = &self.config.consolidation;
        if !(0.0..=1.0).contains(&config.similarity_threshold) || config.min_cluster_size < 2 {
            return Err(MemoryError::optimization_task(
                "consolidation",
                format!(
                    "similarity threshold {} must be within [0, 1] and min cluster size {} at least 2",
                    config.similarity_threshold, config.min_cluster_size
                ),
            ));
        }

        let mut clusters = Vec::new();
        for tier in MemoryTier::ALL {
            let records: Vec<&MemoryRecord> = graph
                .list_by_tier(tier)
                .into_iter()
                .filter(|r| r.state.is_live())
                .collect();
            // Agglomerate until no two groups reach the threshold. Groups are
            // compared by token union, which is what the merged record holds.
            let mut groups: Vec<(Vec<usize>, HashSet<String>)> = records
                .iter()
                .enumerate()
                .map(|(i, r)| (vec![i], token_set(&r.content)))
                .collect();
            let mut changed = true;
            while changed {
                changed = false;
                let mut i = 0;
                while i < groups.len() {
                    let mut j = i + 1;
                    while j < groups.len() {
                        if jaccard(&groups[i].1, &groups[j].1) >= config.similarity_threshold {
                            let (members, tokens) = groups.remove(j);
                            groups[i].0.extend(members);
                            groups[i].1.extend(tokens);
                            changed = true;
                        } else {
                            j += 1;
                        }
                    }
                    i += 1;
                }
            }

            for (mut members, _) in groups {
                if members.len() < config.min_cluster_size {
                    continue;
                }
                members.sort_unstable();
                let group: Vec<&MemoryRecord> = members.iter().map(|&m| records[m]).collect();
                clusters.push(Cluster {
                    members: group.iter().map(|r| (r.id, r.version)).collect(),
                    priority: cluster_priority(&group, now),
                    merged: merge_records(tier, &group),
                });
            }
        }

        clusters.sort_by(|a, b| b.priority.partial_cmp(&a.priority).unwrap_or(std::cmp::Ordering::Equal));
        Ok(PassPlan::Consolidation(clusters))
    }

    fn apply_consolidation(&self, clusters: Vec<Cluster>, graph: &mut MemoryGraph, now: DateTime<Utc>) -> PassCounts {
        let mut counts = PassCounts::default();
        for cluster in clusters {
            let intact = cluster
                .members
                .iter()
                .all(|(id, version)| graph.record(id).map(|r| r.version) == Some(*version));
            if !intact {
                counts.skipped += 1;
                continue;
            }

            match graph.store(cluster.merged, None, &self.config.association, now) {
                Ok(merged) => {
                    for (id, _) in &cluster.members {
                        self.remove_record(graph, id, now);
                    }
                    log::debug!("Consolidated {} memories into {}", cluster.members.len(), merged.id);
                    counts.created += 1;
                    counts.consolidated += cluster.members.len();
                }
                Err(e) => {
                    log::warn!("Skipping consolidation cluster: {}", e);
                    counts.skipped += 1;
                }
            }
        }
        counts
    }

    // ==================== Reinforcement ====================

    fn strength_delta(&self, association: &Association, now: DateTime<Utc>) -> f32 {
        let config = &self.config.reinforcement;
        if days_between(association.last_activity(), now) > config.stale_after_days {
            return -config.stale_penalty;
        }
        let window_start = now - Duration::milliseconds((config.hot_window_days * 86_400_000.0) as i64);
        if association.activations_since(window_start) as u64 >= config.hot_min_activations {
            config.hot_bonus
        } else {
            0.0
        }
    }

    fn plan_reinforcement(&self, graph: &MemoryGraph, now: DateTime<Utc>) -> Result<PassPlan> {
        let floor = self.config.association.strength_floor;
        if !(0.0..=1.0).contains(&floor) {
            return Err(MemoryError::optimization_task(
                "reinforcement",
                format!("strength floor {} must be within [0, 1]", floor),
            ));
        }

        let changes = graph
            .associations()
            .iter()
            .filter_map(|association| {
                let delta = self.strength_delta(association, now);
                let strength = (association.strength + delta).clamp(0.0, 1.0);
                let remove = strength < floor;
                (remove || delta != 0.0).then_some(StrengthChange {
                    id: association.id,
                    delta,
                    remove,
                })
            })
            .collect();
        Ok(PassPlan::Reinforcement(changes))
    }

    fn apply_reinforcement(
        &self,
        changes: Vec<StrengthChange>,
        graph: &mut MemoryGraph,
        now: DateTime<Utc>,
    ) -> PassCounts {
        let floor = self.config.association.strength_floor;
        let mut counts = PassCounts::default();

        // Associations carry no version; each change is recomputed from the
        // edge as it is now
        for change in changes {
            let Some(association) = graph.association_mut(&change.id) else {
                counts.skipped += 1;
                continue;
            };
            let delta = self.strength_delta(association, now);
            association.strength = (association.strength + delta).clamp(0.0, 1.0);
            if association.strength < floor {
                if graph.unlink(&change.id, now) {
                    counts.associations_removed += 1;
                }
            } else if delta > 0.0 {
                counts.strengthened += 1;
            } else if delta < 0.0 {
                counts.weakened += 1;
            }
        }

        let below_floor: Vec<AssociationId> = graph
            .associations()
            .iter()
            .filter(|a| a.strength < floor)
            .map(|a| a.id)
            .collect();
        for id in below_floor {
            if graph.unlink(&id, now) {
                counts.associations_removed += 1;
            }
        }

        log::debug!(
            "Reinforcement: {} strengthened, {} weakened, {} removed",
            counts.strengthened,
            counts.weakened,
            counts.associations_removed
        );
        counts
    }

    // ==================== Deduplication ====================

    fn plan_deduplication(&self, graph: &MemoryGraph) -> Result<PassPlan> {
        let threshold = self.config.deduplication.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(MemoryError::optimization_task(
                "deduplication",
                format!("similarity threshold {} must be within [0, 1]", threshold),
            ));
        }

        let mut groups = Vec::new();
        for tier in MemoryTier::ALL {
            let records = graph.list_by_tier(tier);
            let tokens: Vec<HashSet<String>> = records.iter().map(|r| token_set(&r.content)).collect();
            let mut assigned = vec![false; records.len()];

            for i in 0..records.len() {
                if assigned[i] {
                    continue;
                }
                let mut members = vec![i];
                for j in (i + 1)..records.len() {
                    if assigned[j] {
                        continue;
                    }
                    let identical = records[i].content == records[j].content;
                    let near = records[i].provenance.kind == records[j].provenance.kind
                        && jaccard(&tokens[i], &tokens[j]) > threshold;
                    if identical || near {
                        members.push(j);
                    }
                }
                if members.len() < 2 {
                    continue;
                }
                for &m in &members {
                    assigned[m] = true;
                }

                let mut group: Vec<&MemoryRecord> = members.iter().map(|&m| records[m]).collect();
                group.sort_by(|a, b| {
                    b.scores
                        .importance
                        .partial_cmp(&a.scores.importance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(b.activity.access_count.cmp(&a.activity.access_count))
                        .then(a.temporal.created_at.cmp(&b.temporal.created_at))
                });
                groups.push(DuplicateGroup {
                    keep: group[0].id,
                    remove: group[1..].iter().map(|r| (r.id, r.version)).collect(),
                });
            }
        }
        Ok(PassPlan::Deduplication(groups))
    }

    fn apply_deduplication(&self, groups: Vec<DuplicateGroup>, graph: &mut MemoryGraph, now: DateTime<Utc>) -> PassCounts {
        let mut counts = PassCounts::default();
        for group in groups {
            if !graph.contains(&group.keep) {
                counts.skipped += group.remove.len();
                continue;
            }
            for (id, version) in group.remove {
                if graph.record(&id).map(|r| r.version) != Some(version) {
                    counts.skipped += 1;
                } else if self.remove_record(graph, &id, now) {
                    counts.deleted += 1;
                }
            }
        }
        log::debug!("Deduplication: {} duplicates removed", counts.deleted);
        counts
    }

    // ==================== Capacity ====================

    fn plan_capacity(&self, graph: &MemoryGraph, now: DateTime<Utc>) -> PassPlan {
        let mut victims = Vec::new();
        for tier in MemoryTier::ALL {
            let capacity = self.config.capacity.get(tier);
            let len = graph.tier_len(tier);
            if len <= capacity {
                continue;
            }

            let mut ranked: Vec<(&MemoryRecord, f64)> = graph
                .list_by_tier(tier)
                .into_iter()
                .map(|r| (r, retention(r, now, &self.config.decay)))
                .collect();
            // Archived records go first, then the weakest
            ranked.sort_by(|(a, ra), (b, rb)| {
                (a.state != LifecycleState::Archived)
                    .cmp(&(b.state != LifecycleState::Archived))
                    .then(ra.partial_cmp(rb).unwrap_or(std::cmp::Ordering::Equal))
                    .then(a.temporal.created_at.cmp(&b.temporal.created_at))
            });
            log::info!("Tier {} holds {} records, capacity {}", tier, len, capacity);
            victims.extend(ranked.into_iter().take(len - capacity).map(|(r, _)| (r.id, r.version)));
        }
        PassPlan::Capacity(victims)
    }

    fn apply_capacity(&self, victims: Vec<(MemoryId, u64)>, graph: &mut MemoryGraph, now: DateTime<Utc>) -> PassCounts {
        let mut counts = PassCounts::default();
        for (id, version) in victims {
            if graph.record(&id).map(|r| r.version) != Some(version) {
                counts.skipped += 1;
            } else if self.remove_record(graph, &id, now) {
                counts.deleted += 1;
            }
        }
        counts
    }

    // ==================== Transition sweep ====================

    fn plan_transitions(&self, graph: &MemoryGraph, now: DateTime<Utc>) -> PassPlan {
        let mut planned = Vec::new();
        let mut stale_pending = Vec::new();
        let mut seen = HashSet::new();

        for pending in graph.pending_transitions() {
            seen.insert(pending.id);
            let rule = graph
                .record(&pending.id)
                .filter(|r| r.state.is_live() && r.tier != pending.target)
                .and_then(|r| Some((r, self.transitions.rule_for(r.tier, pending.target)?)));
            match rule {
                Some((record, rule)) => planned.push(PlannedTransition {
                    id: record.id,
                    version: record.version,
                    rule,
                }),
                None => stale_pending.push(pending.id),
            }
        }

        let mut records: Vec<&MemoryRecord> = graph.records().filter(|r| !seen.contains(&r.id)).collect();
        records.sort_by(|a, b| a.temporal.created_at.cmp(&b.temporal.created_at).then(a.id.cmp(&b.id)));
        for record in records {
            if let Some(rule) = self.transitions.firing_rule(graph, record, now) {
                planned.push(PlannedTransition {
                    id: record.id,
                    version: record.version,
                    rule,
                });
            }
        }

        PassPlan::Transitions {
            planned,
            stale_pending,
        }
    }

    fn apply_transitions(
        &self,
        planned: Vec<PlannedTransition>,
        stale_pending: Vec<MemoryId>,
        graph: &mut MemoryGraph,
        now: DateTime<Utc>,
    ) -> PassCounts {
        let mut counts = PassCounts::default();
        for id in stale_pending {
            graph.clear_pending(&id);
        }

        for entry in planned {
            if graph.record(&entry.id).map(|r| r.version) != Some(entry.version) {
                counts.skipped += 1;
                continue;
            }
            let result = self.transitions.execute_rule(graph, &entry.id, &entry.rule, now);
            if result.success {
                counts.transitioned += 1;
            } else {
                graph.clear_pending(&entry.id);
                counts.skipped += 1;
            }
        }
        log::debug!("Transition sweep: {} records moved", counts.transitioned);
        counts
    }
}

impl fmt::Debug for Optimizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Optimizer").field("config", &self.config).finish()
    }
}

/// 0.4·avg importance + 0.4·min(total access / 100, 1) + 0.2 / (avg age + 1)
fn cluster_priority(group: &[&MemoryRecord], now: DateTime<Utc>) -> f64 {
    let n = group.len() as f64;
    let avg_importance = group.iter().map(|r| f64::from(r.scores.importance)).sum::<f64>() / n;
    let total_access: u64 = group.iter().map(|r| r.activity.access_count).sum();
    let avg_age = group.iter().map(|r| r.temporal.age_days(now)).sum::<f64>() / n;
    0.4 * avg_importance + 0.4 * (total_access as f64 / 100.0).min(1.0) + 0.2 * (1.0 / (avg_age + 1.0))
}

/// Synthesize one draft from a cluster of similar records
fn merge_records(tier: MemoryTier, group: &[&MemoryRecord]) -> MemoryDraft {
    let first = group[0];
    let content = group.iter().map(|r| r.content.as_str()).collect::<Vec<_>>().join("\n");
    let mut draft = MemoryDraft::new(tier, content);
    draft.content_kind = first.content_kind;
    draft.provenance = first.provenance.clone();
    draft.activity.decay_rate = first.activity.decay_rate;
    draft.affect.valence = group.iter().map(|r| r.affect.valence).sum::<f32>() / group.len() as f32;
    draft.scores.confidence = 0.0;
    draft.scores.importance = 0.0;
    draft.scores.clarity = 0.0;
    draft.scores.stability = 0.0;

    for record in group {
        for (key, value) in &record.metadata {
            draft.metadata.entry(key.clone()).or_insert_with(|| value.clone());
        }
        let scores = &mut draft.scores;
        scores.confidence = scores.confidence.max(record.scores.confidence);
        scores.importance = scores.importance.max(record.scores.importance);
        scores.clarity = scores.clarity.max(record.scores.clarity);
        scores.stability = scores.stability.max(record.scores.stability);
        draft.affect.intensity = draft.affect.intensity.max(record.affect.intensity);
        draft.affect.tags.extend(record.affect.tags.iter().cloned());
        draft.activity.access_count = draft.activity.access_count.saturating_add(record.activity.access_count);
        draft.activity.reinforcement_count = draft
            .activity
            .reinforcement_count
            .saturating_add(record.activity.reinforcement_count);
        draft.tags.extend(record.tags.iter().cloned());
        draft.categories.extend(record.categories.iter().cloned());
        draft.domains.extend(record.domains.iter().cloned());
        draft.derived_from.push(record.id);
    }
    draft
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::RelationType;
    use crate::config::AssociationConfig;
    use crate::record::SourceKind;

    fn optimizer(config: EngineConfig) -> Optimizer {
        let embeddings = Arc::new(EmbeddingEngine::default());
        let transitions = Arc::new(TransitionEngine::new(embeddings.clone()));
        Optimizer::new(config, embeddings, transitions)
    }

    fn store_at(graph: &mut MemoryGraph, draft: MemoryDraft, at: DateTime<Utc>) -> MemoryRecord {
        graph.store(draft, None, &AssociationConfig::default(), at).unwrap()
    }

    fn aged(importance: f32, confidence: f32, access: u64, reinforcement: u64) -> MemoryDraft {
        MemoryDraft::builder()
            .tier(MemoryTier::Semantic)
            .content("an aging memory")
            .importance(importance)
            .confidence(confidence)
            .access_count(access)
            .reinforcement_count(reinforcement)
            .build()
            .unwrap()
    }

    #[test]
    fn test_retention_is_one_at_creation() {
        let now = Utc::now();
        let record = MemoryRecord::from_draft(aged(0.9, 0.9, 50, 0), None, now);
        assert_eq!(retention(&record, now, &DecayConfig::default()), 1.0);
    }

    #[test]
    fn test_retention_after_a_decade_is_below_delete_threshold() {
        let now = Utc::now();
        let record = MemoryRecord::from_draft(aged(0.2, 0.3, 0, 0), None, now - Duration::days(3650));
        assert!(retention(&record, now, &DecayConfig::default()) < 0.1);
    }

    #[test]
    fn test_decay_thresholds() {
        // strength factor 0.17: retention ≈ exp(−age / 1.7)
        let cases = [(1, LifecycleState::Active, true), (3, LifecycleState::Archived, true), (5, LifecycleState::Active, false)];
        for (days, state, survives) in cases {
            let now = Utc::now();
            let mut graph = MemoryGraph::new();
            let record = store_at(&mut graph, aged(0.2, 0.3, 0, 0), now - Duration::days(days));

            optimizer(EngineConfig::default())
                .run_pass_on(OptimizationPass::Decay, &mut graph, now)
                .unwrap();

            match graph.record(&record.id) {
                Some(r) => {
                    assert!(survives, "{} days should delete", days);
                    assert_eq!(r.state, state, "{} days", days);
                    let expected = (-(days as f64) / 1.7).exp() as f32;
                    assert!((r.scores.stability - expected).abs() < 1e-3);
                }
                None => assert!(!survives, "{} days should survive", days),
            }
        }
    }

    #[test]
    fn test_decay_reinforcement_bonus_archives_instead_of_deleting() {
        let now = Utc::now();
        let mut graph = MemoryGraph::new();
        let record = store_at(&mut graph, aged(0.2, 0.3, 0, 2), now - Duration::days(40));

        let report = optimizer(EngineConfig::default())
            .run_pass_on(OptimizationPass::Decay, &mut graph, now)
            .unwrap();

        assert_eq!(report.counts.archived, 1);
        let stored = graph.get(&record.id).unwrap();
        assert_eq!(stored.state, LifecycleState::Archived);
        assert!((stored.scores.stability - 0.2).abs() < 1e-3);
    }

    #[test]
    fn test_decay_strengthens_frequently_used_records() {
        let now = Utc::now();
        let mut graph = MemoryGraph::new();
        let record = store_at(&mut graph, aged(0.8, 0.8, 20, 0), now);

        let report = optimizer(EngineConfig::default())
            .run_pass_on(OptimizationPass::Decay, &mut graph, now)
            .unwrap();

        assert_eq!(report.counts.strengthened, 1);
        let stored = graph.get(&record.id).unwrap();
        assert!((stored.scores.importance - 0.88).abs() < 1e-5);
        assert_eq!(stored.activity.reinforcement_count, 1);
        assert!(stored.version > record.version);
    }

    #[test]
    fn test_decay_removes_expired_records() {
        let now = Utc::now();
        let mut graph = MemoryGraph::new();
        let draft = MemoryDraft::builder()
            .tier(MemoryTier::Working)
            .content("temporary")
            .importance(1.0)
            .expires_at(now - Duration::minutes(1))
            .build()
            .unwrap();
        let record = store_at(&mut graph, draft, now - Duration::hours(1));

        optimizer(EngineConfig::default())
            .run_pass_on(OptimizationPass::Decay, &mut graph, now)
            .unwrap();
        assert!(!graph.contains(&record.id));
    }

    #[test]
    fn test_compression_levels_advance_one_per_pass() {
        let now = Utc::now();
        let mut graph = MemoryGraph::new();
        let long = "First  sentence is here. Second one is a little longer than that. Tiny. \
                    The fourth sentence rambles on for quite a while about nothing in particular."
            .repeat(20);
        let record = store_at(
            &mut graph,
            MemoryDraft::builder()
                .tier(MemoryTier::Episodic)
                .content(long)
                .importance(0.2)
                .build()
                .unwrap(),
            now,
        );
        let optimizer = optimizer(EngineConfig::default());

        optimizer.run_pass_on(OptimizationPass::Compression, &mut graph, now).unwrap();
        let level1 = graph.get(&record.id).unwrap().clone();
        assert_eq!(level1.compression_level, 1);
        assert!(!level1.content.contains("  "));

        optimizer.run_pass_on(OptimizationPass::Compression, &mut graph, now).unwrap();
        let level2 = graph.get(&record.id).unwrap().clone();
        assert_eq!(level2.compression_level, 2);
        assert!(level2.content.len() < level1.content.len());
        assert!(!level2.content.contains("Tiny."));

        optimizer.run_pass_on(OptimizationPass::Compression, &mut graph, now).unwrap();
        let level3 = graph.get(&record.id).unwrap().clone();
        assert_eq!(level3.compression_level, 3);
        assert!(level3.content.contains(" ... "));

        let report = optimizer.run_pass_on(OptimizationPass::Compression, &mut graph, now).unwrap();
        assert_eq!(report.counts.compressed, 0);
    }

    #[test]
    fn test_consolidation_merges_and_is_idempotent() {
        let now = Utc::now();
        let mut graph = MemoryGraph::new();
        let a = store_at(
            &mut graph,
            MemoryDraft::builder()
                .tier(MemoryTier::Semantic)
                .content("rust borrow checker rules")
                .importance(0.4)
                .access_count(3)
                .tag("rust")
                .build()
                .unwrap(),
            now,
        );
        let b = store_at(
            &mut graph,
            MemoryDraft::builder()
                .tier(MemoryTier::Semantic)
                .content("Rust borrow checker rules!")
                .importance(0.9)
                .access_count(4)
                .tag("compiler")
                .build()
                .unwrap(),
            now,
        );
        let other = store_at(&mut graph, MemoryDraft::new(MemoryTier::Semantic, "tokio runtime internals"), now);
        let optimizer = optimizer(EngineConfig::default());

        let report = optimizer
            .run_pass_on(OptimizationPass::Consolidation, &mut graph, now)
            .unwrap();
        assert_eq!(report.counts.created, 1);
        assert_eq!(report.counts.consolidated, 2);
        assert!(!graph.contains(&a.id) && !graph.contains(&b.id));
        assert!(graph.contains(&other.id));

        let merged = graph
            .records()
            .find(|r| r.relations.derived_from.contains(&a.id))
            .unwrap();
        assert_eq!(merged.scores.importance, 0.9);
        assert_eq!(merged.activity.access_count, 7);
        assert!(merged.tags.contains("rust") && merged.tags.contains("compiler"));
        assert!(merged.relations.derived_from.contains(&b.id));

        let again = optimizer
            .run_pass_on(OptimizationPass::Consolidation, &mut graph, now)
            .unwrap();
        assert_eq!(again.counts.created, 0);
    }

    #[test]
    fn test_weak_association_removed() {
        let now = Utc::now();
        let mut graph = MemoryGraph::new();
        let a = store_at(&mut graph, MemoryDraft::new(MemoryTier::Semantic, "alpha"), now);
        let b = store_at(&mut graph, MemoryDraft::new(MemoryTier::Semantic, "omega"), now);
        let link = graph
            .link(&a.id, &b.id, RelationType::Causal, 0.05, 1.0, false, now)
            .unwrap();

        let report = optimizer(EngineConfig::default())
            .run_pass_on(OptimizationPass::Reinforcement, &mut graph, now)
            .unwrap();
        assert_eq!(report.counts.associations_removed, 1);
        assert!(graph.associations().get(&link.id).is_none());
        assert!(graph.associations().iter().all(|a| a.strength >= 0.1));
    }

    #[test]
    fn test_stale_association_weakens() {
        let now = Utc::now();
        let mut graph = MemoryGraph::new();
        let then = now - Duration::days(45);
        let a = store_at(&mut graph, MemoryDraft::new(MemoryTier::Semantic, "alpha"), then);
        let b = store_at(&mut graph, MemoryDraft::new(MemoryTier::Semantic, "omega"), then);
        let link = graph
            .link(&a.id, &b.id, RelationType::Causal, 0.5, 1.0, false, then)
            .unwrap();

        let report = optimizer(EngineConfig::default())
            .run_pass_on(OptimizationPass::Reinforcement, &mut graph, now)
            .unwrap();
        assert_eq!(report.counts.weakened, 1);
        let strength = graph.associations().get(&link.id).unwrap().strength;
        assert!((strength - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_hot_boost_counts_activations_inside_window() {
        let now = Utc::now();
        let mut graph = MemoryGraph::new();
        let then = now - Duration::days(20);
        let a = store_at(&mut graph, MemoryDraft::new(MemoryTier::Semantic, "alpha"), then);
        let b = store_at(&mut graph, MemoryDraft::new(MemoryTier::Semantic, "omega"), then);
        let c = store_at(&mut graph, MemoryDraft::new(MemoryTier::Semantic, "delta"), then);
        let old = graph.link(&a.id, &b.id, RelationType::Causal, 0.5, 1.0, false, then).unwrap();
        let hot = graph.link(&b.id, &c.id, RelationType::Causal, 0.5, 1.0, false, then).unwrap();

        // Old: nine activations two weeks ago and one yesterday. Hot: ten this week.
        let association = graph.association_mut(&old.id).unwrap();
        for _ in 0..9 {
            association.record_activation(now - Duration::days(14));
        }
        association.record_activation(now - Duration::days(1));
        let association = graph.association_mut(&hot.id).unwrap();
        for day in 0..10 {
            association.record_activation(now - Duration::hours(12 * day));
        }

        let report = optimizer(EngineConfig::default())
            .run_pass_on(OptimizationPass::Reinforcement, &mut graph, now)
            .unwrap();
        assert_eq!(report.counts.strengthened, 1);
        assert!((graph.associations().get(&old.id).unwrap().strength - 0.5).abs() < 1e-6);
        assert!((graph.associations().get(&hot.id).unwrap().strength - 0.55).abs() < 1e-6);
    }

    #[test]
    fn test_deduplication_keeps_most_important() {
        let now = Utc::now();
        let mut graph = MemoryGraph::new();
        let low = store_at(
            &mut graph,
            MemoryDraft::builder().tier(MemoryTier::Episodic).content("same words").importance(0.3).build().unwrap(),
            now,
        );
        let high = store_at(
            &mut graph,
            MemoryDraft::builder()
                .tier(MemoryTier::Episodic)
                .content("same words")
                .importance(0.7)
                .source(SourceKind::Document)
                .build()
                .unwrap(),
            now,
        );

        let report = optimizer(EngineConfig::default())
            .run_pass_on(OptimizationPass::Deduplication, &mut graph, now)
            .unwrap();
        assert_eq!(report.counts.deleted, 1);
        assert!(graph.contains(&high.id));
        assert!(!graph.contains(&low.id));
    }

    #[test]
    fn test_capacity_trims_weakest() {
        let now = Utc::now();
        let mut config = EngineConfig::default();
        config.capacity.procedural = 1;
        let mut graph = MemoryGraph::new();
        let weak = store_at(
            &mut graph,
            MemoryDraft::builder().tier(MemoryTier::Procedural).content("rarely used").importance(0.1).build().unwrap(),
            now - Duration::days(2),
        );
        let strong = store_at(
            &mut graph,
            MemoryDraft::builder().tier(MemoryTier::Procedural).content("daily habit").importance(0.9).build().unwrap(),
            now - Duration::days(2),
        );

        let report = optimizer(config)
            .run_pass_on(OptimizationPass::Capacity, &mut graph, now)
            .unwrap();
        assert_eq!(report.counts.deleted, 1);
        assert!(graph.contains(&strong.id));
        assert!(!graph.contains(&weak.id));
    }

    #[test]
    fn test_failed_pass_is_reported_and_others_run() {
        let now = Utc::now();
        let mut config = EngineConfig::default();
        config.consolidation.similarity_threshold = 1.5;
        let graph = RwLock::new(MemoryGraph::new());

        let report = optimizer(config).run(&graph, now, false, &AtomicBool::new(false));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].task, "consolidation");
        assert_eq!(report.passes.len(), OptimizationPass::ALL.len() - 1);
        assert!(report.pass(OptimizationPass::Deduplication).is_some());
    }

    #[test]
    fn test_dry_run_leaves_graph_untouched() {
        let now = Utc::now();
        let mut graph = MemoryGraph::new();
        let record = store_at(&mut graph, aged(0.2, 0.3, 0, 0), now - Duration::days(40));
        let graph = RwLock::new(graph);

        let report = optimizer(EngineConfig::default()).run(&graph, now, true, &AtomicBool::new(false));
        assert!(report.dry_run);
        assert_eq!(report.totals.deleted, 1);
        assert_eq!(graph.read().get(&record.id).unwrap().version, record.version);
    }

    #[test]
    fn test_cancelled_before_start() {
        let graph = RwLock::new(MemoryGraph::new());
        let report = optimizer(EngineConfig::default()).run(&graph, Utc::now(), false, &AtomicBool::new(true));
        assert!(report.cancelled);
        assert!(report.passes.is_empty());
    }

    #[test]
    fn test_pass_names_round_trip() {
        for pass in OptimizationPass::ALL {
            assert_eq!(pass.as_str().parse::<OptimizationPass>().unwrap(), pass);
        }
        assert!("defrag".parse::<OptimizationPass>().is_err());
    }
}
