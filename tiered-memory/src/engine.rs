//! The engine handle
//!
//! [`MemoryEngine`] owns one memory space: the record graph behind a single
//! `RwLock` plus the retrieval, transition and optimizer components. The
//! handle is cheap to clone; clones share the same space.
//!
//! Lock discipline: searches plan under the read lock and take the write
//! lock only to apply access feedback; every mutation holds the write lock
//! for its whole duration; optimizer passes plan under the read lock and
//! apply under the write lock, one pass at a time.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::task::JoinHandle;

use crate::analytics::MemoryStats;
use crate::association::{Activation, Association, AssociationId, RelationType};
use crate::config::{ActivationConfig, EngineConfig};
use crate::embedding::{Embedder, EmbeddingEngine, HashingEmbedder};
use crate::error::{MemoryError, Result};
use crate::export::{ExportFormat, MemorySnapshot};
use crate::optimizer::{OptimizationPass, OptimizationReport, Optimizer, PassReport};
use crate::query::{MemoryQuery, QueryResponse};
use crate::record::{MemoryContext, MemoryDraft, MemoryId, MemoryPatch, MemoryRecord, MemoryTier};
use crate::search::RetrievalEngine;
use crate::store::{MemoryGraph, PendingTransition};
use crate::transition::{TransitionEngine, TransitionResult};

/// Handle to one memory space
#[derive(Clone)]
pub struct MemoryEngine {
    graph: Arc<RwLock<MemoryGraph>>,
    config: Arc<EngineConfig>,
    embeddings: Arc<EmbeddingEngine>,
    retrieval: Arc<RetrievalEngine>,
    transitions: Arc<TransitionEngine>,
    optimizer: Arc<Optimizer>,
    optimizing: Arc<AtomicBool>,
}

/// Clears the single-run flag when an optimization ends, however it ends
struct RunGuard(Arc<AtomicBool>);

impl RunGuard {
    fn acquire(flag: &Arc<AtomicBool>) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| MemoryError::other("an optimization is already running"))?;
        Ok(Self(flag.clone()))
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// A background optimization
pub struct OptimizationHandle {
    cancel: Arc<AtomicBool>,
    task: JoinHandle<OptimizationReport>,
    started_at: DateTime<Utc>,
}

impl OptimizationHandle {
    /// Ask the run to stop before its next pass
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Wait for the report
    pub async fn join(self) -> Result<OptimizationReport> {
        self.task
            .await
            .map_err(|e| MemoryError::other(format!("optimization task failed: {}", e)))
    }
}

impl MemoryEngine {
    /// Engine with the default hashing embedder
    pub fn new(config: EngineConfig) -> Self {
        Self::with_embedder(config, Arc::new(HashingEmbedder::default()))
    }

    /// Engine with a caller-supplied embedding strategy
    pub fn with_embedder(config: EngineConfig, embedder: Arc<dyn Embedder>) -> Self {
        let embeddings = Arc::new(EmbeddingEngine::new(embedder));
        let transitions = Arc::new(
            TransitionEngine::new(embeddings.clone()).with_lineage_strength(config.association.derivation_strength),
        );
        let retrieval = Arc::new(RetrievalEngine::new(
            config.retrieval.clone(),
            config.activation,
            embeddings.clone(),
        ));
        let optimizer = Arc::new(Optimizer::new(config.clone(), embeddings.clone(), transitions.clone()));

        log::info!("Memory engine ready (embedding dimension {})", embeddings.dimension());

        Self {
            graph: Arc::new(RwLock::new(MemoryGraph::new())),
            config: Arc::new(config),
            embeddings,
            retrieval,
            transitions,
            optimizer,
            optimizing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Rule registry, for adding rules or custom predicates
    pub fn transitions(&self) -> &TransitionEngine {
        &self.transitions
    }

    pub fn len(&self) -> usize {
        self.graph.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.read().is_empty()
    }

    // ==================== Records ====================

    pub fn store(&self, draft: MemoryDraft, context: Option<&MemoryContext>) -> Result<MemoryRecord> {
        self.store_at(draft, context, Utc::now())
    }

    /// Store with an explicit creation instant
    ///
    /// After establishment the transition rules are evaluated; a firing rule
    /// queues the record for the next transition sweep.
    pub fn store_at(
        &self,
        draft: MemoryDraft,
        context: Option<&MemoryContext>,
        now: DateTime<Utc>,
    ) -> Result<MemoryRecord> {
        let mut graph = self.graph.write();
        let record = graph.store(draft, context, &self.config.association, now)?;
        if let Some(rule) = self.transitions.firing_rule(&graph, &record, now) {
            log::debug!("Queued memory {} for {} ({})", record.id, rule.to, rule.name);
            graph.queue_transition(record.id, rule.to);
        }
        Ok(record)
    }

    pub fn get(&self, id: &MemoryId) -> Result<MemoryRecord> {
        self.graph.read().get(id).cloned()
    }

    pub fn update(&self, id: &MemoryId, patch: &MemoryPatch) -> Result<MemoryRecord> {
        let record = self.graph.write().update(id, patch, Utc::now())?;
        if patch.touches_content() {
            self.embeddings.evict(id);
        }
        Ok(record)
    }

    pub fn delete(&self, id: &MemoryId) -> bool {
        let removed = self.graph.write().delete(id, Utc::now());
        self.embeddings.evict(id);
        removed
    }

    pub fn list_by_tier(&self, tier: MemoryTier) -> Vec<MemoryRecord> {
        self.graph.read().list_by_tier(tier).into_iter().cloned().collect()
    }

    pub fn pending_transitions(&self) -> Vec<PendingTransition> {
        self.graph.read().pending_transitions().to_vec()
    }

    // ==================== Associations ====================

    pub fn link(
        &self,
        source: &MemoryId,
        target: &MemoryId,
        relation: RelationType,
        strength: f32,
        confidence: f32,
        bidirectional: bool,
    ) -> Result<Association> {
        self.graph
            .write()
            .link(source, target, relation, strength, confidence, bidirectional, Utc::now())
    }

    pub fn unlink(&self, id: &AssociationId) -> bool {
        self.graph.write().unlink(id, Utc::now())
    }

    pub fn neighbors(&self, id: &MemoryId) -> Result<Vec<Association>> {
        self.graph.read().neighbors(id)
    }

    /// Spread activation from `seeds`; the engine's activation settings
    /// apply unless overridden
    pub fn spread_activation(&self, seeds: &[MemoryId], config: Option<ActivationConfig>) -> Activation {
        let config = config.unwrap_or(self.config.activation);
        self.graph.read().associations().spread_activation(seeds, &config)
    }

    // ==================== Retrieval ====================

    /// Run a query and record the access feedback on what it returned
    pub fn query(&self, query: &MemoryQuery) -> Result<QueryResponse> {
        let mut outcome = {
            let graph = self.graph.read();
            self.retrieval.search(&graph, query)?
        };
        {
            let mut graph = self.graph.write();
            RetrievalEngine::apply_feedback(&mut graph, &mut outcome, Utc::now());
        }
        log::debug!(
            "Query '{}' ({}) returned {} of {} matches in {:.2}ms",
            query.text,
            outcome.response.strategy_used,
            outcome.response.results.len(),
            outcome.response.total_matches,
            outcome.response.execution_time_ms
        );
        Ok(outcome.response)
    }

    // ==================== Transitions ====================

    pub fn execute_transition(
        &self,
        id: &MemoryId,
        target: MemoryTier,
        preserve_original: Option<bool>,
    ) -> Result<TransitionResult> {
        let mut graph = self.graph.write();
        self.transitions.execute(&mut graph, id, target, preserve_original, Utc::now())
    }

    // ==================== Optimization ====================

    pub fn optimize(&self, dry_run: bool) -> Result<OptimizationReport> {
        self.optimize_as_of(Utc::now(), dry_run)
    }

    /// Run every pass with ages measured against `now`
    pub fn optimize_as_of(&self, now: DateTime<Utc>, dry_run: bool) -> Result<OptimizationReport> {
        let _guard = RunGuard::acquire(&self.optimizing)?;
        Ok(self.optimizer.run(&self.graph, now, dry_run, &AtomicBool::new(false)))
    }

    /// Run a single pass
    pub fn run_pass(&self, pass: OptimizationPass, now: DateTime<Utc>, dry_run: bool) -> Result<PassReport> {
        let _guard = RunGuard::acquire(&self.optimizing)?;
        self.optimizer.run_pass(pass, &self.graph, now, dry_run)
    }

    pub fn is_optimizing(&self) -> bool {
        self.optimizing.load(Ordering::SeqCst)
    }

    /// Run the full optimization on a tokio blocking task
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_optimization(&self, dry_run: bool) -> Result<OptimizationHandle> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| MemoryError::other(format!("no tokio runtime: {}", e)))?;
        let guard = RunGuard::acquire(&self.optimizing)?;

        let cancel = Arc::new(AtomicBool::new(false));
        let flag = cancel.clone();
        let engine = self.clone();
        let started_at = Utc::now();

        let task = runtime.spawn_blocking(move || {
            let _guard = guard;
            engine.optimizer.run(&engine.graph, Utc::now(), dry_run, &flag)
        });
        log::info!("Background optimization started{}", if dry_run { " (dry run)" } else { "" });

        Ok(OptimizationHandle {
            cancel,
            task,
            started_at,
        })
    }

    // ==================== Analytics & export ====================

    /// Aggregate statistics, computed outside the lock on a copy
    pub fn stats(&self) -> MemoryStats {
        let snapshot = self.graph.read().clone();
        MemoryStats::compute(&snapshot, &self.config, Utc::now())
    }

    pub fn export(&self, tier: Option<MemoryTier>) -> MemorySnapshot {
        let graph = self.graph.read();
        MemorySnapshot::capture(&graph, tier, Utc::now())
    }

    pub fn export_bytes(&self, tier: Option<MemoryTier>, format: ExportFormat) -> Result<Vec<u8>> {
        self.export(tier).to_bytes(format)
    }

    /// Write a snapshot to disk; returns the bytes written
    pub fn export_to_path(&self, path: &Path, tier: Option<MemoryTier>, format: ExportFormat) -> Result<usize> {
        self.export(tier).write_to_path(path, format)
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("records", &self.len())
            .field("optimizing", &self.is_optimizing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::LifecycleState;
    use chrono::Duration;

    #[test]
    fn test_store_queues_firing_transition() {
        let engine = MemoryEngine::default();
        let record = engine
            .store(
                MemoryDraft::builder()
                    .tier(MemoryTier::Working)
                    .content("the outage was alarming")
                    .affect(-0.6, 0.9)
                    .build()
                    .unwrap(),
                None,
            )
            .unwrap();

        let pending = engine.pending_transitions();
        assert_eq!(pending, vec![PendingTransition { id: record.id, target: MemoryTier::Emotional }]);

        let report = engine.run_pass(OptimizationPass::Transitions, Utc::now(), false).unwrap();
        assert_eq!(report.counts.transitioned, 1);
        assert!(engine.get(&record.id).is_err());
        assert_eq!(engine.list_by_tier(MemoryTier::Emotional).len(), 1);
        assert!(engine.pending_transitions().is_empty());
    }

    #[test]
    fn test_delete_evicts_cached_embedding() {
        let engine = MemoryEngine::default();
        let record = engine.store(MemoryDraft::new(MemoryTier::Semantic, "vector me"), None).unwrap();
        engine.query(&MemoryQuery::semantic("vector me")).unwrap();
        assert!(engine.embeddings.is_cached(&record.id));

        assert!(engine.delete(&record.id));
        assert!(!engine.embeddings.is_cached(&record.id));
        assert!(!engine.delete(&record.id));
    }

    #[test]
    fn test_only_one_optimization_at_a_time() {
        let engine = MemoryEngine::default();
        let held = RunGuard::acquire(&engine.optimizing).unwrap();
        assert!(engine.optimize(false).is_err());
        drop(held);
        assert!(engine.optimize(false).is_ok());
        assert!(!engine.is_optimizing());
    }

    #[test]
    fn test_spawn_requires_runtime() {
        let engine = MemoryEngine::default();
        assert!(engine.spawn_optimization(false).is_err());
    }

    #[tokio::test]
    async fn test_background_optimization() {
        let engine = MemoryEngine::default();
        let now = Utc::now();
        let old = engine
            .store_at(
                MemoryDraft::builder()
                    .tier(MemoryTier::Semantic)
                    .content("stale trivia")
                    .importance(0.2)
                    .confidence(0.3)
                    .reinforcement_count(2)
                    .build()
                    .unwrap(),
                None,
                now - Duration::days(40),
            )
            .unwrap();

        let handle = engine.spawn_optimization(false).unwrap();
        assert!(engine.spawn_optimization(false).is_err());
        let report = handle.join().await.unwrap();

        assert!(!report.cancelled);
        assert_eq!(report.passes.len(), OptimizationPass::ALL.len());
        assert_eq!(engine.get(&old.id).unwrap().state, LifecycleState::Archived);
        assert!(!engine.is_optimizing());
    }

    #[tokio::test]
    async fn test_cancelled_background_run_reports_cancellation() {
        let engine = MemoryEngine::default();
        // Hold the write lock so the run cannot get past its first pass
        // before the cancel flag is set
        let graph = engine.graph.clone();
        let lock = graph.write();
        let handle = engine.spawn_optimization(false).unwrap();
        handle.cancel();
        drop(lock);

        let report = handle.join().await.unwrap();
        assert!(report.cancelled);
        assert!(report.passes.len() < OptimizationPass::ALL.len());
    }
}
