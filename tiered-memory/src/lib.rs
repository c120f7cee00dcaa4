//! Tiered Memory
//!
//! An in-memory store for typed memory records organized into five tiers
//! (working, episodic, semantic, procedural, emotional), with associative
//! retrieval, a forgetting model and background maintenance.
//!
//! ## Features
//!
//! - **Arena graph** - records keyed by id, associations reference ids only
//! - **Hybrid retrieval** - exact, fuzzy and embedding scoring plus activation spreading
//! - **Optimizer** - decay, compression, consolidation, reinforcement, deduplication
//! - **Transitions** - condition-gated tier moves with lineage
//!
//! ## Example
//!
//! ```
//! use tiered_memory::{EngineConfig, MemoryDraft, MemoryEngine, MemoryQuery, MemoryTier};
//!
//! let engine = MemoryEngine::new(EngineConfig::default());
//!
//! let draft = MemoryDraft::builder()
//!     .tier(MemoryTier::Semantic)
//!     .content("cats are mammals")
//!     .importance(0.7)
//!     .tag("biology")
//!     .build()?;
//! let record = engine.store(draft, None)?;
//!
//! let response = engine.query(&MemoryQuery::fuzzy("cat", 0.5))?;
//! assert_eq!(response.results[0].record.id, record.id);
//! # Ok::<(), tiered_memory::MemoryError>(())
//! ```

pub mod analytics;
pub mod association;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod export;
pub mod optimizer;
pub mod query;
pub mod record;
pub mod search;
pub mod store;
pub mod temporal;
pub mod text;
pub mod transition;

// Re-exports for convenience
pub use analytics::{MemoryStats, TagCount, TierUsage};
pub use association::{Activation, Association, AssociationId, AssociationIndex, RelationType};
pub use config::EngineConfig;
pub use embedding::{cosine_similarity, Embedder, EmbeddingEngine, HashingEmbedder};
pub use engine::{MemoryEngine, OptimizationHandle};
pub use error::{MemoryError, Result};
pub use export::{ExportFormat, MemorySnapshot};
pub use optimizer::{OptimizationPass, OptimizationReport, PassCounts, PassReport, TaskError};
pub use query::{
    MatchKind, MemoryQuery, QueryKind, QueryResponse, QueryResult, ScoreRange, SortKey, TimeRange,
};
pub use record::{
    Affect, CognitiveScores, ContentKind, LifecycleState, MemoryContext, MemoryDraft,
    MemoryDraftBuilder, MemoryId, MemoryPatch, MemoryRecord, MemoryTier, Provenance, SourceKind,
};
pub use search::RetrievalEngine;
pub use store::{MemoryGraph, PendingTransition};
pub use temporal::TemporalMetadata;
pub use transition::{
    ConditionKind, ConditionOperator, ConditionValue, TransformKind, TransitionCondition,
    TransitionEngine, TransitionResult, TransitionRule,
};
