//! Memory record types and builders
//!
//! Core types for representing memories across the five tiers.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::association::AssociationId;
use crate::error::{MemoryError, Result};
use crate::temporal::TemporalMetadata;

/// Unique identifier for memory records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemoryId(pub Uuid);

impl MemoryId {
    /// Create a new random MemoryId
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from existing UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for MemoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MemoryId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// The five memory tiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    /// Short-lived scratch entries
    Working,
    /// Event-shaped entries
    Episodic,
    /// Generalized knowledge
    Semantic,
    /// Operational/skill entries
    Procedural,
    /// Affect-tagged entries
    Emotional,
}

impl MemoryTier {
    pub const ALL: [MemoryTier; 5] = [
        MemoryTier::Working,
        MemoryTier::Episodic,
        MemoryTier::Semantic,
        MemoryTier::Procedural,
        MemoryTier::Emotional,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Working => "working",
            Self::Episodic => "episodic",
            Self::Semantic => "semantic",
            Self::Procedural => "procedural",
            Self::Emotional => "emotional",
        }
    }
}

impl fmt::Display for MemoryTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemoryTier {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "working" => Ok(Self::Working),
            "episodic" => Ok(Self::Episodic),
            "semantic" => Ok(Self::Semantic),
            "procedural" => Ok(Self::Procedural),
            "emotional" => Ok(Self::Emotional),
            other => Err(MemoryError::invalid_query(format!(
                "unknown tier '{}'",
                other
            ))),
        }
    }
}

/// Shape of the stored payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    #[default]
    Text,
    Structured,
    Vector,
    Multimodal,
}

/// Where a memory came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    #[default]
    Conversation,
    Document,
    Feedback,
    Experience,
    Training,
    Inference,
    Synthesis,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conversation => "conversation",
            Self::Document => "document",
            Self::Feedback => "feedback",
            Self::Experience => "experience",
            Self::Training => "training",
            Self::Inference => "inference",
            Self::Synthesis => "synthesis",
        }
    }
}

/// Validation status of the source material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    #[default]
    Unverified,
    Verified,
    Disputed,
}

/// Source detail block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extraction_method: Option<String>,
    #[serde(default)]
    pub validation_status: ValidationStatus,
    /// Reliability of the source (0.0 to 1.0)
    pub reliability: f32,
}

impl Default for SourceDetail {
    fn default() -> Self {
        Self {
            origin: None,
            extraction_method: None,
            validation_status: ValidationStatus::default(),
            reliability: 1.0,
        }
    }
}

/// Provenance: source kind plus detail
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Provenance {
    pub kind: SourceKind,
    #[serde(default)]
    pub detail: SourceDetail,
}

impl Provenance {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            detail: SourceDetail::default(),
        }
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.detail.origin = Some(origin.into());
        self
    }
}

/// Lifecycle state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Active,
    Dormant,
    Archived,
    Deprecated,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 4] = [
        LifecycleState::Active,
        LifecycleState::Dormant,
        LifecycleState::Archived,
        LifecycleState::Deprecated,
    ];

    /// States returned by queries unless the caller asks otherwise
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Active | Self::Dormant)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Dormant => "dormant",
            Self::Archived => "archived",
            Self::Deprecated => "deprecated",
        }
    }
}

/// Cognitive scores, each in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CognitiveScores {
    pub confidence: f32,
    pub importance: f32,
    pub clarity: f32,
    pub stability: f32,
}

impl Default for CognitiveScores {
    fn default() -> Self {
        Self {
            confidence: 0.8,
            importance: 0.5,
            clarity: 0.8,
            stability: 1.0,
        }
    }
}

/// Affect: valence in [-1, 1], intensity in [0, 1]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Affect {
    pub valence: f32,
    pub intensity: f32,
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

/// Activity counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ActivityCounters {
    pub access_count: u64,
    pub activation_count: u64,
    pub reinforcement_count: u64,
    /// Per-record decay rate parameter (non-negative)
    pub decay_rate: f32,
}

impl Default for ActivityCounters {
    fn default() -> Self {
        Self {
            access_count: 0,
            activation_count: 0,
            reinforcement_count: 0,
            decay_rate: 1.0,
        }
    }
}

/// Relations held by id only; the association index owns the edges
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Relations {
    /// Outgoing associations
    #[serde(default)]
    pub association_ids: Vec<AssociationId>,
    #[serde(default)]
    pub context_ids: Vec<MemoryId>,
    #[serde(default)]
    pub derived_from: Vec<MemoryId>,
    #[serde(default)]
    pub influenced_ids: Vec<MemoryId>,
}

/// A stored memory record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Unique identifier, assigned by the store
    pub id: MemoryId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<MemoryId>,
    #[serde(default)]
    pub child_ids: Vec<MemoryId>,
    pub tier: MemoryTier,
    /// Opaque payload
    pub content: String,
    pub content_kind: ContentKind,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub temporal: TemporalMetadata,
    pub scores: CognitiveScores,
    pub affect: Affect,
    pub activity: ActivityCounters,
    pub relations: Relations,
    pub provenance: Provenance,
    pub state: LifecycleState,
    /// Strictly increases on every mutation; 1 on creation
    pub version: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    pub compression_level: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f32>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default)]
    pub domains: BTreeSet<String>,
}

impl MemoryRecord {
    /// Materialize a draft with a freshly assigned id
    pub(crate) fn from_draft(draft: MemoryDraft, context: Option<&MemoryContext>, now: DateTime<Utc>) -> Self {
        let mut metadata = draft.metadata;
        if let Some(context) = context {
            if let Some(session_id) = &context.session_id {
                metadata.insert("session_id".to_string(), Value::String(session_id.clone()));
            }
            if let Some(task_id) = &context.task_id {
                metadata.insert("task_id".to_string(), Value::String(task_id.clone()));
            }
            for (key, value) in &context.metadata {
                metadata.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        let mut temporal = TemporalMetadata::new_at(now);
        temporal.expires_at = draft.expires_at;

        Self {
            id: MemoryId::new(),
            parent_id: draft.parent_id,
            child_ids: Vec::new(),
            tier: draft.tier,
            content: draft.content,
            content_kind: draft.content_kind,
            metadata,
            temporal,
            scores: draft.scores,
            affect: draft.affect,
            activity: draft.activity,
            relations: Relations {
                association_ids: Vec::new(),
                context_ids: draft.context_ids,
                derived_from: draft.derived_from,
                influenced_ids: Vec::new(),
            },
            provenance: draft.provenance,
            state: LifecycleState::Active,
            version: 1,
            embedding: draft.embedding,
            compression_level: draft.compression_level,
            quality_score: draft.quality_score,
            tags: draft.tags,
            categories: draft.categories,
            domains: draft.domains,
        }
    }

    /// Get the searchable text for this record
    pub fn searchable_text(&self) -> String {
        if self.tags.is_empty() {
            self.content.clone()
        } else {
            let tags: Vec<&str> = self.tags.iter().map(String::as_str).collect();
            format!("{} {}", self.content, tags.join(" "))
        }
    }

    /// Quality factor = 0.5·confidence + 0.3·importance + 0.2·clarity
    pub fn quality_factor(&self) -> f32 {
        let s = &self.scores;
        (0.5 * s.confidence + 0.3 * s.importance + 0.2 * s.clarity).clamp(0.0, 1.0)
    }

    /// Content length in characters
    pub fn content_chars(&self) -> usize {
        self.content.chars().count()
    }

    /// Session the record was stored under, if any
    pub fn session_id(&self) -> Option<&str> {
        self.metadata.get("session_id").and_then(Value::as_str)
    }

    /// Check every invariant a stored record must satisfy
    pub fn validate(&self) -> Result<()> {
        validate_content(&self.content)?;
        validate_scores(&self.scores)?;
        validate_affect(&self.affect)?;
        validate_optional_fields(
            self.activity.decay_rate,
            self.quality_score,
            self.embedding.as_deref(),
        )
    }

    /// Record a mutation: bump the version and refresh `updated_at`
    pub(crate) fn mark_mutated(&mut self, now: DateTime<Utc>) {
        self.version += 1;
        self.temporal.touch(now);
    }
}

fn check_unit(field: &str, value: f32) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(MemoryError::validation(format!(
            "{} must be within [0, 1], got {}",
            field, value
        )));
    }
    Ok(())
}

pub(crate) fn validate_content(content: &str) -> Result<()> {
    if content.trim().is_empty() {
        return Err(MemoryError::validation("content must not be empty"));
    }
    Ok(())
}

pub(crate) fn validate_scores(scores: &CognitiveScores) -> Result<()> {
    check_unit("confidence", scores.confidence)?;
    check_unit("importance", scores.importance)?;
    check_unit("clarity", scores.clarity)?;
    check_unit("stability", scores.stability)
}

pub(crate) fn validate_affect(affect: &Affect) -> Result<()> {
    if !affect.valence.is_finite() || !(-1.0..=1.0).contains(&affect.valence) {
        return Err(MemoryError::validation(format!(
            "valence must be within [-1, 1], got {}",
            affect.valence
        )));
    }
    check_unit("intensity", affect.intensity)
}

fn validate_optional_fields(
    decay_rate: f32,
    quality_score: Option<f32>,
    embedding: Option<&[f32]>,
) -> Result<()> {
    if !decay_rate.is_finite() || decay_rate < 0.0 {
        return Err(MemoryError::validation(format!(
            "decay_rate must be non-negative, got {}",
            decay_rate
        )));
    }
    if let Some(quality) = quality_score {
        check_unit("quality_score", quality)?;
    }
    if let Some(embedding) = embedding {
        if embedding.is_empty() || embedding.iter().any(|v| !v.is_finite()) {
            return Err(MemoryError::validation(
                "embedding must be non-empty and finite",
            ));
        }
    }
    Ok(())
}

/// Everything a caller supplies to store a record
///
/// Ids, timestamps, version and lifecycle state are assigned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryDraft {
    pub tier: MemoryTier,
    pub content: String,
    #[serde(default)]
    pub content_kind: ContentKind,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub parent_id: Option<MemoryId>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scores: CognitiveScores,
    #[serde(default)]
    pub affect: Affect,
    #[serde(default)]
    pub activity: ActivityCounters,
    #[serde(default)]
    pub context_ids: Vec<MemoryId>,
    #[serde(default)]
    pub derived_from: Vec<MemoryId>,
    #[serde(default)]
    pub provenance: Provenance,
    #[serde(default)]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub compression_level: u8,
    #[serde(default)]
    pub quality_score: Option<f32>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub categories: BTreeSet<String>,
    #[serde(default)]
    pub domains: BTreeSet<String>,
}

impl MemoryDraft {
    /// Create a new builder for MemoryDraft
    pub fn builder() -> MemoryDraftBuilder {
        MemoryDraftBuilder::new()
    }

    /// Minimal draft with default scores
    pub fn new(tier: MemoryTier, content: impl Into<String>) -> Self {
        Self {
            tier,
            content: content.into(),
            content_kind: ContentKind::default(),
            metadata: Map::new(),
            parent_id: None,
            expires_at: None,
            scores: CognitiveScores::default(),
            affect: Affect::default(),
            activity: ActivityCounters::default(),
            context_ids: Vec::new(),
            derived_from: Vec::new(),
            provenance: Provenance::default(),
            embedding: None,
            compression_level: 0,
            quality_score: None,
            tags: BTreeSet::new(),
            categories: BTreeSet::new(),
            domains: BTreeSet::new(),
        }
    }

    /// Check the draft before anything is written
    pub fn validate(&self) -> Result<()> {
        validate_content(&self.content)?;
        validate_scores(&self.scores)?;
        validate_affect(&self.affect)?;
        validate_optional_fields(
            self.activity.decay_rate,
            self.quality_score,
            self.embedding.as_deref(),
        )
    }
}

/// Builder for MemoryDraft with fluent API
#[derive(Debug, Default)]
pub struct MemoryDraftBuilder {
    tier: Option<MemoryTier>,
    content: Option<String>,
    content_kind: ContentKind,
    metadata: Map<String, Value>,
    parent_id: Option<MemoryId>,
    expires_at: Option<DateTime<Utc>>,
    scores: CognitiveScores,
    affect: Affect,
    activity: ActivityCounters,
    context_ids: Vec<MemoryId>,
    derived_from: Vec<MemoryId>,
    provenance: Provenance,
    embedding: Option<Vec<f32>>,
    quality_score: Option<f32>,
    tags: BTreeSet<String>,
    categories: BTreeSet<String>,
    domains: BTreeSet<String>,
}

impl MemoryDraftBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tier(mut self, tier: MemoryTier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn content_kind(mut self, kind: ContentKind) -> Self {
        self.content_kind = kind;
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub fn parent(mut self, parent_id: MemoryId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    /// Scores are validated at store time, never clamped here
    pub fn confidence(mut self, confidence: f32) -> Self {
        self.scores.confidence = confidence;
        self
    }

    pub fn importance(mut self, importance: f32) -> Self {
        self.scores.importance = importance;
        self
    }

    pub fn clarity(mut self, clarity: f32) -> Self {
        self.scores.clarity = clarity;
        self
    }

    pub fn stability(mut self, stability: f32) -> Self {
        self.scores.stability = stability;
        self
    }

    pub fn affect(mut self, valence: f32, intensity: f32) -> Self {
        self.affect.valence = valence;
        self.affect.intensity = intensity;
        self
    }

    pub fn affect_tag(mut self, tag: impl Into<String>) -> Self {
        self.affect.tags.insert(tag.into());
        self
    }

    pub fn access_count(mut self, count: u64) -> Self {
        self.activity.access_count = count;
        self
    }

    pub fn reinforcement_count(mut self, count: u64) -> Self {
        self.activity.reinforcement_count = count;
        self
    }

    pub fn decay_rate(mut self, rate: f32) -> Self {
        self.activity.decay_rate = rate;
        self
    }

    pub fn context(mut self, id: MemoryId) -> Self {
        self.context_ids.push(id);
        self
    }

    pub fn derived_from(mut self, id: MemoryId) -> Self {
        self.derived_from.push(id);
        self
    }

    pub fn source(mut self, kind: SourceKind) -> Self {
        self.provenance.kind = kind;
        self
    }

    pub fn provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = Some(embedding);
        self
    }

    pub fn quality_score(mut self, score: f32) -> Self {
        self.quality_score = Some(score);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.categories.insert(category.into());
        self
    }

    pub fn domain(mut self, domain: impl Into<String>) -> Self {
        self.domains.insert(domain.into());
        self
    }

    /// Build the MemoryDraft
    pub fn build(self) -> std::result::Result<MemoryDraft, MemoryDraftBuilderError> {
        let tier = self.tier.ok_or(MemoryDraftBuilderError::MissingTier)?;
        let content = self.content.ok_or(MemoryDraftBuilderError::MissingContent)?;

        Ok(MemoryDraft {
            tier,
            content,
            content_kind: self.content_kind,
            metadata: self.metadata,
            parent_id: self.parent_id,
            expires_at: self.expires_at,
            scores: self.scores,
            affect: self.affect,
            activity: self.activity,
            context_ids: self.context_ids,
            derived_from: self.derived_from,
            provenance: self.provenance,
            embedding: self.embedding,
            compression_level: 0,
            quality_score: self.quality_score,
            tags: self.tags,
            categories: self.categories,
            domains: self.domains,
        })
    }
}

/// Errors that can occur when building a MemoryDraft
#[derive(Debug, thiserror::Error)]
pub enum MemoryDraftBuilderError {
    #[error("Missing required field: tier")]
    MissingTier,
    #[error("Missing required field: content")]
    MissingContent,
}

/// Session/task context supplied alongside a draft
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryContext {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl MemoryContext {
    pub fn session(session_id: impl Into<String>) -> Self {
        Self {
            session_id: Some(session_id.into()),
            ..Default::default()
        }
    }
}

/// Partial update; `None` leaves a field untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryPatch {
    pub content: Option<String>,
    pub content_kind: Option<ContentKind>,
    /// Merged key-by-key into the existing metadata
    pub metadata: Option<Map<String, Value>>,
    pub confidence: Option<f32>,
    pub importance: Option<f32>,
    pub clarity: Option<f32>,
    pub stability: Option<f32>,
    pub valence: Option<f32>,
    pub intensity: Option<f32>,
    pub affect_tags: Option<BTreeSet<String>>,
    pub decay_rate: Option<f32>,
    pub state: Option<LifecycleState>,
    pub expires_at: Option<DateTime<Utc>>,
    pub embedding: Option<Vec<f32>>,
    pub quality_score: Option<f32>,
    pub tags: Option<BTreeSet<String>>,
    pub categories: Option<BTreeSet<String>>,
    pub domains: Option<BTreeSet<String>>,
    pub provenance: Option<Provenance>,
}

impl MemoryPatch {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Whether the patch changes what embeddings are computed from
    pub fn touches_content(&self) -> bool {
        self.content.is_some() || self.embedding.is_some() || self.tags.is_some()
    }

    /// Apply onto a record, returning the names of the fields it set
    pub(crate) fn apply_to(&self, record: &mut MemoryRecord) -> Vec<&'static str> {
        let mut changed = Vec::new();

        if let Some(content) = &self.content {
            record.content = content.clone();
            changed.push("content");
        }
        if let Some(kind) = self.content_kind {
            record.content_kind = kind;
            changed.push("content_kind");
        }
        if let Some(metadata) = &self.metadata {
            for (key, value) in metadata {
                record.metadata.insert(key.clone(), value.clone());
            }
            changed.push("metadata");
        }
        if let Some(v) = self.confidence {
            record.scores.confidence = v;
            changed.push("confidence");
        }
        if let Some(v) = self.importance {
            record.scores.importance = v;
            changed.push("importance");
        }
        if let Some(v) = self.clarity {
            record.scores.clarity = v;
            changed.push("clarity");
        }
        if let Some(v) = self.stability {
            record.scores.stability = v;
            changed.push("stability");
        }
        if let Some(v) = self.valence {
            record.affect.valence = v;
            changed.push("valence");
        }
        if let Some(v) = self.intensity {
            record.affect.intensity = v;
            changed.push("intensity");
        }
        if let Some(tags) = &self.affect_tags {
            record.affect.tags = tags.clone();
            changed.push("affect_tags");
        }
        if let Some(v) = self.decay_rate {
            record.activity.decay_rate = v;
            changed.push("decay_rate");
        }
        if let Some(state) = self.state {
            record.state = state;
            changed.push("state");
        }
        if let Some(at) = self.expires_at {
            record.temporal.expires_at = Some(at);
            changed.push("expires_at");
        }
        if let Some(embedding) = &self.embedding {
            record.embedding = Some(embedding.clone());
            changed.push("embedding");
        }
        if let Some(v) = self.quality_score {
            record.quality_score = Some(v);
            changed.push("quality_score");
        }
        if let Some(tags) = &self.tags {
            record.tags = tags.clone();
            changed.push("tags");
        }
        if let Some(categories) = &self.categories {
            record.categories = categories.clone();
            changed.push("categories");
        }
        if let Some(domains) = &self.domains {
            record.domains = domains.clone();
            changed.push("domains");
        }
        if let Some(provenance) = &self.provenance {
            record.provenance = provenance.clone();
            changed.push("provenance");
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_id_generation() {
        let id1 = MemoryId::new();
        let id2 = MemoryId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_memory_id_parse() {
        let id = MemoryId::new();
        let parsed: MemoryId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_tier_from_str() {
        assert_eq!("semantic".parse::<MemoryTier>().unwrap(), MemoryTier::Semantic);
        assert_eq!(" Working ".parse::<MemoryTier>().unwrap(), MemoryTier::Working);

        let err = "longterm".parse::<MemoryTier>().unwrap_err();
        assert!(matches!(err, MemoryError::InvalidQuery(_)));
    }

    #[test]
    fn test_builder() {
        let draft = MemoryDraft::builder()
            .tier(MemoryTier::Episodic)
            .content("Deployed the billing service")
            .confidence(0.9)
            .importance(0.7)
            .affect(0.4, 0.6)
            .tag("deploy")
            .tag("billing")
            .source(SourceKind::Experience)
            .build()
            .unwrap();

        assert_eq!(draft.tier, MemoryTier::Episodic);
        assert_eq!(draft.scores.confidence, 0.9);
        assert_eq!(draft.tags.len(), 2);
        assert_eq!(draft.provenance.kind, SourceKind::Experience);
        assert!(draft.validate().is_ok());
    }

    #[test]
    fn test_builder_missing_required() {
        let result = MemoryDraft::builder().content("no tier").build();
        assert!(matches!(result, Err(MemoryDraftBuilderError::MissingTier)));

        let result = MemoryDraft::builder().tier(MemoryTier::Working).build();
        assert!(matches!(result, Err(MemoryDraftBuilderError::MissingContent)));
    }

    #[test]
    fn test_builder_does_not_clamp() {
        let draft = MemoryDraft::builder()
            .tier(MemoryTier::Semantic)
            .content("x")
            .confidence(1.5)
            .build()
            .unwrap();
        assert_eq!(draft.scores.confidence, 1.5);
        assert!(matches!(draft.validate(), Err(MemoryError::Validation(_))));
    }

    #[test]
    fn test_validation_rejects_bad_drafts() {
        let empty = MemoryDraft::new(MemoryTier::Working, "   ");
        assert!(matches!(empty.validate(), Err(MemoryError::Validation(_))));

        let mut valence = MemoryDraft::new(MemoryTier::Emotional, "ok");
        valence.affect.valence = -1.5;
        assert!(valence.validate().is_err());

        let mut nan = MemoryDraft::new(MemoryTier::Semantic, "ok");
        nan.scores.importance = f32::NAN;
        assert!(nan.validate().is_err());

        let mut embedding = MemoryDraft::new(MemoryTier::Semantic, "ok");
        embedding.embedding = Some(vec![]);
        assert!(embedding.validate().is_err());
    }

    #[test]
    fn test_from_draft_assigns_identity() {
        let now = Utc::now();
        let context = MemoryContext {
            session_id: Some("s-1".into()),
            task_id: Some("t-9".into()),
            ..Default::default()
        };
        let record = MemoryRecord::from_draft(
            MemoryDraft::new(MemoryTier::Working, "scratch"),
            Some(&context),
            now,
        );

        assert_eq!(record.version, 1);
        assert_eq!(record.state, LifecycleState::Active);
        assert_eq!(record.temporal.created_at, now);
        assert_eq!(record.session_id(), Some("s-1"));
        assert_eq!(record.metadata["task_id"], Value::String("t-9".into()));
    }

    #[test]
    fn test_quality_factor() {
        let mut record = MemoryRecord::from_draft(
            MemoryDraft::new(MemoryTier::Semantic, "fact"),
            None,
            Utc::now(),
        );
        record.scores = CognitiveScores {
            confidence: 1.0,
            importance: 1.0,
            clarity: 1.0,
            stability: 1.0,
        };
        assert!((record.quality_factor() - 1.0).abs() < 1e-6);

        record.scores.confidence = 0.0;
        assert!((record.quality_factor() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_patch_apply_merges_metadata() {
        let mut record = MemoryRecord::from_draft(
            MemoryDraft::builder()
                .tier(MemoryTier::Semantic)
                .content("fact")
                .metadata("a", Value::from(1))
                .build()
                .unwrap(),
            None,
            Utc::now(),
        );

        let mut metadata = Map::new();
        metadata.insert("b".into(), Value::from(2));
        let patch = MemoryPatch {
            metadata: Some(metadata),
            importance: Some(0.9),
            ..Default::default()
        };

        let changed = patch.apply_to(&mut record);
        assert_eq!(changed, vec!["metadata", "importance"]);
        assert_eq!(record.metadata.len(), 2);
        assert_eq!(record.scores.importance, 0.9);
    }

    #[test]
    fn test_record_serialization() {
        let record = MemoryRecord::from_draft(
            MemoryDraft::builder()
                .tier(MemoryTier::Procedural)
                .content("Run migrations before deploy")
                .category("ops")
                .build()
                .unwrap(),
            None,
            Utc::now(),
        );

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"tier\":\"procedural\""));
        let deserialized: MemoryRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(record, deserialized);
    }
}
