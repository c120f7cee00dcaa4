//! Transition engine
//!
//! Tier moves are directed edges `(from, to)` gated by weighted conditions.
//! A rule fires when every required condition holds and the summed weight of
//! the satisfied optional conditions exceeds its priority threshold (a rule
//! with no optional conditions fires on its required ones alone).
//!
//! Executing a transition writes a transformed copy under a fresh id and
//! then deletes or preserves the original. Failures come back as a
//! [`TransitionResult`] with `success = false` so sweeps can keep going.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::association::validate_link;
use crate::embedding::{cosine_similarity, EmbeddingEngine};
use crate::error::{MemoryError, Result};
use crate::record::{LifecycleState, MemoryId, MemoryRecord, MemoryTier, Relations};
use crate::store::MemoryGraph;
use crate::temporal::TemporalMetadata;

/// Confidence multiplier applied by every transform
const TRANSFORM_CONFIDENCE_FACTOR: f32 = 0.95;

/// Name of the built-in affect predicate
pub const HIGH_AFFECT: &str = "high_affect";

/// What a condition measures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionKind {
    AgeDays,
    AccessCount,
    /// Accesses per day of age (age floored at one day)
    AccessFrequency,
    Importance,
    Confidence,
    Stability,
    AssociationCount,
    ReinforcementCount,
    /// A metadata value, e.g. the session or task the record came from
    Context { key: String },
    /// The record content
    Pattern,
    /// Embedding similarity to a reference text
    Semantic { reference: String },
    /// A predicate registered by name
    Custom { name: String },
}

/// Comparison applied to the measured value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterOrEqual,
    LessThan,
    LessOrEqual,
    Contains,
    NotContains,
    Matches,
    NotMatches,
    In,
    NotIn,
    Between,
    NotBetween,
}

/// Expected value of a condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Range { min: f64, max: f64 },
    List(Vec<ConditionValue>),
}

/// One weighted gate on a transition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionCondition {
    pub kind: ConditionKind,
    pub operator: ConditionOperator,
    pub value: ConditionValue,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub required: bool,
}

fn default_weight() -> f64 {
    1.0
}

impl TransitionCondition {
    pub fn required(kind: ConditionKind, operator: ConditionOperator, value: ConditionValue) -> Self {
        Self {
            kind,
            operator,
            value,
            weight: 1.0,
            required: true,
        }
    }

    pub fn optional(kind: ConditionKind, operator: ConditionOperator, value: ConditionValue, weight: f64) -> Self {
        Self {
            kind,
            operator,
            value,
            weight,
            required: false,
        }
    }
}

/// Tier-specific reshaping applied to the new record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformKind {
    /// Confidence ×0.95 only
    #[default]
    Generic,
    /// Tags the record as an episode
    Episodic,
    /// Halves affect intensity
    Semantic,
    /// Files the record under the "procedure" category
    Procedural,
    /// Raises importance to at least the affect intensity
    Emotional,
}

impl TransformKind {
    fn apply(&self, record: &mut MemoryRecord, changes: &mut Vec<String>) {
        let before = record.scores.confidence;
        record.scores.confidence = (before * TRANSFORM_CONFIDENCE_FACTOR).clamp(0.0, 1.0);
        changes.push(format!(
            "confidence: {:.3} -> {:.3}",
            before, record.scores.confidence
        ));

        match self {
            Self::Generic => {}
            Self::Episodic => {
                if record.tags.insert("episode".to_string()) {
                    changes.push("tag added: episode".to_string());
                }
            }
            Self::Semantic => {
                let intensity = record.affect.intensity;
                record.affect.intensity = intensity * 0.5;
                changes.push(format!(
                    "intensity: {:.3} -> {:.3}",
                    intensity, record.affect.intensity
                ));
            }
            Self::Procedural => {
                if record.categories.insert("procedure".to_string()) {
                    changes.push("category added: procedure".to_string());
                }
            }
            Self::Emotional => {
                let importance = record.scores.importance;
                record.scores.importance = importance.max(record.affect.intensity);
                if record.scores.importance != importance {
                    changes.push(format!(
                        "importance: {:.3} -> {:.3}",
                        importance, record.scores.importance
                    ));
                }
            }
        }
    }
}

/// A directed, condition-gated tier move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRule {
    pub name: String,
    pub from: MemoryTier,
    pub to: MemoryTier,
    pub conditions: Vec<TransitionCondition>,
    /// Optional conditions must sum to more than this
    pub priority_threshold: f64,
    pub preserve_original: bool,
    #[serde(default)]
    pub transform: TransformKind,
    #[serde(default = "enabled")]
    pub enabled: bool,
}

fn enabled() -> bool {
    true
}

impl TransitionRule {
    pub fn new(name: impl Into<String>, from: MemoryTier, to: MemoryTier) -> Self {
        Self {
            name: name.into(),
            from,
            to,
            conditions: Vec::new(),
            priority_threshold: 0.0,
            preserve_original: false,
            transform: TransformKind::Generic,
            enabled: true,
        }
    }

    pub fn with_condition(mut self, condition: TransitionCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.priority_threshold = threshold;
        self
    }

    pub fn preserving(mut self, preserve: bool) -> Self {
        self.preserve_original = preserve;
        self
    }

    pub fn with_transform(mut self, transform: TransformKind) -> Self {
        self.transform = transform;
        self
    }
}

/// How a rule evaluated against one record
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleEvaluation {
    pub required_met: bool,
    /// Summed weight of the satisfied optional conditions
    pub optional_score: f64,
    pub fires: bool,
}

/// Outcome of a transition attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionResult {
    pub success: bool,
    pub original_id: MemoryId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_id: Option<MemoryId>,
    pub from_tier: MemoryTier,
    pub to_tier: MemoryTier,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    pub preserved_original: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    pub processing_time_ms: f64,
    pub changes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Named record predicate usable from `ConditionKind::Custom`
pub type CustomPredicate = Arc<dyn Fn(&MemoryRecord) -> bool + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
enum Observed {
    Number(f64),
    Text(String),
    Bool(bool),
    Missing,
}

/// Rule registry plus the executor
pub struct TransitionEngine {
    rules: RwLock<Vec<TransitionRule>>,
    predicates: RwLock<HashMap<String, CustomPredicate>>,
    patterns: DashMap<String, Regex>,
    embeddings: Arc<EmbeddingEngine>,
    lineage_strength: f32,
}

impl TransitionEngine {
    /// Engine with the default rule set and the `high_affect` predicate
    pub fn new(embeddings: Arc<EmbeddingEngine>) -> Self {
        let engine = Self::empty(embeddings);
        engine.register_predicate(HIGH_AFFECT, |record| record.affect.intensity >= 0.7);
        for rule in default_rules() {
            // Default rules are known-good
            if let Err(e) = engine.add_rule(rule) {
                log::warn!("Skipping default transition rule: {}", e);
            }
        }
        engine
    }

    /// Engine with no rules or predicates
    pub fn empty(embeddings: Arc<EmbeddingEngine>) -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            predicates: RwLock::new(HashMap::new()),
            patterns: DashMap::new(),
            embeddings,
            lineage_strength: 0.8,
        }
    }

    /// Strength of the link from a new record to its preserved original
    pub fn with_lineage_strength(mut self, strength: f32) -> Self {
        self.lineage_strength = strength;
        self
    }

    // ==================== Rule registry ====================

    /// Add a rule, replacing any rule with the same name
    pub fn add_rule(&self, rule: TransitionRule) -> Result<()> {
        if rule.from == rule.to {
            return Err(MemoryError::validation(format!(
                "rule '{}' does not change tier",
                rule.name
            )));
        }
        if !rule.priority_threshold.is_finite() {
            return Err(MemoryError::validation("priority threshold must be finite"));
        }
        for condition in &rule.conditions {
            if !condition.weight.is_finite() || condition.weight < 0.0 {
                return Err(MemoryError::validation(format!(
                    "condition weight must be non-negative, got {}",
                    condition.weight
                )));
            }
            if matches!(
                condition.operator,
                ConditionOperator::Matches | ConditionOperator::NotMatches
            ) {
                let ConditionValue::Text(pattern) = &condition.value else {
                    return Err(MemoryError::validation("matches operator needs a text pattern"));
                };
                self.pattern(pattern)?;
            }
        }

        let mut rules = self.rules.write();
        rules.retain(|r| r.name != rule.name);
        log::debug!("Registered transition rule '{}' ({} -> {})", rule.name, rule.from, rule.to);
        rules.push(rule);
        Ok(())
    }

    pub fn remove_rule(&self, name: &str) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.name != name);
        rules.len() != before
    }

    pub fn rules(&self) -> Vec<TransitionRule> {
        self.rules.read().clone()
    }

    /// The first enabled rule for an edge
    pub fn rule_for(&self, from: MemoryTier, to: MemoryTier) -> Option<TransitionRule> {
        self.rules
            .read()
            .iter()
            .find(|r| r.enabled && r.from == from && r.to == to)
            .cloned()
    }

    pub fn register_predicate<F>(&self, name: impl Into<String>, predicate: F)
    where
        F: Fn(&MemoryRecord) -> bool + Send + Sync + 'static,
    {
        self.predicates.write().insert(name.into(), Arc::new(predicate));
    }

    fn pattern(&self, pattern: &str) -> Result<Regex> {
        if let Some(regex) = self.patterns.get(pattern) {
            return Ok(regex.clone());
        }
        let regex = Regex::new(pattern)
            .map_err(|e| MemoryError::validation(format!("invalid pattern '{}': {}", pattern, e)))?;
        self.patterns.insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }

    // ==================== Evaluation ====================

    /// Evaluate one rule against a record
    pub fn evaluate_rule(
        &self,
        graph: &MemoryGraph,
        record: &MemoryRecord,
        rule: &TransitionRule,
        now: DateTime<Utc>,
    ) -> RuleEvaluation {
        let mut required_met = true;
        let mut optional_score = 0.0;
        let mut has_optional = false;

        for condition in &rule.conditions {
            let holds = self.condition_holds(graph, record, condition, now);
            if condition.required {
                if !holds {
                    required_met = false;
                    break;
                }
            } else {
                has_optional = true;
                if holds {
                    optional_score += condition.weight;
                }
            }
        }

        let fires = required_met && (!has_optional || optional_score > rule.priority_threshold);
        RuleEvaluation {
            required_met,
            optional_score,
            fires,
        }
    }

    /// The first enabled rule leaving the record's tier that fires
    pub fn firing_rule(&self, graph: &MemoryGraph, record: &MemoryRecord, now: DateTime<Utc>) -> Option<TransitionRule> {
        if !record.state.is_live() {
            return None;
        }
        self.rules
            .read()
            .iter()
            .filter(|r| r.enabled && r.from == record.tier)
            .find(|r| self.evaluate_rule(graph, record, r, now).fires)
            .cloned()
    }

    fn condition_holds(
        &self,
        graph: &MemoryGraph,
        record: &MemoryRecord,
        condition: &TransitionCondition,
        now: DateTime<Utc>,
    ) -> bool {
        let observed = self.observe(graph, record, &condition.kind, now);
        self.compare(&observed, condition.operator, &condition.value)
    }

    fn observe(&self, graph: &MemoryGraph, record: &MemoryRecord, kind: &ConditionKind, now: DateTime<Utc>) -> Observed {
        match kind {
            ConditionKind::AgeDays => Observed::Number(record.temporal.age_days(now)),
            ConditionKind::AccessCount => Observed::Number(record.activity.access_count as f64),
            ConditionKind::AccessFrequency => {
                let days = record.temporal.age_days(now).max(1.0);
                Observed::Number(record.activity.access_count as f64 / days)
            }
            ConditionKind::Importance => Observed::Number(f64::from(record.scores.importance)),
            ConditionKind::Confidence => Observed::Number(f64::from(record.scores.confidence)),
            ConditionKind::Stability => Observed::Number(f64::from(record.scores.stability)),
            ConditionKind::AssociationCount => {
                Observed::Number(graph.associations().degree(&record.id) as f64)
            }
            ConditionKind::ReinforcementCount => {
                Observed::Number(record.activity.reinforcement_count as f64)
            }
            ConditionKind::Context { key } => match record.metadata.get(key) {
                Some(Value::String(s)) => Observed::Text(s.clone()),
                Some(Value::Bool(b)) => Observed::Bool(*b),
                Some(Value::Number(n)) => n.as_f64().map_or(Observed::Missing, Observed::Number),
                Some(Value::Null) | None => Observed::Missing,
                Some(other) => Observed::Text(other.to_string()),
            },
            ConditionKind::Pattern => Observed::Text(record.content.clone()),
            ConditionKind::Semantic { reference } => {
                let similarity = self
                    .embeddings
                    .embed_query(reference)
                    .and_then(|q| Ok(cosine_similarity(&q, &self.embeddings.embedding_for(record)?)));
                match similarity {
                    Ok(s) => Observed::Number(f64::from(s.clamp(0.0, 1.0))),
                    Err(e) => {
                        log::warn!("Semantic condition failed for {}: {}", record.id, e);
                        Observed::Missing
                    }
                }
            }
            ConditionKind::Custom { name } => match self.predicates.read().get(name) {
                Some(predicate) => Observed::Bool(predicate(record)),
                None => {
                    log::warn!("Unknown transition predicate '{}'", name);
                    Observed::Missing
                }
            },
        }
    }

    fn compare(&self, observed: &Observed, operator: ConditionOperator, expected: &ConditionValue) -> bool {
        use ConditionOperator::*;

        if *observed == Observed::Missing {
            return false;
        }

        match operator {
            Equals => equals(observed, expected),
            NotEquals => !equals(observed, expected),
            GreaterThan => number_cmp(observed, expected).is_some_and(|o| o.is_gt()),
            GreaterOrEqual => number_cmp(observed, expected).is_some_and(|o| o.is_ge()),
            LessThan => number_cmp(observed, expected).is_some_and(|o| o.is_lt()),
            LessOrEqual => number_cmp(observed, expected).is_some_and(|o| o.is_le()),
            Contains => contains(observed, expected),
            NotContains => !contains(observed, expected),
            Matches => self.matches(observed, expected),
            NotMatches => !self.matches(observed, expected),
            In => is_in(observed, expected),
            NotIn => !is_in(observed, expected),
            Between => between(observed, expected),
            NotBetween => !between(observed, expected),
        }
    }

    fn matches(&self, observed: &Observed, expected: &ConditionValue) -> bool {
        match (observed, expected) {
            (Observed::Text(text), ConditionValue::Text(pattern)) => match self.pattern(pattern) {
                Ok(regex) => regex.is_match(text),
                Err(e) => {
                    log::warn!("{}", e);
                    false
                }
            },
            _ => false,
        }
    }

    // ==================== Execution ====================

    /// Move a record to another tier
    ///
    /// Conditions are not re-checked here. The configured rule for the edge
    /// supplies the transform and preserve policy; without one the generic
    /// transform applies and the original is deleted. `preserve` overrides
    /// the policy either way.
    pub fn execute(
        &self,
        graph: &mut MemoryGraph,
        id: &MemoryId,
        target: MemoryTier,
        preserve: Option<bool>,
        now: DateTime<Utc>,
    ) -> Result<TransitionResult> {
        let from = graph.get(id)?.tier;
        let rule = self.rule_for(from, target);
        let preserve = preserve.unwrap_or_else(|| rule.as_ref().is_some_and(|r| r.preserve_original));
        let transform = rule.as_ref().map_or(TransformKind::Generic, |r| r.transform);
        let rule_name = rule.map(|r| r.name);

        Ok(self.run(graph, id, target, preserve, transform, rule_name, now))
    }

    /// Execute a specific rule (used by optimizer sweeps)
    pub fn execute_rule(
        &self,
        graph: &mut MemoryGraph,
        id: &MemoryId,
        rule: &TransitionRule,
        now: DateTime<Utc>,
    ) -> TransitionResult {
        self.run(
            graph,
            id,
            rule.to,
            rule.preserve_original,
            rule.transform,
            Some(rule.name.clone()),
            now,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn run(
        &self,
        graph: &mut MemoryGraph,
        id: &MemoryId,
        target: MemoryTier,
        preserve: bool,
        transform: TransformKind,
        rule: Option<String>,
        now: DateTime<Utc>,
    ) -> TransitionResult {
        let started = Instant::now();
        let from = graph.record(id).map_or(target, |r| r.tier);
        let mut changes = Vec::new();

        let outcome = self.perform(graph, id, target, preserve, transform, now, &mut changes);
        let processing_time_ms = started.elapsed().as_secs_f64() * 1000.0;

        match outcome {
            Ok((new_id, confidence)) => {
                log::info!(
                    "Transitioned memory {} {} -> {} as {}{}",
                    id,
                    from,
                    target,
                    new_id,
                    if preserve { " (original preserved)" } else { "" }
                );
                TransitionResult {
                    success: true,
                    original_id: *id,
                    new_id: Some(new_id),
                    from_tier: from,
                    to_tier: target,
                    rule,
                    preserved_original: preserve,
                    confidence: Some(confidence),
                    processing_time_ms,
                    changes,
                    error: None,
                }
            }
            Err(e) => {
                log::warn!("Transition of {} to {} failed: {}", id, target, e);
                TransitionResult {
                    success: false,
                    original_id: *id,
                    new_id: None,
                    from_tier: from,
                    to_tier: target,
                    rule,
                    preserved_original: true,
                    confidence: None,
                    processing_time_ms,
                    changes: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Build, validate and write the transformed record; nothing is written
    /// unless every check passes
    #[allow(clippy::too_many_arguments)]
    fn perform(
        &self,
        graph: &mut MemoryGraph,
        id: &MemoryId,
        target: MemoryTier,
        preserve: bool,
        transform: TransformKind,
        now: DateTime<Utc>,
        changes: &mut Vec<String>,
    ) -> Result<(MemoryId, f32)> {
        let original = graph.get(id)?.clone();
        if original.tier == target {
            return Err(MemoryError::transition(format!(
                "memory {} is already in the {} tier",
                id, target
            )));
        }
        if preserve {
            validate_link(self.lineage_strength, 1.0)?;
        }

        let mut derived_from = original.relations.derived_from.clone();
        if !derived_from.contains(id) {
            derived_from.push(*id);
        }

        let mut temporal = TemporalMetadata::new_at(now);
        temporal.expires_at = original.temporal.expires_at;

        let mut record = MemoryRecord {
            id: MemoryId::new(),
            parent_id: Some(*id),
            child_ids: Vec::new(),
            tier: target,
            temporal,
            relations: Relations {
                association_ids: Vec::new(),
                context_ids: original.relations.context_ids.clone(),
                derived_from,
                influenced_ids: Vec::new(),
            },
            state: LifecycleState::Active,
            version: 1,
            ..original.clone()
        };
        changes.push(format!("tier: {} -> {}", original.tier, target));
        transform.apply(&mut record, changes);
        record.validate()?;

        let new_id = record.id;
        let confidence = record.scores.confidence;
        graph.insert_record(record);
        graph.clear_pending(id);

        if preserve {
            if let Some(source) = graph.record_mut(id) {
                source.child_ids.push(new_id);
                source.mark_mutated(now);
            }
            graph.link_lineage(&new_id, id, self.lineage_strength, now)?;
            changes.push("original preserved".to_string());
        } else {
            graph.delete(id, now);
            self.embeddings.evict(id);
            changes.push("original deleted".to_string());
        }

        Ok((new_id, confidence))
    }
}

impl std::fmt::Debug for TransitionEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionEngine")
            .field("rules", &self.rules.read().len())
            .field("predicates", &self.predicates.read().len())
            .finish()
    }
}

fn equals(observed: &Observed, expected: &ConditionValue) -> bool {
    match (observed, expected) {
        (Observed::Number(a), ConditionValue::Number(b)) => (a - b).abs() < 1e-9,
        (Observed::Text(a), ConditionValue::Text(b)) => a == b,
        (Observed::Bool(a), ConditionValue::Bool(b)) => a == b,
        _ => false,
    }
}

fn number_cmp(observed: &Observed, expected: &ConditionValue) -> Option<std::cmp::Ordering> {
    match (observed, expected) {
        (Observed::Number(a), ConditionValue::Number(b)) => a.partial_cmp(b),
        _ => None,
    }
}

fn contains(observed: &Observed, expected: &ConditionValue) -> bool {
    match (observed, expected) {
        (Observed::Text(text), ConditionValue::Text(needle)) => {
            text.to_lowercase().contains(&needle.to_lowercase())
        }
        _ => false,
    }
}

fn is_in(observed: &Observed, expected: &ConditionValue) -> bool {
    match expected {
        ConditionValue::List(items) => items.iter().any(|item| equals(observed, item)),
        _ => false,
    }
}

fn between(observed: &Observed, expected: &ConditionValue) -> bool {
    let Observed::Number(value) = observed else {
        return false;
    };
    match expected {
        ConditionValue::Range { min, max } => value >= min && value <= max,
        ConditionValue::List(bounds) => match bounds.as_slice() {
            [ConditionValue::Number(min), ConditionValue::Number(max)] => value >= min && value <= max,
            _ => false,
        },
        _ => false,
    }
}

/// Content that reads like instructions
const PROCEDURE_PATTERN: &str = r"(?i)\b(how to|steps?|procedure|install|configure|run)\b";

/// The built-in rule set
pub fn default_rules() -> Vec<TransitionRule> {
    use ConditionKind as K;
    use ConditionOperator as Op;
    use ConditionValue as V;

    vec![
        TransitionRule::new("working_to_emotional", MemoryTier::Working, MemoryTier::Emotional)
            .with_condition(TransitionCondition::required(
                K::Custom { name: HIGH_AFFECT.to_string() },
                Op::Equals,
                V::Bool(true),
            ))
            .with_transform(TransformKind::Emotional),
        TransitionRule::new("working_to_episodic", MemoryTier::Working, MemoryTier::Episodic)
            .with_condition(TransitionCondition::required(K::AgeDays, Op::GreaterOrEqual, V::Number(1.0 / 24.0)))
            .with_condition(TransitionCondition::optional(K::AccessCount, Op::GreaterOrEqual, V::Number(3.0), 0.5))
            .with_condition(TransitionCondition::optional(K::Importance, Op::GreaterOrEqual, V::Number(0.5), 0.5))
            .with_threshold(0.4)
            .with_transform(TransformKind::Episodic),
        TransitionRule::new("episodic_to_emotional", MemoryTier::Episodic, MemoryTier::Emotional)
            .with_condition(TransitionCondition::required(
                K::Custom { name: HIGH_AFFECT.to_string() },
                Op::Equals,
                V::Bool(true),
            ))
            .with_condition(TransitionCondition::required(K::AgeDays, Op::GreaterOrEqual, V::Number(1.0)))
            .with_condition(TransitionCondition::optional(K::Importance, Op::GreaterOrEqual, V::Number(0.6), 1.0))
            .with_threshold(0.5)
            .preserving(true)
            .with_transform(TransformKind::Emotional),
        TransitionRule::new("episodic_to_procedural", MemoryTier::Episodic, MemoryTier::Procedural)
            .with_condition(TransitionCondition::required(
                K::Pattern,
                Op::Matches,
                V::Text(PROCEDURE_PATTERN.to_string()),
            ))
            .with_condition(TransitionCondition::required(K::AccessCount, Op::GreaterOrEqual, V::Number(3.0)))
            .with_transform(TransformKind::Procedural),
        TransitionRule::new("episodic_to_semantic", MemoryTier::Episodic, MemoryTier::Semantic)
            .with_condition(TransitionCondition::required(K::AccessCount, Op::GreaterOrEqual, V::Number(5.0)))
            .with_condition(TransitionCondition::required(K::Confidence, Op::GreaterOrEqual, V::Number(0.7)))
            .with_condition(TransitionCondition::optional(K::ReinforcementCount, Op::GreaterOrEqual, V::Number(2.0), 0.4))
            .with_condition(TransitionCondition::optional(K::AssociationCount, Op::GreaterOrEqual, V::Number(3.0), 0.3))
            .with_condition(TransitionCondition::optional(K::Stability, Op::GreaterOrEqual, V::Number(0.6), 0.3))
            .with_threshold(0.5)
            .preserving(true)
            .with_transform(TransformKind::Semantic),
        TransitionRule::new("semantic_to_procedural", MemoryTier::Semantic, MemoryTier::Procedural)
            .with_condition(TransitionCondition::required(
                K::Pattern,
                Op::Matches,
                V::Text(PROCEDURE_PATTERN.to_string()),
            ))
            .with_condition(TransitionCondition::required(K::AccessCount, Op::GreaterOrEqual, V::Number(10.0)))
            .with_condition(TransitionCondition::optional(K::Confidence, Op::GreaterOrEqual, V::Number(0.8), 0.6))
            .with_condition(TransitionCondition::optional(K::AccessFrequency, Op::GreaterOrEqual, V::Number(1.0), 0.4))
            .with_threshold(0.5)
            .preserving(true)
            .with_transform(TransformKind::Procedural),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::association::RelationType;
    use crate::config::AssociationConfig;
    use crate::record::MemoryDraft;
    use chrono::Duration;

    fn engine() -> TransitionEngine {
        TransitionEngine::new(Arc::new(EmbeddingEngine::default()))
    }

    fn store(graph: &mut MemoryGraph, draft: MemoryDraft) -> MemoryRecord {
        graph
            .store(draft, None, &AssociationConfig::default(), Utc::now())
            .unwrap()
    }

    #[test]
    fn test_default_rules_registered() {
        let engine = engine();
        assert_eq!(engine.rules().len(), 6);
        assert!(engine.rule_for(MemoryTier::Episodic, MemoryTier::Semantic).is_some());
        assert!(engine.rule_for(MemoryTier::Procedural, MemoryTier::Working).is_none());
    }

    #[test]
    fn test_rule_rejects_same_tier_and_bad_pattern() {
        let engine = TransitionEngine::empty(Arc::new(EmbeddingEngine::default()));
        let same = TransitionRule::new("noop", MemoryTier::Working, MemoryTier::Working);
        assert!(engine.add_rule(same).is_err());

        let bad = TransitionRule::new("bad", MemoryTier::Working, MemoryTier::Episodic).with_condition(
            TransitionCondition::required(ConditionKind::Pattern, ConditionOperator::Matches, ConditionValue::Text("(".into())),
        );
        assert!(engine.add_rule(bad).is_err());
    }

    #[test]
    fn test_required_and_optional_weights() {
        let engine = TransitionEngine::empty(Arc::new(EmbeddingEngine::default()));
        let rule = TransitionRule::new("promote", MemoryTier::Working, MemoryTier::Semantic)
            .with_condition(TransitionCondition::required(
                ConditionKind::Confidence,
                ConditionOperator::GreaterOrEqual,
                ConditionValue::Number(0.5),
            ))
            .with_condition(TransitionCondition::optional(
                ConditionKind::Importance,
                ConditionOperator::Between,
                ConditionValue::Range { min: 0.6, max: 1.0 },
                0.6,
            ))
            .with_condition(TransitionCondition::optional(
                ConditionKind::Pattern,
                ConditionOperator::Contains,
                ConditionValue::Text("RUST".into()),
                0.3,
            ))
            .with_threshold(0.5);

        let mut graph = MemoryGraph::new();
        let strong = store(
            &mut graph,
            MemoryDraft::builder().tier(MemoryTier::Working).content("rust tip").importance(0.7).build().unwrap(),
        );
        let weak = store(
            &mut graph,
            MemoryDraft::builder().tier(MemoryTier::Working).content("rust tip two").importance(0.2).build().unwrap(),
        );
        let unsure = store(
            &mut graph,
            MemoryDraft::builder()
                .tier(MemoryTier::Working)
                .content("rust tip three")
                .importance(0.9)
                .confidence(0.1)
                .build()
                .unwrap(),
        );

        let now = Utc::now();
        let eval = engine.evaluate_rule(&graph, &strong, &rule, now);
        assert!(eval.fires);
        assert!((eval.optional_score - 0.9).abs() < 1e-9);

        let eval = engine.evaluate_rule(&graph, &weak, &rule, now);
        assert!(eval.required_met);
        assert!(!eval.fires);

        assert!(!engine.evaluate_rule(&graph, &unsure, &rule, now).required_met);
    }

    #[test]
    fn test_rule_without_optional_conditions_fires_on_required() {
        let engine = engine();
        let mut graph = MemoryGraph::new();
        let record = store(
            &mut graph,
            MemoryDraft::builder()
                .tier(MemoryTier::Working)
                .content("that was terrifying")
                .affect(-0.8, 0.9)
                .build()
                .unwrap(),
        );

        let rule = engine.firing_rule(&graph, &record, Utc::now()).unwrap();
        assert_eq!(rule.name, "working_to_emotional");
    }

    #[test]
    fn test_operators() {
        let engine = engine();
        let n = Observed::Number(5.0);
        let t = Observed::Text("Install the CLI".into());

        assert!(engine.compare(&n, ConditionOperator::In, &ConditionValue::List(vec![ConditionValue::Number(5.0)])));
        assert!(engine.compare(&n, ConditionOperator::NotIn, &ConditionValue::List(vec![])));
        assert!(engine.compare(&n, ConditionOperator::NotBetween, &ConditionValue::Range { min: 6.0, max: 9.0 }));
        assert!(engine.compare(&n, ConditionOperator::LessOrEqual, &ConditionValue::Number(5.0)));
        assert!(engine.compare(&t, ConditionOperator::Matches, &ConditionValue::Text(PROCEDURE_PATTERN.into())));
        assert!(engine.compare(&t, ConditionOperator::NotContains, &ConditionValue::Text("gui".into())));
        assert!(!engine.compare(&Observed::Missing, ConditionOperator::NotEquals, &ConditionValue::Number(1.0)));
        // Type mismatch never satisfies an ordering
        assert!(!engine.compare(&t, ConditionOperator::GreaterThan, &ConditionValue::Number(1.0)));
    }

    #[test]
    fn test_context_condition() {
        let engine = TransitionEngine::empty(Arc::new(EmbeddingEngine::default()));
        let mut graph = MemoryGraph::new();
        let record = store(
            &mut graph,
            MemoryDraft::builder()
                .tier(MemoryTier::Episodic)
                .content("standup notes")
                .metadata("session_id", Value::String("s-42".into()))
                .build()
                .unwrap(),
        );
        let rule = TransitionRule::new("session", MemoryTier::Episodic, MemoryTier::Semantic).with_condition(
            TransitionCondition::required(
                ConditionKind::Context { key: "session_id".into() },
                ConditionOperator::Equals,
                ConditionValue::Text("s-42".into()),
            ),
        );
        assert!(engine.evaluate_rule(&graph, &record, &rule, Utc::now()).fires);
    }

    #[test]
    fn test_execute_without_preserve_deletes_original() {
        let engine = engine();
        let mut graph = MemoryGraph::new();
        let original = store(&mut graph, MemoryDraft::new(MemoryTier::Working, "scratch note"));

        let result = engine
            .execute(&mut graph, &original.id, MemoryTier::Episodic, Some(false), Utc::now())
            .unwrap();
        assert!(result.success);
        assert!(graph.get(&original.id).is_err());

        let new_id = result.new_id.unwrap();
        let record = graph.get(&new_id).unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(record.tier, MemoryTier::Episodic);
        assert_eq!(record.parent_id, Some(original.id));
        assert!(record.relations.derived_from.contains(&original.id));
        assert!((record.scores.confidence - original.scores.confidence * 0.95).abs() < 1e-6);
        assert_eq!(result.confidence, Some(record.scores.confidence));
    }

    #[test]
    fn test_execute_with_preserve_keeps_lineage() {
        let engine = engine();
        let mut graph = MemoryGraph::new();
        let original = store(&mut graph, MemoryDraft::new(MemoryTier::Episodic, "learned that tests matter"));

        let result = engine
            .execute(&mut graph, &original.id, MemoryTier::Semantic, None, Utc::now())
            .unwrap();
        // The episodic → semantic rule preserves its source
        assert!(result.preserved_original);
        assert_eq!(result.rule.as_deref(), Some("episodic_to_semantic"));

        let new_id = result.new_id.unwrap();
        let source = graph.get(&original.id).unwrap();
        assert_eq!(source.child_ids, vec![new_id]);
        assert!(source.version > original.version);
        assert!(graph
            .associations()
            .contains_link(&new_id, &original.id, RelationType::Hierarchical));
    }

    #[test]
    fn test_same_tier_transition_fails_softly() {
        let engine = engine();
        let mut graph = MemoryGraph::new();
        let original = store(&mut graph, MemoryDraft::new(MemoryTier::Semantic, "fact"));

        let result = engine
            .execute(&mut graph, &original.id, MemoryTier::Semantic, None, Utc::now())
            .unwrap();
        assert!(!result.success);
        assert!(result.error.is_some());
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let engine = engine();
        let mut graph = MemoryGraph::new();
        let result = engine.execute(&mut graph, &MemoryId::new(), MemoryTier::Semantic, None, Utc::now());
        assert!(matches!(result, Err(MemoryError::NotFound(_))));
    }

    #[test]
    fn test_age_condition_uses_supplied_instant() {
        let engine = engine();
        let mut graph = MemoryGraph::new();
        let record = store(&mut graph, MemoryDraft::new(MemoryTier::Working, "short lived"));

        assert!(engine.firing_rule(&graph, &record, Utc::now()).is_none());
        let later = Utc::now() + Duration::hours(2);
        assert_eq!(
            engine.firing_rule(&graph, &record, later).map(|r| r.name),
            Some("working_to_episodic".to_string())
        );
    }
}
