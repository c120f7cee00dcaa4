//! Retrieval engine
//!
//! Scores records against a [`MemoryQuery`] by combining text containment,
//! embedding similarity and fuzzy token similarity, optionally expands the
//! result set through activation spreading, then ranks and truncates.
//!
//! Searching only reads the graph. The access feedback it produces (access
//! counts, association activations) is applied separately under the write
//! lock by [`RetrievalEngine::apply_feedback`].

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};

use crate::association::AssociationId;
use crate::config::{ActivationConfig, RetrievalConfig, TierWeights};
use crate::embedding::{cosine_similarity, EmbeddingEngine};
use crate::error::Result;
use crate::query::{MatchKind, MemoryQuery, QueryKind, QueryResponse, QueryResult, SortKey};
use crate::record::{MemoryId, MemoryRecord, MemoryTier};
use crate::store::MemoryGraph;
use crate::text::{containment_score, fuzzy_score, tokenize};

/// Per-component relevance before tier and quality weighting
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ComponentScores {
    pub text: f32,
    pub semantic: f32,
    pub fuzzy: f32,
}

/// A query's results plus the feedback still to be applied
#[derive(Debug, Clone)]
pub struct RetrievalOutcome {
    pub response: QueryResponse,
    /// Ids reached only through activation spreading
    pub associative: Vec<MemoryId>,
    /// Associations that carried activation during expansion
    pub traversed: Vec<AssociationId>,
}

/// Retrieval engine
pub struct RetrievalEngine {
    config: RetrievalConfig,
    activation: ActivationConfig,
    embeddings: Arc<EmbeddingEngine>,
}

impl RetrievalEngine {
    pub fn new(config: RetrievalConfig, activation: ActivationConfig, embeddings: Arc<EmbeddingEngine>) -> Self {
        Self {
            config,
            activation,
            embeddings,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Execute a query against a read view of the graph
    pub fn search(&self, graph: &MemoryGraph, query: &MemoryQuery) -> Result<RetrievalOutcome> {
        query.validate()?;
        let started = Instant::now();

        let tiers: Vec<MemoryTier> = if query.tiers.is_empty() {
            MemoryTier::ALL.to_vec()
        } else {
            query.tiers.clone()
        };

        let (strategy, mut results) = if query.is_time_range_only() {
            ("temporal".to_string(), self.filter_only(graph, query, &tiers, MatchKind::Temporal))
        } else if query.text.trim().is_empty() && query.vector.is_none() {
            ("filter".to_string(), self.filter_only(graph, query, &tiers, MatchKind::Filter))
        } else {
            let scored = self.score_tiers(graph, query, &tiers)?;
            (query.kind.as_str().to_string(), scored)
        };

        let mut associative = Vec::new();
        let mut traversed = Vec::new();
        let strategy = if query.expansion_depth > 0 && !results.is_empty() {
            let (expanded, edges) = self.expand(graph, query, &results);
            associative = expanded.iter().map(|r| r.record.id).collect();
            traversed = edges;
            results.extend(expanded);
            format!("{}+expansion({})", strategy, query.expansion_depth)
        } else {
            strategy
        };

        let sort = match (query.sort, query.is_time_range_only()) {
            // Time-range queries have no relevance signal to rank by
            (SortKey::Relevance, true) => SortKey::Recency,
            (sort, _) => sort,
        };
        results.sort_by(|a, b| compare_results(a, b, sort));

        let total_matches = results.len();
        results.truncate(query.max_results.unwrap_or(self.config.default_limit));

        let response = QueryResponse {
            results,
            total_matches,
            execution_time_ms: started.elapsed().as_secs_f64() * 1000.0,
            strategy_used: strategy,
        };

        Ok(RetrievalOutcome {
            response,
            associative,
            traversed,
        })
    }

    /// Apply the access feedback of a finished search
    ///
    /// Every returned record gets its access count incremented and its
    /// last-accessed timestamp refreshed; traversed associations record an
    /// activation. Returned records are refreshed to their post-feedback
    /// state. Records deleted in the meantime are skipped.
    pub fn apply_feedback(graph: &mut MemoryGraph, outcome: &mut RetrievalOutcome, now: DateTime<Utc>) {
        for result in &mut outcome.response.results {
            let id = result.record.id;
            let Some(record) = graph.record_mut(&id) else {
                continue;
            };
            record.activity.access_count += 1;
            if outcome.associative.contains(&id) {
                record.activity.activation_count += 1;
            }
            record.temporal.record_access(now);
            // Counts as a mutation for versioning; updated_at tracks edits only
            record.version += 1;
            result.record = record.clone();
        }

        for id in &outcome.traversed {
            if let Some(association) = graph.association_mut(id) {
                association.record_activation(now);
            }
        }
    }

    /// Component scores for one record
    pub fn components(
        &self,
        query: &MemoryQuery,
        query_embedding: Option<&[f32]>,
        record: &MemoryRecord,
    ) -> Result<ComponentScores> {
        let text = record.searchable_text();
        let needs_text = matches!(query.kind, QueryKind::Exact | QueryKind::Hybrid);
        let needs_fuzzy = matches!(query.kind, QueryKind::Fuzzy | QueryKind::Hybrid);

        let semantic = match query_embedding {
            Some(q) => {
                let embedding = self.embeddings.embedding_for(record)?;
                cosine_similarity(q, &embedding).clamp(0.0, 1.0)
            }
            None => 0.0,
        };

        Ok(ComponentScores {
            text: if needs_text { containment_score(&query.text, &text) } else { 0.0 },
            semantic,
            fuzzy: if needs_fuzzy { fuzzy_score(&query.text, &text) } else { 0.0 },
        })
    }

    /// Relevance in [0, 1] for a query kind, or None when the record does
    /// not match at all
    pub fn relevance(&self, query: &MemoryQuery, components: &ComponentScores) -> Option<f32> {
        let relevance = match query.kind {
            QueryKind::Exact => components.text,
            QueryKind::Fuzzy => {
                let tolerance = query
                    .fuzzy_tolerance
                    .unwrap_or(self.config.default_fuzzy_tolerance);
                if components.fuzzy < 1.0 - tolerance {
                    return None;
                }
                components.fuzzy
            }
            QueryKind::Semantic | QueryKind::Vector => components.semantic,
            QueryKind::Hybrid => {
                let weights = [
                    (self.config.text_weight.max(0.0), components.text),
                    (self.config.semantic_weight.max(0.0), components.semantic),
                    (self.config.fuzzy_weight.max(0.0), components.fuzzy),
                ];
                let total: f32 = weights.iter().map(|(w, _)| w).sum();
                if total <= 0.0 {
                    return None;
                }
                weights.iter().map(|(w, c)| w * c).sum::<f32>() / total
            }
        };

        (relevance > 0.0).then_some(relevance.clamp(0.0, 1.0))
    }

    fn tier_weights(&self, kind: QueryKind) -> &TierWeights {
        match kind {
            QueryKind::Exact => &self.config.exact_tier_weights,
            QueryKind::Fuzzy => &self.config.fuzzy_tier_weights,
            QueryKind::Semantic | QueryKind::Vector => &self.config.semantic_tier_weights,
            QueryKind::Hybrid => &self.config.hybrid_tier_weights,
        }
    }

    fn query_embedding(&self, query: &MemoryQuery) -> Result<Option<Vec<f32>>> {
        match query.kind {
            QueryKind::Exact | QueryKind::Fuzzy => Ok(None),
            QueryKind::Vector if query.vector.is_some() => Ok(query.vector.clone()),
            _ if query.text.trim().is_empty() => Ok(None),
            _ => self.embeddings.embed_query(&query.text).map(Some),
        }
    }

    /// Score every candidate tier by tier, merging on id
    fn score_tiers(&self, graph: &MemoryGraph, query: &MemoryQuery, tiers: &[MemoryTier]) -> Result<Vec<QueryResult>> {
        let query_embedding = self.query_embedding(query)?;
        let weights = self.tier_weights(query.kind);
        let query_tokens: BTreeSet<String> = tokenize(&query.text).into_iter().collect();

        let mut merged: HashMap<MemoryId, QueryResult> = HashMap::new();

        for tier in tiers {
            let tier_weight = weights.get(*tier);

            for record in graph.list_by_tier(*tier) {
                if !query.accepts(record) {
                    continue;
                }

                let components = self.components(query, query_embedding.as_deref(), record)?;
                let Some(relevance) = self.relevance(query, &components) else {
                    continue;
                };

                let quality = record.quality_factor();
                let score = (relevance * tier_weight * quality).clamp(0.0, 1.0);
                if score < query.threshold {
                    continue;
                }

                let result = QueryResult {
                    record: record.clone(),
                    score,
                    match_kind: match_kind_for(query.kind),
                    matched_fields: matched_fields(record, &query_tokens, &components),
                    explanation: Some(format!(
                        "text={:.2} semantic={:.2} fuzzy={:.2} tier_weight={:.2} quality={:.2}",
                        components.text, components.semantic, components.fuzzy, tier_weight, quality
                    )),
                };

                let better = merged
                    .get(&record.id)
                    .map_or(true, |existing| existing.score < score);
                if better {
                    merged.insert(record.id, result);
                }
            }
        }

        Ok(merged.into_values().collect())
    }

    /// Filter-only and time-range queries: no text scoring
    fn filter_only(
        &self,
        graph: &MemoryGraph,
        query: &MemoryQuery,
        tiers: &[MemoryTier],
        kind: MatchKind,
    ) -> Vec<QueryResult> {
        tiers
            .iter()
            .flat_map(|tier| graph.list_by_tier(*tier))
            .filter(|record| query.accepts(record))
            .map(|record| (record, record.quality_factor()))
            .filter(|(_, score)| *score >= query.threshold)
            .map(|(record, score)| QueryResult {
                record: record.clone(),
                score,
                match_kind: kind,
                matched_fields: Vec::new(),
                explanation: None,
            })
            .collect()
    }

    /// Fold in records reached by activation spreading from the results
    fn expand(
        &self,
        graph: &MemoryGraph,
        query: &MemoryQuery,
        results: &[QueryResult],
    ) -> (Vec<QueryResult>, Vec<AssociationId>) {
        let config = ActivationConfig {
            max_depth: query.expansion_depth,
            ..self.activation
        };
        let direct: BTreeSet<MemoryId> = results.iter().map(|r| r.record.id).collect();

        let mut reached: HashMap<MemoryId, (f32, MemoryId, f32)> = HashMap::new();
        let mut traversed: BTreeSet<AssociationId> = BTreeSet::new();

        for seed in results {
            let seed_id = seed.record.id;
            let activation = graph.associations().spread_activation(&[seed_id], &config);
            let mut used = false;

            for (id, level) in activation.reached(&[seed_id]) {
                // Never displaces a direct match
                if direct.contains(&id) {
                    continue;
                }
                let Some(record) = graph.record(&id) else {
                    continue;
                };
                if !query.accepts(record) {
                    continue;
                }
                let score = (seed.score * level).clamp(0.0, 1.0);
                if score <= 0.0 || score < query.threshold {
                    continue;
                }
                used = true;
                let better = reached.get(&id).map_or(true, |(best, _, _)| *best < score);
                if better {
                    reached.insert(id, (score, seed_id, level));
                }
            }

            if used {
                traversed.extend(activation.traversed);
            }
        }

        let expanded = reached
            .into_iter()
            .filter_map(|(id, (score, seed_id, level))| {
                let record = graph.record(&id)?;
                Some(QueryResult {
                    record: record.clone(),
                    score,
                    match_kind: MatchKind::Associative,
                    matched_fields: vec!["associations".to_string()],
                    explanation: Some(format!("reached from {} with activation {:.2}", seed_id, level)),
                })
            })
            .collect();

        (expanded, traversed.into_iter().collect())
    }
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine")
            .field("config", &self.config)
            .field("activation", &self.activation)
            .finish()
    }
}

fn match_kind_for(kind: QueryKind) -> MatchKind {
    match kind {
        QueryKind::Exact => MatchKind::Exact,
        QueryKind::Fuzzy => MatchKind::Fuzzy,
        QueryKind::Semantic | QueryKind::Vector => MatchKind::Semantic,
        QueryKind::Hybrid => MatchKind::Hybrid,
    }
}

fn matched_fields(record: &MemoryRecord, query_tokens: &BTreeSet<String>, components: &ComponentScores) -> Vec<String> {
    let mut fields = Vec::new();
    let content = record.content.to_lowercase();
    if components.text > 0.0 || components.fuzzy > 0.0 {
        if query_tokens.iter().any(|t| content.contains(t.as_str())) {
            fields.push("content".to_string());
        }
        if record
            .tags
            .iter()
            .any(|tag| query_tokens.contains(&tag.to_lowercase()))
        {
            fields.push("tags".to_string());
        }
    }
    if components.semantic > 0.0 {
        fields.push("embedding".to_string());
    }
    fields
}

/// Ordering for ranked results: the requested key, then higher confidence,
/// then earlier creation
fn compare_results(a: &QueryResult, b: &QueryResult, sort: SortKey) -> Ordering {
    let primary = match sort {
        SortKey::Relevance => b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal),
        SortKey::Importance => b
            .record
            .scores
            .importance
            .partial_cmp(&a.record.scores.importance)
            .unwrap_or(Ordering::Equal),
        SortKey::Recency => b
            .record
            .temporal
            .last_activity()
            .cmp(&a.record.temporal.last_activity()),
        SortKey::Confidence => b
            .record
            .scores
            .confidence
            .partial_cmp(&a.record.scores.confidence)
            .unwrap_or(Ordering::Equal),
    };

    primary
        .then_with(|| {
            b.record
                .scores
                .confidence
                .partial_cmp(&a.record.scores.confidence)
                .unwrap_or(Ordering::Equal)
        })
        .then_with(|| a.record.temporal.created_at.cmp(&b.record.temporal.created_at))
        .then_with(|| a.record.id.cmp(&b.record.id))
}
