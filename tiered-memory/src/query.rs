//! Query and result types for the retrieval engine

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{MemoryError, Result};
use crate::record::{LifecycleState, MemoryRecord, MemoryTier, SourceKind};

/// How query text is matched against records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    Exact,
    Fuzzy,
    Semantic,
    Vector,
    #[default]
    Hybrid,
}

impl QueryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Fuzzy => "fuzzy",
            Self::Semantic => "semantic",
            Self::Vector => "vector",
            Self::Hybrid => "hybrid",
        }
    }
}

impl FromStr for QueryKind {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "fuzzy" => Ok(Self::Fuzzy),
            "semantic" => Ok(Self::Semantic),
            "vector" => Ok(Self::Vector),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(MemoryError::invalid_query(format!("unknown query kind '{}'", other))),
        }
    }
}

/// Result ordering
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    Relevance,
    Importance,
    Recency,
    Confidence,
}

impl FromStr for SortKey {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "relevance" => Ok(Self::Relevance),
            "importance" => Ok(Self::Importance),
            "recency" => Ok(Self::Recency),
            "confidence" => Ok(Self::Confidence),
            other => Err(MemoryError::invalid_query(format!("unknown sort key '{}'", other))),
        }
    }
}

/// Inclusive time window over `created_at`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Inclusive score window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreRange {
    pub min: f32,
    pub max: f32,
}

impl ScoreRange {
    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// A retrieval request
///
/// Filters combine as a pure AND; empty lists mean "no restriction".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryQuery {
    /// Free-text query; may be empty for pure filter/time-range queries
    pub text: String,
    pub kind: QueryKind,
    /// Explicit query vector for vector queries
    pub vector: Option<Vec<f32>>,
    pub tiers: Vec<MemoryTier>,
    pub sources: Vec<SourceKind>,
    /// Lifecycle states to include; empty means active and dormant
    pub states: Vec<LifecycleState>,
    pub time_range: Option<TimeRange>,
    pub importance: Option<ScoreRange>,
    pub confidence: Option<ScoreRange>,
    /// Records carrying any of these tags
    pub tags: Vec<String>,
    pub max_results: Option<usize>,
    /// Results scoring below this are dropped
    pub threshold: f32,
    /// Fuzzy tolerance in [0, 1]; higher accepts looser matches
    pub fuzzy_tolerance: Option<f32>,
    pub sort: SortKey,
    /// Hops of activation spreading from the results; 0 disables expansion
    pub expansion_depth: usize,
}

impl Default for MemoryQuery {
    fn default() -> Self {
        Self {
            text: String::new(),
            kind: QueryKind::default(),
            vector: None,
            tiers: Vec::new(),
            sources: Vec::new(),
            states: Vec::new(),
            time_range: None,
            importance: None,
            confidence: None,
            tags: Vec::new(),
            max_results: None,
            threshold: 0.0,
            fuzzy_tolerance: None,
            sort: SortKey::default(),
            expansion_depth: 0,
        }
    }
}

impl MemoryQuery {
    pub fn new(text: impl Into<String>, kind: QueryKind) -> Self {
        Self {
            text: text.into(),
            kind,
            ..Default::default()
        }
    }

    pub fn exact(text: impl Into<String>) -> Self {
        Self::new(text, QueryKind::Exact)
    }

    pub fn fuzzy(text: impl Into<String>, tolerance: f32) -> Self {
        Self {
            fuzzy_tolerance: Some(tolerance),
            ..Self::new(text, QueryKind::Fuzzy)
        }
    }

    pub fn semantic(text: impl Into<String>) -> Self {
        Self::new(text, QueryKind::Semantic)
    }

    pub fn hybrid(text: impl Into<String>) -> Self {
        Self::new(text, QueryKind::Hybrid)
    }

    pub fn in_tier(mut self, tier: MemoryTier) -> Self {
        self.tiers.push(tier);
        self
    }

    pub fn limit(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn sorted_by(mut self, sort: SortKey) -> Self {
        self.sort = sort;
        self
    }

    pub fn expand(mut self, depth: usize) -> Self {
        self.expansion_depth = depth;
        self
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn created_between(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.time_range = Some(TimeRange { start, end });
        self
    }

    /// Whether this is a time-range query with no text to score
    pub fn is_time_range_only(&self) -> bool {
        self.time_range.is_some() && self.text.trim().is_empty() && self.vector.is_none()
    }

    /// Reject malformed queries before any scan runs
    pub fn validate(&self) -> Result<()> {
        if !self.threshold.is_finite() || !(0.0..=1.0).contains(&self.threshold) {
            return Err(MemoryError::invalid_query(format!(
                "threshold must be within [0, 1], got {}",
                self.threshold
            )));
        }
        if let Some(tolerance) = self.fuzzy_tolerance {
            if !tolerance.is_finite() || !(0.0..=1.0).contains(&tolerance) {
                return Err(MemoryError::invalid_query(format!(
                    "fuzzy tolerance must be within [0, 1], got {}",
                    tolerance
                )));
            }
        }
        if self.max_results == Some(0) {
            return Err(MemoryError::invalid_query("max_results must be positive"));
        }
        if let Some(range) = &self.time_range {
            if range.start > range.end {
                return Err(MemoryError::invalid_query("time range starts after it ends"));
            }
        }
        for (name, range) in [("importance", &self.importance), ("confidence", &self.confidence)] {
            if let Some(range) = range {
                if range.min.is_nan() || range.max.is_nan() || range.min > range.max {
                    return Err(MemoryError::invalid_query(format!(
                        "{} range is empty ({} > {})",
                        name, range.min, range.max
                    )));
                }
            }
        }
        if self.kind == QueryKind::Vector {
            if let Some(vector) = &self.vector {
                if vector.is_empty() || vector.iter().any(|v| !v.is_finite()) {
                    return Err(MemoryError::invalid_query("query vector must be non-empty and finite"));
                }
            }
        }
        Ok(())
    }

    /// Pure AND of every filter
    pub fn accepts(&self, record: &MemoryRecord) -> bool {
        if !self.tiers.is_empty() && !self.tiers.contains(&record.tier) {
            return false;
        }
        if self.states.is_empty() {
            if !record.state.is_live() {
                return false;
            }
        } else if !self.states.contains(&record.state) {
            return false;
        }
        if !self.sources.is_empty() && !self.sources.contains(&record.provenance.kind) {
            return false;
        }
        if let Some(range) = &self.time_range {
            if !record.temporal.created_within(range.start, range.end) {
                return false;
            }
        }
        if let Some(range) = &self.importance {
            if !range.contains(record.scores.importance) {
                return false;
            }
        }
        if let Some(range) = &self.confidence {
            if !range.contains(record.scores.confidence) {
                return false;
            }
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| record.tags.contains(t)) {
            return false;
        }
        true
    }
}

/// How a result matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchKind {
    Exact,
    Fuzzy,
    Semantic,
    Hybrid,
    /// Reached through activation spreading
    Associative,
    /// Time-range query, scored without text
    Temporal,
    /// Filter-only query
    Filter,
}

impl fmt::Display for MatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Exact => "exact",
            Self::Fuzzy => "fuzzy",
            Self::Semantic => "semantic",
            Self::Hybrid => "hybrid",
            Self::Associative => "associative",
            Self::Temporal => "temporal",
            Self::Filter => "filter",
        };
        f.write_str(name)
    }
}

/// A ranked, explainable result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub record: MemoryRecord,
    /// Score in [0, 1]
    pub score: f32,
    pub match_kind: MatchKind,
    pub matched_fields: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

/// Everything a query returns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub results: Vec<QueryResult>,
    /// Matches before truncation to `max_results`
    pub total_matches: usize,
    pub execution_time_ms: f64,
    pub strategy_used: String,
}
