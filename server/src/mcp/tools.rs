//! MCP Tool Definitions
//!
//! The sixteen memory tools and their dispatch onto [`MemoryService`].

use super::protocol::{PropertySchema, Tool, ToolInputSchema};
use crate::error::{ServerError, ServerResult};
use crate::memory::MemoryService;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tiered_memory::{
    AssociationId, ContentKind, ExportFormat, LifecycleState, MemoryContext, MemoryDraft, MemoryId,
    MemoryPatch, MemoryQuery, MemoryTier, QueryKind, RelationType, SortKey, SourceKind,
};

/// Get all available memory tools
pub fn get_all_tools() -> Vec<Tool> {
    vec![
        // Records (5)
        memory_store_tool(),
        memory_get_tool(),
        memory_update_tool(),
        memory_delete_tool(),
        memory_list_tool(),
        // Associations (3)
        memory_link_tool(),
        memory_unlink_tool(),
        memory_neighbors_tool(),
        // Retrieval and transitions (2)
        memory_query_tool(),
        memory_transition_tool(),
        // Maintenance (4)
        memory_optimize_tool(),
        memory_optimize_start_tool(),
        memory_optimize_status_tool(),
        memory_optimize_cancel_tool(),
        // Reporting (2)
        memory_export_tool(),
        memory_stats_tool(),
    ]
}

fn tool(name: &str, description: &str, properties: Vec<(&str, PropertySchema)>, required: &[&str]) -> Tool {
    let properties: BTreeMap<String, PropertySchema> = properties
        .into_iter()
        .map(|(key, schema)| (key.to_string(), schema))
        .collect();
    Tool {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: ToolInputSchema::object(properties, required),
    }
}

fn tier_prop(description: &str) -> PropertySchema {
    PropertySchema::one_of(description, MemoryTier::ALL.iter().map(|t| t.as_str()))
}

fn id_prop(description: &str) -> PropertySchema {
    PropertySchema::string(description)
}

fn strings_prop(description: &str) -> PropertySchema {
    PropertySchema::array_of(description, PropertySchema::string("value"))
}

// === Records ===

fn memory_store_tool() -> Tool {
    tool(
        "memory_store",
        "Stores a new memory record in a tier. Returns the full record with its id and version.",
        vec![
            ("tier", tier_prop("Tier to store into")),
            ("content", PropertySchema::string("Record content; must not be empty")),
            (
                "contentKind",
                PropertySchema::one_of("Content modality", ["text", "structured", "vector", "multimodal"]),
            ),
            ("importance", PropertySchema::unit("Importance 0.0-1.0 (default: 0.5)")),
            ("confidence", PropertySchema::unit("Confidence 0.0-1.0 (default: 0.5)")),
            ("clarity", PropertySchema::unit("Clarity 0.0-1.0")),
            ("stability", PropertySchema::unit("Stability 0.0-1.0")),
            ("valence", PropertySchema::number_between("Affect valence -1.0-1.0", -1.0, 1.0)),
            ("intensity", PropertySchema::unit("Affect intensity 0.0-1.0")),
            ("tags", strings_prop("Tags")),
            ("categories", strings_prop("Categories")),
            ("domains", strings_prop("Knowledge domains")),
            (
                "source",
                PropertySchema::one_of(
                    "Where the memory came from",
                    [
                        "conversation",
                        "document",
                        "feedback",
                        "experience",
                        "training",
                        "inference",
                        "synthesis",
                    ],
                ),
            ),
            ("metadata", PropertySchema::object("Free-form metadata")),
            ("contextIds", strings_prop("Ids of records that form this record's context")),
            ("derivedFrom", strings_prop("Ids of records this record was derived from")),
            ("expiresAt", PropertySchema::string("RFC 3339 expiry timestamp")),
            ("sessionId", PropertySchema::string("Session the record belongs to")),
            ("taskId", PropertySchema::string("Task the record belongs to")),
        ],
        &["tier", "content"],
    )
}

fn memory_get_tool() -> Tool {
    tool(
        "memory_get",
        "Fetches one memory record by id.",
        vec![("id", id_prop("Record id"))],
        &["id"],
    )
}

fn memory_update_tool() -> Tool {
    tool(
        "memory_update",
        "Applies a partial update to a record. Fields absent from the patch are left untouched; metadata is merged. The update is all-or-nothing.",
        vec![
            ("id", id_prop("Record id")),
            (
                "patch",
                PropertySchema::object(
                    "Fields to replace, e.g. {\"content\": \"...\", \"importance\": 0.8, \"state\": \"archived\"}",
                ),
            ),
        ],
        &["id", "patch"],
    )
}

fn memory_delete_tool() -> Tool {
    tool(
        "memory_delete",
        "Deletes a record and every association touching it. Deleting an unknown id is not an error.",
        vec![("id", id_prop("Record id"))],
        &["id"],
    )
}

fn memory_list_tool() -> Tool {
    tool(
        "memory_list",
        "Lists the records of one tier, oldest first.",
        vec![
            ("tier", tier_prop("Tier to list")),
            ("limit", PropertySchema::integer("Maximum records to return", Some(50))),
        ],
        &["tier"],
    )
}

// === Associations ===

fn memory_link_tool() -> Tool {
    tool(
        "memory_link",
        "Creates a typed association between two records.",
        vec![
            ("source", id_prop("Source record id")),
            ("target", id_prop("Target record id")),
            (
                "relation",
                PropertySchema::one_of("Relation type", RelationType::ALL.iter().map(|r| r.as_str())),
            ),
            ("strength", PropertySchema::unit("Association strength 0.0-1.0")),
            ("confidence", PropertySchema::unit("Association confidence 0.0-1.0").with_default(json!(1.0))),
            ("bidirectional", PropertySchema::boolean("Traversable in both directions", false)),
        ],
        &["source", "target", "relation", "strength"],
    )
}

fn memory_unlink_tool() -> Tool {
    tool(
        "memory_unlink",
        "Removes an association by id.",
        vec![("id", id_prop("Association id"))],
        &["id"],
    )
}

fn memory_neighbors_tool() -> Tool {
    tool(
        "memory_neighbors",
        "Lists every association touching a record.",
        vec![("id", id_prop("Record id"))],
        &["id"],
    )
}

// === Retrieval and transitions ===

fn memory_query_tool() -> Tool {
    tool(
        "memory_query",
        "Searches memories. Filters combine with AND; results are scored 0.0-1.0. Pass expansionDepth to pull in associated records.",
        vec![
            ("text", PropertySchema::string("Query text; may be empty for pure filter queries")),
            (
                "kind",
                PropertySchema::one_of("Matching strategy", ["exact", "fuzzy", "semantic", "vector", "hybrid"])
                    .with_default(json!("hybrid")),
            ),
            ("tiers", strings_prop("Restrict to these tiers")),
            ("states", strings_prop("Lifecycle states to include (default: active, dormant)")),
            ("tags", strings_prop("Records must carry every tag")),
            ("maxResults", PropertySchema::integer("Maximum results", Some(10))),
            ("threshold", PropertySchema::unit("Minimum score")),
            ("fuzzyTolerance", PropertySchema::unit("Fuzzy match tolerance")),
            (
                "sort",
                PropertySchema::one_of("Sort key", ["relevance", "importance", "recency", "confidence"])
                    .with_default(json!("relevance")),
            ),
            ("expansionDepth", PropertySchema::integer("Activation spreading hops", Some(0))),
            ("createdAfter", PropertySchema::string("RFC 3339 lower bound on created_at")),
            ("createdBefore", PropertySchema::string("RFC 3339 upper bound on created_at")),
        ],
        &[],
    )
}

fn memory_transition_tool() -> Tool {
    tool(
        "memory_transition",
        "Moves a record to another tier. The moved record gets a new id; unless the original is preserved, the old id stops resolving. Failures are reported in the result, not raised.",
        vec![
            ("id", id_prop("Record id")),
            ("targetTier", tier_prop("Destination tier")),
            (
                "preserveOriginal",
                PropertySchema::boolean("Keep the original record (default: the matching rule decides)", false),
            ),
        ],
        &["id", "targetTier"],
    )
}

// === Maintenance ===

fn memory_optimize_tool() -> Tool {
    tool(
        "memory_optimize",
        "Runs decay, compression, consolidation, reinforcement, deduplication, capacity and transition passes and waits for the report.",
        vec![("dryRun", PropertySchema::boolean("Report what would change without changing it", false))],
        &[],
    )
}

fn memory_optimize_start_tool() -> Tool {
    tool(
        "memory_optimize_start",
        "Starts the full optimization in the background. Only one run may be in flight.",
        vec![("dryRun", PropertySchema::boolean("Report what would change without changing it", false))],
        &[],
    )
}

fn memory_optimize_status_tool() -> Tool {
    tool(
        "memory_optimize_status",
        "Reports whether a background optimization is running and the last finished report.",
        vec![],
        &[],
    )
}

fn memory_optimize_cancel_tool() -> Tool {
    tool(
        "memory_optimize_cancel",
        "Cancels the running background optimization after its current pass.",
        vec![],
        &[],
    )
}

// === Reporting ===

fn memory_export_tool() -> Tool {
    tool(
        "memory_export",
        "Exports a snapshot of records and their associations. Without a path the JSON snapshot is returned inline; MessagePack requires a path.",
        vec![
            ("tier", tier_prop("Only export this tier")),
            (
                "format",
                PropertySchema::one_of("Snapshot encoding", ["json", "msgpack"]).with_default(json!("json")),
            ),
            ("path", PropertySchema::string("File to write the snapshot to")),
        ],
        &[],
    )
}

fn memory_stats_tool() -> Tool {
    tool(
        "memory_stats",
        "Aggregate statistics: counts per tier and state, mean scores, association totals, capacity use and a health score.",
        vec![],
        &[],
    )
}

// === Arguments ===

fn parse_args<T: DeserializeOwned>(args: Value) -> ServerResult<T> {
    serde_json::from_value(args).map_err(|e| ServerError::invalid_params(e.to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoreArgs {
    tier: MemoryTier,
    content: String,
    content_kind: Option<ContentKind>,
    importance: Option<f32>,
    confidence: Option<f32>,
    clarity: Option<f32>,
    stability: Option<f32>,
    valence: Option<f32>,
    intensity: Option<f32>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    categories: Vec<String>,
    #[serde(default)]
    domains: Vec<String>,
    source: Option<SourceKind>,
    #[serde(default)]
    metadata: Map<String, Value>,
    #[serde(default)]
    context_ids: Vec<MemoryId>,
    #[serde(default)]
    derived_from: Vec<MemoryId>,
    expires_at: Option<DateTime<Utc>>,
    session_id: Option<String>,
    task_id: Option<String>,
}

impl StoreArgs {
    fn into_parts(self) -> ServerResult<(MemoryDraft, Option<MemoryContext>)> {
        let mut builder = MemoryDraft::builder().tier(self.tier).content(self.content);
        if let Some(kind) = self.content_kind {
            builder = builder.content_kind(kind);
        }
        if let Some(v) = self.importance {
            builder = builder.importance(v);
        }
        if let Some(v) = self.confidence {
            builder = builder.confidence(v);
        }
        if let Some(v) = self.clarity {
            builder = builder.clarity(v);
        }
        if let Some(v) = self.stability {
            builder = builder.stability(v);
        }
        if self.valence.is_some() || self.intensity.is_some() {
            builder = builder.affect(self.valence.unwrap_or(0.0), self.intensity.unwrap_or(0.0));
        }
        if let Some(source) = self.source {
            builder = builder.source(source);
        }
        if let Some(at) = self.expires_at {
            builder = builder.expires_at(at);
        }
        for tag in self.tags {
            builder = builder.tag(tag);
        }
        for category in self.categories {
            builder = builder.category(category);
        }
        for domain in self.domains {
            builder = builder.domain(domain);
        }
        for (key, value) in self.metadata {
            builder = builder.metadata(key, value);
        }
        for id in self.context_ids {
            builder = builder.context(id);
        }
        for id in self.derived_from {
            builder = builder.derived_from(id);
        }
        let draft = builder.build().map_err(tiered_memory::MemoryError::from)?;

        let context = (self.session_id.is_some() || self.task_id.is_some()).then(|| MemoryContext {
            session_id: self.session_id,
            task_id: self.task_id,
            ..Default::default()
        });
        Ok((draft, context))
    }
}

#[derive(Debug, Deserialize)]
struct IdArgs {
    id: MemoryId,
}

#[derive(Debug, Deserialize)]
struct AssociationIdArgs {
    id: AssociationId,
}

#[derive(Debug, Deserialize)]
struct UpdateArgs {
    id: MemoryId,
    patch: MemoryPatch,
}

#[derive(Debug, Deserialize)]
struct ListArgs {
    tier: MemoryTier,
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct LinkArgs {
    source: MemoryId,
    target: MemoryId,
    relation: RelationType,
    strength: f32,
    #[serde(default = "default_confidence")]
    confidence: f32,
    #[serde(default)]
    bidirectional: bool,
}

fn default_confidence() -> f32 {
    1.0
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct QueryArgs {
    text: String,
    kind: QueryKind,
    tiers: Vec<MemoryTier>,
    states: Vec<LifecycleState>,
    tags: Vec<String>,
    max_results: Option<usize>,
    threshold: Option<f32>,
    fuzzy_tolerance: Option<f32>,
    sort: SortKey,
    expansion_depth: usize,
    created_after: Option<DateTime<Utc>>,
    created_before: Option<DateTime<Utc>>,
}

impl QueryArgs {
    fn into_query(self) -> MemoryQuery {
        let mut query = MemoryQuery::new(self.text, self.kind);
        query.tiers = self.tiers;
        query.states = self.states;
        query.tags = self.tags;
        query.max_results = self.max_results;
        query.fuzzy_tolerance = self.fuzzy_tolerance;
        query.sort = self.sort;
        query.expansion_depth = self.expansion_depth;
        if let Some(threshold) = self.threshold {
            query.threshold = threshold;
        }
        if self.created_after.is_some() || self.created_before.is_some() {
            let start = self.created_after.unwrap_or(DateTime::<Utc>::MIN_UTC);
            let end = self.created_before.unwrap_or(DateTime::<Utc>::MAX_UTC);
            query = query.created_between(start, end);
        }
        query
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransitionArgs {
    id: MemoryId,
    target_tier: MemoryTier,
    preserve_original: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct OptimizeArgs {
    dry_run: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExportArgs {
    tier: Option<MemoryTier>,
    format: Option<String>,
    path: Option<PathBuf>,
}

// === Dispatch ===

/// Execute a tool by name
pub async fn call_tool(service: &MemoryService, name: &str, args: Value) -> ServerResult<Value> {
    let engine = service.engine();

    match name {
        "memory_store" => {
            let (draft, context) = parse_args::<StoreArgs>(args)?.into_parts()?;
            let record = engine.store(draft, context.as_ref())?;
            tracing::debug!("Stored memory {} in {}", record.id, record.tier);
            Ok(serde_json::to_value(record)?)
        }

        "memory_get" => {
            let IdArgs { id } = parse_args(args)?;
            Ok(serde_json::to_value(engine.get(&id)?)?)
        }

        "memory_update" => {
            let UpdateArgs { id, patch } = parse_args(args)?;
            Ok(serde_json::to_value(engine.update(&id, &patch)?)?)
        }

        "memory_delete" => {
            let IdArgs { id } = parse_args(args)?;
            Ok(json!({ "id": id, "deleted": engine.delete(&id) }))
        }

        "memory_list" => {
            let ListArgs { tier, limit } = parse_args(args)?;
            let mut records = engine.list_by_tier(tier);
            let total = records.len();
            records.truncate(limit.unwrap_or(50));
            Ok(json!({ "tier": tier, "total": total, "records": records }))
        }

        "memory_link" => {
            let link: LinkArgs = parse_args(args)?;
            let association = engine.link(
                &link.source,
                &link.target,
                link.relation,
                link.strength,
                link.confidence,
                link.bidirectional,
            )?;
            Ok(serde_json::to_value(association)?)
        }

        "memory_unlink" => {
            let AssociationIdArgs { id } = parse_args(args)?;
            Ok(json!({ "id": id, "removed": engine.unlink(&id) }))
        }

        "memory_neighbors" => {
            let IdArgs { id } = parse_args(args)?;
            Ok(json!({ "id": id, "associations": engine.neighbors(&id)? }))
        }

        "memory_query" => {
            let query = parse_args::<QueryArgs>(args)?.into_query();
            Ok(serde_json::to_value(engine.query(&query)?)?)
        }

        "memory_transition" => {
            let TransitionArgs {
                id,
                target_tier,
                preserve_original,
            } = parse_args(args)?;
            let result = engine.execute_transition(&id, target_tier, preserve_original)?;
            Ok(serde_json::to_value(result)?)
        }

        "memory_optimize" => {
            let OptimizeArgs { dry_run } = parse_args(args)?;
            Ok(serde_json::to_value(service.optimize_now(dry_run).await?)?)
        }

        "memory_optimize_start" => {
            let OptimizeArgs { dry_run } = parse_args(args)?;
            let started_at = service.start_optimization(dry_run).await?;
            Ok(json!({ "started": true, "startedAt": started_at, "dryRun": dry_run }))
        }

        "memory_optimize_status" => Ok(serde_json::to_value(service.optimization_status().await)?),

        "memory_optimize_cancel" => Ok(json!({ "cancelled": service.cancel_optimization().await })),

        "memory_export" => {
            let ExportArgs { tier, format, path } = parse_args(args)?;
            let format: ExportFormat = match format {
                Some(name) => name.parse()?,
                None => ExportFormat::default(),
            };
            match (path, format) {
                (Some(path), format) => {
                    let bytes = engine.export_to_path(&path, tier, format)?;
                    Ok(json!({ "path": path, "format": format, "bytes": bytes }))
                }
                (None, ExportFormat::Json) => Ok(serde_json::to_value(engine.export(tier))?),
                (None, ExportFormat::MessagePack) => Err(ServerError::invalid_params(
                    "MessagePack export requires a path",
                )),
            }
        }

        "memory_stats" => Ok(serde_json::to_value(engine.stats())?),

        other => Err(ServerError::UnknownTool(other.to_string())),
    }
}
