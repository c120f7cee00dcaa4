//! Snapshot export
//!
//! A read-only dump of records and the associations between them, for
//! backup and inspection. Nothing reads these documents back into a graph.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::association::Association;
use crate::error::{MemoryError, Result};
use crate::record::{MemoryId, MemoryRecord, MemoryTier};
use crate::store::MemoryGraph;

/// Bumped whenever the snapshot layout changes
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    /// Pretty-printed JSON
    #[default]
    Json,
    /// MessagePack with named fields
    MessagePack,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::MessagePack => "msgpack",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "msgpack" | "messagepack" | "message_pack" => Ok(Self::MessagePack),
            other => Err(MemoryError::validation(format!("unknown export format '{}'", other))),
        }
    }
}

/// Records (optionally of one tier) plus every association among them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub format_version: u32,
    pub exported_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tier: Option<MemoryTier>,
    pub records: Vec<MemoryRecord>,
    pub associations: Vec<Association>,
}

impl MemorySnapshot {
    /// Copy the graph (or one tier of it), oldest records first
    pub fn capture(graph: &MemoryGraph, tier: Option<MemoryTier>, now: DateTime<Utc>) -> Self {
        let mut records: Vec<MemoryRecord> = graph
            .records()
            .filter(|r| tier.map_or(true, |t| r.tier == t))
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.temporal
                .created_at
                .cmp(&b.temporal.created_at)
                .then(a.id.cmp(&b.id))
        });

        let ids: HashSet<MemoryId> = records.iter().map(|r| r.id).collect();
        let mut associations: Vec<Association> = graph
            .associations()
            .iter()
            .filter(|a| ids.contains(&a.source) && ids.contains(&a.target))
            .cloned()
            .collect();
        associations.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));

        Self {
            format_version: FORMAT_VERSION,
            exported_at: now,
            tier,
            records,
            associations,
        }
    }

    pub fn to_bytes(&self, format: ExportFormat) -> Result<Vec<u8>> {
        match format {
            ExportFormat::Json => Ok(serde_json::to_vec_pretty(self)?),
            ExportFormat::MessagePack => Ok(rmp_serde::to_vec_named(self)?),
        }
    }

    /// Write the snapshot to `path`, replacing any existing file
    pub fn write_to_path(&self, path: &Path, format: ExportFormat) -> Result<usize> {
        let bytes = self.to_bytes(format)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &bytes)?;
        log::info!(
            "Exported {} memories to {} ({} bytes, {})",
            self.records.len(),
            path.display(),
            bytes.len(),
            format
        );
        Ok(bytes.len())
    }
}
