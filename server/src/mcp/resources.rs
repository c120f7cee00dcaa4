//! MCP Resource Definitions
//!
//! Read-only views of the memory store.

use super::protocol::{Resource, ResourceContent, ResourceReadResult};
use crate::error::{ServerError, ServerResult};
use crate::memory::MemoryService;
use serde::Serialize;

pub const STATS_URI: &str = "tiered-memory://stats";
pub const EXPORT_URI: &str = "tiered-memory://export";
pub const CONFIG_URI: &str = "tiered-memory://config";

const JSON_MIME: &str = "application/json";

/// Get all available resources
pub fn get_all_resources() -> Vec<Resource> {
    vec![
        resource(
            STATS_URI,
            "Memory Statistics",
            "Counts per tier, state and source, mean scores, capacity use and health score",
        ),
        resource(
            EXPORT_URI,
            "Memory Snapshot",
            "Every record and association as a versioned JSON snapshot",
        ),
        resource(CONFIG_URI, "Engine Configuration", "The effective engine configuration"),
    ]
}

fn resource(uri: &str, name: &str, description: &str) -> Resource {
    Resource {
        uri: uri.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        mime_type: JSON_MIME.to_string(),
    }
}

fn json_content<T: Serialize>(uri: &str, value: &T) -> ServerResult<ResourceReadResult> {
    Ok(ResourceReadResult {
        contents: vec![ResourceContent {
            uri: uri.to_string(),
            mime_type: JSON_MIME.to_string(),
            text: serde_json::to_string_pretty(value)?,
        }],
    })
}

/// Read a resource by URI
pub fn read_resource(uri: &str, service: &MemoryService) -> ServerResult<ResourceReadResult> {
    let engine = service.engine();
    match uri {
        STATS_URI => json_content(uri, &engine.stats()),
        EXPORT_URI => json_content(uri, &engine.export(None)),
        CONFIG_URI => json_content(uri, engine.config()),
        _ => Err(ServerError::ResourceNotFound(uri.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tiered_memory::{MemoryDraft, MemoryTier};

    #[test]
    fn test_every_listed_resource_is_readable() {
        let service = MemoryService::default();
        for resource in get_all_resources() {
            let result = read_resource(&resource.uri, &service).unwrap();
            assert_eq!(result.contents.len(), 1);
            let parsed: serde_json::Value = serde_json::from_str(&result.contents[0].text).unwrap();
            assert!(parsed.is_object());
        }
    }

    #[test]
    fn test_export_resource_lists_records() {
        let service = MemoryService::default();
        service
            .engine()
            .store(MemoryDraft::new(MemoryTier::Procedural, "restart the worker"), None)
            .unwrap();

        let result = read_resource(EXPORT_URI, &service).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&result.contents[0].text).unwrap();
        assert_eq!(parsed["records"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_unknown_uri() {
        let service = MemoryService::default();
        let err = read_resource("tiered-memory://nope", &service).unwrap_err();
        assert!(matches!(err, ServerError::ResourceNotFound(_)));
    }
}
