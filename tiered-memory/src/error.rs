//! Error types for tiered-memory

use thiserror::Error;

/// Errors that can occur in the memory system
#[derive(Debug, Error)]
pub enum MemoryError {
    /// A draft, patch or link carried an out-of-range score or empty content
    #[error("Validation error: {0}")]
    Validation(String),

    /// Unknown record or association id
    #[error("Memory not found: {0}")]
    NotFound(String),

    /// Unknown tier, sort key or malformed query; raised before any scan
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// A single optimizer sub-pass failed
    #[error("Optimization task '{task}' failed: {message}")]
    OptimizationTask { task: String, message: String },

    /// Transition could not be executed
    #[error("Transition failed: {0}")]
    Transition(String),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MessagePack serialization error
    #[error("MessagePack error: {0}")]
    MessagePack(#[from] rmp_serde::encode::Error),

    /// Builder error
    #[error("Builder error: {0}")]
    Builder(#[from] crate::record::MemoryDraftBuilderError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl MemoryError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Create an invalid query error
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    /// Create an optimization task error
    pub fn optimization_task(task: impl Into<String>, message: impl Into<String>) -> Self {
        Self::OptimizationTask {
            task: task.into(),
            message: message.into(),
        }
    }

    /// Create a transition error
    pub fn transition(msg: impl Into<String>) -> Self {
        Self::Transition(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Whether the caller supplied bad input (as opposed to an internal failure)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::NotFound(_) | Self::InvalidQuery(_) | Self::Builder(_)
        )
    }
}

/// Result type for memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            MemoryError::validation("confidence out of range").to_string(),
            "Validation error: confidence out of range"
        );
        assert_eq!(
            MemoryError::optimization_task("decay", "boom").to_string(),
            "Optimization task 'decay' failed: boom"
        );
    }

    #[test]
    fn test_client_error_classification() {
        assert!(MemoryError::not_found("x").is_client_error());
        assert!(MemoryError::invalid_query("bad tier").is_client_error());
        assert!(!MemoryError::other("x").is_client_error());
        assert!(!MemoryError::transition("x").is_client_error());
    }
}
