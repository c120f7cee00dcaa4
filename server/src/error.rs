//! Error types for the tiered memory server.

use thiserror::Error;
use tiered_memory::MemoryError;

use crate::mcp::protocol::JsonRpcError;

/// Errors that can occur while serving a request.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        Self::InvalidParams(msg.into())
    }

    /// JSON-RPC error code for this failure
    pub fn code(&self) -> i32 {
        match self {
            Self::Memory(err) if err.is_client_error() => JsonRpcError::INVALID_PARAMS,
            Self::InvalidParams(_) | Self::UnknownTool(_) | Self::ResourceNotFound(_) => {
                JsonRpcError::INVALID_PARAMS
            }
            _ => JsonRpcError::INTERNAL_ERROR,
        }
    }
}

impl From<ServerError> for JsonRpcError {
    fn from(err: ServerError) -> Self {
        JsonRpcError::new(err.code(), err.to_string())
    }
}

/// Result type alias for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_errors_map_to_invalid_params() {
        let err: JsonRpcError = ServerError::from(MemoryError::not_found("abc")).into();
        assert_eq!(err.code, -32602);
        assert!(err.message.contains("abc"));

        let err: JsonRpcError = ServerError::from(MemoryError::invalid_query("bad tier")).into();
        assert_eq!(err.code, -32602);

        let err: JsonRpcError = ServerError::UnknownTool("memory_fly".into()).into();
        assert_eq!(err.code, -32602);
    }

    #[test]
    fn test_internal_errors_map_to_internal_error() {
        let err: JsonRpcError = ServerError::from(MemoryError::other("lock poisoned")).into();
        assert_eq!(err.code, -32603);

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let err: JsonRpcError = ServerError::from(io).into();
        assert_eq!(err.code, -32603);
        assert_eq!(err.message, "IO error: disk full");
    }

    #[test]
    fn test_memory_error_display_is_transparent() {
        let err = ServerError::from(MemoryError::validation("importance out of range"));
        assert_eq!(err.to_string(), "Validation error: importance out of range");
    }
}
