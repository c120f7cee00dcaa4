//! Tiered Memory Server Library
//!
//! Exposes a [`tiered_memory::MemoryEngine`] to AI clients as Model Context
//! Protocol tools and resources over JSON-RPC 2.0 on stdio.

pub mod error;
pub mod mcp;
pub mod memory;

pub use error::{ServerError, ServerResult};
pub use mcp::McpServer;
pub use memory::MemoryService;
