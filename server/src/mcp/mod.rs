//! MCP (Model Context Protocol) Server Module
//!
//! Exposes the memory engine to AI clients as tools and resources.
//!
//! ## Usage
//!
//! ```bash
//! tiered-memory-server --config memory.json
//! ```
//!
//! The server communicates via stdio using newline-delimited JSON-RPC 2.0.

pub mod protocol;
pub mod resources;
pub mod server;
pub mod tools;
pub mod transport;

pub use protocol::*;
pub use server::McpServer;
