//! Tiered Memory Server Entry Point
//!
//! Serves the Model Context Protocol over stdio. Logs go to stderr so
//! stdout stays a clean JSON-RPC channel.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tiered_memory_server::{McpServer, MemoryService};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_LOG_FILTER: &str = "tiered_memory_server=info,tiered_memory=info";

#[derive(Parser)]
#[command(name = "tiered-memory-server")]
#[command(about = "Tiered memory store served over the Model Context Protocol")]
#[command(version)]
struct Args {
    /// JSON file holding a (possibly partial) engine configuration
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Log filter directives; RUST_LOG takes precedence when set
    #[arg(long, default_value = DEFAULT_LOG_FILTER)]
    log_filter: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| args.log_filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let service = match &args.config {
        Some(path) => MemoryService::from_config_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => MemoryService::default(),
    };

    tracing::info!("Starting tiered memory MCP server");

    let mut server = McpServer::new(Arc::new(service));
    server.run().await.context("MCP server error")?;
    Ok(())
}
