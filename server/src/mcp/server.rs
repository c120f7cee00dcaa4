//! MCP Server Implementation
//!
//! Routes JSON-RPC requests to the memory tools and resources.

use super::protocol::*;
use super::resources::{get_all_resources, read_resource};
use super::tools::{call_tool, get_all_tools};
use super::transport::{Incoming, Transport};
use crate::error::ServerError;
use crate::memory::MemoryService;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncWrite};

const PROTOCOL_VERSION: &str = "2024-11-05";
const SERVER_NAME: &str = "tiered-memory";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// MCP Server - handles protocol messages
pub struct McpServer {
    service: Arc<MemoryService>,
    initialized: bool,
}

impl McpServer {
    pub fn new(service: Arc<MemoryService>) -> Self {
        Self {
            service,
            initialized: false,
        }
    }

    pub fn service(&self) -> &Arc<MemoryService> {
        &self.service
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Serve stdin/stdout until the client disconnects
    pub async fn run(&mut self) -> std::io::Result<()> {
        let mut transport = Transport::stdio();
        self.serve(&mut transport).await
    }

    /// Serve one connection until EOF
    pub async fn serve<R, W>(&mut self, transport: &mut Transport<R, W>) -> std::io::Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        tracing::info!("MCP server starting...");

        loop {
            match transport.read().await? {
                Incoming::Request(request) => {
                    if let Some(response) = self.handle_request(request).await {
                        transport.write(&response).await?;
                    }
                }
                Incoming::Malformed(message) => {
                    let response = JsonRpcResponse::error(
                        None,
                        JsonRpcError::parse_error(format!("Parse error: {}", message)),
                    );
                    transport.write(&response).await?;
                }
                Incoming::Empty => continue,
                Incoming::Eof => {
                    tracing::info!("Client disconnected");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle one request; notifications yield no response
    pub async fn handle_request(&mut self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        tracing::debug!("Handling request: {}", request.method);

        if request.jsonrpc != JSONRPC_VERSION {
            return Some(JsonRpcResponse::error(
                request.id,
                JsonRpcError::invalid_request(format!("Unsupported jsonrpc version '{}'", request.jsonrpc)),
            ));
        }

        let notification = request.is_notification();
        let id = request.id;
        let response = match request.method.as_str() {
            "initialize" => self.handle_initialize(id, request.params),
            "initialized" | "notifications/initialized" => {
                self.initialized = true;
                JsonRpcResponse::success(id, Value::Null)
            }
            "notifications/cancelled" => {
                tracing::debug!("Client cancelled a request: {:?}", request.params);
                JsonRpcResponse::success(id, Value::Null)
            }
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" => JsonRpcResponse::from_result(id, &ToolsListResult { tools: get_all_tools() }),
            "tools/call" => self.handle_tools_call(id, request.params).await,
            "resources/list" => JsonRpcResponse::from_result(
                id,
                &ResourcesListResult {
                    resources: get_all_resources(),
                },
            ),
            "resources/read" => self.handle_resources_read(id, request.params),
            method => JsonRpcResponse::error(id, JsonRpcError::method_not_found(method)),
        };

        (!notification).then_some(response)
    }

    fn handle_initialize(&mut self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: InitializeParams = params
            .and_then(|p| serde_json::from_value(p).ok())
            .unwrap_or_default();
        if let Some(client) = &params.client_info {
            tracing::info!(
                "Client connected: {} {}",
                client.name,
                client.version.as_deref().unwrap_or("")
            );
        }

        self.initialized = true;
        let stats = self.service.engine().stats();
        tracing::info!("Serving {} memories", stats.total_records);

        let result = InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                resources: ListCapability::default(),
                tools: ListCapability::default(),
            },
            server_info: ServerInfo {
                name: SERVER_NAME.to_string(),
                version: SERVER_VERSION.to_string(),
            },
            instructions: Some(
                "Tiered memory store: working, episodic, semantic, procedural and emotional tiers. \
                 Use memory_store to remember, memory_query to recall."
                    .to_string(),
            ),
        };

        JsonRpcResponse::from_result(id, &result)
    }

    async fn handle_tools_call(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return JsonRpcResponse::error(id, e),
        };
        let args = params.arguments.unwrap_or_else(|| json!({}));

        match call_tool(&self.service, &params.name, args).await {
            Ok(result) => JsonRpcResponse::from_result(id, &ToolCallResult::json(&result)),
            Err(ServerError::UnknownTool(name)) => {
                JsonRpcResponse::error(id, JsonRpcError::invalid_params(format!("Unknown tool: {}", name)))
            }
            Err(e) => {
                tracing::debug!("Tool {} failed: {}", params.name, e);
                JsonRpcResponse::from_result(id, &ToolCallResult::failure(&e))
            }
        }
    }

    fn handle_resources_read(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ResourceReadParams = match parse_params(params) {
            Ok(p) => p,
            Err(e) => return JsonRpcResponse::error(id, e),
        };

        match read_resource(&params.uri, &self.service) {
            Ok(result) => JsonRpcResponse::from_result(id, &result),
            Err(e) => JsonRpcResponse::error(id, e.into()),
        }
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, JsonRpcError> {
    let params = params.ok_or_else(|| JsonRpcError::invalid_params("Missing params"))?;
    serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {}", e)))
}
