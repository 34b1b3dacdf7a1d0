//! MCP Server Implementation
//!
//! Line-delimited JSON-RPC over any async reader/writer pair, with stdio as
//! the production transport. Tools are registered up front and dispatched
//! by name.

use crate::mcp::errors::{McpError, McpResult};
use crate::mcp::protocol::*;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

const SERVER_INSTRUCTIONS: &str = "Search, compare and ask questions about the documents in this knowledge base";

/// Connection state tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Uninitialized,
    Initializing,
    Ready,
    Closed,
}

/// Executes one tool. Failures of the tool itself belong in the returned
/// [`CallToolResult`]; an `Err` is reported to the client as an internal
/// error.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn handle(&self, params: CallToolParams) -> Result<CallToolResult>;
}

pub struct McpServer {
    pub server_info: Implementation,
    pub capabilities: ServerCapabilities,
    tools: RwLock<BTreeMap<String, Tool>>,
    tool_handlers: RwLock<HashMap<String, Arc<dyn ToolHandler>>>,
    connection_state: RwLock<ConnectionState>,
}

impl McpServer {
    #[inline]
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            server_info: Implementation {
                name: name.into(),
                version: version.into(),
            },
            capabilities: ServerCapabilities {
                tools: ToolsCapability {
                    list_changed: false,
                },
            },
            tools: RwLock::new(BTreeMap::new()),
            tool_handlers: RwLock::new(HashMap::new()),
            connection_state: RwLock::new(ConnectionState::Uninitialized),
        }
    }

    /// Register a tool, replacing any tool of the same name
    #[inline]
    pub async fn register_tool<H>(&self, tool: Tool, handler: H)
    where
        H: ToolHandler + 'static,
    {
        let tool_name = tool.name.clone();

        self.tools.write().await.insert(tool_name.clone(), tool);
        self.tool_handlers
            .write()
            .await
            .insert(tool_name.clone(), Arc::new(handler));

        debug!("Registered tool: {}", tool_name);
    }

    /// Registered tool names, sorted
    #[inline]
    pub async fn tool_names(&self) -> Vec<String> {
        self.tools.read().await.keys().cloned().collect()
    }

    #[inline]
    pub async fn connection_state(&self) -> ConnectionState {
        *self.connection_state.read().await
    }

    /// Serve requests on stdin, writing responses to stdout
    #[inline]
    pub async fn serve_stdio(self: Arc<Self>) -> Result<()> {
        info!("Starting MCP server with stdio transport");
        self.serve(BufReader::new(io::stdin()), io::stdout()).await
    }

    /// Serve one JSON-RPC message per line until the reader is exhausted
    #[inline]
    pub async fn serve<R, W>(self: Arc<Self>, mut reader: R, mut writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => {
                    info!("EOF reached, closing connection");
                    break;
                }
                Ok(_) => {
                    if let Some(response) = self.handle_line(&line).await {
                        send_message(&mut writer, &response).await?;
                    }
                }
                Err(e) => {
                    error!("Error reading from transport: {}", e);
                    break;
                }
            }
        }

        *self.connection_state.write().await = ConnectionState::Closed;
        info!("MCP server stopped");
        Ok(())
    }

    /// Process one raw message. Returns the response to send, if any;
    /// notifications and stray responses produce none.
    #[inline]
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcMessage> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let raw: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to parse JSON: {}", e);
                return Some(JsonRpcMessage::ErrorResponse(JsonRpcErrorResponse::new(
                    JsonRpcError::parse_error(),
                    None,
                )));
            }
        };

        let id = raw
            .get("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());
        if raw.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            warn!("Rejecting message without jsonrpc 2.0 marker");
            return Some(JsonRpcMessage::ErrorResponse(JsonRpcErrorResponse::new(
                JsonRpcError::invalid_request(),
                id,
            )));
        }

        match serde_json::from_value::<JsonRpcMessage>(raw) {
            Ok(JsonRpcMessage::Request(request)) => Some(self.handle_request(request).await),
            Ok(JsonRpcMessage::Notification(notification)) => {
                self.handle_notification(&notification).await;
                None
            }
            Ok(JsonRpcMessage::Response(_) | JsonRpcMessage::ErrorResponse(_)) => {
                warn!("Received unexpected response message from client");
                None
            }
            Err(e) => {
                warn!("Message is not a JSON-RPC request or notification: {}", e);
                Some(JsonRpcMessage::ErrorResponse(JsonRpcErrorResponse::new(
                    JsonRpcError::invalid_request(),
                    id,
                )))
            }
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcMessage {
        debug!("Handling request {}", request.method);

        let result = match request.method.as_str() {
            "initialize" => self.handle_initialize(request.params).await,
            "tools/list" => self.handle_list_tools().await,
            "tools/call" => self.handle_call_tool(request.params).await,
            "ping" => Ok(json!({})),
            other => Err(McpError::MethodNotFound {
                method: other.to_string(),
            }),
        };

        match result {
            Ok(value) => JsonRpcMessage::Response(JsonRpcResponse::new(value, request.id)),
            Err(e) => {
                e.log();
                e.to_error_response(Some(request.id))
            }
        }
    }

    async fn handle_notification(&self, notification: &JsonRpcNotification) {
        match notification.method.as_str() {
            "notifications/initialized" | "initialized" => {
                *self.connection_state.write().await = ConnectionState::Ready;
                info!("Server ready to handle requests");
            }
            "notifications/cancelled" => debug!("Received cancellation notification"),
            other => warn!("Unknown notification method: {}", other),
        }
    }

    async fn handle_initialize(&self, params: Option<Value>) -> McpResult<Value> {
        let params: InitializeParams = serde_json::from_value(params.ok_or_else(|| {
            McpError::InvalidParameters {
                message: "Initialize request missing parameters".to_string(),
            }
        })?)?;

        if !is_protocol_version_supported(&params.protocol_version) {
            return Err(McpError::unsupported_version(&params.protocol_version));
        }

        *self.connection_state.write().await = ConnectionState::Initializing;

        let result = InitializeResult {
            protocol_version: params.protocol_version,
            capabilities: self.capabilities.clone(),
            server_info: self.server_info.clone(),
            instructions: Some(SERVER_INSTRUCTIONS.to_string()),
        };

        info!("Client initialized: {}", params.client_info.name);
        Ok(serde_json::to_value(result)?)
    }

    async fn handle_list_tools(&self) -> McpResult<Value> {
        let tools = self.tools.read().await.values().cloned().collect();
        Ok(serde_json::to_value(ListToolsResult { tools })?)
    }

    async fn handle_call_tool(&self, params: Option<Value>) -> McpResult<Value> {
        let params: CallToolParams = serde_json::from_value(params.ok_or_else(|| {
            McpError::InvalidParameters {
                message: "Tool call request missing parameters".to_string(),
            }
        })?)?;

        let handler = self
            .tool_handlers
            .read()
            .await
            .get(&params.name)
            .map(Arc::clone)
            .ok_or_else(|| McpError::ToolNotFound {
                name: params.name.clone(),
            })?;

        let result = handler.handle(params).await?;
        Ok(serde_json::to_value(result)?)
    }
}

async fn send_message<W>(writer: &mut W, message: &JsonRpcMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(message)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
