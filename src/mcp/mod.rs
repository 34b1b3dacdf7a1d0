//! MCP (Model Context Protocol) Server Implementation
//!
//! Exposes document search, similarity, listing and question answering as
//! MCP tools over JSON-RPC 2.0 on stdio.

#[cfg(test)]
mod tests;

pub mod errors;
pub mod protocol;
pub mod server;
pub mod tools;

pub use errors::{McpError, McpResult};
pub use protocol::{
    CallToolParams, CallToolResult, JsonRpcMessage, ListToolsResult, MCP_VERSION, RequestId,
    SUPPORTED_PROTOCOL_VERSIONS, Tool, ToolContent,
};
pub use server::{ConnectionState, McpServer, ToolHandler};
pub use tools::{ToolServices, register_tools};
