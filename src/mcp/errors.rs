//! MCP Error Handling
//!
//! Protocol-level failures and their JSON-RPC error objects. Failures inside
//! a tool are not protocol errors; they come back as tool results with
//! `isError` set.

use crate::mcp::protocol::*;
use thiserror::Error;
use tracing::{error, warn};

#[derive(Error, Debug)]
pub enum McpError {
    #[error("Protocol version not supported: {version}. Supported versions: {supported:?}")]
    UnsupportedProtocolVersion {
        version: String,
        supported: Vec<String>,
    },

    #[error("Tool not found: {name}")]
    ToolNotFound { name: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("Invalid parameters: {message}")]
    InvalidParameters { message: String },

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("JSON-RPC parse error: {message}")]
    ParseError { message: String },

    #[error("Internal server error: {message}")]
    InternalError { message: String },
}

impl McpError {
    #[inline]
    pub fn unsupported_version(version: &str) -> Self {
        Self::UnsupportedProtocolVersion {
            version: version.to_string(),
            supported: SUPPORTED_PROTOCOL_VERSIONS
                .iter()
                .map(|v| (*v).to_string())
                .collect(),
        }
    }

    #[inline]
    pub fn to_jsonrpc_error(&self) -> JsonRpcError {
        match self {
            Self::UnsupportedProtocolVersion { version, supported } => JsonRpcError::new(
                mcp_error_codes::INVALID_PROTOCOL_VERSION,
                format!(
                    "Unsupported protocol version: {}. Supported: {}",
                    version,
                    supported.join(", ")
                ),
            ),
            Self::ToolNotFound { name } => JsonRpcError::new(
                mcp_error_codes::TOOL_NOT_FOUND,
                format!("Tool not found: {}", name),
            ),
            Self::InvalidRequest { message } => {
                JsonRpcError::new(error_codes::INVALID_REQUEST, message.clone())
            }
            Self::InvalidParameters { message } => {
                JsonRpcError::new(error_codes::INVALID_PARAMS, message.clone())
            }
            Self::MethodNotFound { method } => JsonRpcError::new(
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", method),
            ),
            Self::ParseError { message } => {
                JsonRpcError::new(error_codes::PARSE_ERROR, message.clone())
            }
            Self::InternalError { message } => {
                JsonRpcError::new(error_codes::INTERNAL_ERROR, message.clone())
            }
        }
    }

    #[inline]
    pub fn to_error_response(&self, id: Option<RequestId>) -> JsonRpcMessage {
        JsonRpcMessage::ErrorResponse(JsonRpcErrorResponse::new(self.to_jsonrpc_error(), id))
    }

    /// Client mistakes log at warn, server faults at error
    #[inline]
    pub fn log(&self) {
        match self {
            Self::InternalError { .. } => error!("Server error: {}", self),
            _ => warn!("Client error: {}", self),
        }
    }
}

pub type McpResult<T> = Result<T, McpError>;

impl From<anyhow::Error> for McpError {
    #[inline]
    fn from(error: anyhow::Error) -> Self {
        Self::InternalError {
            message: format!("{:#}", error),
        }
    }
}

impl From<serde_json::Error> for McpError {
    #[inline]
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidParameters {
            message: error.to_string(),
        }
    }
}

impl From<crate::RagError> for McpError {
    #[inline]
    fn from(error: crate::RagError) -> Self {
        Self::InternalError {
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_not_found_error() {
        let error = McpError::ToolNotFound {
            name: "test_tool".to_string(),
        };

        let jsonrpc_error = error.to_jsonrpc_error();
        assert_eq!(jsonrpc_error.code, mcp_error_codes::TOOL_NOT_FOUND);
        assert!(jsonrpc_error.message.contains("test_tool"));
    }

    #[test]
    fn unsupported_version_lists_accepted_versions() {
        let jsonrpc_error = McpError::unsupported_version("1999-01-01").to_jsonrpc_error();
        assert_eq!(jsonrpc_error.code, mcp_error_codes::INVALID_PROTOCOL_VERSION);
        assert!(jsonrpc_error.message.contains("1999-01-01"));
        assert!(jsonrpc_error.message.contains("2025-06-18"));
        assert!(jsonrpc_error.message.contains("2024-11-05"));
    }

    #[test]
    fn error_response_keeps_request_id() {
        let error = McpError::InternalError {
            message: "test error".to_string(),
        };

        let response = error.to_error_response(Some(RequestId::Number(7)));

        let JsonRpcMessage::ErrorResponse(err_resp) = response else {
            panic!("Expected error response");
        };
        assert_eq!(err_resp.error.code, error_codes::INTERNAL_ERROR);
        assert_eq!(err_resp.id, Some(RequestId::Number(7)));
    }

    #[test]
    fn bad_arguments_map_to_invalid_params() {
        let json_error = serde_json::from_str::<CallToolParams>("{}").expect_err("name missing");
        let error = McpError::from(json_error);
        assert_eq!(error.to_jsonrpc_error().code, error_codes::INVALID_PARAMS);
    }
}
