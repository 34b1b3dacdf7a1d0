//! MCP Tools Implementation
//!
//! Each tool validates its arguments, runs one library operation for the
//! configured owner and returns the outcome as pretty-printed JSON. Domain
//! failures such as a missing document or an invalid limit come back as
//! `isError` results rather than protocol errors.

use crate::analytics::display_file_type;
use crate::chat::ChatService;
use crate::ingest::{DEFAULT_LIST_LIMIT, DocumentIngestor};
use crate::mcp::protocol::*;
use crate::mcp::server::{McpServer, ToolHandler};
use crate::retrieval::{
    DEFAULT_SIMILAR_LIMIT, FileCategory, HybridRetriever, SearchFilter, SearchMode, SearchRequest,
    SimilarityExpander,
};
use crate::{RagError, Result as RagResult};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tracing::{debug, warn};

type Arguments = Map<String, Value>;

/// Library services the tools run against, all scoped to one owner
#[derive(Clone)]
pub struct ToolServices {
    pub owner_id: i64,
    pub default_search_limit: usize,
    pub retriever: Arc<HybridRetriever>,
    pub expander: Arc<SimilarityExpander>,
    pub ingestor: Arc<DocumentIngestor>,
    pub chat: Arc<ChatService>,
}

/// Register every knowledge-base tool on `server`
#[inline]
pub async fn register_tools(server: &McpServer, services: &ToolServices) {
    server
        .register_tool(
            SearchDocumentsHandler::tool_definition(),
            SearchDocumentsHandler::new(services),
        )
        .await;
    server
        .register_tool(
            FindSimilarHandler::tool_definition(),
            FindSimilarHandler::new(services),
        )
        .await;
    server
        .register_tool(
            ListDocumentsHandler::tool_definition(),
            ListDocumentsHandler::new(services),
        )
        .await;
    server
        .register_tool(AskHandler::tool_definition(), AskHandler::new(services))
        .await;
}

/// Turn a tool outcome into a result: JSON on success, the error text with
/// `isError` on failure
fn into_tool_result(tool: &str, outcome: RagResult<Value>) -> anyhow::Result<CallToolResult> {
    match outcome {
        Ok(value) => Ok(CallToolResult::json(&value)?),
        Err(e) => {
            warn!("Tool {} failed: {}", tool, e);
            Ok(CallToolResult::error(e.to_string()))
        }
    }
}

/// A non-blank string argument, returned as sent
fn required_str<'a>(args: &'a Arguments, name: &str) -> RagResult<&'a str> {
    args.get(name)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| RagError::Validation(format!("Missing required parameter: {}", name)))
}

fn optional_str<'a>(args: &'a Arguments, name: &str) -> RagResult<Option<&'a str>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.trim()).filter(|value| !value.is_empty())),
        Some(_) => Err(RagError::Validation(format!(
            "Parameter {} must be a string",
            name
        ))),
    }
}

fn optional_i64(args: &Arguments, name: &str) -> RagResult<Option<i64>> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value.as_i64().map(Some).ok_or_else(|| {
            RagError::Validation(format!("Parameter {} must be an integer", name))
        }),
    }
}

fn required_i64(args: &Arguments, name: &str) -> RagResult<i64> {
    optional_i64(args, name)?
        .ok_or_else(|| RagError::Validation(format!("Missing required parameter: {}", name)))
}

/// A limit argument; values below 1 are left to the operation to reject
fn optional_limit(args: &Arguments, name: &str, default: usize) -> RagResult<usize> {
    Ok(optional_i64(args, name)?
        .map(|limit| usize::try_from(limit).unwrap_or(0))
        .unwrap_or(default))
}

fn optional_date(args: &Arguments, name: &str) -> RagResult<Option<NaiveDate>> {
    optional_str(args, name)?
        .map(|raw| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| {
                RagError::Validation(format!("Parameter {} must be a YYYY-MM-DD date", name))
            })
        })
        .transpose()
}

pub struct SearchDocumentsHandler {
    retriever: Arc<HybridRetriever>,
    owner_id: i64,
    default_limit: usize,
}

impl SearchDocumentsHandler {
    #[inline]
    pub fn new(services: &ToolServices) -> Self {
        Self {
            retriever: Arc::clone(&services.retriever),
            owner_id: services.owner_id,
            default_limit: services.default_search_limit,
        }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "search_documents".to_string(),
            description: Some(
                "Search uploaded documents by keyword and meaning".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "Search query"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of results, 1 to 50 (default: 10)"
                    },
                    "search_type": {
                        "type": "string",
                        "enum": ["text", "semantic", "hybrid"],
                        "description": "Matching strategy (default: hybrid)"
                    },
                    "file_type": {
                        "type": "string",
                        "enum": ["pdf", "word", "text", "image", "other"],
                        "description": "Optional: restrict to a file category"
                    },
                    "date_from": {
                        "type": "string",
                        "description": "Optional: earliest upload date, YYYY-MM-DD"
                    },
                    "date_to": {
                        "type": "string",
                        "description": "Optional: latest upload date, YYYY-MM-DD"
                    }
                },
                "required": ["query"],
                "additionalProperties": false
            }),
        }
    }

    async fn run(&self, args: &Arguments) -> RagResult<Value> {
        let query = required_str(args, "query")?;
        let limit = optional_limit(args, "limit", self.default_limit)?;
        let mode = optional_str(args, "search_type")?
            .map(str::parse::<SearchMode>)
            .transpose()
            .map_err(RagError::Validation)?
            .unwrap_or_default();
        let category = optional_str(args, "file_type")?
            .map(str::parse::<FileCategory>)
            .transpose()
            .map_err(RagError::Validation)?;
        let filter = SearchFilter::default()
            .with_category(category)
            .with_date_range(optional_date(args, "date_from")?, optional_date(args, "date_to")?);

        debug!(
            "Searching documents: query='{}', mode={}, limit={}",
            query, mode, limit
        );

        let request = SearchRequest::new(query)
            .with_limit(limit)
            .with_mode(mode)
            .with_filter(filter);
        let results = self.retriever.search(self.owner_id, &request).await?;

        Ok(json!({
            "query": query,
            "search_type": mode,
            "total": results.len(),
            "results": results,
        }))
    }
}

#[async_trait]
impl ToolHandler for SearchDocumentsHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> anyhow::Result<CallToolResult> {
        let args = params.arguments.unwrap_or_default();
        into_tool_result("search_documents", self.run(&args).await)
    }
}

pub struct FindSimilarHandler {
    expander: Arc<SimilarityExpander>,
    owner_id: i64,
}

impl FindSimilarHandler {
    #[inline]
    pub fn new(services: &ToolServices) -> Self {
        Self {
            expander: Arc::clone(&services.expander),
            owner_id: services.owner_id,
        }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "find_similar".to_string(),
            description: Some("Find documents similar to a given document".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "document_id": {
                        "type": "integer",
                        "description": "Document to compare against"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of results, 1 to 20 (default: 5)"
                    }
                },
                "required": ["document_id"],
                "additionalProperties": false
            }),
        }
    }

    async fn run(&self, args: &Arguments) -> RagResult<Value> {
        let document_id = required_i64(args, "document_id")?;
        let limit = optional_limit(args, "limit", DEFAULT_SIMILAR_LIMIT)?;

        let similar = self
            .expander
            .find_similar(document_id, limit, self.owner_id)
            .await?;

        Ok(json!({
            "document_id": document_id,
            "similar_documents": similar,
        }))
    }
}

#[async_trait]
impl ToolHandler for FindSimilarHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> anyhow::Result<CallToolResult> {
        let args = params.arguments.unwrap_or_default();
        into_tool_result("find_similar", self.run(&args).await)
    }
}

pub struct ListDocumentsHandler {
    ingestor: Arc<DocumentIngestor>,
    owner_id: i64,
}

impl ListDocumentsHandler {
    #[inline]
    pub fn new(services: &ToolServices) -> Self {
        Self {
            ingestor: Arc::clone(&services.ingestor),
            owner_id: services.owner_id,
        }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "list_documents".to_string(),
            description: Some("List uploaded documents, newest first".to_string()),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "search": {
                        "type": "string",
                        "description": "Optional: only names containing this text"
                    },
                    "skip": {
                        "type": "integer",
                        "description": "Number of documents to skip (default: 0)"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of documents, 1 to 100 (default: 100)"
                    }
                },
                "additionalProperties": false
            }),
        }
    }

    async fn run(&self, args: &Arguments) -> RagResult<Value> {
        let search = optional_str(args, "search")?;
        let skip = optional_i64(args, "skip")?.unwrap_or(0);
        let limit = optional_i64(args, "limit")?.unwrap_or(DEFAULT_LIST_LIMIT);

        let documents = self
            .ingestor
            .list_documents(self.owner_id, skip, limit, search)
            .await?;

        let listed: Vec<Value> = documents
            .iter()
            .map(|document| {
                json!({
                    "id": document.id,
                    "filename": document.original_filename,
                    "file_type": display_file_type(document.file_type.as_deref()),
                    "file_size": document.file_size,
                    "created_at": document.created_at,
                })
            })
            .collect();

        Ok(json!({
            "count": listed.len(),
            "documents": listed,
        }))
    }
}

#[async_trait]
impl ToolHandler for ListDocumentsHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> anyhow::Result<CallToolResult> {
        let args = params.arguments.unwrap_or_default();
        into_tool_result("list_documents", self.run(&args).await)
    }
}

pub struct AskHandler {
    chat: Arc<ChatService>,
    owner_id: i64,
}

impl AskHandler {
    #[inline]
    pub fn new(services: &ToolServices) -> Self {
        Self {
            chat: Arc::clone(&services.chat),
            owner_id: services.owner_id,
        }
    }

    #[inline]
    pub fn tool_definition() -> Tool {
        Tool {
            name: "ask".to_string(),
            description: Some(
                "Answer a question from the uploaded documents, citing sources".to_string(),
            ),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "question": {
                        "type": "string",
                        "description": "Question to answer"
                    },
                    "session_id": {
                        "type": "integer",
                        "description": "Optional: continue an existing chat session"
                    }
                },
                "required": ["question"],
                "additionalProperties": false
            }),
        }
    }

    async fn run(&self, args: &Arguments) -> RagResult<Value> {
        let question = required_str(args, "question")?;
        let session_id = match optional_i64(args, "session_id")? {
            Some(session_id) => session_id,
            None => self.chat.create_session(self.owner_id, None).await?.id,
        };

        let reply = self
            .chat
            .send_message(session_id, self.owner_id, question)
            .await?;

        Ok(json!({
            "session_id": session_id,
            "answer": reply.message,
            "sources": reply.sources,
        }))
    }
}

#[async_trait]
impl ToolHandler for AskHandler {
    #[inline]
    async fn handle(&self, params: CallToolParams) -> anyhow::Result<CallToolResult> {
        let args = params.arguments.unwrap_or_default();
        into_tool_result("ask", self.run(&args).await)
    }
}
