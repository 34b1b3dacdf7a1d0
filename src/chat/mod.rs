//! Question answering over chat sessions, grounded on the owner's documents.

#[cfg(test)]
mod tests;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{
    ActivityAction, ChatMessage, ChatSession, MessageRole, NewChatMessage,
};
use crate::database::sqlite::queries::{ChatMessageQueries, ChatSessionQueries};
use crate::retrieval::{
    CollaboratorError, EmbeddingGateway, VectorFilter, VectorIndex, resolve_hit,
};
use crate::{RagError, Result};

pub const DEFAULT_SESSION_TITLE: &str = "New Conversation";

/// Stored and returned in place of an answer when the model call fails
pub const APOLOGY_MESSAGE: &str =
    "I apologize, but I encountered an error while processing your message. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

impl From<MessageRole> for PromptRole {
    #[inline]
    fn from(role: MessageRole) -> Self {
        match role {
            MessageRole::User => PromptRole::User,
            MessageRole::Assistant => PromptRole::Assistant,
        }
    }
}

/// One turn of the conversation sent to the chat model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub content: String,
}

impl PromptMessage {
    #[inline]
    pub fn new(role: PromptRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Generates the assistant turn for a prompt
#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, messages: &[PromptMessage]) -> std::result::Result<String, CollaboratorError>;
}

/// A document cited by an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSource {
    pub document_id: i64,
    pub filename: String,
    pub relevance_score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub message: String,
    pub sources: Vec<ChatSource>,
}

/// Context chunks retrieved for one question
#[derive(Debug, Default)]
struct RetrievedContext {
    chunks: Vec<String>,
    sources: Vec<ChatSource>,
}

#[derive(Clone)]
pub struct ChatService {
    database: Database,
    embeddings: Arc<dyn EmbeddingGateway>,
    index: Arc<dyn VectorIndex>,
    model: Arc<dyn ChatModel>,
    context_chunks: usize,
    history_messages: i64,
}

impl ChatService {
    #[inline]
    pub fn new(
        database: Database,
        embeddings: Arc<dyn EmbeddingGateway>,
        index: Arc<dyn VectorIndex>,
        model: Arc<dyn ChatModel>,
        config: &ChatConfig,
    ) -> Self {
        Self {
            database,
            embeddings,
            index,
            model,
            context_chunks: config.context_chunks,
            history_messages: i64::try_from(config.history_messages).unwrap_or(i64::MAX),
        }
    }

    #[inline]
    pub async fn create_session(&self, owner_id: i64, title: Option<&str>) -> Result<ChatSession> {
        let title = title
            .map(str::trim)
            .filter(|title| !title.is_empty())
            .unwrap_or(DEFAULT_SESSION_TITLE);

        let session = ChatSessionQueries::create(self.database.pool(), owner_id, title).await?;
        info!("Created chat session {} for owner {}", session.id, owner_id);

        self.database
            .record_activity(
                owner_id,
                ActivityAction::CreateSession,
                Some(session.id.to_string()),
                json!({ "title": session.title }),
            )
            .await;

        Ok(session)
    }

    /// Newest first
    #[inline]
    pub async fn list_sessions(&self, owner_id: i64) -> Result<Vec<ChatSession>> {
        Ok(ChatSessionQueries::list_by_owner(self.database.pool(), owner_id).await?)
    }

    /// All messages of a session, oldest first
    #[inline]
    pub async fn history(&self, session_id: i64, owner_id: i64) -> Result<Vec<ChatMessage>> {
        self.owned_session(session_id, owner_id).await?;
        Ok(ChatMessageQueries::list_by_session(self.database.pool(), session_id).await?)
    }

    #[inline]
    pub async fn rename_session(
        &self,
        session_id: i64,
        owner_id: i64,
        title: &str,
    ) -> Result<ChatSession> {
        let title = title.trim();
        if title.is_empty() {
            return Err(RagError::Validation(
                "Session title cannot be empty".to_string(),
            ));
        }

        let mut session = self.owned_session(session_id, owner_id).await?;
        ChatSessionQueries::rename(self.database.pool(), session_id, title).await?;
        session.title = title.to_string();
        Ok(session)
    }

    #[inline]
    pub async fn delete_session(&self, session_id: i64, owner_id: i64) -> Result<()> {
        self.owned_session(session_id, owner_id).await?;
        ChatSessionQueries::delete(self.database.pool(), session_id).await?;
        info!("Deleted chat session {}", session_id);
        Ok(())
    }

    /// Answer `content` in the given session from the owner's documents.
    ///
    /// Retrieval failures only shrink the context. A failed model call is
    /// answered with [`APOLOGY_MESSAGE`], which is stored like any other
    /// reply.
    #[inline]
    pub async fn send_message(
        &self,
        session_id: i64,
        owner_id: i64,
        content: &str,
    ) -> Result<ChatReply> {
        let content = content.trim();
        if content.is_empty() {
            return Err(RagError::Validation("Message cannot be empty".to_string()));
        }
        self.owned_session(session_id, owner_id).await?;

        let question = ChatMessageQueries::create(
            self.database.pool(),
            NewChatMessage {
                session_id,
                role: MessageRole::User,
                content: content.to_string(),
                sources: None,
            },
        )
        .await?;

        let context = self.retrieve_context(content, owner_id).await;
        let history = ChatMessageQueries::recent_before(
            self.database.pool(),
            session_id,
            question.id,
            self.history_messages,
        )
        .await?;

        let prompt = build_prompt(&context.chunks, &history, content);
        debug!(
            "Prompting chat model with {} context chunks and {} history messages",
            context.chunks.len(),
            history.len()
        );

        let answer = match self.model.complete(&prompt).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!("Chat model failed for session {}: {}", session_id, e);
                self.store_reply(session_id, APOLOGY_MESSAGE, None).await?;
                return Ok(ChatReply {
                    message: APOLOGY_MESSAGE.to_string(),
                    sources: Vec::new(),
                });
            }
        };

        let sources_json = if context.sources.is_empty() {
            None
        } else {
            Some(serde_json::to_string(&context.sources).map_err(anyhow::Error::from)?)
        };
        self.store_reply(session_id, &answer, sources_json).await?;

        self.database
            .record_activity(
                owner_id,
                ActivityAction::Chat,
                Some(session_id.to_string()),
                json!({
                    "message_length": content.chars().count(),
                    "sources_found": context.sources.len(),
                }),
            )
            .await;

        Ok(ChatReply {
            message: answer,
            sources: context.sources,
        })
    }

    async fn owned_session(&self, session_id: i64, owner_id: i64) -> Result<ChatSession> {
        ChatSessionQueries::get_owned(self.database.pool(), session_id, owner_id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("Chat session {} not found", session_id)))
    }

    async fn store_reply(
        &self,
        session_id: i64,
        content: &str,
        sources: Option<String>,
    ) -> Result<ChatMessage> {
        Ok(ChatMessageQueries::create(
            self.database.pool(),
            NewChatMessage {
                session_id,
                role: MessageRole::Assistant,
                content: content.to_string(),
                sources,
            },
        )
        .await?)
    }

    async fn retrieve_context(&self, question: &str, owner_id: i64) -> RetrievedContext {
        match self.try_retrieve_context(question, owner_id).await {
            Ok(context) => context,
            Err(e) => {
                warn!("Answering without document context: {}", e);
                RetrievedContext::default()
            }
        }
    }

    async fn try_retrieve_context(
        &self,
        question: &str,
        owner_id: i64,
    ) -> std::result::Result<RetrievedContext, CollaboratorError> {
        let vector = self.embeddings.embed(question).await?;
        let hits = self
            .index
            .query(&vector, self.context_chunks, VectorFilter::owner(owner_id))
            .await?;

        let mut context = RetrievedContext::default();
        for hit in &hits {
            let Some(chunk) = resolve_hit(self.database.pool(), hit, owner_id).await? else {
                continue;
            };

            context.chunks.push(chunk.chunk_content);
            if !context
                .sources
                .iter()
                .any(|source| source.document_id == chunk.document.id)
            {
                context.sources.push(ChatSource {
                    document_id: chunk.document.id,
                    filename: chunk.document.original_filename,
                    relevance_score: hit.score,
                });
            }
        }

        Ok(context)
    }
}

/// System prompt carrying the retrieved context, then the earlier turns,
/// then the question
#[inline]
pub fn build_prompt(context: &[String], history: &[ChatMessage], question: &str) -> Vec<PromptMessage> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(PromptMessage::new(PromptRole::System, system_prompt(context)));
    messages.extend(
        history
            .iter()
            .map(|message| PromptMessage::new(message.role.into(), message.content.as_str())),
    );
    messages.push(PromptMessage::new(PromptRole::User, question));
    messages
}

fn system_prompt(context: &[String]) -> String {
    format!(
        "You are a helpful AI assistant that answers questions based on the provided context from documents.

Context from documents:
{}

Instructions:
- Answer questions based on the provided context
- If the context doesn't contain relevant information, say so clearly
- Provide specific references to the source material when possible
- Be concise but comprehensive
- If asked about something not in the context, explain that you can only answer based on the provided documents",
        context.join("\n\n")
    )
}
