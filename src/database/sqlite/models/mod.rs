
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub id: i64,
    pub owner_id: i64,
    /// Stored file name under the uploads directory
    pub filename: String,
    /// Name the file was uploaded with, shown to users
    pub original_filename: String,
    pub content: Option<String>,
    pub file_path: String,
    pub file_size: i64,
    /// MIME type
    pub file_type: Option<String>,
    pub doc_metadata: Option<String>,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub owner_id: i64,
    pub filename: String,
    pub original_filename: String,
    pub content: Option<String>,
    pub file_path: String,
    pub file_size: i64,
    pub file_type: Option<String>,
    pub doc_metadata: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct DocumentChunk {
    pub id: i64,
    pub document_id: i64,
    pub content: String,
    /// JSON array of floats, absent when the embedding could not be produced
    pub embedding: Option<String>,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocumentChunk {
    pub document_id: i64,
    pub content: String,
    pub embedding: Option<String>,
    pub position: i64,
}

/// A chunk joined with the document that owns it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChunkWithDocument {
    pub chunk_id: i64,
    pub chunk_content: String,
    pub position: i64,
    #[sqlx(flatten)]
    pub document: Document,
}

/// An embedded chunk with the owner of its document, enough to rebuild its
/// vector index entry
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct StoredEmbedding {
    pub chunk_id: i64,
    pub document_id: i64,
    pub owner_id: i64,
    pub position: i64,
    pub embedding: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct SearchQueryRecord {
    pub id: i64,
    pub owner_id: i64,
    pub query: String,
    pub results_count: i64,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct UserActivity {
    pub id: i64,
    pub owner_id: i64,
    pub action: String,
    pub resource_id: Option<String>,
    pub details: Option<String>,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUserActivity {
    pub owner_id: i64,
    pub action: ActivityAction,
    pub resource_id: Option<String>,
    pub details: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Upload,
    Delete,
    Search,
    Chat,
    CreateSession,
}

impl ActivityAction {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            ActivityAction::Upload => "upload",
            ActivityAction::Delete => "delete",
            ActivityAction::Search => "search",
            ActivityAction::Chat => "chat",
            ActivityAction::CreateSession => "create_session",
        }
    }
}

impl std::fmt::Display for ActivityAction {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChatSession {
    pub id: i64,
    pub owner_id: i64,
    pub title: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            MessageRole::User => write!(f, "User"),
            MessageRole::Assistant => write!(f, "Assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ChatMessage {
    pub id: i64,
    pub session_id: i64,
    pub role: MessageRole,
    pub content: String,
    /// JSON array of cited documents
    pub sources: Option<String>,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewChatMessage {
    pub session_id: i64,
    pub role: MessageRole,
    pub content: String,
    pub sources: Option<String>,
}

impl Document {
    /// Extracted text, or an empty string when extraction produced nothing
    #[inline]
    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or_default()
    }

    #[inline]
    pub fn has_mime_type(&self, mime_types: &[&str]) -> bool {
        self.file_type
            .as_deref()
            .is_some_and(|file_type| mime_types.contains(&file_type))
    }
}

impl StoredEmbedding {
    #[inline]
    pub fn vector(&self) -> Option<Vec<f32>> {
        serde_json::from_str(&self.embedding).ok()
    }
}

impl DocumentChunk {
    /// Decode the stored embedding, `None` when missing or malformed
    #[inline]
    pub fn embedding_vector(&self) -> Option<Vec<f32>> {
        self.embedding
            .as_deref()
            .and_then(|json| serde_json::from_str(json).ok())
    }
}
