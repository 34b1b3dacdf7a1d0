//! Hybrid lexical and semantic retrieval over ingested documents.
//!
//! The embedding gateway and vector index are injected as trait objects so
//! the retrieval components can run against Ollama and LanceDB in production
//! and against in-memory fakes in tests.


pub mod hybrid;
pub mod memory;
pub mod similar;
pub mod snippet;

pub use hybrid::{HybridRetriever, SearchRequest};
pub use memory::InMemoryVectorIndex;
pub use similar::{DEFAULT_SIMILAR_LIMIT, SimilarityExpander};
pub use snippet::{extract_snippet, truncate_snippet};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use sqlx::{Executor, Sqlite};
use std::cmp::Ordering;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use crate::database::sqlite::models::{ChunkWithDocument, Document};
use crate::database::sqlite::queries::ChunkQueries;

/// Fixed relevance given to every lexical hit
pub const LEXICAL_SCORE: f32 = 0.8;

pub const MAX_SEARCH_LIMIT: usize = 50;
pub const MAX_SIMILAR_LIMIT: usize = 20;

/// A collaborator call that failed. Retrieval degrades on these instead of
/// failing the request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("Embedding unavailable: {0}")]
    Embedding(String),
    #[error("Vector index unavailable: {0}")]
    VectorIndex(String),
    #[error("Document store unavailable: {0}")]
    Store(String),
    #[error("Chat model unavailable: {0}")]
    Model(String),
}

/// Maps text to a fixed-length vector
#[async_trait]
pub trait EmbeddingGateway: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError>;
}

/// Metadata stored next to each chunk vector
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorMetadata {
    pub document_id: Option<i64>,
    pub owner_id: Option<i64>,
    pub position: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    /// Chunk row id, as stored in the index
    pub id: String,
    pub score: f32,
    pub metadata: VectorMetadata,
}

impl VectorMatch {
    /// The chunk id this entry points at, `None` for malformed entries
    #[inline]
    pub fn chunk_id(&self) -> Option<i64> {
        self.id.trim().parse().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorFilter {
    pub owner_id: i64,
}

impl VectorFilter {
    #[inline]
    pub fn owner(owner_id: i64) -> Self {
        Self { owner_id }
    }
}

/// Nearest-neighbour store for chunk vectors
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace the vector stored under `id`
    async fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: VectorMetadata,
    ) -> Result<(), CollaboratorError>;

    /// Up to `top_k` matches passing `filter`, best first
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: VectorFilter,
    ) -> Result<Vec<VectorMatch>, CollaboratorError>;

    async fn delete(&self, ids: &[String]) -> Result<(), CollaboratorError>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Text,
    Semantic,
    #[default]
    Hybrid,
}

impl SearchMode {
    #[inline]
    pub fn includes_lexical(self) -> bool {
        matches!(self, SearchMode::Text | SearchMode::Hybrid)
    }

    #[inline]
    pub fn includes_semantic(self) -> bool {
        matches!(self, SearchMode::Semantic | SearchMode::Hybrid)
    }

    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            SearchMode::Text => "text",
            SearchMode::Semantic => "semantic",
            SearchMode::Hybrid => "hybrid",
        }
    }
}

impl std::fmt::Display for SearchMode {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = String;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(SearchMode::Text),
            "semantic" => Ok(SearchMode::Semantic),
            "hybrid" => Ok(SearchMode::Hybrid),
            other => Err(format!(
                "Unknown search type '{}', expected text, semantic or hybrid",
                other
            )),
        }
    }
}

const DOCX_MIME: &str = "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Pdf,
    Word,
    Text,
    Image,
    Other,
}

impl FileCategory {
    /// MIME types in this category. `Other` is empty and restricts nothing.
    #[inline]
    pub fn mime_types(self) -> &'static [&'static str] {
        match self {
            FileCategory::Pdf => &["application/pdf"],
            FileCategory::Word => &[DOCX_MIME],
            FileCategory::Text => &["text/plain", "text/markdown"],
            FileCategory::Image => &["image/jpeg", "image/png", "image/gif"],
            FileCategory::Other => &[],
        }
    }
}

impl FromStr for FileCategory {
    type Err = String;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(FileCategory::Pdf),
            "word" => Ok(FileCategory::Word),
            "text" => Ok(FileCategory::Text),
            "image" => Ok(FileCategory::Image),
            "other" => Ok(FileCategory::Other),
            other => Err(format!(
                "Unknown file type '{}', expected pdf, word, text, image or other",
                other
            )),
        }
    }
}

/// Restrictions applied identically to the lexical and semantic passes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchFilter {
    pub category: Option<FileCategory>,
    pub created_from: Option<NaiveDateTime>,
    pub created_to: Option<NaiveDateTime>,
}

impl SearchFilter {
    /// Calendar-date bounds, both inclusive
    #[inline]
    pub fn with_date_range(mut self, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        self.created_from = from.map(|date| date.and_time(NaiveTime::MIN));
        self.created_to = to.and_then(|date| date.and_hms_nano_opt(23, 59, 59, 999_999_999));
        self
    }

    #[inline]
    pub fn with_category(mut self, category: Option<FileCategory>) -> Self {
        self.category = category;
        self
    }

    #[inline]
    pub fn mime_types(&self) -> &'static [&'static str] {
        self.category.map(FileCategory::mime_types).unwrap_or_default()
    }

    #[inline]
    pub fn matches(&self, document: &Document) -> bool {
        let mime_types = self.mime_types();
        if !mime_types.is_empty() && !document.has_mime_type(mime_types) {
            return false;
        }
        if self.created_from.is_some_and(|from| document.created_at < from) {
            return false;
        }
        if self.created_to.is_some_and(|to| document.created_at > to) {
            return false;
        }
        true
    }
}

/// One ranked document in a search or similarity result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalMatch {
    pub document_id: i64,
    /// Name the document was uploaded with
    pub filename: String,
    pub snippet: String,
    pub relevance_score: f32,
}

/// Stable sort by descending relevance, then keep the first `limit`
#[inline]
pub fn rank_and_truncate(matches: &mut Vec<RetrievalMatch>, limit: usize) {
    matches.sort_by(|a, b| {
        b.relevance_score
            .partial_cmp(&a.relevance_score)
            .unwrap_or(Ordering::Equal)
    });
    matches.truncate(limit);
}

/// Resolve an index hit to its chunk and owning document. Malformed ids,
/// stale entries and chunks of other owners resolve to `None`.
pub(crate) async fn resolve_hit<'e, E>(
    executor: E,
    hit: &VectorMatch,
    owner_id: i64,
) -> Result<Option<ChunkWithDocument>, CollaboratorError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let Some(chunk_id) = hit.chunk_id() else {
        debug!("Skipping vector entry with malformed id '{}'", hit.id);
        return Ok(None);
    };

    let resolved = ChunkQueries::get_with_document(executor, chunk_id)
        .await
        .map_err(|e| CollaboratorError::Store(format!("{:#}", e)))?;

    match resolved {
        Some(chunk) if chunk.document.owner_id == owner_id => Ok(Some(chunk)),
        Some(_) => {
            debug!("Skipping chunk {} owned by another user", chunk_id);
            Ok(None)
        }
        None => {
            debug!("Skipping stale vector entry for chunk {}", chunk_id);
            Ok(None)
        }
    }
}
