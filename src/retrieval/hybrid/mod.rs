
use itertools::Itertools;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::snippet::{DEFAULT_SNIPPET_LENGTH, extract_snippet, truncate_snippet};
use super::{
    CollaboratorError, EmbeddingGateway, LEXICAL_SCORE, MAX_SEARCH_LIMIT, RetrievalMatch,
    SearchFilter, SearchMode, VectorFilter, VectorIndex, rank_and_truncate, resolve_hit,
};
use crate::database::sqlite::Database;
use crate::database::sqlite::models::ActivityAction;
use crate::database::sqlite::queries::{DocumentQueries, DocumentTextFilter, SearchQueryQueries};
use crate::{RagError, Result};

pub const DEFAULT_SEARCH_LIMIT: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub limit: usize,
    pub mode: SearchMode,
    pub filter: SearchFilter,
}

impl SearchRequest {
    #[inline]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            limit: DEFAULT_SEARCH_LIMIT,
            mode: SearchMode::default(),
            filter: SearchFilter::default(),
        }
    }

    #[inline]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    #[inline]
    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    #[inline]
    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.filter = filter;
        self
    }

    #[inline]
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(RagError::Validation(
                "Search query must not be empty".to_string(),
            ));
        }
        if !(1..=MAX_SEARCH_LIMIT).contains(&self.limit) {
            return Err(RagError::Validation(format!(
                "Search limit must be between 1 and {}, got {}",
                MAX_SEARCH_LIMIT, self.limit
            )));
        }
        Ok(())
    }
}

/// Combines a substring scan over stored document text with a nearest
/// neighbour scan over chunk vectors.
///
/// Lexical hits score a flat 0.8 and are added first. Semantic hits are only
/// added for documents the lexical pass did not already return, so a
/// document's score never changes once it is in the result set. A failing
/// embedding gateway or vector index reduces the result to lexical hits.
#[derive(Clone)]
pub struct HybridRetriever {
    database: Database,
    embeddings: Arc<dyn EmbeddingGateway>,
    index: Arc<dyn VectorIndex>,
    snippet_length: usize,
}

impl HybridRetriever {
    #[inline]
    pub fn new(
        database: Database,
        embeddings: Arc<dyn EmbeddingGateway>,
        index: Arc<dyn VectorIndex>,
    ) -> Self {
        Self {
            database,
            embeddings,
            index,
            snippet_length: DEFAULT_SNIPPET_LENGTH,
        }
    }

    /// Window length used for lexical snippets
    #[inline]
    pub fn with_snippet_length(mut self, snippet_length: usize) -> Self {
        self.snippet_length = snippet_length;
        self
    }

    /// Search the owner's documents, best matches first
    #[inline]
    pub async fn search(&self, owner_id: i64, request: &SearchRequest) -> Result<Vec<RetrievalMatch>> {
        request.validate()?;
        info!(
            "Searching for '{}' ({} mode, limit {})",
            request.query, request.mode, request.limit
        );

        let query_log = match SearchQueryQueries::create(self.database.pool(), owner_id, &request.query).await {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Failed to log search query: {:#}", e);
                None
            }
        };

        let mut matches = Vec::new();

        if request.mode.includes_lexical() {
            matches = self.lexical_pass(owner_id, request).await?;
            debug!("Lexical pass returned {} documents", matches.len());
        }

        if request.mode.includes_semantic() {
            match self.semantic_pass(owner_id, request).await {
                Ok(semantic) => {
                    debug!("Semantic pass returned {} chunks", semantic.len());
                    merge_matches(&mut matches, semantic);
                }
                Err(e) => warn!("Semantic search unavailable, using lexical results only: {}", e),
            }
        }

        let results_count = matches.len();
        if let Some(record) = &query_log {
            if let Err(e) =
                SearchQueryQueries::set_results_count(self.database.pool(), record.id, results_count as i64).await
            {
                warn!("Failed to update search results count: {:#}", e);
            }
        }
        self.database
            .record_activity(
                owner_id,
                ActivityAction::Search,
                query_log.map(|record| record.id.to_string()),
                json!({
                    "query": request.query,
                    "search_type": request.mode.as_str(),
                    "results_count": results_count,
                }),
            )
            .await;

        rank_and_truncate(&mut matches, request.limit);
        Ok(matches)
    }

    async fn lexical_pass(&self, owner_id: i64, request: &SearchRequest) -> Result<Vec<RetrievalMatch>> {
        let filter = DocumentTextFilter {
            mime_types: request.filter.mime_types(),
            created_from: request.filter.created_from,
            created_to: request.filter.created_to,
        };
        let documents = DocumentQueries::search_text(
            self.database.pool(),
            owner_id,
            &request.query,
            &filter,
            request.limit as i64,
        )
        .await?;

        Ok(documents
            .into_iter()
            .map(|document| RetrievalMatch {
                document_id: document.id,
                snippet: extract_snippet(document.text(), &request.query, self.snippet_length),
                filename: document.original_filename,
                relevance_score: LEXICAL_SCORE,
            })
            .collect())
    }

    /// Embed the query, fetch the nearest chunks and resolve them to
    /// documents. Network calls finish before the read transaction opens;
    /// the transaction is rolled back if resolution fails.
    async fn semantic_pass(
        &self,
        owner_id: i64,
        request: &SearchRequest,
    ) -> std::result::Result<Vec<RetrievalMatch>, CollaboratorError> {
        let query_vector = self.embeddings.embed(&request.query).await?;
        let hits = self
            .index
            .query(&query_vector, request.limit, VectorFilter::owner(owner_id))
            .await?;

        let mut tx = self
            .database
            .pool()
            .begin()
            .await
            .map_err(|e| CollaboratorError::Store(e.to_string()))?;

        let mut resolved = Vec::with_capacity(hits.len());
        for hit in &hits {
            let chunk = match resolve_hit(&mut *tx, hit, owner_id).await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => continue,
                Err(e) => {
                    if let Err(rollback_error) = tx.rollback().await {
                        warn!("Failed to roll back search transaction: {}", rollback_error);
                    }
                    return Err(e);
                }
            };

            if !request.filter.matches(&chunk.document) {
                continue;
            }

            resolved.push(RetrievalMatch {
                document_id: chunk.document.id,
                filename: chunk.document.original_filename,
                snippet: truncate_snippet(&chunk.chunk_content, DEFAULT_SNIPPET_LENGTH),
                relevance_score: hit.score,
            });
        }

        tx.commit()
            .await
            .map_err(|e| CollaboratorError::Store(e.to_string()))?;
        Ok(resolved)
    }
}

/// Append `incoming` to `accumulated`, keeping only the first match seen for
/// each document
#[inline]
pub fn merge_matches(accumulated: &mut Vec<RetrievalMatch>, incoming: Vec<RetrievalMatch>) {
    let merged = std::mem::take(accumulated)
        .into_iter()
        .chain(incoming)
        .unique_by(|candidate| candidate.document_id)
        .collect();
    *accumulated = merged;
}
