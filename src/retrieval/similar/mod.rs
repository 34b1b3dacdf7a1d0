
use itertools::Itertools;
use std::sync::Arc;
use tracing::{debug, warn};

use super::snippet::{DEFAULT_SNIPPET_LENGTH, truncate_snippet};
use super::{
    CollaboratorError, MAX_SIMILAR_LIMIT, RetrievalMatch, VectorFilter, VectorIndex,
    rank_and_truncate, resolve_hit,
};
use crate::database::sqlite::Database;
use crate::database::sqlite::queries::ChunkQueries;
use crate::{RagError, Result};

pub const DEFAULT_SIMILAR_LIMIT: usize = 5;

/// Chunks of the source document used as probes
const SOURCE_CHUNKS: i64 = 3;

/// Finds documents whose chunks sit close to the first chunks of a source
/// document in the vector index. The source document never appears in its
/// own result.
#[derive(Clone)]
pub struct SimilarityExpander {
    database: Database,
    index: Arc<dyn VectorIndex>,
}

impl SimilarityExpander {
    #[inline]
    pub fn new(database: Database, index: Arc<dyn VectorIndex>) -> Self {
        Self { database, index }
    }

    #[inline]
    pub async fn find_similar(
        &self,
        document_id: i64,
        limit: usize,
        owner_id: i64,
    ) -> Result<Vec<RetrievalMatch>> {
        if !(1..=MAX_SIMILAR_LIMIT).contains(&limit) {
            return Err(RagError::Validation(format!(
                "Similar document limit must be between 1 and {}, got {}",
                MAX_SIMILAR_LIMIT, limit
            )));
        }

        if self
            .database
            .get_owned_document(document_id, owner_id)
            .await?
            .is_none()
        {
            return Err(RagError::NotFound(format!("Document {}", document_id)));
        }

        let probes = ChunkQueries::first_embedded(self.database.pool(), document_id, SOURCE_CHUNKS).await?;
        debug!(
            "Finding documents similar to {} using {} chunks",
            document_id,
            probes.len()
        );

        let mut candidates = Vec::new();
        for probe in &probes {
            let Some(vector) = probe.embedding_vector() else {
                debug!("Chunk {} has an unreadable embedding", probe.id);
                continue;
            };

            match self.neighbours(document_id, owner_id, &vector, limit * 2).await {
                Ok(found) => candidates.extend(found),
                Err(e) => warn!("Similarity lookup for chunk {} failed: {}", probe.id, e),
            }
        }

        let mut matches: Vec<RetrievalMatch> = candidates
            .into_iter()
            .unique_by(|candidate| candidate.document_id)
            .collect();
        rank_and_truncate(&mut matches, limit);
        Ok(matches)
    }

    async fn neighbours(
        &self,
        source_document_id: i64,
        owner_id: i64,
        vector: &[f32],
        top_k: usize,
    ) -> std::result::Result<Vec<RetrievalMatch>, CollaboratorError> {
        let hits = self
            .index
            .query(vector, top_k, VectorFilter::owner(owner_id))
            .await?;

        let mut found = Vec::with_capacity(hits.len());
        for hit in &hits {
            let Some(chunk) = resolve_hit(self.database.pool(), hit, owner_id).await? else {
                continue;
            };
            if chunk.document.id == source_document_id {
                continue;
            }
            found.push(RetrievalMatch {
                document_id: chunk.document.id,
                filename: chunk.document.original_filename,
                snippet: truncate_snippet(&chunk.chunk_content, DEFAULT_SNIPPET_LENGTH),
                relevance_score: hit.score,
            });
        }
        Ok(found)
    }
}
