//! Document lifecycle: upload, chunk and embed, list, fetch and delete.
//!
//! Chunk rows are written in a single transaction once every embedding
//! request has finished, and only then pushed to the vector index, so no
//! transaction is open across a network call. A chunk whose embedding
//! failed is stored with a NULL embedding and left out of the index.


use chrono::Utc;
use futures::{StreamExt, stream};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::database::sqlite::Database;
use crate::database::sqlite::models::{ActivityAction, Document, NewDocument, NewDocumentChunk};
use crate::database::sqlite::queries::{ChunkQueries, DocumentQueries};
use crate::embeddings::chunking::TextChunker;
use crate::extraction::{self, ExtractionError, FileKind};
use crate::retrieval::{EmbeddingGateway, VectorIndex, VectorMetadata};
use crate::{RagError, Result};

pub const MAX_LIST_LIMIT: i64 = 100;
pub const DEFAULT_LIST_LIMIT: i64 = 100;

/// Outcome of storing and indexing one uploaded file
#[derive(Debug, Clone)]
pub struct IngestReport {
    pub document: Document,
    pub chunks: usize,
}

#[derive(Clone)]
pub struct DocumentIngestor {
    database: Database,
    embeddings: Arc<dyn EmbeddingGateway>,
    index: Arc<dyn VectorIndex>,
    chunker: TextChunker,
    uploads_dir: PathBuf,
    max_file_size: u64,
    concurrency: usize,
}

impl DocumentIngestor {
    #[inline]
    pub fn new(
        database: Database,
        embeddings: Arc<dyn EmbeddingGateway>,
        index: Arc<dyn VectorIndex>,
        config: &Config,
    ) -> Result<Self> {
        let chunker = TextChunker::from_config(&config.chunking)
            .map_err(|e| RagError::Validation(e.to_string()))?;

        Ok(Self {
            database,
            embeddings,
            index,
            chunker,
            uploads_dir: config.uploads_dir(),
            max_file_size: config.uploads.max_file_size,
            concurrency: (config.ollama.batch_size as usize).max(1),
        })
    }

    /// Validate, store, extract and index a file from disk
    #[inline]
    pub async fn ingest_file(&self, path: &Path, owner_id: i64) -> Result<IngestReport> {
        let original_filename = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                RagError::Validation(format!("Invalid file name: {}", path.display()))
            })?
            .to_string();

        let file_size = tokio::fs::metadata(path).await?.len();
        let kind = extraction::validate_upload(&original_filename, file_size, self.max_file_size)
            .map_err(|e| RagError::Validation(e.to_string()))?;

        tokio::fs::create_dir_all(&self.uploads_dir).await?;
        let extension = extraction::dotted_extension(&original_filename).unwrap_or_default();
        let stored_name = format!("{}{}", Uuid::new_v4(), extension);
        let stored_path = self.uploads_dir.join(&stored_name);
        tokio::fs::copy(path, &stored_path).await?;
        debug!("Stored {} as {}", original_filename, stored_path.display());

        let text = match extract_in_background(stored_path.clone(), kind).await {
            Ok(text) => text,
            Err(e) => {
                remove_stored_file(&stored_path).await;
                return Err(e);
            }
        };

        let metadata = json!({
            "original_name": original_filename,
            "upload_time": Utc::now().to_rfc3339(),
        });

        let created = DocumentQueries::create(
            self.database.pool(),
            NewDocument {
                owner_id,
                filename: stored_name,
                original_filename: original_filename.clone(),
                content: Some(text.clone()),
                file_path: stored_path.display().to_string(),
                file_size: i64::try_from(file_size).unwrap_or(i64::MAX),
                file_type: Some(kind.mime_type().to_string()),
                doc_metadata: Some(metadata.to_string()),
            },
        )
        .await;
        let document = match created {
            Ok(document) => document,
            Err(e) => {
                remove_stored_file(&stored_path).await;
                return Err(e.into());
            }
        };

        let chunks = match self.ingest(document.id, owner_id, &text).await {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(
                    "Indexing {} failed, removing the upload: {}",
                    original_filename, e
                );
                if let Err(cleanup) = DocumentQueries::delete(self.database.pool(), document.id).await {
                    warn!("Failed to remove document {}: {:#}", document.id, cleanup);
                }
                remove_stored_file(&stored_path).await;
                return Err(e);
            }
        };

        self.database
            .record_activity(
                owner_id,
                ActivityAction::Upload,
                Some(document.id.to_string()),
                json!({"filename": original_filename, "file_size": file_size}),
            )
            .await;

        info!(
            "Ingested {} as document {} with {} chunks",
            original_filename, document.id, chunks
        );
        Ok(IngestReport { document, chunks })
    }

    /// Chunk `text`, embed every chunk, persist the chunks and index the
    /// embedded ones. Returns the number of chunks stored.
    #[inline]
    pub async fn ingest(&self, document_id: i64, owner_id: i64, text: &str) -> Result<usize> {
        let chunks = self.chunker.chunk(text);
        if chunks.is_empty() {
            debug!("Document {} has no text to index", document_id);
            return Ok(0);
        }

        let embeddings: Vec<Option<Vec<f32>>> = stream::iter(chunks.iter())
            .map(|chunk| async move {
                match self.embeddings.embed(chunk).await {
                    Ok(vector) => Some(vector),
                    Err(e) => {
                        warn!("Embedding a chunk of document {} failed: {}", document_id, e);
                        None
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut tx = self
            .database
            .pool()
            .begin()
            .await
            .map_err(|e| RagError::Database(format!("Failed to begin transaction: {}", e)))?;

        let total = chunks.len();
        let mut to_index = Vec::new();
        for (position, (content, embedding)) in chunks.into_iter().zip(embeddings).enumerate() {
            let position = position as i64;
            let serialized = embedding
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| RagError::Embedding(format!("Failed to serialize embedding: {}", e)))?;

            let chunk = ChunkQueries::insert(
                &mut tx,
                &NewDocumentChunk {
                    document_id,
                    content,
                    embedding: serialized,
                    position,
                },
            )
            .await?;

            if let Some(vector) = embedding {
                to_index.push((chunk.id, vector, position));
            }
        }
        tx.commit()
            .await
            .map_err(|e| RagError::Database(format!("Failed to commit chunks: {}", e)))?;

        for (chunk_id, vector, position) in &to_index {
            let metadata = VectorMetadata {
                document_id: Some(document_id),
                owner_id: Some(owner_id),
                position: Some(*position),
            };
            if let Err(e) = self
                .index
                .upsert(&chunk_id.to_string(), vector, metadata)
                .await
            {
                warn!("Failed to index chunk {}: {}", chunk_id, e);
            }
        }

        debug!(
            "Document {}: {} chunks stored, {} embedded",
            document_id,
            total,
            to_index.len()
        );
        Ok(total)
    }

    /// Newest first; `limit` in 1..=100
    #[inline]
    pub async fn list_documents(
        &self,
        owner_id: i64,
        skip: i64,
        limit: i64,
        filename_contains: Option<&str>,
    ) -> Result<Vec<Document>> {
        if !(1..=MAX_LIST_LIMIT).contains(&limit) {
            return Err(RagError::Validation(format!(
                "Limit must be between 1 and {}, got {}",
                MAX_LIST_LIMIT, limit
            )));
        }
        if skip < 0 {
            return Err(RagError::Validation(format!(
                "Skip must not be negative, got {}",
                skip
            )));
        }

        let filename_contains = filename_contains.filter(|name| !name.is_empty());
        Ok(DocumentQueries::list_by_owner(
            self.database.pool(),
            owner_id,
            filename_contains,
            skip,
            limit,
        )
        .await?)
    }

    #[inline]
    pub async fn get_document(&self, document_id: i64, owner_id: i64) -> Result<Document> {
        self.database
            .get_owned_document(document_id, owner_id)
            .await?
            .ok_or_else(|| RagError::NotFound(format!("Document {}", document_id)))
    }

    /// Remove the stored file, the vector entries and the row (chunks cascade)
    #[inline]
    pub async fn delete_document(&self, document_id: i64, owner_id: i64) -> Result<()> {
        let document = self.get_document(document_id, owner_id).await?;

        remove_stored_file(Path::new(&document.file_path)).await;

        let chunk_ids: Vec<String> = ChunkQueries::ids_for_document(self.database.pool(), document_id)
            .await?
            .into_iter()
            .map(|id| id.to_string())
            .collect();
        if !chunk_ids.is_empty() {
            if let Err(e) = self.index.delete(&chunk_ids).await {
                warn!(
                    "Failed to remove {} vectors of document {}: {}",
                    chunk_ids.len(),
                    document_id,
                    e
                );
            }
        }

        DocumentQueries::delete(self.database.pool(), document_id).await?;

        self.database
            .record_activity(
                owner_id,
                ActivityAction::Delete,
                Some(document_id.to_string()),
                json!({"filename": document.original_filename}),
            )
            .await;

        info!("Deleted document {} ({})", document_id, document.original_filename);
        Ok(())
    }

    /// Push every embedding kept in the metadata database back into the
    /// vector index, for rebuilding a recreated index without re-embedding.
    /// Returns the number of vectors written.
    #[inline]
    pub async fn reindex_stored_embeddings(&self) -> Result<usize> {
        let stored = ChunkQueries::list_stored_embeddings(self.database.pool()).await?;
        info!("Reindexing {} stored embeddings", stored.len());

        let mut written = 0;
        for entry in &stored {
            let Some(vector) = entry.vector() else {
                warn!("Chunk {} has a malformed stored embedding, skipping", entry.chunk_id);
                continue;
            };
            let metadata = VectorMetadata {
                document_id: Some(entry.document_id),
                owner_id: Some(entry.owner_id),
                position: Some(entry.position),
            };
            self.index
                .upsert(&entry.chunk_id.to_string(), &vector, metadata)
                .await
                .map_err(|e| {
                    RagError::Database(format!("Failed to reindex chunk {}: {}", entry.chunk_id, e))
                })?;
            written += 1;
        }

        Ok(written)
    }
}

async fn extract_in_background(path: PathBuf, kind: FileKind) -> Result<String> {
    tokio::task::spawn_blocking(move || extraction::extract_text(&path, kind))
        .await
        .map_err(|e| RagError::Other(anyhow::anyhow!("Extraction task failed: {}", e)))?
        .map_err(|e: ExtractionError| RagError::Validation(e.to_string()))
}

async fn remove_stored_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed stored file {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove stored file {}: {}", path.display(), e),
    }
}
