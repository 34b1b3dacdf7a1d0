
use super::{EmbeddingRecord, quote_literal};
use crate::config::Config;
use crate::retrieval::{CollaboratorError, VectorFilter, VectorIndex, VectorMatch, VectorMetadata};
use crate::{RagError, Result};
use arrow::array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatchIterator, StringArray,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase},
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

const TABLE_NAME: &str = "embeddings";

/// LanceDB needs this many rows before it can train an ANN index
pub const MIN_ROWS_FOR_VECTOR_INDEX: u64 = 256;

/// Vector database store using LanceDB for cosine similarity search.
///
/// Rows are keyed by chunk id. Writes go through a lock that also guards the
/// current vector dimension, so an upsert (delete then add) is never
/// interleaved with another write.
pub struct VectorStore {
    connection: Connection,
    table_name: String,
    vector_dimension: Mutex<usize>,
}

impl VectorStore {
    /// Open or create the vector database under the configured data
    /// directory
    #[inline]
    pub async fn new(config: &Config) -> Result<Self> {
        let db_path = config.vector_database_path();
        Self::open(&db_path, config.ollama.embedding_dimension as usize).await
    }

    /// Open or create the vector database at `db_path`. A new table is
    /// created with `default_dimension`; an existing table keeps its own.
    /// An existing table that cannot be read is an error, never dropped.
    #[inline]
    pub async fn open(db_path: &Path, default_dimension: usize) -> Result<Self> {
        let store = Self::connect(db_path, default_dimension).await?;
        store.initialize_table().await?;

        info!("Vector store initialized successfully");
        Ok(store)
    }

    /// Open the vector database at `db_path` with an empty embeddings table,
    /// dropping whatever table was there. Callers own putting the vectors
    /// back; see `DocumentIngestor::reindex_stored_embeddings`.
    #[inline]
    pub async fn recreate(db_path: &Path, default_dimension: usize) -> Result<Self> {
        let store = Self::connect(db_path, default_dimension).await?;
        warn!("Recreating embeddings table at {}", db_path.display());

        store.drop_table_if_exists().await?;
        store.initialize_table().await.map_err(|e| {
            RagError::Database(format!("Failed to recreate embeddings table: {}", e))
        })?;

        info!("Embeddings table recreated with {} dimensions", default_dimension);
        Ok(store)
    }

    async fn connect(db_path: &Path, default_dimension: usize) -> Result<Self> {
        debug!("Initializing LanceDB at path: {}", db_path.display());

        std::fs::create_dir_all(db_path).map_err(|e| {
            RagError::Database(format!("Failed to create vector database directory: {}", e))
        })?;

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri).execute().await.map_err(|e| {
            error!("Failed to connect to LanceDB: {}", e);
            RagError::Database(format!("Failed to connect to LanceDB: {}", e))
        })?;

        Ok(Self {
            connection,
            table_name: TABLE_NAME.to_string(),
            vector_dimension: Mutex::new(default_dimension),
        })
    }

    /// Current vector dimension of the embeddings table
    #[inline]
    pub async fn vector_dimension(&self) -> usize {
        *self.vector_dimension.lock().await
    }

    async fn initialize_table(&self) -> Result<()> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to list tables: {}", e)))?;

        let mut dimension = self.vector_dimension.lock().await;

        if table_names.contains(&self.table_name) {
            debug!("Embeddings table already exists, detecting vector dimension");
            let detected = self.detect_existing_vector_dimension().await?;
            if detected != *dimension {
                info!(
                    "Existing table uses {} dimensions instead of {}",
                    detected, *dimension
                );
            }
            *dimension = detected;
            return Ok(());
        }

        self.connection
            .create_empty_table(&self.table_name, create_schema(*dimension))
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to create table: {}", e)))?;

        info!(
            "Embeddings table created successfully with {} dimensions",
            *dimension
        );
        Ok(())
    }

    async fn detect_existing_vector_dimension(&self) -> Result<usize> {
        let table = self.open_table().await?;

        let schema = table
            .schema()
            .await
            .map_err(|e| RagError::Database(format!("Failed to get table schema: {}", e)))?;

        schema
            .fields()
            .iter()
            .find(|field| field.name() == "vector")
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
                _ => None,
            })
            .ok_or_else(|| {
                RagError::Database("Could not find vector column or determine dimension".to_string())
            })
    }

    async fn open_table(&self) -> Result<Table> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to open table: {}", e)))
    }

    /// Insert or replace embeddings keyed by record id
    #[inline]
    pub async fn store_embeddings_batch(&self, records: &[EmbeddingRecord]) -> Result<()> {
        let Some(first) = records.first() else {
            debug!("No embeddings to store");
            return Ok(());
        };

        let vector_dim = first.vector.len();
        if vector_dim == 0 {
            return Err(RagError::Validation("Embedding vector is empty".to_string()));
        }
        if let Some(bad) = records.iter().find(|r| r.vector.len() != vector_dim) {
            return Err(RagError::Validation(format!(
                "Embedding {} has {} dimensions, expected {}",
                bad.id,
                bad.vector.len(),
                vector_dim
            )));
        }

        let mut dimension = self.vector_dimension.lock().await;

        if *dimension != vector_dim {
            let existing = self.count_embeddings().await?;
            if existing > 0 {
                return Err(RagError::Database(format!(
                    "Vector dimension mismatch: table holds {} embeddings of {} dimensions, got {}",
                    existing, *dimension, vector_dim
                )));
            }
            info!(
                "Vector dimension changed from {} to {} on an empty table, recreating",
                *dimension, vector_dim
            );
            self.recreate_table_with_dimension(vector_dim).await?;
            *dimension = vector_dim;
        }

        let table = self.open_table().await?;

        let ids: Vec<String> = records.iter().map(|r| r.id.clone()).collect();
        if let Some(predicate) = id_predicate(&ids) {
            table.delete(&predicate).await.map_err(|e| {
                RagError::Database(format!("Failed to replace existing embeddings: {}", e))
            })?;
        }

        let record_batch = create_record_batch(records, vector_dim)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to insert embeddings: {}", e)))?;

        debug!("Stored {} embeddings", records.len());
        Ok(())
    }

    async fn recreate_table_with_dimension(&self, vector_dim: usize) -> Result<()> {
        self.drop_table_if_exists().await?;

        self.connection
            .create_empty_table(&self.table_name, create_schema(vector_dim))
            .execute()
            .await
            .map_err(|e| {
                RagError::Database(format!("Failed to create table with new dimensions: {}", e))
            })?;

        info!(
            "Table recreated successfully with {} dimensions",
            vector_dim
        );
        Ok(())
    }

    /// Nearest neighbours of `query_vector` by cosine similarity, best first
    #[inline]
    pub async fn search_similar(
        &self,
        query_vector: &[f32],
        limit: usize,
        owner_id: Option<i64>,
    ) -> Result<Vec<VectorMatch>> {
        debug!("Searching for similar vectors with limit: {}", limit);

        if limit == 0 {
            return Ok(Vec::new());
        }

        let dimension = self.vector_dimension().await;
        if query_vector.len() != dimension {
            return Err(RagError::Validation(format!(
                "Query vector has {} dimensions, index uses {}",
                query_vector.len(),
                dimension
            )));
        }

        let table = self.open_table().await?;

        let mut query = table
            .vector_search(query_vector)
            .map_err(|e| RagError::Database(format!("Failed to create vector search: {}", e)))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .limit(limit);

        if let Some(owner_id) = owner_id {
            query = query.only_if(format!("owner_id = {}", owner_id));
        }

        let results = query
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to execute search: {}", e)))?;

        parse_search_results_stream(results).await
    }

    /// Delete embeddings by chunk id
    #[inline]
    pub async fn delete_embeddings(&self, ids: &[String]) -> Result<()> {
        let Some(predicate) = id_predicate(ids) else {
            return Ok(());
        };

        let _guard = self.vector_dimension.lock().await;
        self.open_table()
            .await?
            .delete(&predicate)
            .await
            .map_err(|e| RagError::Database(format!("Failed to delete embeddings: {}", e)))?;

        debug!("Deleted {} embeddings", ids.len());
        Ok(())
    }

    #[inline]
    pub async fn count_embeddings(&self) -> Result<u64> {
        let count = self
            .open_table()
            .await?
            .count_rows(None)
            .await
            .map_err(|e| RagError::Database(format!("Failed to count rows: {}", e)))?;

        Ok(count as u64)
    }

    /// Compact fragments and prune old versions
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        debug!("Optimizing vector database");

        self.open_table()
            .await?
            .optimize(lancedb::table::OptimizeAction::All)
            .await
            .map_err(|e| RagError::Database(format!("Failed to optimize table: {}", e)))?;

        info!("Vector database optimization completed");
        Ok(())
    }

    /// Build an ANN index on the vector column. Needs at least
    /// `MIN_ROWS_FOR_VECTOR_INDEX` rows.
    #[inline]
    pub async fn create_vector_index(&self) -> Result<()> {
        debug!("Creating vector index for improved search performance");

        self.open_table()
            .await?
            .create_index(&["vector"], lancedb::index::Index::Auto)
            .execute()
            .await
            .map_err(|e| RagError::Database(format!("Failed to create vector index: {}", e)))?;

        info!("Vector index created successfully");
        Ok(())
    }

    async fn drop_table_if_exists(&self) -> Result<()> {
        let table_names =
            self.connection.table_names().execute().await.map_err(|e| {
                RagError::Database(format!("Failed to list tables for drop: {}", e))
            })?;

        if table_names.contains(&self.table_name) {
            info!("Dropping existing embeddings table");
            self.connection
                .drop_table(&self.table_name)
                .await
                .map_err(|e| RagError::Database(format!("Failed to drop table: {}", e)))?;
        }

        Ok(())
    }

    /// True when the embeddings table can be listed, opened and counted
    #[inline]
    pub async fn validate_integrity(&self) -> bool {
        let table_names = match self.connection.table_names().execute().await {
            Ok(names) => names,
            Err(e) => {
                error!("Failed to list tables during integrity check: {}", e);
                return false;
            }
        };

        if !table_names.contains(&self.table_name) {
            warn!("Embeddings table missing during integrity check");
            return false;
        }

        match self.count_embeddings().await {
            Ok(count) => {
                debug!("Database integrity check passed, {} rows found", count);
                true
            }
            Err(e) => {
                error!("Integrity check failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl VectorIndex for VectorStore {
    async fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: VectorMetadata,
    ) -> std::result::Result<(), CollaboratorError> {
        self.store_embeddings_batch(&[EmbeddingRecord::new(id, vector.to_vec(), metadata)])
            .await
            .map_err(|e| CollaboratorError::VectorIndex(e.to_string()))
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: VectorFilter,
    ) -> std::result::Result<Vec<VectorMatch>, CollaboratorError> {
        self.search_similar(vector, top_k, Some(filter.owner_id))
            .await
            .map_err(|e| CollaboratorError::VectorIndex(e.to_string()))
    }

    async fn delete(&self, ids: &[String]) -> std::result::Result<(), CollaboratorError> {
        self.delete_embeddings(ids)
            .await
            .map_err(|e| CollaboratorError::VectorIndex(e.to_string()))
    }
}

fn id_predicate(ids: &[String]) -> Option<String> {
    if ids.is_empty() {
        return None;
    }
    let quoted: Vec<String> = ids.iter().map(|id| quote_literal(id)).collect();
    Some(format!("id IN ({})", quoted.join(", ")))
}

fn create_schema(vector_dim: usize) -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new(
            "vector",
            DataType::FixedSizeList(
                Arc::new(Field::new("item", DataType::Float32, true)),
                vector_dim as i32,
            ),
            false,
        ),
        Field::new("document_id", DataType::Int64, true),
        Field::new("owner_id", DataType::Int64, true),
        Field::new("position", DataType::Int64, true),
        Field::new("created_at", DataType::Utf8, false),
    ]))
}

fn create_record_batch(records: &[EmbeddingRecord], vector_dim: usize) -> Result<RecordBatch> {
    let created_at = chrono::Utc::now().to_rfc3339();

    let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
    let document_ids: Vec<Option<i64>> = records.iter().map(|r| r.metadata.document_id).collect();
    let owner_ids: Vec<Option<i64>> = records.iter().map(|r| r.metadata.owner_id).collect();
    let positions: Vec<Option<i64>> = records.iter().map(|r| r.metadata.position).collect();
    let created_ats = vec![created_at.as_str(); records.len()];

    let flat_values: Vec<f32> = records
        .iter()
        .flat_map(|r| r.vector.iter().copied())
        .collect();
    let field = Arc::new(Field::new("item", DataType::Float32, true));
    let vector_array = FixedSizeListArray::try_new(
        field,
        vector_dim as i32,
        Arc::new(Float32Array::from(flat_values)),
        None,
    )
    .map_err(|e| RagError::Database(format!("Failed to create vector array: {}", e)))?;

    let arrays: Vec<Arc<dyn Array>> = vec![
        Arc::new(StringArray::from(ids)),
        Arc::new(vector_array),
        Arc::new(Int64Array::from(document_ids)),
        Arc::new(Int64Array::from(owner_ids)),
        Arc::new(Int64Array::from(positions)),
        Arc::new(StringArray::from(created_ats)),
    ];

    RecordBatch::try_new(create_schema(vector_dim), arrays)
        .map_err(|e| RagError::Database(format!("Failed to create record batch: {}", e)))
}

async fn parse_search_results_stream(
    mut results: lancedb::arrow::SendableRecordBatchStream,
) -> Result<Vec<VectorMatch>> {
    let mut matches = Vec::new();

    while let Some(batch) = results
        .try_next()
        .await
        .map_err(|e| RagError::Database(format!("Failed to read result stream: {}", e)))?
    {
        matches.extend(parse_search_batch(&batch)?);
    }

    debug!("Parsed {} search results from stream", matches.len());
    Ok(matches)
}

fn int64_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Int64Array> {
    batch
        .column_by_name(name)
        .ok_or_else(|| RagError::Database(format!("Missing {} column", name)))?
        .as_any()
        .downcast_ref::<Int64Array>()
        .ok_or_else(|| RagError::Database(format!("Invalid {} column type", name)))
}

fn optional_value(column: &Int64Array, row: usize) -> Option<i64> {
    (!column.is_null(row)).then(|| column.value(row))
}

fn parse_search_batch(batch: &RecordBatch) -> Result<Vec<VectorMatch>> {
    let ids = batch
        .column_by_name("id")
        .ok_or_else(|| RagError::Database("Missing id column".to_string()))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| RagError::Database("Invalid id column type".to_string()))?;
    let document_ids = int64_column(batch, "document_id")?;
    let owner_ids = int64_column(batch, "owner_id")?;
    let positions = int64_column(batch, "position")?;

    let distances = batch
        .column_by_name("_distance")
        .and_then(|col| col.as_any().downcast_ref::<Float32Array>());

    let matches = (0..batch.num_rows())
        .map(|row| {
            let distance =
                distances.map_or(0.0, |d| if d.is_null(row) { 0.0 } else { d.value(row) });

            VectorMatch {
                id: ids.value(row).to_string(),
                // Cosine distance is 1 - cosine similarity
                score: 1.0 - distance,
                metadata: VectorMetadata {
                    document_id: optional_value(document_ids, row),
                    owner_id: optional_value(owner_ids, row),
                    position: optional_value(positions, row),
                },
            }
        })
        .collect();

    Ok(matches)
}
