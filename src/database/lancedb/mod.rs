// LanceDB vector database module
// Stores chunk embeddings and answers nearest-neighbour queries for retrieval

#[cfg(test)]
mod tests;

pub mod vector_store;

use serde::{Deserialize, Serialize};

use crate::retrieval::VectorMetadata;

pub use vector_store::VectorStore;

/// Embedding record stored in LanceDB
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    /// Chunk id in the metadata database, as a string
    pub id: String,
    pub vector: Vec<f32>,
    pub metadata: VectorMetadata,
}

impl EmbeddingRecord {
    #[inline]
    pub fn new(id: impl Into<String>, vector: Vec<f32>, metadata: VectorMetadata) -> Self {
        Self {
            id: id.into(),
            vector,
            metadata,
        }
    }
}

/// Quote a string literal for a LanceDB filter expression
pub(crate) fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
