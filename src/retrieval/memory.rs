use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::{CollaboratorError, VectorFilter, VectorIndex, VectorMatch, VectorMetadata};

/// Brute-force cosine index held in memory. Used by tests and when no
/// on-disk vector store is wanted.
#[derive(Debug, Default)]
pub struct InMemoryVectorIndex {
    entries: RwLock<BTreeMap<String, (Vec<f32>, VectorMetadata)>>,
}

impl InMemoryVectorIndex {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    #[inline]
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    #[inline]
    pub async fn contains(&self, id: &str) -> bool {
        self.entries.read().await.contains_key(id)
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(
        &self,
        id: &str,
        vector: &[f32],
        metadata: VectorMetadata,
    ) -> Result<(), CollaboratorError> {
        if vector.is_empty() {
            return Err(CollaboratorError::VectorIndex(
                "Cannot store an empty vector".to_string(),
            ));
        }
        self.entries
            .write()
            .await
            .insert(id.to_string(), (vector.to_vec(), metadata));
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: VectorFilter,
    ) -> Result<Vec<VectorMatch>, CollaboratorError> {
        let entries = self.entries.read().await;
        let mut matches: Vec<VectorMatch> = entries
            .iter()
            .filter(|(_, (stored, metadata))| {
                metadata.owner_id == Some(filter.owner_id) && stored.len() == vector.len()
            })
            .map(|(id, (stored, metadata))| VectorMatch {
                id: id.clone(),
                score: cosine_similarity(vector, stored),
                metadata: *metadata,
            })
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, ids: &[String]) -> Result<(), CollaboratorError> {
        let mut entries = self.entries.write().await;
        for id in ids {
            entries.remove(id);
        }
        Ok(())
    }
}

/// Cosine similarity, 0.0 when either vector has zero length
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
