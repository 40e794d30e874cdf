//! Process-local vector store keyed by collection name.

use crate::embeddings::cosine_similarity;
use crate::error::StoreError;
use crate::store::{MetadataFilter, StoreHit, StoredChunk};
use crate::traits::VectorStore;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Items keep insertion order so equal distances come back deterministically.
#[derive(Debug, Default)]
pub struct InMemoryVectorStore {
    collections: RwLock<HashMap<String, Vec<StoredChunk>>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, collection: &str) -> Option<usize> {
        self.collections.read().await.get(collection).map(Vec::len)
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn create_collection(&self, collection: &str, _dimensions: usize) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        collections.entry(collection.to_string()).or_default();
        Ok(())
    }

    async fn upsert(&self, collection: &str, items: &[StoredChunk]) -> Result<(), StoreError> {
        let mut collections = self.collections.write().await;
        let stored = collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::MissingCollection(collection.to_string()))?;

        for item in items {
            match stored
                .iter_mut()
                .find(|existing| existing.chunk.chunk_id == item.chunk.chunk_id)
            {
                Some(existing) => *existing = item.clone(),
                None => stored.push(item.clone()),
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<StoreHit>, StoreError> {
        let collections = self.collections.read().await;
        let stored = collections
            .get(collection)
            .ok_or_else(|| StoreError::MissingCollection(collection.to_string()))?;

        let mut hits: Vec<StoreHit> = stored
            .iter()
            .map(|item| StoreHit {
                chunk: item.chunk.clone(),
                distance: 1.0 - cosine_similarity(&item.embedding, query_vector),
            })
            .collect();

        hits.sort_by(|left, right| left.distance.total_cmp(&right.distance));
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete_collection(&self, collection: &str) -> Result<(), StoreError> {
        self.collections.write().await.remove(collection);
        Ok(())
    }

    async fn delete_where(&self, collection: &str, filter: &MetadataFilter) -> Result<usize, StoreError> {
        let mut collections = self.collections.write().await;
        let Some(stored) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let before = stored.len();
        stored.retain(|item| !filter.matches(&item.chunk));
        Ok(before - stored.len())
    }
}
