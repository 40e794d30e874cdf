use crate::error::StoreError;
use crate::store::{MetadataFilter, StoreHit, StoredChunk};
use async_trait::async_trait;

/// Nearest-neighbour store partitioned into named collections.
///
/// A collection that does not exist is reported as
/// [`StoreError::MissingCollection`] by `query`; callers treat that as an
/// empty, never-ingested state.
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn create_collection(&self, collection: &str, dimensions: usize) -> Result<(), StoreError>;

    async fn upsert(&self, collection: &str, items: &[StoredChunk]) -> Result<(), StoreError>;

    /// Returns up to `k` hits ordered by ascending cosine distance.
    async fn query(
        &self,
        collection: &str,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<StoreHit>, StoreError>;

    /// Deleting a collection that does not exist is not an error.
    async fn delete_collection(&self, collection: &str) -> Result<(), StoreError>;

    /// Removes every item matching `filter` and returns how many were removed.
    async fn delete_where(&self, collection: &str, filter: &MetadataFilter) -> Result<usize, StoreError>;
}
