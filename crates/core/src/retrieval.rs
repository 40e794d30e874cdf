use crate::deadline::within;
use crate::embeddings::Embedder;
use crate::error::{EmbeddingError, StoreError};
use crate::models::ScoredChunk;
use crate::store::collection_for;
use crate::traits::VectorStore;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum RetrievalError {
    /// The owner's collection does not exist (never ingested, or mid re-index).
    #[error("no documents have been ingested for this owner")]
    NotIngested,

    #[error("embedding the query failed: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("vector store query failed: {0}")]
    Store(StoreError),
}

impl From<StoreError> for RetrievalError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::MissingCollection(_) => RetrievalError::NotIngested,
            other => RetrievalError::Store(other),
        }
    }
}

/// Over-fetches nearest neighbours from the owner's collection and keeps the
/// ones above the similarity floor, nearest first.
pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    k: usize,
    similarity_floor: f64,
    timeout: Duration,
}

impl Retriever {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn VectorStore>,
        k: usize,
        similarity_floor: f64,
        timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            store,
            k,
            similarity_floor,
            timeout,
        }
    }

    /// An empty `Ok` means the collection exists but nothing cleared the floor.
    pub async fn retrieve(&self, owner: &str, query: &str) -> Result<Vec<ScoredChunk>, RetrievalError> {
        let collection = collection_for(owner);

        let query_vector = within(self.timeout, self.embedder.embed(query), EmbeddingError::Timeout).await?;
        let hits = within(
            self.timeout,
            self.store.query(&collection, &query_vector, self.k),
            StoreError::Timeout,
        )
        .await?;

        let fetched = hits.len();
        let candidates: Vec<ScoredChunk> = hits
            .into_iter()
            .filter_map(|hit| {
                let similarity = hit.similarity();
                debug!(
                    chunk_id = %hit.chunk.chunk_id,
                    filename = %hit.chunk.source_filename,
                    page = ?hit.chunk.page_number,
                    similarity,
                    "retrieved candidate"
                );
                (similarity > self.similarity_floor).then(|| ScoredChunk::retrieved(hit.chunk, similarity))
            })
            .collect();

        if candidates.is_empty() {
            warn!(owner, collection = %collection, fetched, "no candidate cleared the similarity floor");
        } else {
            info!(owner, fetched, kept = candidates.len(), "retrieved candidates");
        }

        Ok(candidates)
    }
}
