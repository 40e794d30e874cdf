use crate::models::Chunk;

const COLLECTION_PREFIX: &str = "rag_docs_";

/// One owner's partition of the vector store.
pub fn collection_for(owner: &str) -> String {
    format!("{COLLECTION_PREFIX}{owner}")
}

/// Stores report cosine distance; everything downstream works in similarity.
pub fn distance_to_similarity(distance: f64) -> f64 {
    1.0 - distance
}

#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct StoreHit {
    pub chunk: Chunk,
    pub distance: f64,
}

impl StoreHit {
    pub fn similarity(&self) -> f64 {
        distance_to_similarity(self.distance)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataFilter {
    SourceDocumentId(String),
}

impl MetadataFilter {
    pub fn field(&self) -> &'static str {
        match self {
            MetadataFilter::SourceDocumentId(_) => "source_document_id",
        }
    }

    pub fn value(&self) -> &str {
        match self {
            MetadataFilter::SourceDocumentId(value) => value,
        }
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        match self {
            MetadataFilter::SourceDocumentId(id) => chunk.source_document_id == *id,
        }
    }
}
