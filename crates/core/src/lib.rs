pub mod cache;
pub mod chunking;
pub mod composer;
pub mod config;
pub mod deadline;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod rerank;
pub mod retrieval;
pub mod services;
pub mod store;
pub mod stores;
pub mod traits;

pub use cache::{response_key, ResponseCache};
pub use chunking::{build_chunks, normalize_whitespace, split_text, ChunkingConfig};
pub use composer::{split_reasoning, Composer};
pub use config::{ModelConfig, PipelineConfig, PipelineConfigBuilder};
pub use embeddings::{
    check_dimensions, cosine_similarity, CharacterNgramEmbedder, Embedder, OllamaEmbedder,
    DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{ConfigError, EmbeddingError, IngestError, LlmError, RequestError, StoreError};
pub use extractor::{extract_page_texts, LopdfExtractor, PageText, TextExtractor};
pub use ingest::{discover_pdf_files, generate_document_id, IngestFailure, IngestionReport, Ingestor};
pub use llm::{ChatModel, OllamaChatModel};
pub use models::{
    AnswerOutcome, AnswerRequest, AnswerResponse, ChatMessage, Chunk, DocumentFingerprint,
    QuerySession, RerankWeights, Role, ScoredChunk, Source,
};
pub use orchestrator::RagPipeline;
pub use rerank::{deduplicate, rerank, Reranker};
pub use retrieval::{RetrievalError, Retriever};
pub use services::RagServices;
pub use store::{collection_for, distance_to_similarity, MetadataFilter, StoreHit, StoredChunk};
pub use stores::{InMemoryVectorStore, QdrantStore};
pub use traits::VectorStore;
