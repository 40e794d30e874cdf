use crate::config::ModelConfig;
use crate::embeddings::{Embedder, OllamaEmbedder};
use crate::extractor::{LopdfExtractor, TextExtractor};
use crate::llm::{ChatModel, OllamaChatModel};
use crate::traits::VectorStore;
use std::sync::Arc;

/// Handles to the remote collaborators, constructed once and shared by the
/// ingestor and the answer pipeline.
#[derive(Clone)]
pub struct RagServices {
    pub extractor: Arc<dyn TextExtractor>,
    pub embedder: Arc<dyn Embedder>,
    pub chat: Arc<dyn ChatModel>,
    pub store: Arc<dyn VectorStore>,
}

impl RagServices {
    /// Ollama for both models, `lopdf` for text, and the given store.
    pub fn ollama(models: &ModelConfig, embedding_dimensions: usize, store: Arc<dyn VectorStore>) -> Self {
        Self {
            extractor: Arc::new(LopdfExtractor),
            embedder: Arc::new(OllamaEmbedder::new(
                &models.base_url,
                &models.embedding_model,
                embedding_dimensions,
            )),
            chat: Arc::new(OllamaChatModel::new(&models.base_url, &models.llm_model)),
            store,
        }
    }
}
