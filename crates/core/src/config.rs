//! Tunables for ingestion, retrieval, reranking and answering, plus the model
//! identifiers the remote collaborators need.

use crate::error::ConfigError;
use crate::models::RerankWeights;
use std::time::Duration;
use url::Url;

pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Characters carried over from the end of the previous chunk.
    pub chunk_overlap: usize,
    /// Chunks written to the store per upsert call.
    pub ingest_batch_size: usize,
    /// Candidates requested from the store before filtering.
    pub retrieval_k: usize,
    /// Candidates with a lower similarity are dropped before reranking.
    pub similarity_floor: f64,
    /// Pairs above this similarity are near-duplicates.
    pub dedup_threshold: f64,
    /// Chunks handed to the composer.
    pub top_k: usize,
    pub weights: RerankWeights,
    pub cache_capacity: usize,
    /// Upper bound for every embedding, completion and store call.
    pub remote_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 100,
            ingest_batch_size: 50,
            retrieval_k: 15,
            similarity_floor: 0.2,
            dedup_threshold: 0.8,
            top_k: 5,
            weights: RerankWeights::default(),
            cache_capacity: 128,
            remote_timeout: Duration::from_secs(60),
        }
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.config.chunk_size = size;
        self
    }

    pub fn chunk_overlap(mut self, overlap: usize) -> Self {
        self.config.chunk_overlap = overlap;
        self
    }

    pub fn ingest_batch_size(mut self, size: usize) -> Self {
        self.config.ingest_batch_size = size;
        self
    }

    pub fn retrieval_k(mut self, k: usize) -> Self {
        self.config.retrieval_k = k;
        self
    }

    pub fn similarity_floor(mut self, floor: f64) -> Self {
        self.config.similarity_floor = floor;
        self
    }

    pub fn dedup_threshold(mut self, threshold: f64) -> Self {
        self.config.dedup_threshold = threshold;
        self
    }

    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    pub fn weights(mut self, weights: RerankWeights) -> Self {
        self.config.weights = weights;
        self
    }

    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.config.cache_capacity = capacity;
        self
    }

    pub fn remote_timeout(mut self, timeout: Duration) -> Self {
        self.config.remote_timeout = timeout;
        self
    }

    /// Validates the combination of values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the overlap is not smaller than the
    /// chunk size, a count is zero, a threshold leaves `[0, 1]` or a weight is
    /// negative.
    pub fn build(self) -> Result<PipelineConfig, ConfigError> {
        let config = self.config;

        if config.chunk_size == 0 || config.chunk_overlap >= config.chunk_size {
            return Err(ConfigError::Invalid(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                config.chunk_overlap, config.chunk_size
            )));
        }

        for (name, value) in [
            ("ingest_batch_size", config.ingest_batch_size),
            ("retrieval_k", config.retrieval_k),
            ("top_k", config.top_k),
            ("cache_capacity", config.cache_capacity),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
            }
        }

        for (name, value) in [
            ("similarity_floor", config.similarity_floor),
            ("dedup_threshold", config.dedup_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!("{name} must be within [0, 1], got {value}")));
            }
        }

        let weights = config.weights;
        if [weights.semantic, weights.retrieval, weights.length, weights.metadata]
            .iter()
            .any(|weight| *weight < 0.0 || !weight.is_finite())
        {
            return Err(ConfigError::Invalid("rerank weights must be non-negative".to_string()));
        }

        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    pub base_url: String,
    pub llm_model: String,
    pub embedding_model: String,
}

impl ModelConfig {
    pub fn new(
        base_url: impl Into<String>,
        llm_model: impl Into<String>,
        embedding_model: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let base_url = base_url.into();
        Url::parse(&base_url)?;

        let llm_model = required(llm_model.into(), "OLLAMA_LLM_MODEL")?;
        let embedding_model = required(embedding_model.into(), "OLLAMA_EMBEDDING_MODEL")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            llm_model,
            embedding_model,
        })
    }

    /// Reads `OLLAMA_BASE_URL`, `OLLAMA_LLM_MODEL` and `OLLAMA_EMBEDDING_MODEL`.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let base_url = lookup("OLLAMA_BASE_URL")
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string());
        let llm_model = lookup("OLLAMA_LLM_MODEL").unwrap_or_default();
        let embedding_model = lookup("OLLAMA_EMBEDDING_MODEL").unwrap_or_default();

        Self::new(base_url, llm_model, embedding_model)
    }
}

fn required(value: String, variable: &'static str) -> Result<String, ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::MissingModel(variable));
    }
    Ok(trimmed.to_string())
}
