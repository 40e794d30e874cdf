//! Near-duplicate removal and composite re-scoring of retrieval candidates.
//!
//! Both steps work on the same embeddings: the query and every candidate are
//! embedded in a single batch, then
//!
//! 1. pairs above the dedup threshold lose their shorter member;
//! 2. survivors are scored as
//!    `semantic·w₁ + retrieval·w₂ + length·w₃ + metadata·w₄`
//!    and stably sorted, best first.

use crate::deadline::within;
use crate::embeddings::{cosine_similarity, Embedder};
use crate::error::EmbeddingError;
use crate::models::{Chunk, RerankWeights, ScoredChunk};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const METADATA_PRESENT: f64 = 0.2;
const METADATA_SOURCE: f64 = 0.3;
const METADATA_PAGE: f64 = 0.3;

pub fn metadata_score(chunk: &Chunk) -> f64 {
    let mut score = 0.0;
    if chunk.has_metadata() {
        score += METADATA_PRESENT;
        if chunk.has_source() {
            score += METADATA_SOURCE;
        }
        if chunk.has_page() {
            score += METADATA_PAGE;
        }
    }
    score
}

/// Word count relative to the wordiest candidate.
pub fn length_scores(chunks: &[&Chunk]) -> Vec<f64> {
    let max_words = chunks
        .iter()
        .map(|chunk| chunk.word_count)
        .max()
        .unwrap_or(0)
        .max(1) as f64;
    chunks
        .iter()
        .map(|chunk| chunk.word_count as f64 / max_words)
        .collect()
}

/// Returns the indices that survive deduplication, in input order.
///
/// For each pair `(i, j)` with `i < j` whose similarity exceeds `threshold`,
/// the shorter chunk (by characters) is removed; on equal length `j` goes.
/// A removed chunk is never compared again.
pub fn deduplicate(lengths: &[usize], embeddings: &[Vec<f32>], threshold: f64) -> Vec<usize> {
    let count = lengths.len().min(embeddings.len());
    let mut removed = vec![false; count];

    for i in 0..count {
        if removed[i] {
            continue;
        }
        for j in (i + 1)..count {
            if removed[j] {
                continue;
            }
            if cosine_similarity(&embeddings[i], &embeddings[j]) > threshold {
                if lengths[i] < lengths[j] {
                    removed[i] = true;
                    break;
                }
                removed[j] = true;
            }
        }
    }

    (0..count).filter(|index| !removed[*index]).collect()
}

/// Scores `candidates` against the query and returns the best `top_k`.
/// `embeddings[i]` belongs to `candidates[i]`.
pub fn rerank(
    query_embedding: &[f32],
    candidates: Vec<ScoredChunk>,
    embeddings: &[Vec<f32>],
    weights: RerankWeights,
    top_k: usize,
) -> Vec<ScoredChunk> {
    let chunks: Vec<&Chunk> = candidates.iter().map(|candidate| &candidate.chunk).collect();
    let lengths = length_scores(&chunks);

    let mut scored: Vec<ScoredChunk> = candidates
        .into_iter()
        .zip(embeddings)
        .zip(lengths)
        .map(|((candidate, embedding), length_score)| {
            let semantic = cosine_similarity(query_embedding, embedding);
            let metadata = metadata_score(&candidate.chunk);
            let final_score = weights.semantic * semantic
                + weights.retrieval * candidate.similarity_score
                + weights.length * length_score
                + weights.metadata * metadata;

            ScoredChunk {
                length_score,
                metadata_score: metadata,
                final_score,
                ..candidate
            }
        })
        .collect();

    scored.sort_by(|left, right| right.final_score.total_cmp(&left.final_score));
    scored.truncate(top_k);
    scored
}

pub struct Reranker {
    embedder: Arc<dyn Embedder>,
    dedup_threshold: f64,
    weights: RerankWeights,
    top_k: usize,
    timeout: Duration,
}

impl Reranker {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        dedup_threshold: f64,
        weights: RerankWeights,
        top_k: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            dedup_threshold,
            weights,
            top_k,
            timeout,
        }
    }

    /// Deduplicates then reranks. An empty input is returned as is.
    pub async fn dedup_and_rerank(
        &self,
        query: &str,
        candidates: Vec<ScoredChunk>,
    ) -> Result<Vec<ScoredChunk>, EmbeddingError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut texts = Vec::with_capacity(candidates.len() + 1);
        texts.push(query.to_string());
        texts.extend(candidates.iter().map(|candidate| candidate.chunk.text.clone()));

        let mut embeddings = within(
            self.timeout,
            self.embedder.embed_batch(&texts),
            EmbeddingError::Timeout,
        )
        .await?;
        if embeddings.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: texts.len(),
                actual: embeddings.len(),
            });
        }
        let query_embedding = embeddings.remove(0);

        let lengths: Vec<usize> = candidates.iter().map(|c| c.chunk.char_count).collect();
        let keep = deduplicate(&lengths, &embeddings, self.dedup_threshold);
        debug!(candidates = candidates.len(), kept = keep.len(), "deduplicated candidates");

        let mut kept_candidates = Vec::with_capacity(keep.len());
        let mut kept_embeddings = Vec::with_capacity(keep.len());
        let mut next = keep.iter().peekable();
        for (index, (candidate, embedding)) in candidates.into_iter().zip(embeddings).enumerate() {
            if next.peek() == Some(&&index) {
                next.next();
                kept_candidates.push(candidate);
                kept_embeddings.push(embedding);
            }
        }

        Ok(rerank(
            &query_embedding,
            kept_candidates,
            &kept_embeddings,
            self.weights,
            self.top_k,
        ))
    }
}
