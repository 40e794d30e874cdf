use crate::config::PipelineConfig;
use crate::error::IngestError;
use crate::models::{Chunk, DocumentFingerprint};
use sha2::{Digest, Sha256};
use std::collections::VecDeque;

/// Boundaries tried in order; the empty separator cuts between characters.
pub const SEPARATORS: [&str; 8] = ["\n\n", "\n", ".", "!", "?", ",", " ", ""];

const ZERO_WIDTH: [char; 5] = ['\u{200b}', '\u{200c}', '\u{200d}', '\u{2060}', '\u{feff}'];

#[derive(Debug, Clone, Copy)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl ChunkingConfig {
    pub fn validate(self) -> Result<Self, IngestError> {
        if self.max_chars == 0 || self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk size {}",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(self)
    }
}

impl From<&PipelineConfig> for ChunkingConfig {
    fn from(value: &PipelineConfig) -> Self {
        Self {
            max_chars: value.chunk_size,
            overlap_chars: value.chunk_overlap,
        }
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.chars()
        .filter(|c| !ZERO_WIDTH.contains(c))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Splits `text` into pieces of at most `max_chars` characters, cutting at the
/// highest-priority separator that still yields small enough pieces.
pub fn split_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    split_recursive(text, &SEPARATORS, config)
}

fn split_recursive(text: &str, separators: &[&str], config: ChunkingConfig) -> Vec<String> {
    let position = separators
        .iter()
        .position(|separator| separator.is_empty() || text.contains(separator))
        .unwrap_or(separators.len().saturating_sub(1));
    let separator = separators.get(position).copied().unwrap_or("");
    let remaining = separators.get(position + 1..).unwrap_or(&[]);

    let mut result = Vec::new();
    let mut small = Vec::new();

    for piece in split_keeping_separator(text, separator) {
        if char_len(piece) < config.max_chars {
            small.push(piece);
            continue;
        }

        if !small.is_empty() {
            result.extend(merge_pieces(&small, config));
            small.clear();
        }

        if remaining.is_empty() {
            result.push(piece.trim().to_string());
        } else {
            result.extend(split_recursive(piece, remaining, config));
        }
    }

    if !small.is_empty() {
        result.extend(merge_pieces(&small, config));
    }

    result.retain(|chunk| !chunk.is_empty());
    result
}

fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(index, c)| &text[index..index + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    while let Some(offset) = text[start..].find(separator) {
        let end = start + offset + separator.len();
        pieces.push(&text[start..end]);
        start = end;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Greedily packs pieces into windows, carrying up to `overlap_chars` of the
/// previous window's tail into the next one.
fn merge_pieces(pieces: &[&str], config: ChunkingConfig) -> Vec<String> {
    let mut merged = Vec::new();
    let mut window: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for piece in pieces {
        let length = char_len(piece);

        if total + length > config.max_chars && !window.is_empty() {
            push_window(&window, &mut merged);

            while total > config.overlap_chars
                || (total + length > config.max_chars && total > 0)
            {
                match window.pop_front() {
                    Some(front) => total -= char_len(front),
                    None => break,
                }
            }
        }

        window.push_back(piece);
        total += length;
    }

    push_window(&window, &mut merged);
    merged
}

fn push_window(window: &VecDeque<&str>, merged: &mut Vec<String>) {
    let joined = window.iter().copied().collect::<String>();
    let trimmed = joined.trim();
    if !trimmed.is_empty() && merged.last().map(String::as_str) != Some(trimmed) {
        merged.push(trimmed.to_string());
    }
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Normalizes one page of text and turns it into chunks owned by `owner`.
/// Returns the chunks and the next chunk index for the document.
pub fn build_chunks(
    document: &DocumentFingerprint,
    owner: &str,
    page: Option<u32>,
    page_text: &str,
    config: ChunkingConfig,
    first_index: u64,
) -> Result<(Vec<Chunk>, u64), IngestError> {
    let config = config.validate()?;
    let normalized = normalize_whitespace(page_text);

    let mut chunks = Vec::new();
    let mut cursor = first_index;

    for piece in split_text(&normalized, config) {
        let text = normalize_whitespace(&piece);
        if text.is_empty() {
            continue;
        }

        chunks.push(Chunk {
            chunk_id: make_chunk_id(owner, &document.source_path, page, cursor, &text),
            source_document_id: document.document_id.clone(),
            source_filename: document.filename.clone(),
            source_path: document.source_path.clone(),
            page_number: page,
            char_count: text.chars().count(),
            word_count: text.split_whitespace().count(),
            owner_user_id: owner.to_string(),
            chunk_index: cursor,
            text,
        });

        cursor = cursor.saturating_add(1);
    }

    Ok((chunks, cursor))
}

fn make_chunk_id(owner: &str, source_path: &str, page: Option<u32>, index: u64, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(owner.as_bytes());
    hasher.update(source_path.as_bytes());
    hasher.update(page.unwrap_or(0).to_le_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
