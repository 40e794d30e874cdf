use crate::error::RequestError;
use serde::{Deserialize, Serialize};

pub const MAX_QUESTION_CHARS: usize = 300;
pub const PREVIEW_CHARS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    pub document_id: String,
    pub filename: String,
    pub source_path: String,
}

/// A normalized span of source text plus the provenance it was cut from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub text: String,
    pub source_document_id: String,
    pub source_filename: String,
    pub source_path: String,
    pub page_number: Option<u32>,
    pub char_count: usize,
    pub word_count: usize,
    pub owner_user_id: String,
    pub chunk_index: u64,
}

impl Chunk {
    pub fn has_metadata(&self) -> bool {
        !self.source_filename.is_empty()
            || !self.source_path.is_empty()
            || self.page_number.is_some()
    }

    pub fn has_source(&self) -> bool {
        !self.source_path.is_empty()
    }

    pub fn has_page(&self) -> bool {
        self.page_number.is_some()
    }

    pub fn preview(&self) -> String {
        self.text.chars().take(PREVIEW_CHARS).collect()
    }
}

/// A chunk together with the scores attached while one query is evaluated.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub similarity_score: f64,
    pub length_score: f64,
    pub metadata_score: f64,
    pub final_score: f64,
}

impl ScoredChunk {
    pub fn retrieved(chunk: Chunk, similarity_score: f64) -> Self {
        Self {
            chunk,
            similarity_score,
            length_score: 0.0,
            metadata_score: 0.0,
            final_score: similarity_score,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Per-request conversation state. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct QuerySession {
    pub messages: Vec<ChatMessage>,
    pub query: String,
    pub retrieved_context: Vec<ScoredChunk>,
    pub thinking_mode: bool,
}

impl QuerySession {
    pub fn new(query: impl Into<String>, thinking_mode: bool) -> Self {
        Self {
            messages: Vec::new(),
            query: query.into(),
            retrieved_context: Vec::new(),
            thinking_mode,
        }
    }

    pub fn with_history(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }
}

fn default_thinking_mode() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerRequest {
    pub question: String,
    #[serde(default = "default_thinking_mode")]
    pub thinking_mode: bool,
}

impl AnswerRequest {
    /// Trims the question and enforces the 1..=300 character window.
    pub fn validated(self) -> Result<Self, RequestError> {
        let question = self.question.trim().to_string();
        if question.is_empty() {
            return Err(RequestError::BlankQuestion);
        }

        let length = question.chars().count();
        if length > MAX_QUESTION_CHARS {
            return Err(RequestError::QuestionTooLong(length));
        }

        Ok(Self {
            question,
            thinking_mode: self.thinking_mode,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Source {
    pub filename: String,
    pub source: String,
    pub page: Option<u32>,
    pub score: f64,
    pub preview: String,
}

impl From<&ScoredChunk> for Source {
    fn from(scored: &ScoredChunk) -> Self {
        Self {
            filename: scored.chunk.source_filename.clone(),
            source: scored.chunk.source_path.clone(),
            page: scored.chunk.page_number,
            score: scored.final_score,
            preview: scored.chunk.preview(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AnswerOutcome {
    Answered,
    NotIngested,
    NoRelevantDocuments,
    LlmFailure,
    UnknownFailure,
}

impl AnswerOutcome {
    pub fn message(self) -> &'static str {
        match self {
            AnswerOutcome::Answered => "",
            AnswerOutcome::NotIngested => {
                "No documents have been uploaded or processed yet. Please upload a PDF first."
            }
            AnswerOutcome::NoRelevantDocuments => "No relevant documents were found.",
            AnswerOutcome::LlmFailure => {
                "An error occurred while calling the language model. Please try again later."
            }
            AnswerOutcome::UnknownFailure => {
                "An unknown error occurred. Please contact the administrator."
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerResponse {
    pub answer: String,
    pub reasoning: String,
    pub sources: Vec<Source>,
    #[serde(skip)]
    pub outcome: Option<AnswerOutcome>,
}

impl AnswerResponse {
    pub fn failure(outcome: AnswerOutcome, sources: Vec<Source>) -> Self {
        Self {
            answer: outcome.message().to_string(),
            reasoning: String::new(),
            sources,
            outcome: Some(outcome),
        }
    }

    pub fn outcome(&self) -> AnswerOutcome {
        self.outcome.unwrap_or(AnswerOutcome::Answered)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RerankWeights {
    pub semantic: f64,
    pub retrieval: f64,
    pub length: f64,
    pub metadata: f64,
}

impl Default for RerankWeights {
    fn default() -> Self {
        Self {
            semantic: 0.5,
            retrieval: 0.2,
            length: 0.2,
            metadata: 0.1,
        }
    }
}
