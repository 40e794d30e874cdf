//! Grounded prompt assembly, the model call and response post-processing.

use crate::cache::{response_key, ResponseCache};
use crate::deadline::within;
use crate::error::LlmError;
use crate::llm::ChatModel;
use crate::models::{AnswerOutcome, AnswerResponse, ChatMessage, QuerySession, Role, ScoredChunk, Source};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const CONTEXT_SEPARATOR: &str = "\n---\n";
pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";
pub const NO_THINK_DIRECTIVE: &str = "/no_think";
pub const SOURCES_HEADER: &str = "[Sources]";

const HIGH_RELEVANCE_RANKS: usize = 3;

const GROUNDING_RULES: &str = "Answer the user's question using only the documents below. Follow these rules strictly:
1. Use only information that can be found directly in the provided context.
2. Never include information that the context does not explicitly state.
3. Use years, dates and figures only when they are quoted in the context.
4. If the context does not contain the answer, reply: \"Sorry, the provided documents do not contain information to answer this question.\"
5. Do not answer from general knowledge or by inference.";

pub fn context_text(chunks: &[ScoredChunk]) -> String {
    chunks
        .iter()
        .map(|scored| scored.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_SEPARATOR)
}

pub fn relevance_tier(rank: usize) -> &'static str {
    if rank <= HIGH_RELEVANCE_RANKS {
        "high"
    } else {
        "medium"
    }
}

/// One line per chunk, ranks starting at 1.
pub fn citation_lines(chunks: &[ScoredChunk]) -> Vec<String> {
    chunks
        .iter()
        .enumerate()
        .map(|(index, scored)| {
            let page = scored
                .chunk
                .page_number
                .map_or_else(|| "unknown".to_string(), |page| page.to_string());
            format!(
                "- {} (page: {}, relevance: {})",
                scored.chunk.source_filename,
                page,
                relevance_tier(index + 1)
            )
        })
        .collect()
}

pub fn build_prompt(question: &str, context_text: &str, history: &[ChatMessage]) -> String {
    let mut prompt = String::from(GROUNDING_RULES);

    if !history.is_empty() {
        prompt.push_str("\n\n[Conversation]");
        for message in history {
            let speaker = match message.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            prompt.push_str(&format!("\n{speaker}: {}", message.content));
        }
    }

    prompt.push_str(&format!(
        "\n\n[Documents]\n{context_text}\n\n[Question]\n{question}\n\n[Answer]"
    ));
    prompt
}

/// Leaves the prompt untouched when reasoning is wanted; otherwise appends
/// the suppression directive on its own line.
pub fn apply_thinking_directive(prompt: String, thinking_mode: bool) -> String {
    if thinking_mode {
        prompt
    } else {
        format!("{prompt}\n{NO_THINK_DIRECTIVE}")
    }
}

/// Splits raw output into `(reasoning, answer)`.
pub fn split_reasoning(raw: &str) -> (String, String) {
    if let Some(open) = raw.find(THINK_OPEN) {
        let body_start = open + THINK_OPEN.len();
        if let Some(close) = raw[body_start..].find(THINK_CLOSE) {
            let close = body_start + close;
            let reasoning = raw[body_start..close].trim().to_string();
            let answer = format!("{}{}", &raw[..open], &raw[close + THINK_CLOSE.len()..]);
            return (reasoning, answer.trim().to_string());
        }
    }

    // Some models only emit the closing tag.
    if let Some(close) = raw.find(THINK_CLOSE) {
        let reasoning = raw[..close].trim().to_string();
        let answer = raw[close + THINK_CLOSE.len()..].trim().to_string();
        return (reasoning, answer);
    }

    (String::new(), raw.trim().to_string())
}

/// Failure of the model call; the sources gathered so far travel with it.
#[derive(Debug)]
pub struct ComposeFailure {
    pub error: LlmError,
    pub sources: Vec<Source>,
}

pub struct Composer {
    chat: Arc<dyn ChatModel>,
    cache: ResponseCache,
    timeout: Duration,
}

impl Composer {
    pub fn new(chat: Arc<dyn ChatModel>, cache_capacity: usize, timeout: Duration) -> Self {
        Self {
            chat,
            cache: ResponseCache::new(cache_capacity),
            timeout,
        }
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Builds the grounded prompt from `session.retrieved_context`, calls the
    /// model (or the cache) and shapes the response.
    pub async fn compose(&self, session: &QuerySession) -> Result<AnswerResponse, ComposeFailure> {
        let chunks = &session.retrieved_context;
        let sources: Vec<Source> = chunks.iter().map(Source::from).collect();
        let context = context_text(chunks);

        let raw = match self.complete_cached(session, &context).await {
            Ok(raw) => raw,
            Err(error) => return Err(ComposeFailure { error, sources }),
        };

        let (reasoning, mut answer) = split_reasoning(&raw);
        if !sources.is_empty() {
            answer.push_str(&format!("\n\n{SOURCES_HEADER}\n{}", citation_lines(chunks).join("\n")));
        }

        Ok(AnswerResponse {
            answer,
            reasoning: if session.thinking_mode { reasoning } else { String::new() },
            sources,
            outcome: Some(AnswerOutcome::Answered),
        })
    }

    async fn complete_cached(&self, session: &QuerySession, context: &str) -> Result<String, LlmError> {
        let key = response_key(&session.query, context, &session.messages, session.thinking_mode);
        if let Some(hit) = self.cache.get(&key) {
            debug!("completion served from cache");
            return Ok(hit);
        }

        let prompt = apply_thinking_directive(
            build_prompt(&session.query, context, &session.messages),
            session.thinking_mode,
        );
        let raw = within(self.timeout, self.chat.complete(&prompt), LlmError::Timeout).await?;
        info!(chunks = session.retrieved_context.len(), answer_chars = raw.len(), "model answered");

        self.cache.put(key, raw.clone());
        Ok(raw)
    }
}
