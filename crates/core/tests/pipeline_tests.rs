//! End-to-end behaviour of ingest + answer with in-process collaborators.

use async_trait::async_trait;
use pdf_qa_core::{
    collection_for, AnswerOutcome, CharacterNgramEmbedder, ChatModel, Embedder, EmbeddingError,
    IngestError, Ingestor, InMemoryVectorStore, LlmError, PageText, PipelineConfig, QuerySession,
    RagPipeline, RagServices, RequestError, Role, TextExtractor, VectorStore,
};
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

/// Treats each `.pdf` fixture as UTF-8 text, pages split on form feeds.
struct PlainTextExtractor;

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<PageText>, IngestError> {
        let text = fs::read_to_string(path)?;
        Ok(text
            .split('\u{000c}')
            .enumerate()
            .map(|(index, page)| PageText {
                number: index as u32 + 1,
                text: page.to_string(),
            })
            .collect())
    }
}

/// Local trigram embedder that can be switched into a failing state.
#[derive(Default)]
struct FlakyEmbedder {
    inner: CharacterNgramEmbedder,
    failing: AtomicBool,
    calls: AtomicUsize,
}

#[async_trait]
impl Embedder for FlakyEmbedder {
    fn model(&self) -> &str {
        "flaky-trigram"
    }

    fn dimensions(&self) -> usize {
        self.inner.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(EmbeddingError::BackendResponse {
                backend: "flaky".to_string(),
                details: "503 Service Unavailable".to_string(),
            });
        }
        self.inner.embed_batch(texts).await
    }
}

struct EchoModel {
    reply: String,
    failing: AtomicBool,
}

impl EchoModel {
    fn new(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            failing: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ChatModel for EchoModel {
    async fn complete(&self, _prompt: &str) -> Result<String, LlmError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(LlmError::Timeout(std::time::Duration::from_secs(60)));
        }
        Ok(self.reply.clone())
    }
}

struct Harness {
    embedder: Arc<FlakyEmbedder>,
    model: Arc<EchoModel>,
    store: Arc<InMemoryVectorStore>,
    ingestor: Ingestor,
    pipeline: RagPipeline,
}

fn harness(reply: &str) -> Harness {
    let embedder = Arc::new(FlakyEmbedder::default());
    let model = Arc::new(EchoModel::new(reply));
    let store = Arc::new(InMemoryVectorStore::new());
    let services = RagServices {
        extractor: Arc::new(PlainTextExtractor),
        embedder: embedder.clone(),
        chat: model.clone(),
        store: store.clone(),
    };
    let config = PipelineConfig::default();

    Harness {
        embedder,
        model,
        store,
        ingestor: Ingestor::new(services.clone(), config.clone()),
        pipeline: RagPipeline::new(&services, &config),
    }
}

fn folder_with(files: &[(&str, &str)]) -> Result<TempDir, std::io::Error> {
    let dir = tempdir()?;
    for (name, text) in files {
        fs::write(dir.path().join(name), text)?;
    }
    Ok(dir)
}

#[tokio::test]
async fn ingested_document_is_cited_in_the_answer() -> Result<(), Box<dyn std::error::Error>> {
    let h = harness("<think>the document names him</think>King Jangsu was a king.");
    let docs = folder_with(&[("jangsu.pdf", "Apartment King Jangsu was a king.")])?;

    let status = h.ingestor.ingest("alice", docs.path()).await;
    assert_eq!(status, "1 document chunks were stored in the vector store.");

    let response = h.pipeline.answer("alice", "Who was King Jangsu?", true).await?;
    assert_eq!(response.outcome(), AnswerOutcome::Answered);
    assert!(!response.sources.is_empty());
    assert!(response.sources.iter().any(|source| source.filename == "jangsu.pdf"));
    assert_eq!(response.sources[0].preview, "Apartment King Jangsu was a king.");
    assert_eq!(response.reasoning, "the document names him");
    assert!(response.answer.starts_with("King Jangsu was a king.\n\n[Sources]\n- jangsu.pdf"));
    Ok(())
}

#[tokio::test]
async fn owner_without_documents_gets_guidance() -> Result<(), Box<dyn std::error::Error>> {
    let h = harness("unused");
    let response = h.pipeline.answer("nobody", "Who was King Jangsu?", true).await?;

    assert_eq!(response.outcome(), AnswerOutcome::NotIngested);
    assert_eq!(response.answer, AnswerOutcome::NotIngested.message());
    assert!(response.sources.is_empty());
    assert_eq!(response.reasoning, "");
    Ok(())
}

#[tokio::test]
async fn unrelated_question_finds_no_relevant_documents() -> Result<(), Box<dyn std::error::Error>> {
    let h = harness("unused");
    let docs = folder_with(&[("jangsu.pdf", "Apartment King Jangsu was a king.")])?;
    h.ingestor.ingest_folder("alice", docs.path()).await?;

    let response = h.pipeline.answer("alice", "Who ruled Goguryeo?", true).await?;
    assert_eq!(response.outcome(), AnswerOutcome::NoRelevantDocuments);
    assert_ne!(response.answer, AnswerOutcome::NotIngested.message());
    assert!(response.sources.is_empty());
    Ok(())
}

#[tokio::test]
async fn owners_never_see_each_others_chunks() -> Result<(), Box<dyn std::error::Error>> {
    let h = harness("answer");
    let alice_docs = folder_with(&[("alice.pdf", "Apartment King Jangsu was a king.")])?;
    let bob_docs = folder_with(&[("bob.pdf", "Apartment King Jangsu was a king. Owner B copy.")])?;
    h.ingestor.ingest_folder("alice", alice_docs.path()).await?;
    h.ingestor.ingest_folder("bob", bob_docs.path()).await?;

    let response = h.pipeline.answer("alice", "Who was King Jangsu?", true).await?;
    assert!(!response.sources.is_empty());
    assert!(response.sources.iter().all(|source| source.filename == "alice.pdf"));

    let query = h.embedder.embed("Who was King Jangsu?").await?;
    let hits = h.store.query(&collection_for("alice"), &query, 50).await?;
    assert!(hits.iter().all(|hit| hit.chunk.owner_user_id == "alice"));
    Ok(())
}

#[tokio::test]
async fn embedding_outage_is_an_unknown_error_and_recoverable() -> Result<(), Box<dyn std::error::Error>> {
    let h = harness("King Jangsu was a king.");
    let docs = folder_with(&[("jangsu.pdf", "Apartment King Jangsu was a king.")])?;
    h.ingestor.ingest_folder("alice", docs.path()).await?;

    h.embedder.failing.store(true, Ordering::SeqCst);
    let response = h.pipeline.answer("alice", "Who was King Jangsu?", true).await?;
    assert_eq!(response.outcome(), AnswerOutcome::UnknownFailure);
    assert_eq!(response.answer, AnswerOutcome::UnknownFailure.message());
    assert!(!response.answer.contains("503"));
    assert!(response.sources.is_empty());

    h.embedder.failing.store(false, Ordering::SeqCst);
    let response = h.pipeline.answer("alice", "Who was King Jangsu?", true).await?;
    assert_eq!(response.outcome(), AnswerOutcome::Answered);
    Ok(())
}

#[tokio::test]
async fn model_failure_still_returns_sources() -> Result<(), Box<dyn std::error::Error>> {
    let h = harness("unused");
    let docs = folder_with(&[("jangsu.pdf", "Apartment King Jangsu was a king.")])?;
    h.ingestor.ingest_folder("alice", docs.path()).await?;

    h.model.failing.store(true, Ordering::SeqCst);
    let response = h.pipeline.answer("alice", "Who was King Jangsu?", true).await?;
    assert_eq!(response.outcome(), AnswerOutcome::LlmFailure);
    assert_eq!(response.answer, AnswerOutcome::LlmFailure.message());
    assert_eq!(response.sources.len(), 1);
    Ok(())
}

#[tokio::test]
async fn thinking_off_never_exposes_reasoning() -> Result<(), Box<dyn std::error::Error>> {
    let h = harness("<think>secret chain of thought</think>King Jangsu was a king.");
    let docs = folder_with(&[("jangsu.pdf", "Apartment King Jangsu was a king.")])?;
    h.ingestor.ingest_folder("alice", docs.path()).await?;

    let response = h.pipeline.answer("alice", "Who was King Jangsu?", false).await?;
    assert_eq!(response.reasoning, "");
    assert!(!response.answer.contains("secret chain of thought"));
    Ok(())
}

#[tokio::test]
async fn blank_questions_are_rejected_before_retrieval() {
    let h = harness("unused");

    let result = h.pipeline.answer("alice", "   \n\t ", true).await;
    assert_eq!(result.err(), Some(RequestError::BlankQuestion));

    let result = h.pipeline.answer("alice", &"why ".repeat(80), true).await;
    assert!(matches!(result, Err(RequestError::QuestionTooLong(_))));

    assert_eq!(h.embedder.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rejected_question_stays_in_the_session() {
    let h = harness("unused");
    let long_question = "why ".repeat(80);

    let mut session = QuerySession::new(long_question.clone(), true);
    let result = h.pipeline.answer_in_session("alice", &mut session).await;

    assert!(matches!(result, Err(RequestError::QuestionTooLong(_))));
    assert_eq!(session.query, long_question);
    assert!(session.messages.is_empty());
}

#[tokio::test]
async fn query_during_reindex_observes_no_documents() -> Result<(), Box<dyn std::error::Error>> {
    let h = harness("answer");
    let docs = folder_with(&[("jangsu.pdf", "Apartment King Jangsu was a king.")])?;
    h.ingestor.ingest_folder("alice", docs.path()).await?;

    // The window between delete and recreate in a full re-index.
    h.store.delete_collection(&collection_for("alice")).await?;

    let response = h.pipeline.answer("alice", "Who was King Jangsu?", true).await?;
    assert_eq!(response.outcome(), AnswerOutcome::NotIngested);
    Ok(())
}

#[tokio::test]
async fn session_history_grows_with_each_answer() -> Result<(), Box<dyn std::error::Error>> {
    let h = harness("King Jangsu was a king.");
    let docs = folder_with(&[("jangsu.pdf", "Apartment King Jangsu was a king.")])?;
    h.ingestor.ingest_folder("alice", docs.path()).await?;

    let mut session = QuerySession::new("  Who was King Jangsu?  ", true);
    let response = h.pipeline.answer_in_session("alice", &mut session).await?;

    assert_eq!(session.query, "Who was King Jangsu?");
    assert_eq!(session.messages.len(), 2);
    assert_eq!(session.messages[0].role, Role::User);
    assert_eq!(session.messages[1].content, response.answer);
    assert!(!session.retrieved_context.is_empty());
    Ok(())
}
