use crate::composer::Composer;
use crate::config::PipelineConfig;
use crate::error::RequestError;
use crate::models::{AnswerOutcome, AnswerRequest, AnswerResponse, ChatMessage, QuerySession};
use crate::rerank::Reranker;
use crate::retrieval::{RetrievalError, Retriever};
use crate::services::RagServices;
use tracing::{error, info, warn};

/// Runs retrieve → dedup/rerank → compose for one query. Every collaborator
/// failure is turned into an [`AnswerOutcome`]; only malformed requests are
/// returned as errors.
pub struct RagPipeline {
    retriever: Retriever,
    reranker: Reranker,
    composer: Composer,
}

impl RagPipeline {
    pub fn new(services: &RagServices, config: &PipelineConfig) -> Self {
        Self {
            retriever: Retriever::new(
                services.embedder.clone(),
                services.store.clone(),
                config.retrieval_k,
                config.similarity_floor,
                config.remote_timeout,
            ),
            reranker: Reranker::new(
                services.embedder.clone(),
                config.dedup_threshold,
                config.weights,
                config.top_k,
                config.remote_timeout,
            ),
            composer: Composer::new(services.chat.clone(), config.cache_capacity, config.remote_timeout),
        }
    }

    pub async fn answer(
        &self,
        owner: &str,
        question: &str,
        thinking_mode: bool,
    ) -> Result<AnswerResponse, RequestError> {
        self.answer_request(
            owner,
            AnswerRequest {
                question: question.to_string(),
                thinking_mode,
            },
        )
        .await
    }

    pub async fn answer_request(
        &self,
        owner: &str,
        request: AnswerRequest,
    ) -> Result<AnswerResponse, RequestError> {
        let mut session = QuerySession::new(request.question, request.thinking_mode);
        self.answer_in_session(owner, &mut session).await
    }

    /// Answers `session.query` with `session.messages` as prior conversation.
    /// On success the user turn and the answer are appended to the history.
    pub async fn answer_in_session(
        &self,
        owner: &str,
        session: &mut QuerySession,
    ) -> Result<AnswerResponse, RequestError> {
        if owner.trim().is_empty() {
            return Err(RequestError::BlankOwner);
        }
        let request = AnswerRequest {
            question: session.query.clone(),
            thinking_mode: session.thinking_mode,
        }
        .validated()?;
        session.query = request.question;

        let response = self.run(owner, session).await;
        if response.outcome() == AnswerOutcome::Answered {
            session.messages.push(ChatMessage::user(session.query.clone()));
            session.messages.push(ChatMessage::assistant(response.answer.clone()));
        }
        Ok(response)
    }

    async fn run(&self, owner: &str, session: &mut QuerySession) -> AnswerResponse {
        session.retrieved_context.clear();

        let candidates = match self.retriever.retrieve(owner, &session.query).await {
            Ok(candidates) => candidates,
            Err(RetrievalError::NotIngested) => {
                warn!(owner, "query against a collection that does not exist");
                return AnswerResponse::failure(AnswerOutcome::NotIngested, Vec::new());
            }
            Err(retrieval_error) => {
                error!(owner, error = %retrieval_error, "retrieval failed");
                return AnswerResponse::failure(AnswerOutcome::UnknownFailure, Vec::new());
            }
        };

        if candidates.is_empty() {
            return AnswerResponse::failure(AnswerOutcome::NoRelevantDocuments, Vec::new());
        }

        let ranked = match self.reranker.dedup_and_rerank(&session.query, candidates).await {
            Ok(ranked) => ranked,
            Err(embedding_error) => {
                error!(owner, error = %embedding_error, "reranking failed");
                return AnswerResponse::failure(AnswerOutcome::UnknownFailure, Vec::new());
            }
        };

        if ranked.is_empty() {
            return AnswerResponse::failure(AnswerOutcome::NoRelevantDocuments, Vec::new());
        }

        info!(owner, context_chunks = ranked.len(), "composing answer");
        session.retrieved_context = ranked;

        match self.composer.compose(session).await {
            Ok(response) => response,
            Err(failure) => {
                error!(owner, error = %failure.error, "language model call failed");
                AnswerResponse::failure(AnswerOutcome::LlmFailure, failure.sources)
            }
        }
    }
}
