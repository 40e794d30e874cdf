use crate::error::LlmError;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful AI assistant. Answer in a professional and courteous tone.";

#[async_trait]
pub trait ChatModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Non-streaming client for an Ollama server's `/api/generate` endpoint.
pub struct OllamaChatModel {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaChatModel {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl ChatModel for OllamaChatModel {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        debug!(model = %self.model, prompt_chars = prompt.len(), "calling chat model");
        let response = self
            .client
            .post(format!("{}/api/generate", self.endpoint))
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                system: DEFAULT_SYSTEM_PROMPT,
                stream: false,
                options: GenerateOptions { temperature: 0.0 },
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(LlmError::BackendResponse {
                backend: "ollama".to_string(),
                details: response.status().to_string(),
            });
        }

        let parsed: GenerateResponse = response.json().await?;
        Ok(parsed.response.trim().to_string())
    }
}
