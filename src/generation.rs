//! Answer generation backed by a chat/completion model.
//!
//! The generator receives a fully assembled prompt: retrieved context followed by the user's
//! question. Providers issue HTTP requests directly, mirroring the embedding adapters.

use crate::config::{Config, GenerationProvider};
use crate::index::RetrievedChunk;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;

/// Prompt sent to the generator; `{context}` and `{question}` are substituted.
pub const PROMPT_TEMPLATE: &str = "Use the following context to answer the question.
If you cannot answer based on the context, say \"I don't have enough information.\"

Context:
{context}

Question: {question}

Answer:";

/// Errors surfaced while generating an answer.
#[derive(Debug, Error)]
pub enum GenerationClientError {
    /// Provider could not be constructed or reached.
    #[error("Generation provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate answer: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
}

/// Request payload passed to the generation provider.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Model identifier understood by the provider.
    pub model: String,
    /// Prompt assembled from context and question.
    pub prompt: String,
    /// Sampling temperature.
    pub temperature: f32,
}

/// Interface implemented by answer generators.
#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    /// Produce an answer for the prompt.
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationClientError>;
}

/// Join retrieved chunk texts with blank lines.
pub fn format_context(chunks: &[RetrievedChunk]) -> String {
    chunks
        .iter()
        .map(|hit| hit.chunk.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Fill [`PROMPT_TEMPLATE`].
pub fn build_prompt(context: &str, question: &str) -> String {
    PROMPT_TEMPLATE
        .replace("{context}", context)
        .replace("{question}", question)
}

/// Build the answer generator selected by configuration.
pub fn build_answer_generator(
    config: &Config,
) -> Result<Arc<dyn AnswerGenerator>, GenerationClientError> {
    tracing::info!(provider = ?config.llm_provider, model = %config.llm_model, "Initializing answer generator");
    let generator: Arc<dyn AnswerGenerator> = match config.llm_provider {
        GenerationProvider::OpenAI => Arc::new(OpenAIChatClient::new(
            config.openai_base_url.clone(),
            config.openai_api_key.clone(),
        )?),
        GenerationProvider::Ollama => Arc::new(OllamaGenerateClient::new(config.ollama_url.clone())?),
    };
    Ok(generator)
}

fn http_client() -> Result<Client, GenerationClientError> {
    Client::builder()
        .user_agent("finrag/generation")
        .build()
        .map_err(|error| GenerationClientError::ProviderUnavailable(error.to_string()))
}

/// OpenAI-compatible `POST /chat/completions` client.
pub struct OpenAIChatClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAIChatClient {
    /// Construct a client for `base_url`. A missing key is reported on first use.
    pub fn new(base_url: String, api_key: Option<String>) -> Result<Self, GenerationClientError> {
        Ok(Self {
            http: http_client()?,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<String>,
}

#[async_trait]
impl AnswerGenerator for OpenAIChatClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationClientError> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            GenerationClientError::ProviderUnavailable("OPENAI_API_KEY is not set".into())
        })?;
        let payload = json!({
            "model": request.model,
            "temperature": request.temperature,
            "messages": [{ "role": "user", "content": request.prompt }],
        });

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|error| GenerationClientError::ProviderUnavailable(error.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationClientError::GenerationFailed(format!(
                "OpenAI returned {status}: {body}"
            )));
        }

        let body: ChatCompletionResponse = response.json().await.map_err(|error| {
            GenerationClientError::InvalidResponse(format!("failed to decode OpenAI response: {error}"))
        })?;
        body.choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .map(|content| content.trim().to_string())
            .ok_or_else(|| GenerationClientError::InvalidResponse("response had no choices".into()))
    }
}

/// Ollama `POST /api/generate` client (non-streaming).
pub struct OllamaGenerateClient {
    http: Client,
    base_url: String,
}

impl OllamaGenerateClient {
    /// Construct a client for the Ollama runtime at `base_url`.
    pub fn new(base_url: String) -> Result<Self, GenerationClientError> {
        Ok(Self {
            http: http_client()?,
            base_url,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    response: String,
    done: bool,
}

#[async_trait]
impl AnswerGenerator for OllamaGenerateClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationClientError> {
        let payload = json!({
            "model": request.model,
            "prompt": request.prompt,
            "stream": false,
            "options": { "temperature": request.temperature },
        });

        let response = self
            .http
            .post(self.endpoint())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                GenerationClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationClientError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaResponse = response.json().await.map_err(|error| {
            GenerationClientError::InvalidResponse(format!("failed to decode Ollama response: {error}"))
        })?;

        if !body.done {
            return Err(GenerationClientError::InvalidResponse(
                "Ollama response incomplete (streaming not supported)".into(),
            ));
        }

        Ok(body.response.trim().to_string())
    }
}
