//! Embedding providers used at ingestion time (chunks) and query time (questions).

mod http;

use crate::config::{Config, EmbeddingProvider};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub use http::{OllamaEmbeddingClient, OpenAIEmbeddingClient};

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider could not be constructed from configuration.
    #[error("Embedding provider misconfigured: {0}")]
    Misconfigured(String),
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider response could not be decoded.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce one embedding vector per input text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;

    /// Embed a single query string.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        self.generate_embeddings(vec![text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| EmbeddingClientError::InvalidResponse("no vector returned".into()))
    }

    /// Output dimension when it is fixed by configuration rather than by the remote model.
    fn dimension(&self) -> Option<usize> {
        None
    }
}

/// Deterministic in-process encoder that hashes bytes into a fixed-size, L2-normalised vector.
///
/// Shares vocabulary overlap with real encoders only loosely, but needs no network or model
/// download, which makes it the default for local development and tests.
pub struct HashedEmbeddingClient {
    dimension: usize,
}

impl HashedEmbeddingClient {
    /// Construct an encoder producing vectors of `dimension` components.
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        for token in text.split(|c: char| !c.is_alphanumeric()) {
            if token.is_empty() {
                continue;
            }
            let lowered = token.to_lowercase();
            // FNV-1a keeps tokens landing in stable slots across runs.
            let hash = lowered.bytes().fold(0xcbf2_9ce4_8422_2325_u64, |acc, byte| {
                (acc ^ u64::from(byte)).wrapping_mul(0x0000_0100_0000_01b3)
            });
            let slot = (hash % dimension as u64) as usize;
            embedding[slot] += 1.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashedEmbeddingClient {
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError> {
        if self.dimension == 0 {
            return Err(EmbeddingClientError::Misconfigured(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }

        tracing::debug!(count = texts.len(), dimension = self.dimension, "Hashing embeddings");
        Ok(texts
            .iter()
            .map(|text| Self::encode(text, self.dimension))
            .collect())
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }
}

/// Build the embedding client selected by configuration.
pub fn build_embedding_client(
    config: &Config,
) -> Result<Arc<dyn EmbeddingClient>, EmbeddingClientError> {
    tracing::info!(
        provider = %config.embedding_provider,
        model = %config.embedding_model,
        "Initializing embedding client"
    );
    let client: Arc<dyn EmbeddingClient> = match config.embedding_provider {
        EmbeddingProvider::Local => Arc::new(HashedEmbeddingClient::new(config.embedding_dimension)),
        EmbeddingProvider::Ollama => Arc::new(OllamaEmbeddingClient::new(
            config.ollama_url.clone(),
            config.embedding_model.clone(),
        )?),
        EmbeddingProvider::OpenAI => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                EmbeddingClientError::Misconfigured("OPENAI_API_KEY is not set".into())
            })?;
            Arc::new(OpenAIEmbeddingClient::new(
                config.openai_base_url.clone(),
                api_key,
                config.embedding_model.clone(),
            )?)
        }
    };
    Ok(client)
}
