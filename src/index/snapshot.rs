//! Immutable, queryable view of one fully built index.

use super::{EmbeddingIdentity, IndexError, RetrievedChunk, VectorIndex};
use crate::embedding::{EmbeddingClient, EmbeddingClientError};
use crate::generation::{
    AnswerGenerator, GenerationClientError, GenerationRequest, build_prompt, format_context,
};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;

/// Failures while querying a snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Question could not be embedded.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Similarity search failed.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// Answer generation failed.
    #[error(transparent)]
    Generation(#[from] GenerationClientError),
}

/// Generation parameters bound into every snapshot.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    /// Model identifier passed to the generator.
    pub model: String,
    /// Sampling temperature.
    pub temperature: f32,
    /// Number of chunks fed to the generator as context.
    pub context_k: usize,
}

/// Long-lived collaborators shared by every snapshot the process builds.
#[derive(Clone)]
pub struct Collaborators {
    /// Embeds chunks during ingestion and questions at query time.
    pub embedder: Arc<dyn EmbeddingClient>,
    /// Produces answers from retrieved context.
    pub generator: Arc<dyn AnswerGenerator>,
    /// Generation parameters.
    pub generation: GenerationSettings,
}

impl Collaborators {
    /// Bind a built index to these collaborators.
    pub fn snapshot(
        &self,
        identity: EmbeddingIdentity,
        index: VectorIndex,
        created_at: OffsetDateTime,
    ) -> IndexSnapshot {
        IndexSnapshot {
            identity,
            created_at,
            index,
            embedder: Arc::clone(&self.embedder),
            generator: Arc::clone(&self.generator),
            generation: self.generation.clone(),
        }
    }
}

/// A loaded index plus the collaborators needed to query it. Never mutated after construction.
pub struct IndexSnapshot {
    identity: EmbeddingIdentity,
    created_at: OffsetDateTime,
    index: VectorIndex,
    embedder: Arc<dyn EmbeddingClient>,
    generator: Arc<dyn AnswerGenerator>,
    generation: GenerationSettings,
}

impl fmt::Debug for IndexSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSnapshot")
            .field("identity", &self.identity)
            .field("created_at", &self.created_at)
            .field("chunks", &self.index.len())
            .finish_non_exhaustive()
    }
}

impl IndexSnapshot {
    /// Embedding provider and model the index was built with.
    pub fn identity(&self) -> &EmbeddingIdentity {
        &self.identity
    }

    /// When the index was built.
    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    /// Number of indexed chunks.
    pub fn chunk_count(&self) -> usize {
        self.index.len()
    }

    /// Top-`k` chunks for `question`.
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<Vec<RetrievedChunk>, SnapshotError> {
        let query_vector = self.embedder.embed_query(question).await?;
        Ok(self.index.search(&query_vector, k)?)
    }

    /// Answer `question` from this snapshot's own context window.
    pub async fn generate(&self, question: &str) -> Result<String, SnapshotError> {
        let context = self.retrieve(question, self.generation.context_k).await?;
        let prompt = build_prompt(&format_context(&context), question);
        let answer = self
            .generator
            .generate(GenerationRequest {
                model: self.generation.model.clone(),
                prompt,
                temperature: self.generation.temperature,
            })
            .await?;
        Ok(answer)
    }
}
