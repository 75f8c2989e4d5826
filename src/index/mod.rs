//! Searchable index: vector storage, persistence, immutable snapshots, and atomic publication.

mod manager;
mod snapshot;
mod store;
mod vector;

pub use manager::IndexManager;
pub use snapshot::{Collaborators, GenerationSettings, IndexSnapshot, SnapshotError};
pub use store::{IndexMetadata, IndexStore};
pub use vector::{IndexEntry, RetrievedChunk, VectorIndex};

use crate::config::{Config, EmbeddingProvider};
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while building, persisting, loading, or searching an index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// No persisted index exists at the expected location.
    #[error("Index not found at {}. Run an ingestion first.", .0.display())]
    NotFound(PathBuf),
    /// Persisted index was built with a different embedding configuration.
    #[error("Index was created with {field} {persisted}, but current {field} is {configured}")]
    ConfigMismatch {
        /// Which attribute differs (`provider`, `model`, or `dimension`).
        field: &'static str,
        /// Value recorded in the index metadata.
        persisted: String,
        /// Value from the running configuration.
        configured: String,
    },
    /// Vectors disagree on dimension.
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension of the index.
        expected: usize,
        /// Dimension encountered.
        actual: usize,
    },
    /// Inputs could not be assembled into an index.
    #[error("Failed to build index: {0}")]
    Build(String),
    /// Filesystem access failed.
    #[error("Failed to access {}: {source}", path.display())]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A persisted file could not be (de)serialized.
    #[error("Corrupt index file {}: {source}", path.display())]
    Corrupt {
        /// Offending file.
        path: PathBuf,
        /// Underlying serde error.
        #[source]
        source: serde_json::Error,
    },
    /// Blocking worker panicked or was cancelled.
    #[error("Index worker failed: {0}")]
    Worker(String),
}

/// Embedding provider and model an index was (or will be) built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddingIdentity {
    /// Embedding backend.
    pub provider: EmbeddingProvider,
    /// Embedding model identifier.
    pub model: String,
}

impl EmbeddingIdentity {
    /// Identity of the running configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            provider: config.embedding_provider,
            model: config.embedding_model.clone(),
        }
    }

    /// Fail with [`IndexError::ConfigMismatch`] when `metadata` records another provider or model.
    pub fn verify(&self, metadata: &IndexMetadata) -> Result<(), IndexError> {
        let provider_matches = metadata
            .provider
            .parse::<EmbeddingProvider>()
            .is_ok_and(|persisted| persisted == self.provider);
        if !provider_matches {
            return Err(IndexError::ConfigMismatch {
                field: "provider",
                persisted: metadata.provider.clone(),
                configured: self.provider.to_string(),
            });
        }
        if metadata.model != self.model {
            return Err(IndexError::ConfigMismatch {
                field: "model",
                persisted: metadata.model.clone(),
                configured: self.model.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata(provider: &str, model: &str) -> IndexMetadata {
        IndexMetadata {
            provider: provider.into(),
            model: model.into(),
            created_at: None,
            chunk_count: None,
            dimension: None,
        }
    }

    #[test]
    fn verify_accepts_matching_identity() {
        let identity = EmbeddingIdentity {
            provider: EmbeddingProvider::OpenAI,
            model: "text-embedding-3-small".into(),
        };
        assert!(identity.verify(&metadata("openai", "text-embedding-3-small")).is_ok());
    }

    #[test]
    fn verify_reports_provider_before_model() {
        let identity = EmbeddingIdentity {
            provider: EmbeddingProvider::OpenAI,
            model: "text-embedding-3-small".into(),
        };
        let error = identity
            .verify(&metadata("ollama", "nomic-embed-text"))
            .expect_err("mismatch");
        assert!(matches!(error, IndexError::ConfigMismatch { field: "provider", .. }));
        assert_eq!(
            error.to_string(),
            "Index was created with provider ollama, but current provider is openai"
        );

        let error = identity
            .verify(&metadata("openai", "text-embedding-3-large"))
            .expect_err("mismatch");
        assert!(matches!(error, IndexError::ConfigMismatch { field: "model", .. }));
    }

    #[test]
    fn verify_rejects_unknown_provider_label() {
        let identity = EmbeddingIdentity {
            provider: EmbeddingProvider::Local,
            model: "m".into(),
        };
        assert!(identity.verify(&metadata("cohere", "m")).is_err());
    }
}
