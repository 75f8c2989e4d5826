//! Request-facing error taxonomy.
//!
//! Each variant maps to exactly one HTTP status in [`crate::api`]. Collaborator errors are
//! folded into [`ServiceError::Internal`] so callers only ever see the message.

use crate::index::IndexError;
use thiserror::Error;

/// Errors surfaced to clients of the serving layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServiceError {
    /// Credential header missing.
    #[error("{0}")]
    Unauthorized(String),
    /// Credential header present but wrong.
    #[error("{0}")]
    Forbidden(String),
    /// Caller exhausted its sliding-window budget.
    #[error("Rate limit exceeded. Max {limit} requests/minute. Try again shortly.")]
    RateLimitExceeded {
        /// Configured ceiling per minute.
        limit: usize,
    },
    /// Request body failed validation.
    #[error("{0}")]
    Validation(String),
    /// No index snapshot has been published yet.
    #[error("No index loaded. Call /ingest first")]
    NotReady,
    /// Corpus location missing at ingestion time.
    #[error("{0}")]
    SourceNotFound(String),
    /// Persisted index was built with a different embedding configuration.
    #[error("{0}")]
    ConfigMismatch(String),
    /// Requested resource (for example an ingestion job) does not exist.
    #[error("{0}")]
    NotFound(String),
    /// Any other failure in collaborators or orchestration.
    #[error("{0}")]
    Internal(String),
}

impl ServiceError {
    /// Build an [`ServiceError::Internal`] from any displayable failure.
    pub fn internal(error: impl std::fmt::Display) -> Self {
        Self::Internal(error.to_string())
    }
}

impl From<IndexError> for ServiceError {
    fn from(error: IndexError) -> Self {
        match error {
            IndexError::NotFound(_) => Self::NotReady,
            IndexError::ConfigMismatch { .. } => Self::ConfigMismatch(error.to_string()),
            other => Self::internal(other),
        }
    }
}
