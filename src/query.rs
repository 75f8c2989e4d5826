//! Question answering over the published snapshot.

use crate::error::ServiceError;
use crate::index::{IndexManager, RetrievedChunk};
use serde::Serialize;
use std::sync::Arc;

/// Maximum characters of chunk text quoted in a citation.
pub const SNIPPET_CHARS: usize = 200;

/// Provenance of one retrieved chunk.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    /// Source file.
    pub source: String,
    /// Chunk identifier.
    pub chunk_id: String,
    /// Leading text of the chunk.
    pub snippet: String,
    /// Page number, for paginated sources.
    pub page: Option<u32>,
    /// Section heading, when known.
    pub section: Option<String>,
}

impl From<&RetrievedChunk> for Citation {
    fn from(hit: &RetrievedChunk) -> Self {
        let metadata = &hit.chunk.metadata;
        Self {
            source: metadata.source.clone(),
            chunk_id: metadata.chunk_id.clone(),
            snippet: hit.chunk.text.chars().take(SNIPPET_CHARS).collect(),
            page: metadata.page,
            section: metadata.section.clone(),
        }
    }
}

/// Answer plus the chunks it was grounded on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryAnswer {
    /// Generated answer.
    pub answer: String,
    /// One citation per retrieved chunk, best match first.
    pub citations: Vec<Citation>,
}

/// Answers questions against whatever snapshot is published when the call starts.
pub struct QueryService {
    index: Arc<IndexManager>,
    default_k: usize,
}

impl QueryService {
    /// Service reading from `index`, retrieving `default_k` chunks when callers omit `k`.
    pub fn new(index: Arc<IndexManager>, default_k: usize) -> Self {
        Self { index, default_k }
    }

    /// Retrieval depth used when a request omits `k`.
    pub fn default_k(&self) -> usize {
        self.default_k
    }

    /// Answer `question`, citing the top `k` chunks.
    ///
    /// The snapshot is captured once; a concurrent re-index does not affect this call.
    pub async fn answer(&self, question: &str, k: Option<usize>) -> Result<QueryAnswer, ServiceError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(ServiceError::Validation("question must not be empty".into()));
        }
        let k = k.unwrap_or(self.default_k);
        if k == 0 {
            return Err(ServiceError::Validation("k must be at least 1".into()));
        }

        let snapshot = self.index.current().ok_or(ServiceError::NotReady)?;

        let (retrieved, generated) =
            tokio::join!(snapshot.retrieve(question, k), snapshot.generate(question));
        let retrieved = retrieved.map_err(|error| {
            tracing::error!(error = %error, "Retrieval failed");
            ServiceError::internal(error)
        })?;
        let answer = generated.map_err(|error| {
            tracing::error!(error = %error, "Answer generation failed");
            ServiceError::internal(error)
        })?;

        tracing::debug!(k, citations = retrieved.len(), "Answered query");
        Ok(QueryAnswer {
            answer,
            citations: retrieved.iter().map(Citation::from).collect(),
        })
    }
}
