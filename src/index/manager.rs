//! Atomic publication of the served snapshot.
//!
//! Readers take a lock-free `Arc` clone of whatever is published; `replace` swaps the pointer
//! in one store. A reader that already holds the previous snapshot keeps using it until it
//! drops its `Arc`, after which the old index is freed.

use super::{Collaborators, EmbeddingIdentity, IndexError, IndexSnapshot, IndexStore};
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use time::OffsetDateTime;

/// Owner of the currently served [`IndexSnapshot`].
#[derive(Default)]
pub struct IndexManager {
    current: ArcSwapOption<IndexSnapshot>,
}

impl IndexManager {
    /// Manager with nothing published.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot published at call time, if any. Never blocks on a concurrent [`Self::replace`].
    pub fn current(&self) -> Option<Arc<IndexSnapshot>> {
        self.current.load_full()
    }

    /// Whether a snapshot is published.
    pub fn is_loaded(&self) -> bool {
        self.current.load().is_some()
    }

    /// Publish `snapshot`, superseding the previous one. Latest wins; there is no rollback.
    pub fn replace(&self, snapshot: Arc<IndexSnapshot>) {
        tracing::info!(
            provider = %snapshot.identity().provider,
            model = %snapshot.identity().model,
            chunks = snapshot.chunk_count(),
            "Publishing index snapshot"
        );
        self.current.store(Some(snapshot));
    }

    /// Load the persisted index in `store`, verify it against `expected` and the embedder's
    /// output dimension, and publish it.
    ///
    /// Any failure (missing index, configuration mismatch, corrupt files) leaves the currently
    /// published snapshot untouched.
    pub async fn load_persisted(
        &self,
        store: IndexStore,
        expected: EmbeddingIdentity,
        collaborators: &Collaborators,
    ) -> Result<Arc<IndexSnapshot>, IndexError> {
        let verify_identity = expected.clone();
        let configured_dimension = collaborators.embedder.dimension();
        let (index, created_at) = tokio::task::spawn_blocking(move || {
            let metadata = store.load_metadata()?;
            if let Some(metadata) = &metadata {
                verify_identity.verify(metadata)?;
                if let Some(persisted) = metadata.dimension {
                    verify_dimension(persisted, configured_dimension)?;
                }
            } else {
                tracing::warn!(path = %store.dir().display(), "Index has no metadata; skipping compatibility check");
            }
            let index = store.load_index()?;
            if !index.is_empty() {
                verify_dimension(index.dimension(), configured_dimension)?;
            }
            let created_at = metadata
                .and_then(|metadata| metadata.created_at)
                .unwrap_or_else(OffsetDateTime::now_utc);
            Ok::<_, IndexError>((index, created_at))
        })
        .await
        .map_err(|error| IndexError::Worker(error.to_string()))??;

        let snapshot = Arc::new(collaborators.snapshot(expected, index, created_at));
        self.replace(Arc::clone(&snapshot));
        Ok(snapshot)
    }
}

fn verify_dimension(persisted: usize, configured: Option<usize>) -> Result<(), IndexError> {
    match configured {
        Some(configured) if configured != persisted => Err(IndexError::ConfigMismatch {
            field: "dimension",
            persisted: persisted.to_string(),
            configured: configured.to_string(),
        }),
        _ => Ok(()),
    }
}
