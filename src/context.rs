//! Process-wide serving state assembled once at startup.

use crate::auth::AuthGate;
use crate::config::Config;
use crate::embedding::{EmbeddingClientError, build_embedding_client};
use crate::generation::{GenerationClientError, build_answer_generator};
use crate::health::HealthReporter;
use crate::index::{Collaborators, EmbeddingIdentity, GenerationSettings, IndexError, IndexManager, IndexStore};
use crate::ingestion::{IngestionOrchestrator, IngestionSettings, JobRegistry};
use crate::query::QueryService;
use crate::rate_limit::RateLimiter;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::task::JoinHandle;

/// How often idle rate-limit buckets are swept.
pub const LIMITER_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Collaborators could not be built from configuration.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Embedding provider setup failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Generation provider setup failed.
    #[error(transparent)]
    Generation(#[from] GenerationClientError),
}

/// Build the embedding client and answer generator selected by `config`.
pub fn build_collaborators(config: &Config) -> Result<Collaborators, StartupError> {
    Ok(Collaborators {
        embedder: build_embedding_client(config)?,
        generator: build_answer_generator(config)?,
        generation: GenerationSettings {
            model: config.llm_model.clone(),
            temperature: config.llm_temperature,
            context_k: config.default_k,
        },
    })
}

/// Everything a request handler needs, shared behind one `Arc`.
pub struct ServingContext {
    /// Effective configuration.
    pub config: Config,
    /// Credential checks.
    pub auth: AuthGate,
    /// Query admission control.
    pub limiter: RateLimiter,
    /// Published snapshot.
    pub index: Arc<IndexManager>,
    /// Re-indexing.
    pub ingestion: Arc<IngestionOrchestrator>,
    /// Question answering.
    pub query: QueryService,
    /// Health reporting.
    pub health: HealthReporter,
    collaborators: Collaborators,
}

impl ServingContext {
    /// Wire components together with nothing published.
    pub fn new(config: Config, collaborators: Collaborators) -> Self {
        let index = Arc::new(IndexManager::new());
        let ingestion = Arc::new(IngestionOrchestrator::new(
            IngestionSettings::from_config(&config),
            collaborators.clone(),
            Arc::clone(&index),
            JobRegistry::default(),
        ));
        Self {
            auth: AuthGate::new(
                config.environment,
                config.api_key.clone(),
                config.admin_api_key.clone(),
            ),
            limiter: RateLimiter::new(config.rate_limit_per_minute),
            query: QueryService::new(Arc::clone(&index), config.default_k),
            health: HealthReporter::new(Arc::clone(&index)),
            ingestion,
            index,
            collaborators,
            config,
        }
    }

    /// Build the context and publish the persisted index if one is compatible.
    ///
    /// A missing or mismatched index is logged; the service still starts and reports
    /// `index_loaded: false` until an ingestion succeeds.
    pub async fn bootstrap(config: Config, collaborators: Collaborators) -> Arc<Self> {
        let context = Arc::new(Self::new(config, collaborators));
        match context.load_persisted().await {
            Ok(()) => tracing::info!("Index loaded on startup"),
            Err(IndexError::NotFound(path)) => {
                tracing::info!(path = %path.display(), "No existing index found; call /ingest to build one");
            }
            Err(error) => tracing::warn!(error = %error, "Persisted index not loaded"),
        }
        context
    }

    /// Load and publish the index persisted for the configured embedding identity.
    pub async fn load_persisted(&self) -> Result<(), IndexError> {
        self.index
            .load_persisted(
                IndexStore::open(self.config.index_path()),
                EmbeddingIdentity::from_config(&self.config),
                &self.collaborators,
            )
            .await
            .map(|_| ())
    }

    /// Periodically drop idle rate-limit buckets. The task ends once the context is dropped.
    pub fn spawn_limiter_sweep(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let context: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(context) = context.upgrade() else {
                    break;
                };
                context.limiter.sweep_at(Instant::now());
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{EmbeddingProvider, GenerationProvider};

    fn config(index_root: &std::path::Path) -> Config {
        Config {
            embedding_provider: EmbeddingProvider::Local,
            embedding_dimension: 16,
            llm_provider: GenerationProvider::Ollama,
            index_root: index_root.to_path_buf(),
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_tolerates_missing_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = config(dir.path());
        let collaborators = build_collaborators(&config).expect("collaborators");
        let context = ServingContext::bootstrap(config, collaborators).await;
        assert!(!context.health.status().index_loaded);
    }

    #[tokio::test]
    async fn openai_embeddings_without_key_fail_at_startup() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = Config {
            embedding_provider: EmbeddingProvider::OpenAI,
            openai_api_key: None,
            ..config(dir.path())
        };
        assert!(matches!(
            build_collaborators(&config),
            Err(StartupError::Embedding(_))
        ));
    }
}
