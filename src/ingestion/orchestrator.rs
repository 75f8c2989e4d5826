//! Drives the ingestion pipeline, synchronously or as tracked background jobs.

use super::chunking::{ChunkingError, SplitSettings, split_documents};
use super::job::{IngestJob, JobRegistry};
use super::loader::{LoaderError, load_documents};
use crate::config::Config;
use crate::document::Chunk;
use crate::embedding::EmbeddingClientError;
use crate::error::ServiceError;
use crate::index::{
    Collaborators, EmbeddingIdentity, IndexError, IndexManager, IndexMetadata, IndexStore,
    VectorIndex,
};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

const EMBEDDING_BATCH_SIZE: usize = 64;

/// Pipeline stage, reported as the job's progress label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestStage {
    /// Reading the corpus.
    LoadingDocuments,
    /// Splitting documents into chunks.
    SplittingDocuments,
    /// Embedding chunk texts.
    CreatingEmbeddings,
    /// Writing the index to disk.
    SavingIndex,
    /// Swapping the new snapshot in.
    PublishingIndex,
}

impl IngestStage {
    /// Progress label shown to pollers.
    pub fn label(self) -> &'static str {
        match self {
            Self::LoadingDocuments => "loading documents",
            Self::SplittingDocuments => "splitting documents",
            Self::CreatingEmbeddings => "creating embeddings",
            Self::SavingIndex => "saving index",
            Self::PublishingIndex => "publishing index",
        }
    }
}

/// Failures inside the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Corpus could not be read.
    #[error(transparent)]
    Loader(#[from] LoaderError),
    /// Splitter rejected its settings.
    #[error(transparent)]
    Chunking(#[from] ChunkingError),
    /// Corpus produced nothing to index.
    #[error("No indexable content found in {}", .0.display())]
    EmptyCorpus(PathBuf),
    /// Embedding provider failed.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Index could not be built or saved.
    #[error(transparent)]
    Index(#[from] IndexError),
    /// Blocking worker panicked.
    #[error("Ingestion worker failed: {0}")]
    Worker(String),
}

impl From<PipelineError> for ServiceError {
    fn from(error: PipelineError) -> Self {
        match error {
            PipelineError::Loader(LoaderError::SourceNotFound(_)) => {
                ServiceError::SourceNotFound(error.to_string())
            }
            PipelineError::Index(inner) => ServiceError::from(inner),
            other => ServiceError::internal(other),
        }
    }
}

/// Where the pipeline reads from and writes to.
#[derive(Debug, Clone)]
pub struct IngestionSettings {
    /// Corpus directory.
    pub docs_path: PathBuf,
    /// Persisted index location.
    pub store: IndexStore,
    /// Embedding identity recorded in the index metadata.
    pub identity: EmbeddingIdentity,
    /// Splitter budgets.
    pub split: SplitSettings,
}

impl IngestionSettings {
    /// Settings derived from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            docs_path: config.docs_path.clone(),
            store: IndexStore::open(config.index_path()),
            identity: EmbeddingIdentity::from_config(config),
            split: SplitSettings {
                chunk_size: config.chunk_size,
                chunk_overlap: config.chunk_overlap,
            },
        }
    }
}

/// Builds indexes from the corpus and hands them to the [`IndexManager`].
///
/// Runs are single-flight: a pipeline lock serialises them, so snapshots are published in the
/// order runs were accepted.
pub struct IngestionOrchestrator {
    settings: IngestionSettings,
    collaborators: Collaborators,
    index: Arc<IndexManager>,
    jobs: JobRegistry,
    pipeline: Mutex<()>,
}

impl IngestionOrchestrator {
    /// Construct an orchestrator publishing into `index`.
    pub fn new(
        settings: IngestionSettings,
        collaborators: Collaborators,
        index: Arc<IndexManager>,
        jobs: JobRegistry,
    ) -> Self {
        Self {
            settings,
            collaborators,
            index,
            jobs,
            pipeline: Mutex::new(()),
        }
    }

    /// Run the pipeline to completion and return the number of indexed chunks.
    ///
    /// The pipeline runs on its own task; dropping the returned future stops the wait, not the
    /// ingestion.
    pub async fn run_sync(self: &Arc<Self>) -> Result<usize, ServiceError> {
        let orchestrator = Arc::clone(self);
        let pipeline = tokio::spawn(async move {
            let _guard = orchestrator.pipeline.lock().await;
            orchestrator.execute(|_| {}).await
        });
        pipeline
            .await
            .map_err(|error| PipelineError::Worker(error.to_string()))
            .and_then(|outcome| outcome)
            .map_err(|error| {
                tracing::error!(error = %error, "Ingestion failed");
                ServiceError::from(error)
            })
    }

    /// Accept a background ingestion and return its job id immediately.
    pub fn start(self: &Arc<Self>) -> Uuid {
        let now = OffsetDateTime::now_utc();
        self.jobs.evict_expired(now);

        let job_id = Uuid::new_v4();
        self.jobs.insert(IngestJob::new(job_id, now));
        tracing::info!(%job_id, "Ingestion job accepted");

        let orchestrator = Arc::clone(self);
        let handle = tokio::spawn(async move { orchestrator.run_job(job_id).await });
        self.jobs.attach_handle(job_id, handle);
        job_id
    }

    /// Current record for `job_id`.
    pub fn status(&self, job_id: Uuid) -> Result<IngestJob, ServiceError> {
        self.jobs
            .get(job_id)
            .ok_or_else(|| ServiceError::NotFound(format!("Ingestion job {job_id} not found")))
    }

    async fn run_job(&self, job_id: Uuid) {
        let _guard = self.pipeline.lock().await;
        let picked_up = OffsetDateTime::now_utc();
        if let Some(Err(error)) = self.jobs.update(job_id, |job| job.start(picked_up)) {
            tracing::warn!(%job_id, error = %error, "Job could not start");
            return;
        }
        tracing::info!(%job_id, "Ingestion job running");

        let outcome = self
            .execute(|stage| {
                self.jobs
                    .update(job_id, |job| job.set_progress(stage.label()));
            })
            .await;

        let now = OffsetDateTime::now_utc();
        let recorded = match outcome {
            Ok(chunks) => {
                tracing::info!(%job_id, chunks, "Ingestion job completed");
                self.jobs.update(job_id, |job| job.complete(chunks, now))
            }
            Err(error) => {
                tracing::error!(%job_id, error = %error, "Ingestion job failed");
                self.jobs.update(job_id, |job| job.fail(error.to_string(), now))
            }
        };
        if let Some(Err(error)) = recorded {
            tracing::warn!(%job_id, error = %error, "Job outcome not recorded");
        }
    }

    async fn execute(&self, report: impl Fn(IngestStage)) -> Result<usize, PipelineError> {
        report(IngestStage::LoadingDocuments);
        let docs_path = self.settings.docs_path.clone();
        let documents = blocking(move || load_documents(&docs_path)).await??;

        report(IngestStage::SplittingDocuments);
        let split = self.settings.split;
        let chunks = blocking(move || split_documents(documents, split)).await??;
        if chunks.is_empty() {
            return Err(PipelineError::EmptyCorpus(self.settings.docs_path.clone()));
        }

        report(IngestStage::CreatingEmbeddings);
        let vectors = self.embed(&chunks).await?;
        let chunk_count = chunks.len();
        let index = VectorIndex::build(chunks, vectors)?;

        report(IngestStage::SavingIndex);
        let created_at = OffsetDateTime::now_utc();
        let metadata = IndexMetadata::new(&self.settings.identity, created_at, &index);
        let store = self.settings.store.clone();
        let index = blocking(move || store.save(&index, &metadata).map(|()| index)).await??;

        report(IngestStage::PublishingIndex);
        let snapshot = self
            .collaborators
            .snapshot(self.settings.identity.clone(), index, created_at);
        self.index.replace(Arc::new(snapshot));

        Ok(chunk_count)
    }

    async fn embed(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>, PipelineError> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(EMBEDDING_BATCH_SIZE) {
            let texts = batch.iter().map(|chunk| chunk.text.clone()).collect();
            let embedded = self.collaborators.embedder.generate_embeddings(texts).await?;
            if embedded.len() != batch.len() {
                return Err(EmbeddingClientError::InvalidResponse(format!(
                    "expected {} vectors, received {}",
                    batch.len(),
                    embedded.len()
                ))
                .into());
            }
            vectors.extend(embedded);
        }
        tracing::debug!(vectors = vectors.len(), "Embedded chunks");
        Ok(vectors)
    }
}

async fn blocking<T, F>(work: F) -> Result<T, PipelineError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|error| PipelineError::Worker(error.to_string()))
}
