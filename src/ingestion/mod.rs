//! Corpus ingestion: loading, splitting, job tracking, and orchestration.

mod chunking;
mod job;
mod loader;
mod orchestrator;

pub use chunking::{ChunkingError, SplitSettings, split_documents};
pub use job::{DEFAULT_JOB_RETENTION, IngestJob, JobRegistry, JobStatus, JobTransitionError};
pub use loader::{LoaderError, load_documents};
pub use orchestrator::{IngestStage, IngestionOrchestrator, IngestionSettings, PipelineError};
