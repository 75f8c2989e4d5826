//! Ingestion job lifecycle and the in-memory registry used for status polling.

use dashmap::DashMap;
use serde::Serialize;
use std::fmt;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// How long finished jobs remain pollable.
pub const DEFAULT_JOB_RETENTION: Duration = Duration::hours(1);

/// Lifecycle state of an ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted, waiting for the pipeline.
    Pending,
    /// Pipeline in progress.
    Running,
    /// Index built and published.
    Completed,
    /// Pipeline failed; `error` carries the reason.
    Failed,
}

impl JobStatus {
    /// `true` for states a job never leaves.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Rejected lifecycle transition.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("cannot move ingestion job from {from} to {to}")]
pub struct JobTransitionError {
    /// State the job was in.
    pub from: JobStatus,
    /// State that was requested.
    pub to: JobStatus,
}

/// Externally visible record of one asynchronous ingestion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestJob {
    /// Job identifier (UUID v4).
    pub job_id: Uuid,
    /// Current state.
    pub status: JobStatus,
    /// Current stage label.
    pub progress: Option<String>,
    /// Chunk count, set on completion.
    pub chunks_processed: Option<usize>,
    /// Failure reason, set on failure.
    pub error: Option<String>,
    /// Time the job was accepted.
    #[serde(with = "time::serde::rfc3339")]
    pub accepted_at: OffsetDateTime,
    /// Time the pipeline picked the job up; null while it is queued.
    #[serde(with = "time::serde::rfc3339::option")]
    pub started_at: Option<OffsetDateTime>,
    /// Time the job reached a terminal state.
    #[serde(with = "time::serde::rfc3339::option")]
    pub completed_at: Option<OffsetDateTime>,
}

impl IngestJob {
    /// Freshly accepted job.
    pub fn new(job_id: Uuid, accepted_at: OffsetDateTime) -> Self {
        Self {
            job_id,
            status: JobStatus::Pending,
            progress: Some("queued".to_string()),
            chunks_processed: None,
            error: None,
            accepted_at,
            started_at: None,
            completed_at: None,
        }
    }

    /// pending → running.
    pub fn start(&mut self, at: OffsetDateTime) -> Result<(), JobTransitionError> {
        self.transition(JobStatus::Running, &[JobStatus::Pending])?;
        self.started_at = Some(at);
        Ok(())
    }

    /// Record the stage the pipeline entered. Ignored once the job is terminal.
    pub fn set_progress(&mut self, label: &str) {
        if !self.status.is_terminal() {
            self.progress = Some(label.to_string());
        }
    }

    /// running → completed.
    pub fn complete(&mut self, chunks: usize, at: OffsetDateTime) -> Result<(), JobTransitionError> {
        self.transition(JobStatus::Completed, &[JobStatus::Running])?;
        self.chunks_processed = Some(chunks);
        self.progress = None;
        self.completed_at = Some(at);
        Ok(())
    }

    /// pending | running → failed.
    pub fn fail(&mut self, error: String, at: OffsetDateTime) -> Result<(), JobTransitionError> {
        self.transition(JobStatus::Failed, &[JobStatus::Pending, JobStatus::Running])?;
        self.error = Some(error);
        self.completed_at = Some(at);
        Ok(())
    }

    fn transition(&mut self, to: JobStatus, allowed_from: &[JobStatus]) -> Result<(), JobTransitionError> {
        if !allowed_from.contains(&self.status) {
            return Err(JobTransitionError {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }
}

struct JobEntry {
    job: IngestJob,
    handle: Option<JoinHandle<()>>,
}

/// Concurrent job table keyed by id.
///
/// Each job is mutated only by the task that runs it; pollers read clones.
pub struct JobRegistry {
    jobs: DashMap<Uuid, JobEntry>,
    retention: Duration,
}

impl Default for JobRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_JOB_RETENTION)
    }
}

impl JobRegistry {
    /// Registry that forgets terminal jobs `retention` after they finish.
    pub fn new(retention: Duration) -> Self {
        Self {
            jobs: DashMap::new(),
            retention,
        }
    }

    /// Register a new job.
    pub fn insert(&self, job: IngestJob) {
        self.jobs.insert(job.job_id, JobEntry { job, handle: None });
    }

    /// Keep the task handle that drives `id`.
    pub fn attach_handle(&self, id: Uuid, handle: JoinHandle<()>) {
        if let Some(mut entry) = self.jobs.get_mut(&id) {
            entry.handle = Some(handle);
        }
    }

    /// Apply `update` to the job, returning its result, or `None` for an unknown id.
    pub fn update<R>(&self, id: Uuid, update: impl FnOnce(&mut IngestJob) -> R) -> Option<R> {
        self.jobs.get_mut(&id).map(|mut entry| update(&mut entry.job))
    }

    /// Snapshot of the job record.
    pub fn get(&self, id: Uuid) -> Option<IngestJob> {
        self.jobs.get(&id).map(|entry| entry.job.clone())
    }

    /// Number of tracked jobs.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Whether no jobs are tracked.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Drop terminal jobs that finished more than the retention window before `now`.
    pub fn evict_expired(&self, now: OffsetDateTime) -> usize {
        let before = self.jobs.len();
        self.jobs.retain(|_, entry| {
            let expired = entry.job.status.is_terminal()
                && entry
                    .job
                    .completed_at
                    .is_some_and(|finished| now - finished > self.retention);
            if expired {
                entry.handle.take();
            }
            !expired
        });
        let evicted = before.saturating_sub(self.jobs.len());
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted finished ingestion jobs");
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> IngestJob {
        IngestJob::new(Uuid::new_v4(), OffsetDateTime::now_utc())
    }

    #[test]
    fn happy_path_is_monotonic() {
        let mut job = job();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress.as_deref(), Some("queued"));
        assert!(job.started_at.is_none());

        let picked_up = job.accepted_at + Duration::seconds(30);
        job.start(picked_up).expect("start");
        assert_eq!(job.started_at, Some(picked_up));
        job.set_progress("creating embeddings");
        assert_eq!(job.progress.as_deref(), Some("creating embeddings"));

        job.complete(12, OffsetDateTime::now_utc()).expect("complete");
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.chunks_processed, Some(12));
        assert!(job.completed_at.is_some());
        assert!(job.error.is_none());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut job = job();
        job.start(OffsetDateTime::now_utc()).expect("start");
        job.fail("boom".into(), OffsetDateTime::now_utc()).expect("fail");

        assert_eq!(
            job.complete(1, OffsetDateTime::now_utc()),
            Err(JobTransitionError {
                from: JobStatus::Failed,
                to: JobStatus::Completed
            })
        );
        let started = job.started_at;
        assert!(job.start(OffsetDateTime::now_utc()).is_err());
        assert_eq!(job.started_at, started);
        job.set_progress("saving index");
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("boom"));
        assert_ne!(job.progress.as_deref(), Some("saving index"));
    }

    #[test]
    fn cannot_complete_without_running() {
        let mut job = job();
        assert!(job.complete(1, OffsetDateTime::now_utc()).is_err());
        assert_eq!(job.status, JobStatus::Pending);
    }

    #[test]
    fn serializes_snake_case_with_lowercase_status() {
        let job = job();
        let value = serde_json::to_value(&job).expect("json");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["progress"], "queued");
        assert!(value["chunks_processed"].is_null());
        assert!(value["completed_at"].is_null());
        assert!(value["accepted_at"].is_string());
        assert!(value["started_at"].is_null());
    }

    #[test]
    fn eviction_only_touches_expired_terminal_jobs() {
        let registry = JobRegistry::new(Duration::hours(1));
        let now = OffsetDateTime::now_utc();

        let mut old = IngestJob::new(Uuid::new_v4(), now - Duration::hours(3));
        old.start(now - Duration::hours(3)).expect("start");
        old.complete(1, now - Duration::hours(2)).expect("complete");
        let mut recent = IngestJob::new(Uuid::new_v4(), now);
        recent.start(now - Duration::minutes(10)).expect("start");
        recent.complete(1, now - Duration::minutes(5)).expect("complete");
        let pending = IngestJob::new(Uuid::new_v4(), now - Duration::hours(5));

        let (old_id, recent_id, pending_id) = (old.job_id, recent.job_id, pending.job_id);
        registry.insert(old);
        registry.insert(recent);
        registry.insert(pending);

        assert_eq!(registry.evict_expired(now), 1);
        assert!(registry.get(old_id).is_none());
        assert!(registry.get(recent_id).is_some());
        assert!(registry.get(pending_id).is_some());
    }

    #[test]
    fn update_unknown_job_is_none() {
        let registry = JobRegistry::default();
        let started = registry.update(Uuid::new_v4(), |job| job.start(OffsetDateTime::now_utc()));
        assert!(started.is_none());
        assert!(registry.is_empty());
    }
}
