//! The [`JobRepository`] trait.

use async_trait::async_trait;
use relay_core::job_status::JobStatus;
use relay_core::types::DbId;

use crate::models::job::{Job, NewJob, StatusUpdate};

/// Errors surfaced by a job store.
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// A job with this correlation id already exists.
    #[error("Duplicate correlation id: {0}")]
    DuplicateCorrelationId(String),

    /// The backing store failed.
    #[error("Storage error: {0}")]
    Storage(String),
}

/// Result of a guarded mutation on a single job.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// The change was applied; carries the row as persisted and the
    /// status it had before.
    Updated { job: Job, previous: JobStatus },
    /// The job exists but its current status does not accept the change.
    Rejected { current: JobStatus },
    /// No job has that correlation id.
    NotFound,
}

/// Persistence operations used by the orchestrator.
///
/// Implementations must apply [`Job::apply_update`] and
/// [`Job::apply_progress`] atomically with the read of the current row,
/// so that concurrent events for one job cannot overwrite a terminal
/// status.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new Pending job.
    async fn create_job(&self, new_job: NewJob) -> Result<Job, RepoError>;

    async fn get_job_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Option<Job>, RepoError>;

    async fn get_job_by_id(&self, id: DbId) -> Result<Option<Job>, RepoError>;

    /// Apply a status change through the transition guard.
    async fn update_status(
        &self,
        correlation_id: &str,
        update: StatusUpdate,
    ) -> Result<UpdateOutcome, RepoError>;

    /// Record step progress for a Running job.
    async fn update_progress(
        &self,
        correlation_id: &str,
        value: i32,
        max: i32,
    ) -> Result<UpdateOutcome, RepoError>;

    /// Count Pending and Running jobs of `owner_id`, optionally restricted
    /// to `scope_id`.
    async fn count_active_jobs(
        &self,
        owner_id: &str,
        scope_id: Option<&str>,
    ) -> Result<u32, RepoError>;

    /// All Pending and Running jobs, oldest first.
    async fn list_pending(&self) -> Result<Vec<Job>, RepoError>;
}
