//! Errors returned by [`JobOrchestrator`](crate::JobOrchestrator) operations.

use relay_db::RepoError;

use crate::compute::ComputeError;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// The owner already has `ceiling` or more active jobs. Nothing was
    /// submitted to the backend.
    #[error("Queue limit reached for {owner_id} ({active}/{ceiling} active jobs)")]
    AdmissionRejected {
        owner_id: String,
        active: u32,
        ceiling: u32,
    },

    /// The backend refused or failed the submission. No job row exists.
    #[error("Submission failed: {0}")]
    Submission(#[from] ComputeError),

    #[error(transparent)]
    Repository(#[from] RepoError),
}
