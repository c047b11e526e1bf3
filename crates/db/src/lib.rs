//! Job records and the storage contract the orchestrator relies on.
//!
//! [`JobRepository`] is the seam to whatever durable store backs the
//! deployment. [`InMemoryJobRepo`] is the in-process implementation
//! used by the worker binary and by tests.

pub mod models;
pub mod repositories;

pub use models::job::{Job, NewJob, StatusUpdate};
pub use repositories::{InMemoryJobRepo, JobRepository, RepoError, UpdateOutcome};
