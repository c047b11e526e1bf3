//! Storage contract for job rows and its in-process implementation.

pub mod job_repo;
pub mod memory;

pub use job_repo::{JobRepository, RepoError, UpdateOutcome};
pub use memory::InMemoryJobRepo;
