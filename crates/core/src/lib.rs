//! Pure domain logic for the generation-job relay.
//!
//! Nothing in this crate performs I/O. It holds the shared id and
//! timestamp aliases, the job status machine, and the admission
//! decision used to gate submissions.

pub mod admission;
pub mod job_status;
pub mod types;
