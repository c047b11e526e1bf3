//! Job lifecycle status and its transition table.
//!
//! ```text
//! Pending ──► Running ──► Completed
//!    │           │  └───► Failed
//!    └───────────┴──────► Cancelled
//! ```
//!
//! Completed, Failed and Cancelled are terminal: once a job reaches one
//! of them its status never changes again. The single exception is a
//! repeated completion signal for an already Completed job, which is
//! accepted as an artifact refresh without touching the status.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Statuses that count against an owner's admission ceiling.
pub const ACTIVE_STATUSES: [JobStatus; 2] = [JobStatus::Pending, JobStatus::Running];

impl JobStatus {
    /// Lower-case name, matching the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// `true` for Completed, Failed and Cancelled.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// `true` for Pending and Running.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an accepted status update affects the job row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// The status moves along an edge of the state machine.
    Advance,
    /// Completed -> Completed: only the artifacts are replaced.
    Refresh,
}

/// A status update that the state machine does not allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid job transition: {from} -> {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// Validate a status update from `from` to `to`.
///
/// Storage implementations must call this under the same lock (or in
/// the same statement) that applies the update, so that a terminal
/// status can never be overwritten by an event processed later.
pub fn check_transition(from: JobStatus, to: JobStatus) -> Result<Transition, TransitionError> {
    use JobStatus::*;

    match (from, to) {
        (Pending, Running)
        | (Running, Completed)
        | (Running, Failed)
        | (Pending, Cancelled)
        | (Running, Cancelled) => Ok(Transition::Advance),
        (Completed, Completed) => Ok(Transition::Refresh),
        _ => Err(TransitionError { from, to }),
    }
}
