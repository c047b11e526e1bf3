//! Job entity model, creation DTO, and the guarded status mutation.

use relay_core::job_status::{check_transition, JobStatus, Transition, TransitionError};
use relay_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};

/// A generation job tracked from submission to a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub id: DbId,
    /// Id returned by the compute backend on submission. Unique.
    pub correlation_id: String,
    pub owner_id: String,
    pub scope_id: Option<String>,
    pub status: JobStatus,
    /// The workflow graph that was submitted.
    pub payload: serde_json::Value,
    pub progress_current: i32,
    pub progress_total: i32,
    /// Output descriptors reported by the backend; set on completion.
    pub artifacts: Vec<serde_json::Value>,
    /// `"<exception type>: <message>"`; set on failure.
    pub error_detail: Option<String>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

/// DTO for inserting a freshly submitted job (always Pending).
#[derive(Debug, Clone, Deserialize)]
pub struct NewJob {
    pub correlation_id: String,
    pub owner_id: String,
    pub scope_id: Option<String>,
    pub payload: serde_json::Value,
}

/// A status change requested by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusUpdate {
    Started,
    Completed { artifacts: Vec<serde_json::Value> },
    Failed { error_detail: String },
    Cancelled,
}

impl StatusUpdate {
    /// The status this update moves the job to.
    pub fn target(&self) -> JobStatus {
        match self {
            Self::Started => JobStatus::Running,
            Self::Completed { .. } => JobStatus::Completed,
            Self::Failed { .. } => JobStatus::Failed,
            Self::Cancelled => JobStatus::Cancelled,
        }
    }
}

impl Job {
    /// Build the Pending row for a new submission.
    pub fn pending(id: DbId, new_job: NewJob, now: Timestamp) -> Self {
        Self {
            id,
            correlation_id: new_job.correlation_id,
            owner_id: new_job.owner_id,
            scope_id: new_job.scope_id,
            status: JobStatus::Pending,
            payload: new_job.payload,
            progress_current: 0,
            progress_total: 0,
            artifacts: Vec::new(),
            error_detail: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Apply `update` if the state machine allows it.
    ///
    /// On rejection the row is left untouched. A Completed -> Completed
    /// refresh replaces the artifacts but keeps `completed_at`.
    pub fn apply_update(
        &mut self,
        update: StatusUpdate,
        now: Timestamp,
    ) -> Result<Transition, TransitionError> {
        let transition = check_transition(self.status, update.target())?;
        self.status = update.target();

        match update {
            StatusUpdate::Started => {
                self.started_at = Some(now);
            }
            StatusUpdate::Completed { artifacts } => {
                self.artifacts = artifacts;
                if transition == Transition::Advance {
                    self.completed_at = Some(now);
                }
            }
            StatusUpdate::Failed { error_detail } => {
                self.error_detail = Some(error_detail);
                self.completed_at = Some(now);
            }
            StatusUpdate::Cancelled => {
                self.completed_at = Some(now);
            }
        }

        Ok(transition)
    }

    /// Record step progress. Only Running jobs accept progress; any other
    /// status is returned as the error.
    pub fn apply_progress(&mut self, value: i32, max: i32) -> Result<(), JobStatus> {
        if self.status != JobStatus::Running {
            return Err(self.status);
        }
        self.progress_current = value;
        self.progress_total = max;
        Ok(())
    }

    /// Completion percentage (0-100) while Running.
    pub fn progress_percent(&self) -> Option<i16> {
        if self.status != JobStatus::Running {
            return None;
        }
        if self.progress_total <= 0 {
            return Some(0);
        }
        let percent = (self.progress_current as f64 / self.progress_total as f64) * 100.0;
        Some(percent.clamp(0.0, 100.0) as i16)
    }

    /// Wall-clock time between start and completion, if both happened.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(started), Some(completed)) => Some(completed - started),
            _ => None,
        }
    }
}
