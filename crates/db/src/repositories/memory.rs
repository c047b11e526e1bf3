//! In-process [`JobRepository`] backed by a mutex-guarded map.
//!
//! Rows live for the lifetime of the process. Every mutation holds the
//! store lock across read-check-write, which is what makes the
//! terminal-status guard race-free.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use relay_core::types::DbId;
use tokio::sync::Mutex;

use crate::models::job::{Job, NewJob, StatusUpdate};
use crate::repositories::job_repo::{JobRepository, RepoError, UpdateOutcome};

#[derive(Default)]
struct Store {
    next_id: DbId,
    jobs: HashMap<DbId, Job>,
    by_correlation_id: HashMap<String, DbId>,
}

impl Store {
    fn job(&self, correlation_id: &str) -> Option<&Job> {
        let id = self.by_correlation_id.get(correlation_id)?;
        self.jobs.get(id)
    }

    fn job_mut(&mut self, correlation_id: &str) -> Option<&mut Job> {
        let id = self.by_correlation_id.get(correlation_id)?;
        self.jobs.get_mut(id)
    }
}

/// Job store kept in memory.
#[derive(Default)]
pub struct InMemoryJobRepo {
    store: Mutex<Store>,
}

impl InMemoryJobRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows held, in any status.
    pub async fn len(&self) -> usize {
        self.store.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepo {
    async fn create_job(&self, new_job: NewJob) -> Result<Job, RepoError> {
        let mut store = self.store.lock().await;
        if store.by_correlation_id.contains_key(&new_job.correlation_id) {
            return Err(RepoError::DuplicateCorrelationId(new_job.correlation_id));
        }

        store.next_id += 1;
        let id = store.next_id;
        let job = Job::pending(id, new_job, Utc::now());
        store
            .by_correlation_id
            .insert(job.correlation_id.clone(), id);
        store.jobs.insert(id, job.clone());
        Ok(job)
    }

    async fn get_job_by_correlation_id(
        &self,
        correlation_id: &str,
    ) -> Result<Option<Job>, RepoError> {
        let store = self.store.lock().await;
        Ok(store.job(correlation_id).cloned())
    }

    async fn get_job_by_id(&self, id: DbId) -> Result<Option<Job>, RepoError> {
        Ok(self.store.lock().await.jobs.get(&id).cloned())
    }

    async fn update_status(
        &self,
        correlation_id: &str,
        update: StatusUpdate,
    ) -> Result<UpdateOutcome, RepoError> {
        let mut store = self.store.lock().await;
        let Some(job) = store.job_mut(correlation_id) else {
            return Ok(UpdateOutcome::NotFound);
        };

        let previous = job.status;
        match job.apply_update(update, Utc::now()) {
            Ok(_) => Ok(UpdateOutcome::Updated {
                job: job.clone(),
                previous,
            }),
            Err(e) => {
                tracing::debug!(correlation_id, error = %e, "Status update rejected");
                Ok(UpdateOutcome::Rejected { current: e.from })
            }
        }
    }

    async fn update_progress(
        &self,
        correlation_id: &str,
        value: i32,
        max: i32,
    ) -> Result<UpdateOutcome, RepoError> {
        let mut store = self.store.lock().await;
        let Some(job) = store.job_mut(correlation_id) else {
            return Ok(UpdateOutcome::NotFound);
        };

        let previous = job.status;
        match job.apply_progress(value, max) {
            Ok(()) => Ok(UpdateOutcome::Updated {
                job: job.clone(),
                previous,
            }),
            Err(current) => Ok(UpdateOutcome::Rejected { current }),
        }
    }

    async fn count_active_jobs(
        &self,
        owner_id: &str,
        scope_id: Option<&str>,
    ) -> Result<u32, RepoError> {
        let store = self.store.lock().await;
        let count = store
            .jobs
            .values()
            .filter(|job| job.owner_id == owner_id)
            .filter(|job| scope_id.is_none() || job.scope_id.as_deref() == scope_id)
            .filter(|job| job.status.is_active())
            .count();
        Ok(count as u32)
    }

    async fn list_pending(&self) -> Result<Vec<Job>, RepoError> {
        let store = self.store.lock().await;
        let mut jobs: Vec<Job> = store
            .jobs
            .values()
            .filter(|job| job.status.is_active())
            .cloned()
            .collect();
        jobs.sort_by_key(|job| (job.created_at, job.id));
        Ok(jobs)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use relay_core::job_status::JobStatus;

    use super::*;

    fn new_job(correlation_id: &str, owner_id: &str, scope_id: Option<&str>) -> NewJob {
        NewJob {
            correlation_id: correlation_id.into(),
            owner_id: owner_id.into(),
            scope_id: scope_id.map(Into::into),
            payload: serde_json::json!({"3": {"class_type": "KSampler"}}),
        }
    }

    #[tokio::test]
    async fn create_assigns_ids_and_pending_status() {
        let repo = InMemoryJobRepo::new();
        let a = repo.create_job(new_job("p-a", "u1", None)).await.unwrap();
        let b = repo.create_job(new_job("p-b", "u1", None)).await.unwrap();

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(a.status, JobStatus::Pending);
        assert_eq!(repo.len().await, 2);
    }

    #[tokio::test]
    async fn duplicate_correlation_id_is_rejected() {
        let repo = InMemoryJobRepo::new();
        repo.create_job(new_job("p-a", "u1", None)).await.unwrap();

        let err = repo.create_job(new_job("p-a", "u2", None)).await.unwrap_err();
        assert_matches!(err, RepoError::DuplicateCorrelationId(id) if id == "p-a");
    }

    #[tokio::test]
    async fn lookups_by_both_keys() {
        let repo = InMemoryJobRepo::new();
        let job = repo.create_job(new_job("p-a", "u1", None)).await.unwrap();

        let by_corr = repo.get_job_by_correlation_id("p-a").await.unwrap();
        let by_id = repo.get_job_by_id(job.id).await.unwrap();
        assert_eq!(by_corr, Some(job.clone()));
        assert_eq!(by_id, Some(job));
        assert!(repo.get_job_by_correlation_id("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_status_unknown_correlation_id() {
        let repo = InMemoryJobRepo::new();
        let outcome = repo
            .update_status("missing", StatusUpdate::Started)
            .await
            .unwrap();
        assert_eq!(outcome, UpdateOutcome::NotFound);
    }

    #[tokio::test]
    async fn update_reports_previous_status() {
        let repo = InMemoryJobRepo::new();
        repo.create_job(new_job("p-a", "u1", None)).await.unwrap();
        repo.update_status("p-a", StatusUpdate::Started).await.unwrap();

        let outcome = repo
            .update_status("p-a", StatusUpdate::Cancelled)
            .await
            .unwrap();
        assert_matches!(
            outcome,
            UpdateOutcome::Updated { job, previous: JobStatus::Running }
                if job.status == JobStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn terminal_status_is_not_overwritten() {
        let repo = InMemoryJobRepo::new();
        repo.create_job(new_job("p-a", "u1", None)).await.unwrap();
        repo.update_status("p-a", StatusUpdate::Cancelled).await.unwrap();

        let outcome = repo
            .update_status("p-a", StatusUpdate::Started)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            UpdateOutcome::Rejected {
                current: JobStatus::Cancelled
            }
        );

        let job = repo.get_job_by_correlation_id("p-a").await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.started_at.is_none());
    }

    #[tokio::test]
    async fn progress_rejected_unless_running() {
        let repo = InMemoryJobRepo::new();
        repo.create_job(new_job("p-a", "u1", None)).await.unwrap();

        let outcome = repo.update_progress("p-a", 1, 4).await.unwrap();
        assert_eq!(
            outcome,
            UpdateOutcome::Rejected {
                current: JobStatus::Pending
            }
        );

        repo.update_status("p-a", StatusUpdate::Started).await.unwrap();
        let outcome = repo.update_progress("p-a", 1, 4).await.unwrap();
        assert_matches!(outcome, UpdateOutcome::Updated { job, .. } if job.progress_current == 1);
    }

    #[tokio::test]
    async fn count_active_respects_owner_scope_and_status() {
        let repo = InMemoryJobRepo::new();
        repo.create_job(new_job("p-1", "u1", Some("g1"))).await.unwrap();
        repo.create_job(new_job("p-2", "u1", Some("g2"))).await.unwrap();
        repo.create_job(new_job("p-3", "u1", Some("g1"))).await.unwrap();
        repo.create_job(new_job("p-4", "u2", Some("g1"))).await.unwrap();
        repo.update_status("p-3", StatusUpdate::Started).await.unwrap();
        repo.update_status("p-3", StatusUpdate::Failed { error_detail: "x".into() })
            .await
            .unwrap();

        assert_eq!(repo.count_active_jobs("u1", None).await.unwrap(), 2);
        assert_eq!(repo.count_active_jobs("u1", Some("g1")).await.unwrap(), 1);
        assert_eq!(repo.count_active_jobs("u1", Some("g3")).await.unwrap(), 0);
        assert_eq!(repo.count_active_jobs("u2", None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn list_pending_returns_active_jobs_oldest_first() {
        let repo = InMemoryJobRepo::new();
        repo.create_job(new_job("p-1", "u1", None)).await.unwrap();
        repo.create_job(new_job("p-2", "u2", None)).await.unwrap();
        repo.create_job(new_job("p-3", "u3", None)).await.unwrap();
        repo.update_status("p-2", StatusUpdate::Started).await.unwrap();
        repo.update_status("p-3", StatusUpdate::Cancelled).await.unwrap();

        let pending = repo.list_pending().await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|j| j.correlation_id.as_str()).collect();
        assert_eq!(ids, vec!["p-1", "p-2"]);
    }
}
