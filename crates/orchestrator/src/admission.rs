//! Per-owner admission gate backed by the job store.

use std::sync::Arc;

use relay_core::admission::{decide, AdmissionDecision, AdmissionLimits};
use relay_db::{JobRepository, RepoError};

/// Counts an owner's active jobs and compares them with the ceiling for
/// the submission's scope.
///
/// The count and the later submission are not atomic: concurrent
/// submissions from one owner can overshoot the ceiling by the number of
/// racing calls.
pub struct AdmissionController {
    repo: Arc<dyn JobRepository>,
    limits: AdmissionLimits,
}

impl AdmissionController {
    pub fn new(repo: Arc<dyn JobRepository>, limits: AdmissionLimits) -> Self {
        Self { repo, limits }
    }

    pub fn limits(&self) -> &AdmissionLimits {
        &self.limits
    }

    pub async fn check(
        &self,
        owner_id: &str,
        scope_id: Option<&str>,
    ) -> Result<AdmissionDecision, RepoError> {
        let ceiling = self.limits.ceiling_for(scope_id);
        let active = self.repo.count_active_jobs(owner_id, scope_id).await?;
        let decision = decide(active, ceiling);

        tracing::debug!(owner_id, scope_id, active, ceiling, ?decision, "Admission check");
        Ok(decision)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use relay_core::admission::QueueFull;
    use relay_db::{InMemoryJobRepo, NewJob};

    use super::*;

    async fn seed(repo: &InMemoryJobRepo, owner: &str, scope: Option<&str>, n: usize) {
        for i in 0..n {
            repo.create_job(NewJob {
                correlation_id: format!("{owner}-{}-{i}", scope.unwrap_or("none")),
                owner_id: owner.into(),
                scope_id: scope.map(Into::into),
                payload: serde_json::json!({}),
            })
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn boundary_at_ceiling() {
        let repo = Arc::new(InMemoryJobRepo::new());
        let controller = AdmissionController::new(repo.clone(), AdmissionLimits::new(2));

        seed(&repo, "u1", None, 1).await;
        assert_eq!(controller.check("u1", None).await.unwrap(), AdmissionDecision::Accept);

        seed(&repo, "u1", None, 1).await;
        assert_matches!(
            controller.check("u1", None).await.unwrap(),
            AdmissionDecision::Reject(QueueFull { active: 2, ceiling: 2 })
        );
    }

    #[tokio::test]
    async fn scope_override_applies_only_to_that_scope() {
        let repo = Arc::new(InMemoryJobRepo::new());
        let limits = AdmissionLimits::new(1).with_scope_ceiling("big", 5);
        let controller = AdmissionController::new(repo.clone(), limits);

        seed(&repo, "u1", Some("big"), 3).await;
        seed(&repo, "u1", Some("small"), 1).await;

        assert!(controller.check("u1", Some("big")).await.unwrap().is_accepted());
        assert!(!controller.check("u1", Some("small")).await.unwrap().is_accepted());
        assert!(controller.check("u2", Some("small")).await.unwrap().is_accepted());
    }
}
