//! Where finished jobs are handed off.
//!
//! The orchestrator does not render or upload results itself. It calls a
//! [`DeliverySink`] once a completed job's debounce window has passed, and
//! immediately when a job fails.

use std::sync::Arc;

use async_trait::async_trait;
use relay_core::types::DbId;
use relay_db::Job;
use relay_events::{DeliveryEvent, EventBus, JOB_COMPLETED, JOB_FAILED};

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("No delivery subscriber is listening")]
    NoSubscribers,

    #[error("Failed to encode job {job_id}: {source}")]
    Encode {
        job_id: DbId,
        #[source]
        source: serde_json::Error,
    },
}

#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Hand a Completed job (as currently persisted) to its owner.
    async fn deliver(&self, job: &Job) -> Result<(), DeliveryError>;

    /// Tell the owner that a job Failed.
    async fn notify_failure(&self, job: &Job) -> Result<(), DeliveryError>;
}

/// Publishes hand-offs on the in-process [`EventBus`].
pub struct BusDeliverySink {
    bus: Arc<EventBus>,
}

impl BusDeliverySink {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    fn publish(&self, event_type: &str, job: &Job) -> Result<(), DeliveryError> {
        let payload = serde_json::to_value(job).map_err(|source| DeliveryError::Encode {
            job_id: job.id,
            source,
        })?;
        let event = DeliveryEvent::new(event_type, job.id, &job.correlation_id, &job.owner_id)
            .with_scope(job.scope_id.clone())
            .with_payload(payload);

        if self.bus.publish(event) == 0 {
            return Err(DeliveryError::NoSubscribers);
        }
        Ok(())
    }
}

#[async_trait]
impl DeliverySink for BusDeliverySink {
    async fn deliver(&self, job: &Job) -> Result<(), DeliveryError> {
        self.publish(JOB_COMPLETED, job)
    }

    async fn notify_failure(&self, job: &Job) -> Result<(), DeliveryError> {
        self.publish(JOB_FAILED, job)
    }
}
