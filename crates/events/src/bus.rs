//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] carries [`DeliveryEvent`]s from the orchestrator to
//! whatever renders or delivers results to the job owner. It is shared
//! via `Arc<EventBus>`.

use chrono::{DateTime, Utc};
use relay_core::types::DbId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// DeliveryEvent
// ---------------------------------------------------------------------------

/// Event name for a completed job ready to be handed to its owner.
pub const JOB_COMPLETED: &str = "job.completed";

/// Event name for a job that failed on the backend.
pub const JOB_FAILED: &str = "job.failed";

/// A job reached a state its owner should hear about.
///
/// Constructed via [`DeliveryEvent::new`] and enriched with
/// [`with_scope`](DeliveryEvent::with_scope) and
/// [`with_payload`](DeliveryEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryEvent {
    /// Dot-separated event name, e.g. `"job.completed"`.
    pub event_type: String,

    pub job_id: DbId,

    /// Backend correlation id of the job.
    pub correlation_id: String,

    pub owner_id: String,

    pub scope_id: Option<String>,

    /// Snapshot of the job as persisted when the event was raised.
    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl DeliveryEvent {
    /// Create an event for one job. `payload` defaults to an empty object.
    pub fn new(
        event_type: impl Into<String>,
        job_id: DbId,
        correlation_id: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            job_id,
            correlation_id: correlation_id.into(),
            owner_id: owner_id.into(),
            scope_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_scope(mut self, scope_id: Option<String>) -> Self {
        self.scope_id = scope_id;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn is_failure(&self) -> bool {
        self.event_type == JOB_FAILED
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`DeliveryEvent`].
///
/// # Usage
///
/// ```rust
/// use relay_events::bus::{DeliveryEvent, EventBus, JOB_COMPLETED};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(DeliveryEvent::new(JOB_COMPLETED, 1, "prompt-1", "u1"));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<DeliveryEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// Returns the number of subscribers that will see it; 0 means the
    /// event was dropped.
    pub fn publish(&self, event: DeliveryEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
