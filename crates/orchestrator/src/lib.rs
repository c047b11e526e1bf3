//! Job orchestration on top of the ComfyUI push channel.
//!
//! [`JobOrchestrator`] gates submissions through the
//! [`AdmissionController`], submits through a [`ComputeClient`], turns
//! push-channel events into guarded job-state transitions and hands
//! finished jobs to a [`DeliverySink`] via the debounced
//! [`DeliveryScheduler`].

pub mod admission;
pub mod compute;
pub mod delivery;
pub mod error;
pub mod orchestrator;
pub mod sink;

pub use admission::AdmissionController;
pub use compute::{ComputeClient, ComputeError};
pub use delivery::{DebounceRegistry, DeliveryScheduler, DEFAULT_DEBOUNCE_WINDOW};
pub use error::OrchestratorError;
pub use orchestrator::{JobOrchestrator, OrchestratorConfig, HANDLED_KINDS};
pub use sink::{BusDeliverySink, DeliveryError, DeliverySink};
