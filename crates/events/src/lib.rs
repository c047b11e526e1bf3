//! Delivery hand-off bus.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`DeliveryEvent`]: a job that finished and should reach its owner.

pub mod bus;

pub use bus::{DeliveryEvent, EventBus, JOB_COMPLETED, JOB_FAILED};
