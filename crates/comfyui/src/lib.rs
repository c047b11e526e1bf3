//! ComfyUI WebSocket and REST client library.
//!
//! Provides typed message parsing, the supervised push-channel client
//! with per-kind listeners, HTTP API wrappers and reconnection logic
//! for integrating with a ComfyUI image-generation server.

pub mod api;
pub mod channel;
pub mod client;
pub mod listeners;
pub mod messages;
pub mod processor;
pub mod reconnect;
pub mod state;

pub use api::{ComfyUIApi, ComfyUIApiError};
pub use channel::{ChannelError, EventChannelClient};
pub use client::ComfyUIClient;
pub use listeners::{handler_fn, EventHandler, HandlerError};
pub use messages::{ComfyUIMessage, MessageKind};
pub use reconnect::ReconnectConfig;
pub use state::ConnectionState;
