//! Observable connection state of the event channel.

use relay_core::types::Timestamp;

/// Where the push-channel connection currently stands.
///
/// ```text
/// Disconnected ─connect─► Connecting ─ok─► Connected
///                             ▲                │ drop
///                             └── backoff ── Reconnecting
/// ```
///
/// `disconnect()` returns the client to `Disconnected` from any state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    /// Waiting out the backoff before reconnect attempt `attempt` (1-indexed).
    Reconnecting {
        attempt: u32,
        next_retry_at: Timestamp,
    },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}
