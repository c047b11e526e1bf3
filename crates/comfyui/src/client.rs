//! WebSocket connector for a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the push-channel URL and the client id that
//! the backend uses to address events. The same client id must be sent
//! with every workflow submission, otherwise the backend routes that
//! job's events elsewhere. Call [`ComfyUIClient::connect`] to establish
//! a live [`ComfyUIConnection`].

use std::time::Duration;

use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// The raw WebSocket stream type used for the push channel.
pub type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Connection configuration for one ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
    client_id: String,
}

/// A live WebSocket connection to a ComfyUI instance.
pub struct ComfyUIConnection {
    /// Client id sent during the WebSocket handshake.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: WsStream,
}

impl ComfyUIClient {
    /// Create a client for `base_url` with an explicit client id.
    ///
    /// `base_url` may be given as `ws(s)://`, `http(s)://`, and with or
    /// without a trailing `/ws`; see [`normalize_ws_url`].
    pub fn new(base_url: &str, client_id: impl Into<String>) -> Self {
        Self {
            ws_url: normalize_ws_url(base_url),
            client_id: client_id.into(),
        }
    }

    /// Create a client with a fresh random (UUID v4) client id.
    pub fn with_random_client_id(base_url: &str) -> Self {
        Self::new(base_url, uuid::Uuid::new_v4().to_string())
    }

    /// Normalised WebSocket base URL (e.g. `ws://host:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// Client id presented on every connection.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Full endpoint including the `clientId` query parameter.
    pub fn endpoint(&self) -> String {
        format!("{}/ws?clientId={}", self.ws_url, self.client_id)
    }

    /// Connect to the ComfyUI WebSocket endpoint.
    ///
    /// The TCP connect and upgrade handshake together must finish within
    /// `timeout`; a backend that accepts the socket but never answers the
    /// upgrade is reported as a connection error.
    pub async fn connect(&self, timeout: Duration) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = self.endpoint();

        let handshake = tokio::time::timeout(timeout, connect_async(&url))
            .await
            .map_err(|_| {
                ComfyUIClientError::Connection(format!(
                    "Timed out after {timeout:?} connecting to ComfyUI at {}",
                    self.ws_url
                ))
            })?;
        let (ws_stream, _response) = handshake.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(
            client_id = %self.client_id,
            "Connected to ComfyUI at {}",
            self.ws_url,
        );

        Ok(ComfyUIConnection {
            client_id: self.client_id.clone(),
            ws_stream,
        })
    }
}

/// Turn a configured base URL into a WebSocket base URL.
///
/// `http://` becomes `ws://`, `https://` becomes `wss://`, trailing
/// slashes and a trailing `/ws` path segment are removed.
pub fn normalize_ws_url(base_url: &str) -> String {
    let trimmed = base_url.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix("/ws").unwrap_or(trimmed);

    if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{rest}")
    } else {
        trimmed.to_string()
    }
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}
