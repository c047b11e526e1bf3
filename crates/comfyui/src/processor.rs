//! WebSocket message processing loop.
//!
//! Reads raw frames from a ComfyUI WebSocket connection, parses them
//! into typed [`ComfyUIMessage`] variants and hands each one to the
//! [`ListenerRegistry`].

use std::time::Duration;

use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use crate::client::WsStream;
use crate::listeners::ListenerRegistry;
use crate::messages::{parse_message, ComfyUIMessage};

/// How long to wait for the close handshake when shutting down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Why [`process_messages`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The cancellation token fired; the socket was closed locally.
    Cancelled,
    /// The server closed the socket, a receive error occurred, or the
    /// stream ended.
    Dropped,
}

/// Process WebSocket messages from a ComfyUI connection.
///
/// Loops until the WebSocket closes, encounters a fatal receive error,
/// the stream is exhausted, or `cancel` fires. Each text frame is parsed
/// via [`parse_message`] and dispatched to the registered listeners
/// before the next frame is read.
///
/// Binary frames (preview images) are ignored.
pub async fn process_messages(
    ws_stream: &mut WsStream,
    listeners: &ListenerRegistry,
    cancel: &CancellationToken,
) -> SessionEnd {
    loop {
        let msg_result = tokio::select! {
            _ = cancel.cancelled() => {
                let _ = tokio::time::timeout(CLOSE_TIMEOUT, ws_stream.close(None)).await;
                return SessionEnd::Cancelled;
            }
            next = ws_stream.next() => match next {
                Some(result) => result,
                None => return SessionEnd::Dropped,
            },
        };

        match msg_result {
            Ok(Message::Text(text)) => {
                handle_text_message(&text, listeners).await;
            }
            Ok(Message::Binary(_)) => {
                tracing::trace!("Ignoring binary message (preview image)");
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Handled automatically by tungstenite.
            }
            Ok(Message::Close(frame)) => {
                tracing::info!(?frame, "ComfyUI WebSocket closed");
                return SessionEnd::Dropped;
            }
            Ok(Message::Frame(_)) => {}
            Err(e) => {
                tracing::error!(error = %e, "WebSocket receive error");
                return SessionEnd::Dropped;
            }
        }
    }
}

/// Parse a single text frame and dispatch it.
async fn handle_text_message(text: &str, listeners: &ListenerRegistry) {
    match parse_message(text) {
        Ok(ComfyUIMessage::Unknown(kind)) => {
            tracing::trace!(kind = %kind, "Ignoring unknown message type");
        }
        Ok(msg) => {
            if let ComfyUIMessage::Status(ref data) = msg {
                tracing::debug!(
                    queue_remaining = data.status.exec_info.queue_remaining,
                    "ComfyUI queue status",
                );
            }
            listeners.dispatch(&msg).await;
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                raw_message = %text,
                "Failed to parse ComfyUI message",
            );
        }
    }
}
