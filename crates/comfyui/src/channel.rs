//! Supervised push-channel client.
//!
//! [`EventChannelClient`] owns one logical connection to the ComfyUI
//! event stream. After a successful [`connect`](EventChannelClient::connect)
//! a background task reads frames and dispatches them to the registered
//! listeners; when the socket drops it reconnects with exponential
//! backoff until [`disconnect`](EventChannelClient::disconnect) is called.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIClient, ComfyUIClientError, ComfyUIConnection};
use crate::listeners::{EventHandler, ListenerRegistry};
use crate::messages::MessageKind;
use crate::processor::{process_messages, SessionEnd};
use crate::reconnect::{reconnect_loop, ReconnectConfig};
use crate::state::ConnectionState;

/// Upper bound on how long `disconnect()` waits for the listener task.
pub const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors surfaced by [`EventChannelClient::connect`].
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The initial connection attempt failed.
    #[error(transparent)]
    Connect(#[from] ComfyUIClientError),

    /// `disconnect()` was called while the connection was being established.
    #[error("Connect aborted by disconnect")]
    Aborted,
}

/// State shared with the listener task.
struct Inner {
    client: ComfyUIClient,
    config: ReconnectConfig,
    listeners: ListenerRegistry,
    state: watch::Sender<ConnectionState>,
    attempts: AtomicU32,
}

impl Inner {
    fn set_state(&self, state: ConnectionState) {
        self.state.send_replace(state);
    }
}

/// The running listener, if any, and the token that stops it.
#[derive(Default)]
struct Session {
    cancel: CancellationToken,
    listener: Option<JoinHandle<()>>,
}

impl Session {
    fn is_live(&self) -> bool {
        self.listener.as_ref().is_some_and(|h| !h.is_finished())
    }
}

/// Disconnect generation plus the token of the connect that last
/// started a handshake under it.
#[derive(Default)]
struct Intent {
    epoch: u64,
    token: CancellationToken,
}

/// A single supervised connection to the ComfyUI push channel.
pub struct EventChannelClient {
    inner: Arc<Inner>,
    /// Serialises `connect()` and the teardown half of `disconnect()`.
    session: Mutex<Session>,
    /// Bumped and cancelled by `disconnect()` before it waits for
    /// `session`. A `connect()` that observed an older epoch gives up.
    intent: Mutex<Intent>,
}

impl EventChannelClient {
    pub fn new(client: ComfyUIClient, config: ReconnectConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(Inner {
                client,
                config,
                listeners: ListenerRegistry::new(),
                state,
                attempts: AtomicU32::new(0),
            }),
            session: Mutex::new(Session::default()),
            intent: Mutex::new(Intent::default()),
        }
    }

    /// Client id used for the handshake. Submissions must reuse it.
    pub fn client_id(&self) -> &str {
        self.inner.client.client_id()
    }

    /// Register an additional handler for `kind`.
    ///
    /// Handlers for one kind run in registration order. Registration is
    /// allowed at any time, including while connected.
    pub async fn add_listener(&self, kind: MessageKind, handler: Arc<dyn EventHandler>) {
        self.inner.listeners.add(kind, handler).await;
    }

    /// Number of handlers registered for `kind`.
    pub async fn listener_count(&self, kind: MessageKind) -> usize {
        self.inner.listeners.count(kind).await
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    /// Watch connection-state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Failed reconnect attempts since the last successful connection.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    /// Whether a listener task is currently alive.
    pub async fn is_listening(&self) -> bool {
        self.session.lock().await.is_live()
    }

    /// Connect and start the listener task.
    ///
    /// Returns `Ok(())` immediately if already listening. A failure of
    /// this first attempt is returned to the caller; drops after that
    /// are handled by the background reconnect loop. Returns
    /// [`ChannelError::Aborted`] if `disconnect()` is called at any point
    /// before the listener starts, including while this call is queued
    /// behind another `connect()`.
    pub async fn connect(&self) -> Result<(), ChannelError> {
        let epoch = self.intent.lock().await.epoch;
        let mut session = self.session.lock().await;

        let token = {
            let mut intent = self.intent.lock().await;
            if intent.epoch != epoch {
                tracing::info!(client_id = self.client_id(), "Connect superseded by disconnect");
                return Err(ChannelError::Aborted);
            }
            if session.is_live() {
                return Ok(());
            }
            intent.token = CancellationToken::new();
            intent.token.clone()
        };

        self.inner.set_state(ConnectionState::Connecting);

        let result = tokio::select! {
            _ = token.cancelled() => None,
            result = self.inner.client.connect(self.inner.config.connect_timeout) => Some(result),
        };

        let conn = match result {
            Some(Ok(conn)) => conn,
            Some(Err(e)) => {
                self.inner.set_state(ConnectionState::Disconnected);
                tracing::warn!(client_id = self.client_id(), error = %e, "Initial connect failed");
                return Err(e.into());
            }
            None => {
                self.inner.set_state(ConnectionState::Disconnected);
                tracing::info!(client_id = self.client_id(), "Connect aborted by disconnect");
                return Err(ChannelError::Aborted);
            }
        };

        // disconnect() may have fired while the handshake was completing.
        if token.is_cancelled() {
            let mut ws = conn.ws_stream;
            let _ = tokio::time::timeout(DISCONNECT_TIMEOUT, ws.close(None)).await;
            self.inner.set_state(ConnectionState::Disconnected);
            return Err(ChannelError::Aborted);
        }

        self.inner.attempts.store(0, Ordering::SeqCst);
        self.inner.set_state(ConnectionState::Connected);

        let inner = Arc::clone(&self.inner);
        let cancel = token.clone();
        session.cancel = token;
        session.listener = Some(tokio::spawn(async move {
            tracing::info!(client_id = inner.client.client_id(), "Starting listener task");
            supervise(&inner, conn, &cancel).await;
            tracing::info!(client_id = inner.client.client_id(), "Listener task exited");
        }));

        Ok(())
    }

    /// Stop listening and reconnecting, close the socket and wait for the
    /// listener task to exit (bounded by [`DISCONNECT_TIMEOUT`]).
    ///
    /// Safe to call at any time, including while one or more `connect()`
    /// calls are in flight; all of them return [`ChannelError::Aborted`].
    pub async fn disconnect(&self) {
        {
            let mut intent = self.intent.lock().await;
            intent.epoch = intent.epoch.wrapping_add(1);
            intent.token.cancel();
        }

        let Ok(mut session) = tokio::time::timeout(DISCONNECT_TIMEOUT, self.session.lock()).await
        else {
            // The holder is a connect whose token is already cancelled; it
            // cannot start a listener.
            tracing::warn!(
                client_id = self.client_id(),
                "Timed out waiting for an in-flight connect",
            );
            self.inner.set_state(ConnectionState::Disconnected);
            return;
        };
        session.cancel.cancel();

        if let Some(mut handle) = session.listener.take() {
            if tokio::time::timeout(DISCONNECT_TIMEOUT, &mut handle)
                .await
                .is_err()
            {
                tracing::warn!(
                    client_id = self.client_id(),
                    "Listener did not stop in time, aborting",
                );
                handle.abort();
            }
        }

        self.inner.set_state(ConnectionState::Disconnected);
        tracing::info!(client_id = self.client_id(), "Disconnected from ComfyUI");
    }
}

/// Listener task body: process -> reconnect -> process ... until cancelled.
async fn supervise(inner: &Inner, conn: ComfyUIConnection, cancel: &CancellationToken) {
    let mut ws_stream = conn.ws_stream;

    loop {
        if process_messages(&mut ws_stream, &inner.listeners, cancel).await == SessionEnd::Cancelled
        {
            return;
        }
        if cancel.is_cancelled() {
            return;
        }

        tracing::info!(
            client_id = inner.client.client_id(),
            "Connection lost, entering reconnect loop",
        );
        match reconnect_loop(
            &inner.client,
            &inner.config,
            cancel,
            &inner.attempts,
            &inner.state,
        )
        .await
        {
            Some(conn) => {
                inner.set_state(ConnectionState::Connected);
                ws_stream = conn.ws_stream;
            }
            None => return,
        }
    }
}
