//! Per-kind listener registry for decoded push-channel messages.
//!
//! Handlers registered for a [`MessageKind`] run in registration order
//! each time a message of that kind arrives. A handler that returns an
//! error, or panics, is logged and skipped; the remaining handlers and
//! the receive loop keep running.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::sync::RwLock;

use crate::messages::{ComfyUIMessage, MessageKind};

/// Failure reported by an [`EventHandler`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// A callback invoked for every message of the kinds it is registered for.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, message: &ComfyUIMessage) -> Result<(), HandlerError>;
}

/// Adapter that turns an async closure into an [`EventHandler`].
pub struct FnHandler<F> {
    f: F,
}

/// Wrap `f` as an [`EventHandler`].
///
/// The closure receives an owned clone of the message so that the
/// returned future does not borrow from the dispatcher.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(ComfyUIMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(ComfyUIMessage) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, message: &ComfyUIMessage) -> Result<(), HandlerError> {
        (self.f)(message.clone()).await
    }
}

/// Handlers keyed by message kind.
#[derive(Default)]
pub struct ListenerRegistry {
    handlers: RwLock<HashMap<MessageKind, Vec<Arc<dyn EventHandler>>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the list for `kind`.
    pub async fn add(&self, kind: MessageKind, handler: Arc<dyn EventHandler>) {
        self.handlers
            .write()
            .await
            .entry(kind)
            .or_default()
            .push(handler);
    }

    /// Number of handlers registered for `kind`.
    pub async fn count(&self, kind: MessageKind) -> usize {
        self.handlers
            .read()
            .await
            .get(&kind)
            .map_or(0, Vec::len)
    }

    /// Run every handler registered for the message's kind, in order.
    ///
    /// Messages of unknown kind are dropped without invoking anything.
    pub async fn dispatch(&self, message: &ComfyUIMessage) {
        let Some(kind) = message.kind() else {
            return;
        };

        // Snapshot so handlers may register further listeners without deadlocking.
        let handlers = match self.handlers.read().await.get(&kind) {
            Some(list) => list.clone(),
            None => return,
        };

        for handler in handlers {
            match AssertUnwindSafe(handler.handle(message)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::error!(
                        kind = %kind,
                        prompt_id = message.prompt_id(),
                        error = %e,
                        "Listener failed",
                    );
                }
                Err(_) => {
                    tracing::error!(
                        kind = %kind,
                        prompt_id = message.prompt_id(),
                        "Listener panicked",
                    );
                }
            }
        }
    }
}
