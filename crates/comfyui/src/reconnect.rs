//! Exponential-backoff reconnection logic for the ComfyUI push channel.
//!
//! When the connection drops, the channel supervisor calls
//! [`reconnect_loop`] to keep retrying with growing, jittered delays
//! until either the connection is restored or the
//! [`CancellationToken`] is triggered.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::{ComfyUIClient, ComfyUIConnection};
use crate::state::ConnectionState;

/// Tunable parameters for the exponential-backoff strategy.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the (un-jittered) delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
    /// Fraction in `[0, 1)` by which each delay is randomised up or down.
    pub jitter: f64,
    /// Upper bound on one WebSocket handshake; expiry counts as a failed
    /// attempt.
    pub connect_timeout: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.1,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Un-jittered delay before attempt `attempt` (1-indexed):
/// `min(max_delay, initial_delay * multiplier^(attempt - 1))`.
///
/// Attempt 0 is treated as attempt 1.
pub fn base_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
    let raw = config.initial_delay.as_secs_f64() * config.multiplier.powi(exponent);
    let capped = raw.min(config.max_delay.as_secs_f64()).max(0.0);
    saturating_secs(capped)
}

/// Scale `delay` by `1 + jitter * unit`, where `unit` lies in `[-1, 1]`.
pub fn apply_jitter(delay: Duration, jitter: f64, unit: f64) -> Duration {
    let factor = (1.0 + jitter.clamp(0.0, 1.0) * unit.clamp(-1.0, 1.0)).max(0.0);
    saturating_secs(delay.as_secs_f64() * factor)
}

fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// Jittered delay before attempt `attempt` (1-indexed).
pub fn backoff_delay(attempt: u32, config: &ReconnectConfig) -> Duration {
    let unit = rand::rng().random_range(-1.0..=1.0);
    apply_jitter(base_delay(attempt, config), config.jitter, unit)
}

/// Attempt to reconnect with exponential backoff.
///
/// `attempts` counts failed reconnects; it is incremented after each
/// failure and reset to 0 once a connection succeeds. The delay before
/// each try is taken from `attempts + 1`, so the first reconnect after a
/// success always starts from the base delay.
///
/// Returns `Some(connection)` once a connection succeeds, or `None` if
/// the `cancel` token is triggered first.
pub async fn reconnect_loop(
    client: &ComfyUIClient,
    config: &ReconnectConfig,
    cancel: &CancellationToken,
    attempts: &AtomicU32,
    state: &watch::Sender<ConnectionState>,
) -> Option<ComfyUIConnection> {
    loop {
        let attempt = attempts.load(Ordering::SeqCst).saturating_add(1);
        let delay = backoff_delay(attempt, config);
        let next_retry_at = chrono::Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());

        state.send_replace(ConnectionState::Reconnecting {
            attempt,
            next_retry_at,
        });
        tracing::info!(
            client_id = client.client_id(),
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting to ComfyUI",
        );

        // Wait before the attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return None,
            _ = tokio::time::sleep(delay) => {}
        }

        state.send_replace(ConnectionState::Connecting);

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(client_id = client.client_id(), "Reconnect cancelled");
                return None;
            }
            result = client.connect(config.connect_timeout) => {
                match result {
                    Ok(conn) => {
                        attempts.store(0, Ordering::SeqCst);
                        tracing::info!(
                            client_id = client.client_id(),
                            attempt,
                            "Reconnected to ComfyUI",
                        );
                        return Some(conn);
                    }
                    Err(e) => {
                        attempts.fetch_add(1, Ordering::SeqCst);
                        tracing::warn!(
                            client_id = client.client_id(),
                            error = %e,
                            "Reconnect attempt {attempt} failed",
                        );
                    }
                }
            }
        }
    }
}
