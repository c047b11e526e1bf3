mod config;

use std::sync::Arc;

use relay_comfyui::reconnect::backoff_delay;
use relay_comfyui::{ComfyUIApi, ComfyUIClient, EventChannelClient};
use relay_db::InMemoryJobRepo;
use relay_events::{DeliveryEvent, EventBus};
use relay_orchestrator::{BusDeliverySink, JobOrchestrator, OrchestratorConfig};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, WorkerConfig};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let config = WorkerConfig::from_env();
    let log_format = config
        .as_ref()
        .map(|c| c.log_format)
        .unwrap_or(LogFormat::Text);
    init_tracing(log_format);

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            std::process::exit(1);
        }
    };

    tracing::info!(
        api_url = %config.api_url,
        ws_url = %config.ws_url,
        "Relay worker starting",
    );

    // --- Wiring ---
    let client = ComfyUIClient::with_random_client_id(&config.ws_url);
    let client_id = client.client_id().to_string();
    let channel = EventChannelClient::new(client, config.reconnect.clone());

    let bus = Arc::new(EventBus::default());
    let sink = Arc::new(BusDeliverySink::new(Arc::clone(&bus)));
    let repo = Arc::new(InMemoryJobRepo::new());
    let api = Arc::new(ComfyUIApi::new(config.api_url.clone()));

    let orchestrator = Arc::new(JobOrchestrator::new(
        repo,
        api,
        sink,
        OrchestratorConfig {
            limits: config.limits.clone(),
            debounce_window: config.debounce_window,
        },
        client_id,
    ));
    orchestrator.start(&channel).await;

    let deliveries = tokio::spawn(log_deliveries(bus.subscribe()));

    // --- Run until Ctrl-C ---
    tokio::select! {
        _ = shutdown_signal() => {
            tracing::info!("Shutdown requested before the channel came up");
        }
        connected = connect_with_retry(&channel, &config) => {
            if connected {
                shutdown_signal().await;
            }
        }
    }

    tracing::info!("Shutting down");
    channel.disconnect().await;
    orchestrator.shutdown().await;
    deliveries.abort();
    tracing::info!("Shutdown complete");
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "relay_worker=info,relay_orchestrator=info,relay_comfyui=info".into()
    });
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
    }
}

/// Retry the first connect with the channel's own backoff policy.
///
/// Returns `false` only if the channel reports an aborted connect.
async fn connect_with_retry(channel: &EventChannelClient, config: &WorkerConfig) -> bool {
    let mut attempt = 0u32;
    loop {
        match channel.connect().await {
            Ok(()) => {
                tracing::info!(client_id = channel.client_id(), "Listening for ComfyUI events");
                return true;
            }
            Err(relay_comfyui::ChannelError::Aborted) => return false,
            Err(e) => {
                attempt = attempt.saturating_add(1);
                let delay = backoff_delay(attempt, &config.reconnect);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "ComfyUI not reachable, retrying",
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Log every hand-off published on the bus.
async fn log_deliveries(mut rx: broadcast::Receiver<DeliveryEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => tracing::info!(
                event_type = %event.event_type,
                job_id = event.job_id,
                owner_id = %event.owner_id,
                prompt_id = %event.correlation_id,
                "Delivery hand-off",
            ),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Delivery log fell behind");
            }
            Err(RecvError::Closed) => return,
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}
