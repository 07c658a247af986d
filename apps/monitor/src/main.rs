//! Watchtower event monitor entry point.
//!
//! Connects to the event stream, logs every event it receives and the cache
//! keys each event invalidates, and shuts down cleanly on Ctrl-C.

mod config;

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use watchtower_protocol::{Event, EventPayload, EventType};
use watchtower_stream::{CacheKey, ConnectionEvent, ConnectionManager, SessionTokens};

use crate::config::{MonitorConfig, TOKEN_ENV};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,watchtower=debug")),
        )
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting Watchtower monitor");

    let path = config::config_path(std::env::args().nth(1));
    let config = MonitorConfig::load_from(&path)?.with_token_override(std::env::var(TOKEN_ENV).ok());
    tracing::info!(path = %path.display(), base_url = %config.base_url, "configuration loaded");

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config))?;

    tracing::info!("monitor shut down cleanly");
    Ok(())
}

async fn run(config: MonitorConfig) -> anyhow::Result<()> {
    let Some(token) = config.token.clone() else {
        anyhow::bail!("no token configured; set `token` in the config file or {TOKEN_ENV}");
    };

    let tokens = Arc::new(SessionTokens::new());
    let manager = ConnectionManager::with_tungstenite(
        config.stream_config(),
        tokens.clone(),
        Arc::new(|key: &CacheKey| tracing::info!(key = %key, "cache invalidated")),
    );

    let mut registrations = Vec::new();
    for event_type in EventType::ALL {
        registrations.push(manager.on(event_type, log_event));
    }
    manager.subscribe(config.subscribe.iter().copied());

    if let Some(mut events) = manager.take_events() {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ConnectionEvent::StateChanged(state) => {
                        tracing::info!(?state, "connection state changed");
                    }
                    ConnectionEvent::Reconnecting {
                        attempt,
                        next_retry,
                    } => {
                        tracing::info!(attempt, retry_in_ms = next_retry.as_millis() as u64, "reconnecting");
                    }
                }
            }
        });
    }

    let watcher = manager.watch_auth();
    tokens.log_in(token);

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received, closing event stream");

    tokens.log_out();
    manager.disconnect();
    watcher.abort();

    for registration in registrations {
        registration.remove();
    }
    Ok(())
}

fn log_event(event: &Event) {
    let at = event.timestamp;
    match &event.payload {
        EventPayload::ThreatDetected(t) => tracing::warn!(
            %at,
            threat_id = %t.threat_id,
            severity = ?t.severity,
            category = %t.category,
            "threat detected: {}",
            t.description
        ),
        EventPayload::ProviderHealthChange(h) => tracing::info!(
            %at,
            provider = %h.provider,
            status = ?h.status,
            previous = ?h.previous_status,
            "provider health changed"
        ),
        EventPayload::CostThresholdAlert(c) => tracing::warn!(
            %at,
            period = %c.period,
            current = c.current_cost,
            threshold = c.threshold,
            "cost threshold crossed"
        ),
        EventPayload::SystemStatusUpdate(s) => {
            tracing::info!(%at, status = %s.status, message = ?s.message, "system status")
        }
        EventPayload::ConnectionEstablished(c) => {
            tracing::debug!(%at, connection_id = ?c.connection_id, "server acknowledged connection")
        }
        EventPayload::SubscriptionUpdated(s) => {
            tracing::debug!(%at, event_types = ?s.event_types, "server confirmed subscriptions")
        }
        EventPayload::Pong => tracing::trace!(%at, "pong"),
        EventPayload::Error(e) => {
            tracing::warn!(%at, code = ?e.code, "server reported error: {}", e.message)
        }
    }
}
