// relay: real-time event relay — upstream ingest, admission control, and
// fan-out to console, dashboards, and alert channels.

use relay::active_users::{ActiveUsersFetcher, DEFAULT_REFRESH_INTERVAL};
use relay::alerts::{AlertChannel, AlertOutput};
use relay::bus::EventBus;
use relay::config::RelayConfig;
use relay::console::ConsoleOutput;
use relay::core::StreamCore;
use relay::gateway::{self, GatewayState};
use relay::stats::StatsRegistry;
use relay::upstream::{UpstreamClient, UpstreamConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

const EVENT_FEED_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "relay starting");

    let config = match RelayConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: configuration error: {}", e);
            std::process::exit(1);
        }
    };
    info!(
        upstream = %config.upstream_url,
        channels = ?config.channels,
        port = config.listen_port,
        "config loaded"
    );

    // Shared plumbing.
    let bus = Arc::new(EventBus::new());
    let stats = Arc::new(StatsRegistry::new());
    let (events_tx, events_rx) = mpsc::channel(EVENT_FEED_CAPACITY);

    let upstream = Arc::new(UpstreamClient::new(
        UpstreamConfig {
            url: config.ws_url(),
            token: config.upstream_token.clone(),
            channels: config.channels.clone(),
            users: relay_protocol::normalize_users(&config.filters.users),
        },
        events_tx,
    ));

    let core = Arc::new(StreamCore::new(
        Arc::clone(&bus),
        Arc::clone(&upstream),
        Arc::clone(&stats),
        config.filters.clone(),
        &config.channels,
        &config.filters.users,
        config.debug,
    ));

    // Outputs.
    let console = Arc::new(ConsoleOutput::new(Arc::clone(&bus), Arc::clone(&stats)));
    console.start();

    let alerts = Arc::new(AlertOutput::new(
        Arc::clone(&bus),
        build_alert_channels(&config),
    ));
    alerts.start();

    // Monitored users: first fetch awaited, then refreshed periodically;
    // configured user filters are sanity-checked against the snapshot.
    let active_users = Arc::new(ActiveUsersFetcher::new(
        config.http_url(),
        config.upstream_token.clone(),
    ));
    active_users
        .start_periodic_refresh(DEFAULT_REFRESH_INTERVAL)
        .await;
    if !config.filters.users.is_empty() {
        let report =
            relay::active_users::validate_user_filters(&config.filters.users, &active_users).await;
        if !report.valid {
            warn!(
                invalid = ?report.invalid_users,
                sample = ?report.sample_active_users,
                "some configured user filters are not active upstream"
            );
        }
    }

    // Gateway.
    let gateway_state = GatewayState::new(
        Arc::clone(&core),
        Arc::clone(&alerts),
        Arc::clone(&active_users),
    );
    gateway_state.start();
    let router = gateway::build_router(gateway_state);

    // Upstream ingest.
    upstream.connect();
    let ingest = tokio::spawn(Arc::clone(&core).run_ingest(events_rx));

    let bind_addr = SocketAddr::from(([0, 0, 0, 0], config.listen_port));
    let listener = match tokio::net::TcpListener::bind(bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("FATAL: failed to bind {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };
    info!(addr = %bind_addr, "dashboard listener bound");

    let serve = axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal());
    if let Err(e) = serve.await {
        eprintln!("FATAL: server error: {}", e);
        std::process::exit(1);
    }

    info!("shutting down");
    upstream.disconnect().await;
    ingest.abort();
    active_users.stop();
    console.stop();
    alerts.stop();
    info!("relay stopped");
}

fn build_alert_channels(config: &RelayConfig) -> Vec<AlertChannel> {
    let mut channels = Vec::new();
    if let Some(telegram) = &config.telegram {
        channels.push(AlertChannel::telegram(
            telegram.bot_token.clone(),
            telegram.chat_id.clone(),
        ));
    }
    if let Some(url) = &config.discord_webhook_url {
        channels.push(AlertChannel::discord(url.clone()));
    }
    if let Some(webhook) = &config.webhook {
        channels.push(AlertChannel::webhook(
            webhook.url.clone(),
            webhook.method.clone(),
            webhook.headers.clone(),
        ));
    }
    if channels.is_empty() {
        info!("no alert channels configured");
    }
    channels
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to install ctrl-c handler");
    }
}
