//! Dashboard gateway: WebSocket fan-out to browser clients plus the
//! status HTTP surface, on one listener.
//!
//! Every admitted event is forwarded to all connected clients over a
//! broadcast channel; delivery is best-effort by design (clients
//! resynchronize from the `state` snapshot on reconnect, backed by the
//! last-100 ring). The runtime-subscription control RPC rides the same
//! socket and is gated to loopback peers.

pub mod client;

use crate::active_users::ActiveUsersFetcher;
use crate::alerts::AlertOutput;
use crate::bus::channels as bus_channels;
use crate::core::StreamCore;
use axum::{routing::get, Json, Router};
use relay_protocol::{
    ActiveUsersEnvelope, ConnectionStatusEnvelope, DashboardServerMessage, Event, EventEnvelope,
    FilterConfig, HealthConnection, HealthEvents, HealthReport, StateSnapshot,
};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info};

pub const EVENT_RING_CAPACITY: usize = 100;
const BROADCAST_CAPACITY: usize = 4096;
const ACTIVE_USERS_BROADCAST_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// Supplies the `/status` payload verbatim when installed; otherwise the
/// gateway derives one from internal stats.
pub type HealthProvider = Arc<dyn Fn() -> serde_json::Value + Send + Sync>;

/// Shared gateway state, cloned into every handler.
#[derive(Clone)]
pub struct GatewayState {
    pub core: Arc<StreamCore>,
    pub alerts: Arc<AlertOutput>,
    pub active_users: Arc<ActiveUsersFetcher>,
    /// Last-100 admitted events, oldest first. A reconnect aid, not a log.
    pub ring: Arc<RwLock<VecDeque<Event>>>,
    pub dashboard_tx: broadcast::Sender<DashboardServerMessage>,
    /// Dashboard-local filter mirror; seeded from the server filter and
    /// mutated only by the `update_filters` RPC.
    pub filters: Arc<RwLock<FilterConfig>>,
    pub health_provider: Option<HealthProvider>,
}

impl GatewayState {
    pub fn new(
        core: Arc<StreamCore>,
        alerts: Arc<AlertOutput>,
        active_users: Arc<ActiveUsersFetcher>,
    ) -> Self {
        let (dashboard_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let filters = Arc::new(RwLock::new(core.filter_config().clone()));
        GatewayState {
            core,
            alerts,
            active_users,
            ring: Arc::new(RwLock::new(VecDeque::with_capacity(EVENT_RING_CAPACITY))),
            dashboard_tx,
            filters,
            health_provider: None,
        }
    }

    pub fn with_health_provider(mut self, provider: HealthProvider) -> Self {
        self.health_provider = Some(provider);
        self
    }

    /// Wire the gateway into the bus and the upstream status feed:
    /// admitted events land in the ring and fan out to clients, and
    /// connection-state transitions broadcast as `connection_status`.
    pub fn start(&self) {
        let ring = Arc::clone(&self.ring);
        let tx = self.dashboard_tx.clone();
        self.core
            .bus()
            .subscribe_fn(bus_channels::DASHBOARD, move |event| {
                let ring = Arc::clone(&ring);
                let tx = tx.clone();
                async move {
                    {
                        let mut ring = ring.write().expect("ring lock");
                        if ring.len() == EVENT_RING_CAPACITY {
                            ring.pop_front();
                        }
                        ring.push_back(event.clone());
                    }
                    // No receivers is normal (no dashboards connected).
                    let _ = tx.send(DashboardServerMessage::Event(EventEnvelope { event }));
                    Ok(())
                }
            });

        let mut state_rx = self.core.upstream().watch_state();
        let tx = self.dashboard_tx.clone();
        tokio::spawn(async move {
            let mut last_status = state_rx.borrow().status();
            while state_rx.changed().await.is_ok() {
                let status = state_rx.borrow().status();
                if status == last_status {
                    continue;
                }
                last_status = status;
                debug!(?status, "broadcasting connection status");
                let _ = tx.send(DashboardServerMessage::ConnectionStatus(
                    ConnectionStatusEnvelope { status },
                ));
            }
        });

        // Active-users snapshots change only on periodic refresh; a
        // coarse poll is enough to fan the new list out to dashboards.
        let active_users = Arc::clone(&self.active_users);
        let tx = self.dashboard_tx.clone();
        tokio::spawn(async move {
            let mut last = active_users.cached();
            let mut ticker = tokio::time::interval(ACTIVE_USERS_BROADCAST_INTERVAL);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let users = active_users.cached();
                if users != last {
                    last = users.clone();
                    let _ = tx.send(DashboardServerMessage::ActiveUsers(ActiveUsersEnvelope {
                        users,
                    }));
                }
            }
        });
        info!("dashboard gateway started");
    }

    /// The snapshot sent as the `state` socket message and served at
    /// `GET /api/state`.
    pub fn snapshot(&self) -> StateSnapshot {
        let events: Vec<Event> = self
            .ring
            .read()
            .expect("ring lock")
            .iter()
            .cloned()
            .collect();
        let stats = self.core.stats().snapshot();
        StateSnapshot {
            events,
            active_users: self.active_users.cached(),
            connection_status: self.core.connection_state().status(),
            unknown_event_types: stats.unknown_types.clone(),
            stats,
            filters: self.filters.read().expect("filters lock").clone(),
        }
    }

    fn derived_health(&self) -> HealthReport {
        let stats = self.core.stats().snapshot();
        let subscription = self.core.runtime_subscription();
        HealthReport {
            connection: HealthConnection {
                status: self.core.connection_state().status(),
                channels: subscription.channels,
                uptime_seconds: self.core.stats().uptime_seconds(),
            },
            events: HealthEvents {
                total: stats.total,
                delivered: stats.delivered,
                deduped: stats.deduped,
                rate: self.core.stats().rate(),
            },
            alerts: self.alerts.counters(),
            filters: self.core.filter_config().clone(),
        }
    }
}

/// Build the gateway router. Serve it with
/// `into_make_service_with_connect_info::<SocketAddr>()` — client
/// classification needs the peer address.
pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/ws", get(client::ws_handler))
        .route("/status", get(get_status))
        .route("/api/state", get(get_state))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

async fn get_status(
    axum::extract::State(state): axum::extract::State<GatewayState>,
) -> Json<serde_json::Value> {
    if let Some(provider) = &state.health_provider {
        return Json(provider());
    }
    Json(serde_json::to_value(state.derived_health()).unwrap_or_default())
}

async fn get_state(
    axum::extract::State(state): axum::extract::State<GatewayState>,
) -> Json<StateSnapshot> {
    Json(state.snapshot())
}

/// True for peers allowed to mutate the runtime subscription: IPv4/IPv6
/// loopback, including the IPv4-mapped form.
pub fn is_control_peer(addr: SocketAddr) -> bool {
    match addr.ip() {
        std::net::IpAddr::V4(ip) => ip.is_loopback(),
        std::net::IpAddr::V6(ip) => {
            ip.is_loopback() || ip.to_ipv4_mapped().is_some_and(|v4| v4.is_loopback())
        }
    }
}
