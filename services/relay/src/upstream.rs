//! Upstream WebSocket client.
//!
//! Long-lived connection to the event source with automatic reconnection.
//! On every (re)connect the client sends a `subscribe` frame carrying the
//! current selectors, then streams inbound frames: `op`-tagged control
//! frames are handled here, everything else is dispatched in arrival
//! order to the event sink supplied at construction.
//!
//! # Lifecycle
//! `disconnected → connecting → connected → reconnecting → connected → …`
//! Backoff starts at 1 s and doubles up to a 5 s cap; each attempt has a
//! 20 s connect timeout. The client pings every 25 s and treats 60 s of
//! inbound silence as a dead peer.

use futures_util::{SinkExt, StreamExt};
use relay_protocol::{Channel, ConnectionStatus, UpstreamFrame, WireEvent};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, error, info, warn};

pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);
const BACKOFF_START: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(5);
const PING_INTERVAL: Duration = Duration::from_secs(25);
const SERVER_TIMEOUT: Duration = Duration::from_secs(60);
const SILENCE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Connection state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    /// Dashboard projection: the initial connecting phase reports as
    /// disconnected.
    pub fn status(self) -> ConnectionStatus {
        match self {
            ConnectionState::Connected => ConnectionStatus::Connected,
            ConnectionState::Reconnecting => ConnectionStatus::Reconnecting,
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                ConnectionStatus::Disconnected
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config and errors
// ---------------------------------------------------------------------------

/// Configuration for the upstream session.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// WebSocket URL of the event source, e.g. `wss://source.example.com/stream`.
    pub url: String,
    /// Bearer token for the connection handshake.
    pub token: String,
    /// Initial channel selectors (from startup config).
    pub channels: Vec<Channel>,
    /// Initial user selectors.
    pub users: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream transport is {0:?}, not connected")]
    NotConnected(ConnectionState),
    #[error("subscription ack timed out after {0:?}")]
    AckTimeout(Duration),
    #[error("upstream connection closed before ack")]
    Disconnected,
    #[error("WebSocket error: {0}")]
    Ws(String),
    #[error("invalid upstream URL '{url}': {detail}")]
    BadUrl { url: String, detail: String },
    #[error("upstream client is not running")]
    NotRunning,
}

// ---------------------------------------------------------------------------
// Client handle
// ---------------------------------------------------------------------------

struct SubscribeCommand {
    channels: Vec<Channel>,
    users: Vec<String>,
    reply: oneshot::Sender<Result<(), UpstreamError>>,
}

type AckWaiter = Option<oneshot::Sender<Result<(), UpstreamError>>>;

/// Handle to the upstream session task.
///
/// The task is spawned by [`UpstreamClient::connect`] and owns the socket;
/// this handle owns the task. Reconnection replaces the transport inside
/// the task without replacing the handle.
pub struct UpstreamClient {
    config: UpstreamConfig,
    events_tx: mpsc::Sender<WireEvent>,
    cmd_tx: mpsc::Sender<SubscribeCommand>,
    cmd_rx: std::sync::Mutex<Option<mpsc::Receiver<SubscribeCommand>>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
    shutdown_tx: watch::Sender<bool>,
    selectors: Arc<RwLock<(Vec<Channel>, Vec<String>)>>,
    task: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl UpstreamClient {
    /// Create a client. `events_tx` is the dispatch sink supplied at
    /// construction: in-order delivery of raw event frames, consumed by
    /// the stream core.
    pub fn new(config: UpstreamConfig, events_tx: mpsc::Sender<WireEvent>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (shutdown_tx, _) = watch::channel(false);
        let selectors = Arc::new(RwLock::new((config.channels.clone(), config.users.clone())));
        UpstreamClient {
            config,
            events_tx,
            cmd_tx,
            cmd_rx: std::sync::Mutex::new(Some(cmd_rx)),
            state_tx,
            state_rx,
            shutdown_tx,
            selectors,
            task: std::sync::Mutex::new(None),
        }
    }

    /// Start the reconnect loop. A second call on a running client is a
    /// logged no-op.
    pub fn connect(&self) {
        let Some(cmd_rx) = self.cmd_rx.lock().expect("cmd_rx lock").take() else {
            warn!("upstream client already connected");
            return;
        };
        let session = SessionLoop {
            config: self.config.clone(),
            events_tx: self.events_tx.clone(),
            state_tx: self.state_tx.clone(),
            selectors: self.selectors.clone(),
        };
        let shutdown_rx = self.shutdown_tx.subscribe();
        let handle = tokio::spawn(session.run(cmd_rx, shutdown_rx));
        *self.task.lock().expect("task lock") = Some(handle);
    }

    /// End the reconnect loop and wait for the session task to finish.
    pub async fn disconnect(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.task.lock().expect("task lock").take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "upstream session task ended abnormally");
            }
        }
        let _ = self.state_tx.send(ConnectionState::Disconnected);
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch for state transitions (used for dashboard status broadcasts).
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Send a `subscribe` frame with new selectors and await the server
    /// ack, bounded by `ack_timeout`.
    ///
    /// Fails fast with a transport-state error unless currently connected.
    /// A timeout cancels only the waiter; the frame stays sent and the
    /// caller is responsible for reconciliation.
    pub async fn update_subscription(
        &self,
        channels: Vec<Channel>,
        users: Vec<String>,
        ack_timeout: Duration,
    ) -> Result<(), UpstreamError> {
        let state = self.connection_state();
        if state != ConnectionState::Connected {
            return Err(UpstreamError::NotConnected(state));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(SubscribeCommand {
                channels,
                users,
                reply: reply_tx,
            })
            .await
            .map_err(|_| UpstreamError::NotRunning)?;

        match tokio::time::timeout(ack_timeout, reply_rx).await {
            Err(_) => Err(UpstreamError::AckTimeout(ack_timeout)),
            Ok(Err(_)) => Err(UpstreamError::Disconnected),
            Ok(Ok(result)) => result,
        }
    }
}

// ---------------------------------------------------------------------------
// Session loop
// ---------------------------------------------------------------------------

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

struct SessionLoop {
    config: UpstreamConfig,
    events_tx: mpsc::Sender<WireEvent>,
    state_tx: watch::Sender<ConnectionState>,
    selectors: Arc<RwLock<(Vec<Channel>, Vec<String>)>>,
}

enum SessionEnd {
    /// Socket died or went silent; reconnect.
    Retry,
    /// Shutdown requested or the event sink is gone; stop for good.
    Stop,
}

impl SessionLoop {
    async fn run(
        self,
        mut cmd_rx: mpsc::Receiver<SubscribeCommand>,
        mut shutdown_rx: watch::Receiver<bool>,
    ) {
        let mut first_attempt = true;
        let mut backoff = BACKOFF_START;
        let mut consecutive_failures = 0u32;

        'reconnect: while !*shutdown_rx.borrow() {
            let _ = self.state_tx.send(if first_attempt {
                ConnectionState::Connecting
            } else {
                ConnectionState::Reconnecting
            });

            let request = match build_ws_request(&self.config.url, &self.config.token) {
                Ok(r) => r,
                Err(e) => {
                    // A URL that cannot even form a request will never
                    // succeed; retrying would loop forever.
                    error!(error = %e, "upstream URL is unusable, giving up");
                    break 'reconnect;
                }
            };

            let attempt = tokio::select! {
                _ = shutdown_rx.changed() => break 'reconnect,
                result = tokio::time::timeout(
                    CONNECT_TIMEOUT,
                    tokio_tungstenite::connect_async(request),
                ) => result,
            };

            let ws = match attempt {
                Ok(Ok((ws, _response))) => ws,
                Ok(Err(e)) => {
                    consecutive_failures += 1;
                    self.surface_connect_failure(consecutive_failures, &e.to_string());
                    if sleep_backoff(&mut shutdown_rx, &mut backoff).await {
                        break 'reconnect;
                    }
                    continue 'reconnect;
                }
                Err(_) => {
                    consecutive_failures += 1;
                    self.surface_connect_failure(
                        consecutive_failures,
                        &format!("connect timed out after {:?}", CONNECT_TIMEOUT),
                    );
                    if sleep_backoff(&mut shutdown_rx, &mut backoff).await {
                        break 'reconnect;
                    }
                    continue 'reconnect;
                }
            };

            consecutive_failures = 0;
            backoff = BACKOFF_START;
            first_attempt = false;
            info!(url = %self.config.url, "upstream connected");

            match self.run_session(ws, &mut cmd_rx, &mut shutdown_rx).await {
                SessionEnd::Stop => break 'reconnect,
                SessionEnd::Retry => {
                    warn!("upstream connection lost, reconnecting");
                }
            }
        }

        let _ = self.state_tx.send(ConnectionState::Disconnected);
        debug!("upstream session loop ended");
    }

    /// One connected session: subscribe, then pump frames until the
    /// socket dies, the server goes silent, or shutdown is requested.
    async fn run_session(
        &self,
        mut ws: WsStream,
        cmd_rx: &mut mpsc::Receiver<SubscribeCommand>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        // Re-assert the current selectors on every (re)connect.
        let (channels, users) = self.selectors.read().expect("selectors lock").clone();
        if send_subscribe(&mut ws, &channels, &users).await.is_err() {
            return SessionEnd::Retry;
        }
        let _ = self.state_tx.send(ConnectionState::Connected);

        let mut pending_ack: AckWaiter = None;
        let mut last_inbound = Instant::now();
        let mut ping_timer = tokio::time::interval(PING_INTERVAL);
        ping_timer.tick().await;
        let mut silence_timer = tokio::time::interval(SILENCE_CHECK_INTERVAL);
        silence_timer.tick().await;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    let _ = ws.close(None).await;
                    fail_pending(&mut pending_ack);
                    return SessionEnd::Stop;
                }
                msg = ws.next() => {
                    match msg {
                        None | Some(Ok(Message::Close(_))) => {
                            fail_pending(&mut pending_ack);
                            return SessionEnd::Retry;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "upstream read error");
                            fail_pending(&mut pending_ack);
                            return SessionEnd::Retry;
                        }
                        Some(Ok(Message::Text(text))) => {
                            last_inbound = Instant::now();
                            if self.handle_text_frame(&text, &mut pending_ack).await {
                                fail_pending(&mut pending_ack);
                                return SessionEnd::Stop;
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            last_inbound = Instant::now();
                            let _ = ws.send(Message::Pong(data)).await;
                        }
                        Some(Ok(_)) => {
                            last_inbound = Instant::now();
                        }
                    }
                }
                Some(cmd) = cmd_rx.recv() => {
                    // New selectors take effect immediately for future
                    // reconnects; the server is not rolled back on a lost
                    // ack.
                    *self.selectors.write().expect("selectors lock") =
                        (cmd.channels.clone(), cmd.users.clone());
                    match send_subscribe(&mut ws, &cmd.channels, &cmd.users).await {
                        Ok(()) => {
                            if let Some(stale) = pending_ack.replace(cmd.reply) {
                                let _ = stale.send(Err(UpstreamError::Disconnected));
                            }
                        }
                        Err(e) => {
                            let _ = cmd.reply.send(Err(e));
                            return SessionEnd::Retry;
                        }
                    }
                }
                _ = ping_timer.tick() => {
                    if ws.send(Message::Ping(Vec::new().into())).await.is_err() {
                        fail_pending(&mut pending_ack);
                        return SessionEnd::Retry;
                    }
                }
                _ = silence_timer.tick() => {
                    if last_inbound.elapsed() > SERVER_TIMEOUT {
                        warn!(
                            silent_for = ?last_inbound.elapsed(),
                            "upstream went silent, forcing reconnect"
                        );
                        fail_pending(&mut pending_ack);
                        return SessionEnd::Retry;
                    }
                }
            }
        }
    }

    /// Dispatch one inbound text frame. Returns true when the event sink
    /// is gone and the loop must stop.
    async fn handle_text_frame(&self, text: &str, pending_ack: &mut AckWaiter) -> bool {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "malformed upstream frame, ignoring");
                return false;
            }
        };

        if value.get("op").is_some() {
            match serde_json::from_value::<UpstreamFrame>(value) {
                Ok(UpstreamFrame::Subscribed { channels, users }) => {
                    info!(
                        channels = ?channels,
                        users = users.len(),
                        "upstream subscription acknowledged"
                    );
                    if let Some(waiter) = pending_ack.take() {
                        let _ = waiter.send(Ok(()));
                    }
                }
                Ok(UpstreamFrame::Subscribe { .. }) => {
                    warn!("unexpected subscribe frame from upstream, ignoring");
                }
                Err(e) => {
                    warn!(error = %e, "unrecognized control frame, ignoring");
                }
            }
            return false;
        }

        match serde_json::from_value::<WireEvent>(value) {
            Ok(event) => {
                // Bounded dispatch preserves upstream order; a dropped
                // receiver means the core is gone and the session with it.
                if self.events_tx.send(event).await.is_err() {
                    warn!("event sink closed, stopping upstream session");
                    return true;
                }
            }
            Err(e) => {
                warn!(error = %e, "malformed event frame, ignoring");
            }
        }
        false
    }

    /// First failure of a streak logs at warn, the rest at debug.
    fn surface_connect_failure(&self, consecutive: u32, detail: &str) {
        if consecutive == 1 {
            warn!(url = %self.config.url, error = %detail, "upstream connect failed");
        } else {
            debug!(
                url = %self.config.url,
                error = %detail,
                attempt = consecutive,
                "upstream connect failed"
            );
        }
    }
}

fn fail_pending(pending_ack: &mut AckWaiter) {
    if let Some(waiter) = pending_ack.take() {
        let _ = waiter.send(Err(UpstreamError::Disconnected));
    }
}

/// Sleep the current backoff (interruptible by shutdown); doubles toward
/// the cap. Returns true when shutdown fired during the sleep.
async fn sleep_backoff(shutdown_rx: &mut watch::Receiver<bool>, backoff: &mut Duration) -> bool {
    let wait = *backoff;
    *backoff = (*backoff * 2).min(BACKOFF_CAP);
    tokio::select! {
        _ = shutdown_rx.changed() => *shutdown_rx.borrow(),
        () = tokio::time::sleep(wait) => false,
    }
}

async fn send_subscribe(
    ws: &mut WsStream,
    channels: &[Channel],
    users: &[String],
) -> Result<(), UpstreamError> {
    let frame = UpstreamFrame::Subscribe {
        channels: channels.to_vec(),
        users: if users.is_empty() {
            None
        } else {
            Some(users.to_vec())
        },
    };
    let json = serde_json::to_string(&frame).map_err(|e| UpstreamError::Ws(e.to_string()))?;
    ws.send(Message::Text(json.into()))
        .await
        .map_err(|e| UpstreamError::Ws(e.to_string()))
}

// ---------------------------------------------------------------------------
// Private: build WS request with Bearer auth header
// ---------------------------------------------------------------------------

/// Converts `url` into a WebSocket client request with an
/// `Authorization: Bearer <token>` header. Delegates to
/// `IntoClientRequest` so the required upgrade headers are populated
/// before the auth header is injected.
fn build_ws_request(
    url: &str,
    token: &str,
) -> Result<tokio_tungstenite::tungstenite::handshake::client::Request, UpstreamError> {
    use tokio_tungstenite::tungstenite::client::IntoClientRequest;

    let mut request = url.into_client_request().map_err(|e| UpstreamError::BadUrl {
        url: url.to_owned(),
        detail: e.to_string(),
    })?;

    let header = format!("Bearer {}", token)
        .parse()
        .map_err(
            |e: tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue| {
                UpstreamError::BadUrl {
                    url: url.to_owned(),
                    detail: format!("invalid auth header: {}", e),
                }
            },
        )?;
    request.headers_mut().insert("Authorization", header);

    Ok(request)
}
