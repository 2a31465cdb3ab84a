// mock_upstream: A mock event-source WebSocket server for testing the
// relay's upstream client.
//
// Accepts connections on ws://127.0.0.1:<port>, records every subscribe
// frame, optionally acks with `subscribed`, and can inject event frames
// or drop all connections on command.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::protocol::Message;

/// Behavior knobs for [`MockUpstreamServer`].
#[derive(Debug, Clone)]
pub struct UpstreamServerOptions {
    /// When false the server swallows subscribe frames without acking,
    /// for ack-timeout tests.
    pub ack_subscribes: bool,
}

impl Default for UpstreamServerOptions {
    fn default() -> Self {
        UpstreamServerOptions {
            ack_subscribes: true,
        }
    }
}

#[derive(Clone)]
enum ServerCommand {
    /// Send a raw text frame to every connected client.
    Frame(String),
    /// Close every connection (clients should reconnect).
    DropAll,
}

/// A mock upstream source for integration testing.
///
/// # Protocol behavior
///
/// - Every inbound `{op: "subscribe", ...}` frame is recorded and (by
///   default) acked with `{op: "subscribed"}` echoing the selectors.
/// - `send_event` delivers an arbitrary JSON value as an event frame to
///   all connected clients.
/// - `drop_connections` closes every client socket, exercising the
///   relay's reconnect path.
pub struct MockUpstreamServer {
    addr: SocketAddr,
    subscribes: Arc<Mutex<Vec<serde_json::Value>>>,
    connections: Arc<Mutex<usize>>,
    command_tx: broadcast::Sender<ServerCommand>,
    _task: tokio::task::JoinHandle<()>,
}

impl MockUpstreamServer {
    /// Start with default options (subscribes are acked).
    pub async fn start() -> Result<Self, Box<dyn std::error::Error>> {
        Self::start_with_options(UpstreamServerOptions::default()).await
    }

    pub async fn start_with_options(
        options: UpstreamServerOptions,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let subscribes = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));
        let (command_tx, _) = broadcast::channel(64);

        let task = {
            let subscribes = Arc::clone(&subscribes);
            let connections = Arc::clone(&connections);
            let command_tx = command_tx.clone();
            tokio::spawn(async move {
                accept_loop(listener, options, subscribes, connections, command_tx).await;
            })
        };

        Ok(MockUpstreamServer {
            addr,
            subscribes,
            connections,
            command_tx,
            _task: task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Every subscribe frame received so far, in arrival order.
    pub fn subscribe_frames(&self) -> Vec<serde_json::Value> {
        self.subscribes.lock().expect("subscribes lock").clone()
    }

    pub fn connection_count(&self) -> usize {
        *self.connections.lock().expect("connections lock")
    }

    /// Deliver an event frame to every connected client.
    pub fn send_event(&self, event: &serde_json::Value) {
        let _ = self.command_tx.send(ServerCommand::Frame(event.to_string()));
    }

    /// Deliver a raw text frame (malformed input tests).
    pub fn send_raw(&self, frame: &str) {
        let _ = self
            .command_tx
            .send(ServerCommand::Frame(frame.to_owned()));
    }

    /// Close every client connection.
    pub fn drop_connections(&self) {
        let _ = self.command_tx.send(ServerCommand::DropAll);
    }
}

impl Drop for MockUpstreamServer {
    fn drop(&mut self) {
        self._task.abort();
    }
}

async fn accept_loop(
    listener: TcpListener,
    options: UpstreamServerOptions,
    subscribes: Arc<Mutex<Vec<serde_json::Value>>>,
    connections: Arc<Mutex<usize>>,
    command_tx: broadcast::Sender<ServerCommand>,
) {
    loop {
        match listener.accept().await {
            Ok((stream, _peer)) => {
                let options = options.clone();
                let subscribes = Arc::clone(&subscribes);
                let connections = Arc::clone(&connections);
                let command_rx = command_tx.subscribe();
                tokio::spawn(async move {
                    *connections.lock().expect("connections lock") += 1;
                    let result =
                        handle_connection(stream, options, subscribes, command_rx).await;
                    *connections.lock().expect("connections lock") -= 1;
                    // Client drops are expected in tests; swallow.
                    let _ = result;
                });
            }
            Err(_) => break,
        }
    }
}

async fn handle_connection(
    stream: tokio::net::TcpStream,
    options: UpstreamServerOptions,
    subscribes: Arc<Mutex<Vec<serde_json::Value>>>,
    mut command_rx: broadcast::Receiver<ServerCommand>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut ws = tokio_tungstenite::accept_async(stream).await?;

    loop {
        tokio::select! {
            command = command_rx.recv() => {
                match command {
                    Ok(ServerCommand::Frame(text)) => {
                        ws.send(Message::Text(text.into())).await?;
                    }
                    Ok(ServerCommand::DropAll) => {
                        let _ = ws.close(None).await;
                        break;
                    }
                    Err(_) => break,
                }
            }
            msg = ws.next() => {
                let msg = match msg {
                    None => break,
                    Some(m) => m?,
                };
                match msg {
                    Message::Text(text) => {
                        let value: serde_json::Value = match serde_json::from_str(&text) {
                            Ok(v) => v,
                            Err(_) => continue,
                        };
                        if value.get("op").and_then(|op| op.as_str()) == Some("subscribe") {
                            subscribes.lock().expect("subscribes lock").push(value.clone());
                            if options.ack_subscribes {
                                let ack = serde_json::json!({
                                    "op": "subscribed",
                                    "channels": value.get("channels").cloned()
                                        .unwrap_or_else(|| serde_json::json!([])),
                                    "users": value.get("users").cloned()
                                        .unwrap_or_else(|| serde_json::json!([])),
                                });
                                ws.send(Message::Text(ack.to_string().into())).await?;
                            }
                        }
                    }
                    Message::Ping(data) => {
                        ws.send(Message::Pong(data)).await?;
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    Ok(())
}
