//! One task per dashboard connection.
//!
//! On connect the client is classified (loopback ⇒ control) and receives
//! exactly one `state` snapshot before any forwarded event. After that
//! the task pumps two directions: broadcast messages out, RPC frames in.

use super::{is_control_peer, GatewayState};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::IntoResponse,
};
use relay_protocol::{
    Channel, DashboardClientMessage, DashboardServerMessage, FiltersEnvelope, RpcAck,
    SubscriptionEnvelope,
};
use std::net::SocketAddr;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

const FORBIDDEN: &str =
    "Forbidden: subscription modifications only allowed from local control clients";

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<GatewayState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    // Classification is fixed at upgrade time for the connection's
    // lifetime.
    let is_control = is_control_peer(peer);
    ws.on_upgrade(move |socket| handle_socket(socket, state, peer, is_control))
}

async fn handle_socket(
    mut socket: WebSocket,
    state: GatewayState,
    peer: SocketAddr,
    is_control: bool,
) {
    info!(peer = %peer, control = is_control, "dashboard client connected");

    // Subscribe before the snapshot: anything published in between is
    // queued behind the snapshot send, preserving state-before-events.
    let mut broadcast_rx = state.dashboard_tx.subscribe();

    let snapshot = DashboardServerMessage::State(state.snapshot());
    if send_message(&mut socket, &snapshot).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            forwarded = broadcast_rx.recv() => {
                match forwarded {
                    Ok(message) => {
                        if send_message(&mut socket, &message).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        // Best-effort delivery: slow clients lose events
                        // and catch up from the snapshot on reconnect.
                        debug!(peer = %peer, skipped, "dashboard client lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    None | Some(Ok(Message::Close(_))) => break,
                    Some(Err(e)) => {
                        debug!(peer = %peer, error = %e, "dashboard socket error");
                        break;
                    }
                    Some(Ok(Message::Text(text))) => {
                        if let Some(ack) = handle_frame(&state, is_control, &text).await {
                            let reply = DashboardServerMessage::Ack(ack);
                            if send_message(&mut socket, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    info!(peer = %peer, "dashboard client disconnected");
}

async fn send_message(
    socket: &mut WebSocket,
    message: &DashboardServerMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(message) {
        Ok(json) => socket.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(error = %e, "failed to serialize dashboard message");
            Ok(())
        }
    }
}

/// Parse and execute one inbound frame. Returns the ack to send, if the
/// call carried a request id.
async fn handle_frame(
    state: &GatewayState,
    is_control: bool,
    text: &str,
) -> Option<RpcAck> {
    let message: DashboardClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!(error = %e, "unparseable dashboard RPC, ignoring");
            return None;
        }
    };

    match message {
        DashboardClientMessage::GetRuntimeSubscription(req) => {
            let request_id = require_ack(req.request_id, "get_runtime_subscription")?;
            let subscription = state.core.runtime_subscription();
            match serde_json::to_value(&subscription) {
                Ok(data) => Some(RpcAck::ok(request_id, data)),
                Err(e) => Some(RpcAck::err(request_id, e.to_string())),
            }
        }
        DashboardClientMessage::SetRuntimeSubscription(req) => {
            let request_id = require_ack(req.request_id, "set_runtime_subscription")?;
            Some(set_runtime_subscription(state, is_control, request_id, &req.payload).await)
        }
        DashboardClientMessage::UpdateFilters(req) => {
            let request_id = require_ack(req.request_id, "update_filters")?;
            *state.filters.write().expect("filters lock") = req.filters.clone();
            let _ = state
                .dashboard_tx
                .send(DashboardServerMessage::Filters(FiltersEnvelope {
                    filters: req.filters.clone(),
                }));
            match serde_json::to_value(&req.filters) {
                Ok(data) => Some(RpcAck::ok(request_id, data)),
                Err(e) => Some(RpcAck::err(request_id, e.to_string())),
            }
        }
        DashboardClientMessage::RequestActiveUsers(req) => {
            let request_id = require_ack(req.request_id, "request_active_users")?;
            Some(RpcAck::ok(
                request_id,
                serde_json::Value::from(state.active_users.cached()),
            ))
        }
    }
}

/// Ack-less calls must not crash anything; they are logged and otherwise
/// ignored.
fn require_ack(request_id: Option<String>, method: &str) -> Option<String> {
    match request_id {
        Some(id) => Some(id),
        None => {
            warn!(method, "RPC without request id, ignoring");
            None
        }
    }
}

/// The control RPC. Authorization first, then payload shape, then the
/// core state machine; every failure path reports through the ack and
/// mutates nothing.
async fn set_runtime_subscription(
    state: &GatewayState,
    is_control: bool,
    request_id: String,
    payload: &serde_json::Value,
) -> RpcAck {
    if !is_control {
        return RpcAck::err(request_id, FORBIDDEN);
    }

    let channels = match parse_channel_list(payload.get("channels")) {
        Ok(channels) => channels,
        Err(message) => return RpcAck::err(request_id, message),
    };
    let users = match parse_user_list(payload.get("users")) {
        Ok(users) => users,
        Err(message) => return RpcAck::err(request_id, message),
    };

    match state.core.update_runtime_subscription(channels, users).await {
        Ok(subscription) => {
            let _ = state.dashboard_tx.send(
                DashboardServerMessage::RuntimeSubscriptionUpdated(SubscriptionEnvelope {
                    subscription: subscription.clone(),
                }),
            );
            match serde_json::to_value(&subscription) {
                Ok(data) => RpcAck::ok(request_id, data),
                Err(e) => RpcAck::err(request_id, e.to_string()),
            }
        }
        Err(e) => RpcAck::err(request_id, e.to_string()),
    }
}

fn parse_channel_list(value: Option<&serde_json::Value>) -> Result<Vec<Channel>, String> {
    let Some(items) = value.and_then(|v| v.as_array()) else {
        return Err("channels must be an array".to_owned());
    };
    let mut channels = Vec::with_capacity(items.len());
    for item in items {
        let Some(name) = item.as_str() else {
            return Err(format!("invalid channel: {}", item));
        };
        let channel: Channel = name
            .parse()
            .map_err(|e: relay_protocol::ChannelParseError| e.to_string())?;
        channels.push(channel);
    }
    Ok(channels)
}

fn parse_user_list(value: Option<&serde_json::Value>) -> Result<Vec<String>, String> {
    let Some(items) = value.and_then(|v| v.as_array()) else {
        return Err("users must be an array".to_owned());
    };
    let mut users = Vec::with_capacity(items.len());
    for item in items {
        let Some(name) = item.as_str() else {
            return Err(format!("users must be strings, got {}", item));
        };
        users.push(name.to_owned());
    }
    Ok(users)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::active_users::ActiveUsersFetcher;
    use crate::alerts::AlertOutput;
    use crate::bus::EventBus;
    use crate::core::StreamCore;
    use crate::stats::StatsRegistry;
    use crate::upstream::{UpstreamClient, UpstreamConfig};
    use relay_protocol::{FilterConfig, SubscriptionSource};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn test_state() -> GatewayState {
        let bus = Arc::new(EventBus::new());
        let (events_tx, _events_rx) = mpsc::channel(4);
        let upstream = Arc::new(UpstreamClient::new(
            UpstreamConfig {
                url: "ws://127.0.0.1:1/stream".to_owned(),
                token: "token".to_owned(),
                channels: vec![Channel::All],
                users: Vec::new(),
            },
            events_tx,
        ));
        let core = Arc::new(StreamCore::new(
            Arc::clone(&bus),
            upstream,
            Arc::new(StatsRegistry::new()),
            FilterConfig::default(),
            &[Channel::All],
            &[],
            false,
        ));
        let alerts = Arc::new(AlertOutput::new(bus, Vec::new()));
        let active_users = Arc::new(ActiveUsersFetcher::new("http://127.0.0.1:1", "token"));
        GatewayState::new(core, alerts, active_users)
    }

    #[tokio::test]
    async fn non_control_peer_is_forbidden_and_mutates_nothing() {
        let state = test_state();
        let ack = set_runtime_subscription(
            &state,
            false,
            "r1".to_owned(),
            &json!({"channels": ["tweets"], "users": []}),
        )
        .await;

        assert!(!ack.success);
        assert_eq!(ack.error.as_deref(), Some(FORBIDDEN));
        assert_eq!(
            state.core.runtime_subscription().source,
            SubscriptionSource::Config,
            "forbidden calls must not touch the state"
        );
    }

    #[tokio::test]
    async fn control_peer_passes_gating_then_hits_the_transport_check() {
        // The upstream client was never connected, so a control client
        // clears authorization and payload validation but fails on the
        // transport state.
        let state = test_state();
        let ack = set_runtime_subscription(
            &state,
            true,
            "r2".to_owned(),
            &json!({"channels": ["tweets"], "users": []}),
        )
        .await;

        assert!(!ack.success);
        let error = ack.error.expect("transport-state error");
        assert!(error.contains("not connected"), "got: {}", error);
    }

    #[tokio::test]
    async fn payload_shape_errors_report_through_the_ack() {
        let state = test_state();
        let ack = set_runtime_subscription(
            &state,
            true,
            "r3".to_owned(),
            &json!({"channels": ["tweets"], "users": "alice"}),
        )
        .await;
        assert_eq!(ack.error.as_deref(), Some("users must be an array"));

        let ack = set_runtime_subscription(
            &state,
            true,
            "r4".to_owned(),
            &json!({"channels": ["firehose"], "users": []}),
        )
        .await;
        assert_eq!(ack.error.as_deref(), Some("invalid channel: firehose"));
    }

    #[tokio::test]
    async fn ack_less_rpcs_are_ignored() {
        let state = test_state();
        let reply = handle_frame(
            &state,
            true,
            r#"{"kind": "get_runtime_subscription"}"#,
        )
        .await;
        assert!(reply.is_none());

        let reply = handle_frame(&state, true, "{not json").await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn get_runtime_subscription_is_allowed_for_any_client() {
        let state = test_state();
        let reply = handle_frame(
            &state,
            false,
            r#"{"kind": "get_runtime_subscription", "requestId": "r5"}"#,
        )
        .await
        .expect("ack");
        assert!(reply.success);
        let data = reply.data.expect("subscription data");
        assert_eq!(data["source"], "config");
    }

    #[test]
    fn channel_list_rejects_non_arrays_and_unknown_names() {
        assert!(parse_channel_list(None).is_err());
        assert!(parse_channel_list(Some(&json!("tweets"))).is_err());
        assert_eq!(
            parse_channel_list(Some(&json!(["firehose"]))),
            Err("invalid channel: firehose".to_owned())
        );
        assert_eq!(
            parse_channel_list(Some(&json!(["tweets", "all"]))),
            Ok(vec![Channel::Tweets, Channel::All])
        );
    }

    #[test]
    fn user_list_must_be_an_array_of_strings() {
        assert_eq!(
            parse_user_list(Some(&json!("alice"))),
            Err("users must be an array".to_owned())
        );
        assert!(parse_user_list(Some(&json!([1]))).is_err());
        assert_eq!(
            parse_user_list(Some(&json!(["Alice", "bob"]))),
            Ok(vec!["Alice".to_owned(), "bob".to_owned()])
        );
    }
}
