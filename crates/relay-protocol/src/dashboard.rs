//! Dashboard socket protocol and the status/health HTTP shapes.
//!
//! All dashboard messages use a top-level `kind` field for discriminated
//! deserialization, in both directions. Client-callable RPCs follow a
//! request/ack pattern: a call may carry a `requestId`, and the server
//! answers each id with exactly one [`RpcAck`] — `success: true` with
//! `data`, or `success: false` with `error`. Calls without a `requestId`
//! are executed-or-rejected silently (logged server-side, no reply).

use crate::event::{Event, EventType};
use crate::subscription::{Channel, RuntimeSubscription};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Shared sub-types
// ---------------------------------------------------------------------------

/// Upstream link status as shown to dashboards.
///
/// This is a projection of the client's four-state lifecycle: the initial
/// `connecting` phase reports as `disconnected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Server-side admission filter, mirrored to dashboards.
///
/// AND across fields; an empty field means no restriction on that
/// dimension.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterConfig {
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub event_types: Vec<EventType>,
}

/// Point-in-time view of the ingest counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub total: u64,
    pub delivered: u64,
    pub deduped: u64,
    pub by_type: BTreeMap<String, u64>,
    pub unknown_types: BTreeMap<String, u64>,
    /// ISO-8601; reset only by an explicit stats reset.
    pub start_time: String,
    pub last_event_time: Option<String>,
}

/// Full dashboard snapshot: sent as the `state` socket message on connect
/// and served verbatim at `GET /api/state`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateSnapshot {
    /// Last-100 admitted events, oldest first. A reconnect aid, not
    /// history.
    pub events: Vec<Event>,
    pub active_users: Vec<String>,
    pub connection_status: ConnectionStatus,
    pub stats: StatsSnapshot,
    pub filters: FilterConfig,
    pub unknown_event_types: BTreeMap<String, u64>,
}

// ---------------------------------------------------------------------------
// RPC request/ack envelope
// ---------------------------------------------------------------------------

/// Envelope of an argument-less RPC call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// `set_runtime_subscription` call. The payload stays loosely typed so the
/// server can answer shape errors (non-array users, unknown channel names)
/// through the ack instead of dropping the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetSubscriptionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// `update_filters` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFiltersRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub filters: FilterConfig,
}

/// The single reply sent for an RPC carrying a `requestId`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RpcAck {
    pub request_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RpcAck {
    pub fn ok(request_id: String, data: serde_json::Value) -> Self {
        RpcAck {
            request_id,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(request_id: String, error: impl Into<String>) -> Self {
        RpcAck {
            request_id,
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Message payloads (server -> client)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: Event,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveUsersEnvelope {
    pub users: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FiltersEnvelope {
    pub filters: FilterConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatusEnvelope {
    pub status: ConnectionStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionEnvelope {
    pub subscription: RuntimeSubscription,
}

// ---------------------------------------------------------------------------
// Top-level discriminated unions
// ---------------------------------------------------------------------------

/// All server -> client dashboard messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
#[serde(rename_all = "snake_case")]
pub enum DashboardServerMessage {
    State(StateSnapshot),
    Event(EventEnvelope),
    ActiveUsers(ActiveUsersEnvelope),
    Filters(FiltersEnvelope),
    ConnectionStatus(ConnectionStatusEnvelope),
    RuntimeSubscriptionUpdated(SubscriptionEnvelope),
    Ack(RpcAck),
}

/// All client -> server dashboard RPCs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
#[serde(rename_all = "snake_case")]
pub enum DashboardClientMessage {
    GetRuntimeSubscription(RpcRequest),
    SetRuntimeSubscription(SetSubscriptionRequest),
    UpdateFilters(UpdateFiltersRequest),
    RequestActiveUsers(RpcRequest),
}

// ---------------------------------------------------------------------------
// Health report (GET /status)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthConnection {
    pub status: ConnectionStatus,
    pub channels: Vec<Channel>,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthEvents {
    pub total: u64,
    pub delivered: u64,
    pub deduped: u64,
    /// Events per second since start: `total / uptime`.
    pub rate: f64,
}

/// Per-alert-channel delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCounters {
    pub sent: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub connection: HealthConnection,
    pub events: HealthEvents,
    pub alerts: BTreeMap<String, ChannelCounters>,
    pub filters: FilterConfig,
}
