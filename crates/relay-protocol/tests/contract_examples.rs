/// Contract golden tests: one literal JSON frame per wire message kind,
/// deserialized to Rust types, serialized back, and compared structurally.
/// The literals are the frozen shapes the browser dashboard and upstream
/// source speak; changing them is a protocol change.
use relay_protocol::{
    DashboardClientMessage, DashboardServerMessage, EventData, UpstreamFrame, WireEvent,
};

fn round_trip_server(json_text: &str) -> DashboardServerMessage {
    let value: DashboardServerMessage =
        serde_json::from_str(json_text).expect("deserialize server message");
    let serialized = serde_json::to_string(&value).expect("serialize server message");

    let original: serde_json::Value = serde_json::from_str(json_text).unwrap();
    let round_tripped: serde_json::Value = serde_json::from_str(&serialized).unwrap();
    assert_eq!(original, round_tripped, "round-trip mismatch");
    value
}

// ---------------------------------------------------------------------------
// Upstream frames
// ---------------------------------------------------------------------------

#[test]
fn subscribe_frame_contract() {
    let json = r#"{"op":"subscribe","channels":["all"],"users":["alice","bob"]}"#;
    let frame: UpstreamFrame = serde_json::from_str(json).expect("deserialize");
    match &frame {
        UpstreamFrame::Subscribe { channels, users } => {
            assert_eq!(channels.len(), 1);
            assert_eq!(users.as_deref(), Some(&["alice".to_owned(), "bob".to_owned()][..]));
        }
        other => panic!("expected Subscribe, got {:?}", other),
    }
    assert_eq!(serde_json::to_string(&frame).expect("serialize"), json);
}

#[test]
fn subscribed_ack_contract() {
    let json = r#"{"op":"subscribed","channels":["tweets","following"],"users":[]}"#;
    let frame: UpstreamFrame = serde_json::from_str(json).expect("deserialize");
    match frame {
        UpstreamFrame::Subscribed { channels, users } => {
            assert_eq!(channels, vec!["tweets".to_owned(), "following".to_owned()]);
            assert!(users.is_empty());
        }
        other => panic!("expected Subscribed, got {:?}", other),
    }
}

#[test]
fn upstream_event_frame_contract() {
    let json = r#"{
        "type": "post_created",
        "timestamp": "2026-07-01T10:00:00Z",
        "primaryId": "1809274400000000001",
        "user": {"username": "alice", "displayName": "Alice", "userId": "44196397"},
        "data": {"tweet": {"id": "1809274400000000001", "body": {"text": "gm"}}}
    }"#;
    let wire: WireEvent = serde_json::from_str(json).expect("deserialize");
    let event = wire.validate().expect("validate");
    assert!(matches!(event.data, EventData::Post(_)));
    assert_eq!(event.user.username, "alice");
}

// ---------------------------------------------------------------------------
// Dashboard server -> client
// ---------------------------------------------------------------------------

#[test]
fn state_message_contract() {
    let msg = round_trip_server(
        r#"{
            "kind": "state",
            "events": [],
            "activeUsers": ["alice"],
            "connectionStatus": "connected",
            "stats": {
                "total": 10,
                "delivered": 7,
                "deduped": 2,
                "byType": {"post_created": 7},
                "unknownTypes": {},
                "startTime": "2026-07-01T09:00:00Z",
                "lastEventTime": "2026-07-01T10:00:00Z"
            },
            "filters": {"users": [], "keywords": ["btc"], "eventTypes": []},
            "unknownEventTypes": {"space_launched": 1}
        }"#,
    );
    match msg {
        DashboardServerMessage::State(state) => {
            assert_eq!(state.stats.total, 10);
            assert_eq!(state.unknown_event_types.get("space_launched"), Some(&1));
        }
        other => panic!("expected State, got {:?}", other),
    }
}

#[test]
fn event_message_contract() {
    let msg = round_trip_server(
        r#"{
            "kind": "event",
            "event": {
                "type": "follow_created",
                "timestamp": "2026-07-01T10:00:00Z",
                "primaryId": "44196397",
                "user": {"username": "alice", "displayName": "Alice", "userId": "44196397"},
                "data": {
                    "user": {"id": "44196397", "profile": {"name": "Alice", "description": {"text": ""}}},
                    "following": {"id": "783214", "handle": "bob", "profile": {"name": "Bob"}}
                }
            }
        }"#,
    );
    match msg {
        DashboardServerMessage::Event(envelope) => {
            assert_eq!(envelope.event.follow_target(), Some("bob"));
        }
        other => panic!("expected Event, got {:?}", other),
    }
}

#[test]
fn runtime_subscription_updated_contract() {
    let msg = round_trip_server(
        r#"{
            "kind": "runtime_subscription_updated",
            "subscription": {
                "channels": ["all"],
                "users": ["alice"],
                "mode": "active",
                "source": "runtime",
                "updatedAt": "2026-07-01T10:05:00Z"
            }
        }"#,
    );
    match msg {
        DashboardServerMessage::RuntimeSubscriptionUpdated(envelope) => {
            assert_eq!(envelope.subscription.users, vec!["alice".to_owned()]);
        }
        other => panic!("expected RuntimeSubscriptionUpdated, got {:?}", other),
    }
}

#[test]
fn ack_message_contract() {
    let ok = round_trip_server(
        r#"{"kind":"ack","requestId":"r1","success":true,"data":{"users":[]}}"#,
    );
    match ok {
        DashboardServerMessage::Ack(ack) => assert!(ack.success),
        other => panic!("expected Ack, got {:?}", other),
    }

    let err = round_trip_server(
        r#"{"kind":"ack","requestId":"r2","success":false,"error":"Forbidden: subscription modifications only allowed from local control clients"}"#,
    );
    match err {
        DashboardServerMessage::Ack(ack) => {
            assert!(!ack.success);
            assert!(ack.error.expect("error").starts_with("Forbidden"));
        }
        other => panic!("expected Ack, got {:?}", other),
    }
}

// ---------------------------------------------------------------------------
// Dashboard client -> server
// ---------------------------------------------------------------------------

#[test]
fn set_runtime_subscription_rpc_contract() {
    let json = r#"{
        "kind": "set_runtime_subscription",
        "requestId": "r7",
        "payload": {"channels": ["tweets", "all", "following"], "users": []}
    }"#;
    let msg: DashboardClientMessage = serde_json::from_str(json).expect("deserialize");
    match msg {
        DashboardClientMessage::SetRuntimeSubscription(req) => {
            assert_eq!(req.request_id.as_deref(), Some("r7"));
            assert!(req.payload["channels"].is_array());
        }
        other => panic!("expected SetRuntimeSubscription, got {:?}", other),
    }
}

#[test]
fn update_filters_rpc_contract() {
    let json = r#"{
        "kind": "update_filters",
        "requestId": "r8",
        "filters": {"users": ["alice"], "keywords": [], "eventTypes": ["post_created"]}
    }"#;
    let msg: DashboardClientMessage = serde_json::from_str(json).expect("deserialize");
    match msg {
        DashboardClientMessage::UpdateFilters(req) => {
            assert_eq!(req.filters.users, vec!["alice".to_owned()]);
            assert_eq!(req.filters.event_types.len(), 1);
        }
        other => panic!("expected UpdateFilters, got {:?}", other),
    }
}
