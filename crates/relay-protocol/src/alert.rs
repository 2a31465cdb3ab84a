//! The message shape handed to outbound alert channels.

use crate::event::EventType;
use serde::{Deserialize, Serialize};

/// A formatted alert, one per admitted event. `text` is event-kind
/// specific: the tweet body for posts, a short sentence for profile
/// updates, `followed @{target}` for follows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertMessage {
    pub event_type: EventType,
    pub username: String,
    pub text: String,
    /// ISO-8601, copied from the event.
    pub timestamp: String,
}
