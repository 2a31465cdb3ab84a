//! Control frames of the upstream wire protocol.
//!
//! Upstream frames are JSON text. Objects carrying an `op` field are
//! control frames and deserialize into [`UpstreamFrame`]; everything else
//! is an event object ([`crate::WireEvent`]). The relay sends `subscribe`
//! on connect and on every runtime change; the server answers with
//! `subscribed` echoing the effective selectors.
//!
//! ```json
//! { "op": "subscribe", "channels": ["all"], "users": ["alice"] }
//! { "op": "subscribed", "channels": ["all"], "users": ["alice"] }
//! ```

use crate::subscription::Channel;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op")]
#[serde(rename_all = "snake_case")]
pub enum UpstreamFrame {
    /// Relay -> upstream. `users` is omitted entirely when no user filter
    /// is requested.
    Subscribe {
        channels: Vec<Channel>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        users: Option<Vec<String>>,
    },
    /// Upstream -> relay acknowledgement. Channels arrive as raw strings:
    /// servers may echo names outside the relay's frozen enum.
    Subscribed {
        #[serde(default)]
        channels: Vec<String>,
        #[serde(default)]
        users: Vec<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_omits_users_when_none() {
        let frame = UpstreamFrame::Subscribe {
            channels: vec![Channel::All],
            users: None,
        };
        let json = serde_json::to_string(&frame).expect("serialize");
        assert_eq!(json, r#"{"op":"subscribe","channels":["all"]}"#);
    }

    #[test]
    fn subscribed_ack_parses_with_missing_users() {
        let frame: UpstreamFrame =
            serde_json::from_str(r#"{"op":"subscribed","channels":["all"]}"#).expect("parse");
        assert_eq!(
            frame,
            UpstreamFrame::Subscribed {
                channels: vec!["all".to_owned()],
                users: vec![],
            }
        );
    }

    #[test]
    fn unknown_op_fails_to_parse() {
        assert!(serde_json::from_str::<UpstreamFrame>(r#"{"op":"resync"}"#).is_err());
    }
}
