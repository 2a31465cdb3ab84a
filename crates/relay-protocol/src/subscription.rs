//! Subscription selectors and the runtime-subscription state.
//!
//! Channels are a frozen enum; the relay rejects any other name at the
//! runtime-subscription boundary even though upstream docs mention more.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// Upstream subscription selector. Declaration order is the canonical sort
/// order used when normalizing channel lists.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    All,
    Following,
    Tweets,
}

impl Channel {
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::All => "all",
            Channel::Following => "following",
            Channel::Tweets => "tweets",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejection of a channel name outside the frozen set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelParseError(pub String);

impl std::fmt::Display for ChannelParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid channel: {}", self.0)
    }
}

impl std::error::Error for ChannelParseError {}

impl std::str::FromStr for Channel {
    type Err = ChannelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Channel::All),
            "following" => Ok(Channel::Following),
            "tweets" => Ok(Channel::Tweets),
            other => Err(ChannelParseError(other.to_owned())),
        }
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Canonicalize a channel list: the `all` sentinel collapses any superset
/// to exactly `[all]`; otherwise dedup and sort.
pub fn normalize_channels(channels: &[Channel]) -> Vec<Channel> {
    if channels.contains(&Channel::All) {
        return vec![Channel::All];
    }
    let mut out: Vec<Channel> = channels.to_vec();
    out.sort();
    out.dedup();
    out
}

/// Canonicalize a user-handle list: trim, lowercase, drop empties, dedup,
/// sort.
pub fn normalize_users(users: &[String]) -> Vec<String> {
    let mut out: Vec<String> = users
        .iter()
        .map(|u| u.trim().to_lowercase())
        .filter(|u| !u.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

// ---------------------------------------------------------------------------
// RuntimeSubscription
// ---------------------------------------------------------------------------

/// `active` when at least one channel is selected, `idle` otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionMode {
    Active,
    Idle,
}

/// Where the current selectors came from: startup config, or a successful
/// runtime update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionSource {
    Config,
    Runtime,
}

/// The relay's effective upstream subscription.
///
/// Invariant: `mode == Idle` exactly when `channels` is empty. Constructed
/// only through [`RuntimeSubscription::new`], which normalizes the
/// selectors and derives the mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSubscription {
    pub channels: Vec<Channel>,
    pub users: Vec<String>,
    pub mode: SubscriptionMode,
    pub source: SubscriptionSource,
    /// ISO-8601 instant of the last state change.
    pub updated_at: String,
}

impl RuntimeSubscription {
    pub fn new(
        channels: &[Channel],
        users: &[String],
        source: SubscriptionSource,
        updated_at: String,
    ) -> Self {
        let channels = normalize_channels(channels);
        let users = normalize_users(users);
        let mode = if channels.is_empty() {
            SubscriptionMode::Idle
        } else {
            SubscriptionMode::Active
        };
        RuntimeSubscription {
            channels,
            users,
            mode,
            source,
            updated_at,
        }
    }
}
