//! The canonical event model and its wire form.
//!
//! Upstream emits loosely-typed JSON; [`WireEvent`] captures that shape and
//! [`WireEvent::validate`] turns it into an [`Event`] with the `data` union
//! resolved against the `type` discriminator. Anything that fails validation
//! never enters the pipeline.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// Closed set of upstream activity kinds.
///
/// The discriminator decides which shape `data` must carry:
/// post kinds carry a tweet, follow kinds carry a follow edge, the
/// remaining kinds carry a profile snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PostCreated,
    PostUpdated,
    FollowCreated,
    FollowUpdated,
    UserUpdated,
    ProfileUpdated,
    ProfilePinned,
}

impl EventType {
    /// Parse a raw discriminator string. `None` for anything outside the
    /// closed set (the caller counts those under `unknown_types`).
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "post_created" => Some(EventType::PostCreated),
            "post_updated" => Some(EventType::PostUpdated),
            "follow_created" => Some(EventType::FollowCreated),
            "follow_updated" => Some(EventType::FollowUpdated),
            "user_updated" => Some(EventType::UserUpdated),
            "profile_updated" => Some(EventType::ProfileUpdated),
            "profile_pinned" => Some(EventType::ProfilePinned),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::PostCreated => "post_created",
            EventType::PostUpdated => "post_updated",
            EventType::FollowCreated => "follow_created",
            EventType::FollowUpdated => "follow_updated",
            EventType::UserUpdated => "user_updated",
            EventType::ProfileUpdated => "profile_updated",
            EventType::ProfilePinned => "profile_pinned",
        }
    }

    /// True for `post_created` / `post_updated`.
    pub fn is_post(self) -> bool {
        matches!(self, EventType::PostCreated | EventType::PostUpdated)
    }

    /// True for `follow_created` / `follow_updated`.
    pub fn is_follow(self) -> bool {
        matches!(self, EventType::FollowCreated | EventType::FollowUpdated)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Sub-structures of the data union
// ---------------------------------------------------------------------------

/// The acting user attached to every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventUser {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TweetBody {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tweet {
    pub id: String,
    #[serde(default)]
    pub body: TweetBody,
}

/// Payload of post events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostData {
    pub tweet: Tweet,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDescription {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileDetails {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: ProfileDescription,
}

/// A user snapshot carried inside profile and follow payloads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSubject {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub profile: ProfileDetails,
}

/// Payload of profile events (`user_updated`, `profile_updated`,
/// `profile_pinned`). `pinned` and `before` are passed through opaquely;
/// the relay inspects only the textual profile fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileData {
    pub user: ProfileSubject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowTargetProfile {
    #[serde(default)]
    pub name: String,
}

/// The followed account in follow events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowTarget {
    pub id: String,
    #[serde(default)]
    pub handle: String,
    #[serde(default)]
    pub profile: FollowTargetProfile,
}

/// Payload of follow events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowingData {
    #[serde(default)]
    pub user: ProfileSubject,
    pub following: FollowTarget,
}

// ---------------------------------------------------------------------------
// EventData union
// ---------------------------------------------------------------------------

/// Tagged payload union, resolved from the `type` discriminator at the
/// ingest boundary. Serialized untagged so the wire shape matches what
/// upstream sent (the tag is the top-level `type` field, not repeated
/// inside `data`).
///
/// Deserialization order matters: `Following` must be tried before
/// `Profile` since a follow payload also carries a `user` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventData {
    Post(PostData),
    Following(FollowingData),
    Profile(ProfileData),
}

// ---------------------------------------------------------------------------
// Event
// ---------------------------------------------------------------------------

/// A validated, admitted-or-droppable activity event.
///
/// Invariants (enforced by [`WireEvent::validate`]):
/// - `kind` is a member of the closed [`EventType`] set
/// - `timestamp`, `primary_id`, `user.username` are non-empty
/// - `data` structurally matches the shape implied by `kind`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub timestamp: String,
    pub primary_id: String,
    pub user: EventUser,
    pub data: EventData,
}

impl Event {
    /// Tweet body text for post events, `None` otherwise.
    pub fn tweet_text(&self) -> Option<&str> {
        match &self.data {
            EventData::Post(p) => Some(&p.tweet.body.text),
            _ => None,
        }
    }

    /// Handle of the followed account for follow events, `None` otherwise.
    pub fn follow_target(&self) -> Option<&str> {
        match &self.data {
            EventData::Following(f) => Some(&f.following.handle),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Wire form + validation
// ---------------------------------------------------------------------------

/// An event frame exactly as received from upstream, before validation.
///
/// Every field is optional at this level; [`WireEvent::validate`] is the
/// single place that decides what is structurally acceptable.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireEvent {
    #[serde(rename = "type", default)]
    pub event_type: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub primary_id: String,
    #[serde(default)]
    pub user: Option<EventUser>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// Why a wire event was rejected.
///
/// `UnknownType` is reported only after the scalar fields pass, so the
/// caller can still count the frame (`total`, `unknown_types`) per the
/// ingest contract; the other variants are silent structural drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventParseError {
    /// Required scalar missing or empty.
    MissingField(&'static str),
    /// Discriminator outside the closed set; carries the raw string.
    UnknownType(String),
    /// `data` did not match the shape implied by the discriminator.
    DataShape {
        expected: &'static str,
        detail: String,
    },
}

impl std::fmt::Display for EventParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventParseError::MissingField(name) => write!(f, "missing required field: {}", name),
            EventParseError::UnknownType(raw) => write!(f, "unknown event type: {}", raw),
            EventParseError::DataShape { expected, detail } => {
                write!(f, "event data does not match {} shape: {}", expected, detail)
            }
        }
    }
}

impl std::error::Error for EventParseError {}

impl WireEvent {
    /// Validate and convert into an [`Event`].
    ///
    /// Check order is part of the contract: scalars first (so broken frames
    /// drop without counting), then the discriminator (so unknown types are
    /// countable), then the data shape.
    pub fn validate(self) -> Result<Event, EventParseError> {
        if self.event_type.is_empty() {
            return Err(EventParseError::MissingField("type"));
        }
        if self.timestamp.is_empty() {
            return Err(EventParseError::MissingField("timestamp"));
        }
        if self.primary_id.is_empty() {
            return Err(EventParseError::MissingField("primaryId"));
        }
        let user = match self.user {
            Some(u) if !u.username.is_empty() => u,
            _ => return Err(EventParseError::MissingField("user.username")),
        };

        let kind = EventType::parse(&self.event_type)
            .ok_or_else(|| EventParseError::UnknownType(self.event_type.clone()))?;

        let raw_data = self
            .data
            .ok_or(EventParseError::MissingField("data"))?;
        let data = parse_data(kind, raw_data)?;

        Ok(Event {
            kind,
            timestamp: self.timestamp,
            primary_id: self.primary_id,
            user,
            data,
        })
    }
}

fn parse_data(kind: EventType, raw: serde_json::Value) -> Result<EventData, EventParseError> {
    if kind.is_post() {
        let post: PostData = serde_json::from_value(raw).map_err(|e| {
            EventParseError::DataShape {
                expected: "post",
                detail: e.to_string(),
            }
        })?;
        if post.tweet.id.is_empty() {
            return Err(EventParseError::DataShape {
                expected: "post",
                detail: "tweet.id is empty".to_owned(),
            });
        }
        return Ok(EventData::Post(post));
    }
    if kind.is_follow() {
        let follow: FollowingData = serde_json::from_value(raw).map_err(|e| {
            EventParseError::DataShape {
                expected: "following",
                detail: e.to_string(),
            }
        })?;
        if follow.following.id.is_empty() {
            return Err(EventParseError::DataShape {
                expected: "following",
                detail: "following.id is empty".to_owned(),
            });
        }
        return Ok(EventData::Following(follow));
    }
    let profile: ProfileData = serde_json::from_value(raw).map_err(|e| {
        EventParseError::DataShape {
            expected: "profile",
            detail: e.to_string(),
        }
    })?;
    Ok(EventData::Profile(profile))
}
