// relay-protocol: wire and domain types for the event relay.
//
// Three wire surfaces share these definitions:
// - the upstream event source (JSON frames over WebSocket, `op`-tagged
//   control frames, bare event objects otherwise),
// - the dashboard socket (JSON both directions, `kind`-tagged),
// - the status/health HTTP endpoints.
//
// Everything here is pure data: serde derives, validation, and
// normalization helpers. No I/O.

pub mod alert;
pub mod dashboard;
pub mod event;
pub mod subscription;
pub mod upstream;

pub use alert::AlertMessage;
pub use dashboard::{
    ActiveUsersEnvelope, ChannelCounters, ConnectionStatus, ConnectionStatusEnvelope,
    DashboardClientMessage, DashboardServerMessage, EventEnvelope, FilterConfig, FiltersEnvelope,
    HealthConnection, HealthEvents, HealthReport, RpcAck, RpcRequest, SetSubscriptionRequest,
    StateSnapshot, StatsSnapshot, SubscriptionEnvelope, UpdateFiltersRequest,
};
pub use event::{
    Event, EventData, EventParseError, EventType, EventUser, FollowTarget, FollowTargetProfile,
    FollowingData, PostData, ProfileData, ProfileDescription, ProfileDetails, ProfileSubject,
    Tweet, TweetBody, WireEvent,
};
pub use subscription::{
    normalize_channels, normalize_users, Channel, ChannelParseError, RuntimeSubscription,
    SubscriptionMode, SubscriptionSource,
};
pub use upstream::UpstreamFrame;
