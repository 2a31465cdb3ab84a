//! Alert dispatch: formats admitted events and fans them out to the
//! configured channels.
//!
//! Subscribes to the bus `alerts` channel on start. Channels dispatch
//! concurrently per event; each tracks `{sent, failed}` and a failure in
//! one never affects the others.

pub mod channels;

pub use channels::{AlertChannel, AlertError, SendOutcome};

use crate::bus::{channels as bus_channels, EventBus};
use futures_util::future::join_all;
use relay_protocol::{AlertMessage, ChannelCounters, Event, EventData, EventType};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

/// Bus-fed alert output. One instance owns every configured channel.
pub struct AlertOutput {
    bus: Arc<EventBus>,
    channels: Vec<Arc<AlertChannel>>,
    counters: Mutex<BTreeMap<String, ChannelCounters>>,
    subscription: Mutex<Option<Uuid>>,
}

impl AlertOutput {
    pub fn new(bus: Arc<EventBus>, channels: Vec<AlertChannel>) -> Self {
        let channels: Vec<Arc<AlertChannel>> = channels.into_iter().map(Arc::new).collect();
        let counters = channels
            .iter()
            .map(|c| (c.name().to_owned(), ChannelCounters::default()))
            .collect();
        AlertOutput {
            bus,
            channels,
            counters: Mutex::new(counters),
            subscription: Mutex::new(None),
        }
    }

    /// Subscribe on the bus. Starting twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.subscription.lock().expect("subscription lock");
        if slot.is_some() {
            return;
        }
        let output = Arc::clone(self);
        let id = self.bus.subscribe_fn(bus_channels::ALERTS, move |event| {
            let output = Arc::clone(&output);
            async move {
                output.dispatch(&format_alert(&event)).await;
                Ok(())
            }
        });
        *slot = Some(id);
        info!(channels = self.channels.len(), "alert output started");
    }

    /// Unsubscribe from the bus. Idempotent.
    pub fn stop(&self) {
        if let Some(id) = self.subscription.lock().expect("subscription lock").take() {
            self.bus.unsubscribe(id);
            info!("alert output stopped");
        }
    }

    /// Per-channel delivery counters (name -> {sent, failed}).
    pub fn counters(&self) -> BTreeMap<String, ChannelCounters> {
        self.counters.lock().expect("counters lock").clone()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Send one alert through every enabled channel, concurrently.
    async fn dispatch(&self, message: &AlertMessage) {
        let sends = self.channels.iter().map(|channel| {
            let channel = Arc::clone(channel);
            let message = message.clone();
            async move {
                let outcome = channel.send(&message).await;
                (channel.name(), outcome)
            }
        });

        for (name, outcome) in join_all(sends).await {
            let mut counters = self.counters.lock().expect("counters lock");
            let entry = counters.entry(name.to_owned()).or_default();
            match outcome {
                Ok(SendOutcome::Sent) => entry.sent += 1,
                Ok(SendOutcome::RateLimited | SendOutcome::Disabled) => {}
                Err(e) => {
                    entry.failed += 1;
                    warn!(channel = name, error = %e, "alert delivery failed");
                }
            }
        }
    }
}

/// Build the outbound message for an admitted event. The text is
/// event-kind specific.
pub fn format_alert(event: &Event) -> AlertMessage {
    let text = match (&event.data, event.kind) {
        (EventData::Post(post), _) => post.tweet.body.text.clone(),
        (EventData::Following(follow), _) => {
            format!("followed @{}", follow.following.handle)
        }
        (EventData::Profile(_), EventType::ProfilePinned) => "pinned a new tweet".to_owned(),
        (EventData::Profile(_), _) => "updated profile".to_owned(),
    };
    AlertMessage {
        event_type: event.kind,
        username: event.user.username.clone(),
        text,
        timestamp: event.timestamp.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::{
        EventUser, FollowTarget, FollowingData, PostData, ProfileData, ProfileSubject, Tweet,
        TweetBody,
    };

    fn base_event() -> Event {
        Event {
            kind: EventType::PostCreated,
            timestamp: "2026-07-01T10:00:00Z".to_owned(),
            primary_id: "tw1".to_owned(),
            user: EventUser {
                username: "alice".to_owned(),
                display_name: "Alice".to_owned(),
                user_id: "u1".to_owned(),
            },
            data: EventData::Post(PostData {
                tweet: Tweet {
                    id: "tw1".to_owned(),
                    body: TweetBody {
                        text: "btc breaking out".to_owned(),
                    },
                },
            }),
        }
    }

    #[test]
    fn post_alert_carries_the_tweet_body() {
        let message = format_alert(&base_event());
        assert_eq!(message.event_type, EventType::PostCreated);
        assert_eq!(message.username, "alice");
        assert_eq!(message.text, "btc breaking out");
    }

    #[test]
    fn follow_alert_names_the_target() {
        let mut event = base_event();
        event.kind = EventType::FollowCreated;
        event.data = EventData::Following(FollowingData {
            user: ProfileSubject::default(),
            following: FollowTarget {
                id: "u9".to_owned(),
                handle: "bob".to_owned(),
                profile: Default::default(),
            },
        });
        assert_eq!(format_alert(&event).text, "followed @bob");
    }

    #[test]
    fn profile_alerts_distinguish_pins() {
        let mut event = base_event();
        event.kind = EventType::ProfileUpdated;
        event.data = EventData::Profile(ProfileData {
            user: ProfileSubject::default(),
            pinned: None,
            before: None,
        });
        assert_eq!(format_alert(&event).text, "updated profile");

        event.kind = EventType::ProfilePinned;
        assert_eq!(format_alert(&event).text, "pinned a new tweet");
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_unsubscribes() {
        let bus = Arc::new(EventBus::new());
        let output = Arc::new(AlertOutput::new(Arc::clone(&bus), Vec::new()));
        output.start();
        output.start();
        assert_eq!(bus.subscriber_count(bus_channels::ALERTS), 1);
        output.stop();
        assert_eq!(bus.subscriber_count(bus_channels::ALERTS), 0);
    }

    #[tokio::test]
    async fn failing_channel_counts_against_itself_only() {
        // An unroutable webhook URL fails fast at connect time.
        let bus = Arc::new(EventBus::new());
        let bad = AlertChannel::discord("http://127.0.0.1:1/hook".to_owned());
        let disabled =
            AlertChannel::telegram("t".to_owned(), "c".to_owned()).with_enabled(false);
        let output = Arc::new(AlertOutput::new(bus, vec![bad, disabled]));

        output.dispatch(&format_alert(&base_event())).await;

        let counters = output.counters();
        assert_eq!(counters["discord"].failed, 1);
        assert_eq!(counters["discord"].sent, 0);
        assert_eq!(counters["telegram"].sent, 0);
        assert_eq!(counters["telegram"].failed, 0);
    }
}
