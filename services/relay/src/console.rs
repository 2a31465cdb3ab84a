//! Stdout tap: one line per admitted event plus a periodic stats line.

use crate::bus::{channels, EventBus};
use crate::stats::StatsRegistry;
use relay_protocol::{Event, EventData, EventType};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

pub const DEFAULT_STATS_INTERVAL: Duration = Duration::from_secs(60);
const SUMMARY_LIMIT: usize = 100;

/// Bus-fed console printer. Subscribes on the `cli` channel.
pub struct ConsoleOutput {
    bus: Arc<EventBus>,
    stats: Arc<StatsRegistry>,
    stats_interval: Duration,
    subscription: Mutex<Option<Uuid>>,
    ticker: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ConsoleOutput {
    pub fn new(bus: Arc<EventBus>, stats: Arc<StatsRegistry>) -> Self {
        ConsoleOutput {
            bus,
            stats,
            stats_interval: DEFAULT_STATS_INTERVAL,
            subscription: Mutex::new(None),
            ticker: Mutex::new(None),
        }
    }

    pub fn with_stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval = interval;
        self
    }

    /// Subscribe and start the stats ticker. Calling twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.subscription.lock().expect("subscription lock");
        if slot.is_some() {
            return;
        }
        let id = self.bus.subscribe_fn(channels::CLI, move |event| async move {
            println!("{}", format_line(&event));
            Ok(())
        });
        *slot = Some(id);

        let output = Arc::clone(self);
        let interval = self.stats_interval;
        let ticker = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await;
            loop {
                timer.tick().await;
                output.display_stats();
            }
        });
        *self.ticker.lock().expect("ticker lock") = Some(ticker);
        info!("console output started");
    }

    /// Unsubscribe and cancel the ticker. Idempotent.
    pub fn stop(&self) {
        if let Some(id) = self.subscription.lock().expect("subscription lock").take() {
            self.bus.unsubscribe(id);
        }
        if let Some(ticker) = self.ticker.lock().expect("ticker lock").take() {
            ticker.abort();
        }
    }

    /// Print the stats line immediately.
    pub fn display_stats(&self) {
        println!("{}", self.stats_line());
    }

    /// Test hook: bump the dedup counter without running the pipeline.
    pub fn increment_deduped(&self) {
        self.stats.record_deduped();
    }

    fn stats_line(&self) -> String {
        let snapshot = self.stats.snapshot();
        format!(
            "events_total={} delivered={} deduped={} rate={:.1}/s",
            snapshot.total,
            snapshot.delivered,
            snapshot.deduped,
            self.stats.rate()
        )
    }
}

impl Drop for ConsoleOutput {
    fn drop(&mut self) {
        if let Some(ticker) = self.ticker.lock().expect("ticker lock").take() {
            ticker.abort();
        }
    }
}

/// `[{type}] @{username}: {summary}` — always a single line.
pub fn format_line(event: &Event) -> String {
    format!(
        "[{}] @{}: {}",
        event.kind,
        event.user.username,
        summarize(event)
    )
}

fn summarize(event: &Event) -> String {
    match (&event.data, event.kind) {
        (EventData::Post(post), _) => truncate(&sanitize(&post.tweet.body.text)),
        (EventData::Following(follow), _) => {
            format!("followed @{}", follow.following.handle)
        }
        (EventData::Profile(_), EventType::ProfilePinned) => "pinned".to_owned(),
        (EventData::Profile(_), _) => "profile updated".to_owned(),
    }
}

/// Replace line breaks so the output stays one line per event.
fn sanitize(text: &str) -> String {
    text.replace(['\r', '\n'], " ")
}

/// Cap at 100 characters; the ellipsis is appended only when something
/// was actually cut.
fn truncate(text: &str) -> String {
    if text.chars().count() <= SUMMARY_LIMIT {
        return text.to_owned();
    }
    let cut: String = text.chars().take(SUMMARY_LIMIT).collect();
    format!("{}...", cut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::{EventUser, FollowTarget, FollowingData, PostData, Tweet, TweetBody};

    fn post(text: &str) -> Event {
        Event {
            kind: EventType::PostCreated,
            timestamp: "2026-07-01T10:00:00Z".to_owned(),
            primary_id: "tw1".to_owned(),
            user: EventUser {
                username: "alice".to_owned(),
                display_name: String::new(),
                user_id: "u1".to_owned(),
            },
            data: EventData::Post(PostData {
                tweet: Tweet {
                    id: "tw1".to_owned(),
                    body: TweetBody {
                        text: text.to_owned(),
                    },
                },
            }),
        }
    }

    #[test]
    fn line_is_type_user_summary() {
        assert_eq!(format_line(&post("gm")), "[post_created] @alice: gm");
    }

    #[test]
    fn line_breaks_are_flattened() {
        assert_eq!(
            format_line(&post("line one\r\nline two")),
            "[post_created] @alice: line one  line two"
        );
    }

    #[test]
    fn summary_truncates_only_past_the_limit() {
        let exactly = "x".repeat(100);
        assert_eq!(format_line(&post(&exactly)), format!("[post_created] @alice: {}", exactly));

        let over = "y".repeat(101);
        let line = format_line(&post(&over));
        assert!(line.ends_with("..."));
        assert!(line.contains(&"y".repeat(100)));
        assert!(!line.contains(&"y".repeat(101)));
    }

    #[test]
    fn follow_and_profile_summaries() {
        let mut event = post("");
        event.kind = EventType::FollowCreated;
        event.data = EventData::Following(FollowingData {
            user: Default::default(),
            following: FollowTarget {
                id: "u9".to_owned(),
                handle: "bob".to_owned(),
                profile: Default::default(),
            },
        });
        assert_eq!(format_line(&event), "[follow_created] @alice: followed @bob");

        event.kind = EventType::ProfilePinned;
        event.data = EventData::Profile(relay_protocol::ProfileData {
            user: Default::default(),
            pinned: None,
            before: None,
        });
        assert_eq!(format_line(&event), "[profile_pinned] @alice: pinned");

        event.kind = EventType::UserUpdated;
        assert_eq!(format_line(&event), "[user_updated] @alice: profile updated");
    }

    #[tokio::test]
    async fn start_is_idempotent_and_stop_unsubscribes() {
        let bus = Arc::new(EventBus::new());
        let stats = Arc::new(StatsRegistry::new());
        let console = Arc::new(ConsoleOutput::new(Arc::clone(&bus), stats));
        console.start();
        console.start();
        assert_eq!(bus.subscriber_count(channels::CLI), 1);
        console.stop();
        assert_eq!(bus.subscriber_count(channels::CLI), 0);
    }

    #[tokio::test]
    async fn increment_deduped_feeds_the_stats_line() {
        let bus = Arc::new(EventBus::new());
        let stats = Arc::new(StatsRegistry::new());
        let console = ConsoleOutput::new(bus, Arc::clone(&stats));
        console.increment_deduped();
        assert_eq!(stats.snapshot().deduped, 1);
        assert!(console.stats_line().contains("deduped=1"));
    }
}
