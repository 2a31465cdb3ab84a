//! Stream core: ingest pipeline and the runtime-subscription state
//! machine.
//!
//! Ingest is strictly sequential per upstream reader — validate, count,
//! filter, dedup, then fan out on the bus — so every subscriber observes
//! events in upstream order. Runtime-subscription updates serialize
//! through a single-slot mutex: one in-flight update, concurrent callers
//! are rejected rather than queued.

use crate::bus::{channels, EventBus};
use crate::dedup::{fingerprint, DedupCache};
use crate::filter::FilterPipeline;
use crate::stats::StatsRegistry;
use crate::upstream::{ConnectionState, UpstreamClient, UpstreamError, DEFAULT_ACK_TIMEOUT};
use relay_protocol::{
    Channel, EventParseError, FilterConfig, RuntimeSubscription, SubscriptionSource, WireEvent,
};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum SubscriptionError {
    #[error("update already in progress")]
    UpdateInProgress,
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// The relay's central component: owns the admission pipeline state and
/// the upstream client.
pub struct StreamCore {
    bus: Arc<EventBus>,
    filters: FilterPipeline,
    filter_config: FilterConfig,
    dedup: Mutex<DedupCache>,
    stats: Arc<StatsRegistry>,
    upstream: Arc<UpstreamClient>,
    subscription: RwLock<RuntimeSubscription>,
    /// Single-slot guard for runtime-subscription updates. `try_lock`
    /// failure is the "already in progress" rejection.
    update_lock: tokio::sync::Mutex<()>,
    ack_timeout: std::time::Duration,
    debug: bool,
}

impl StreamCore {
    pub fn new(
        bus: Arc<EventBus>,
        upstream: Arc<UpstreamClient>,
        stats: Arc<StatsRegistry>,
        filter_config: FilterConfig,
        initial_channels: &[Channel],
        initial_users: &[String],
        debug: bool,
    ) -> Self {
        let initial = RuntimeSubscription::new(
            initial_channels,
            initial_users,
            SubscriptionSource::Config,
            chrono::Utc::now().to_rfc3339(),
        );
        StreamCore {
            bus,
            filters: FilterPipeline::from_config(&filter_config),
            filter_config,
            dedup: Mutex::new(DedupCache::default()),
            stats,
            upstream,
            subscription: RwLock::new(initial),
            update_lock: tokio::sync::Mutex::new(()),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            debug,
        }
    }

    /// Override the 10 s upstream ack timeout (tests shrink it).
    pub fn with_ack_timeout(mut self, ack_timeout: std::time::Duration) -> Self {
        self.ack_timeout = ack_timeout;
        self
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn stats(&self) -> &Arc<StatsRegistry> {
        &self.stats
    }

    pub fn upstream(&self) -> &Arc<UpstreamClient> {
        &self.upstream
    }

    /// The effective server-side filter (config-derived, immutable at
    /// runtime; the dashboard mirror is a separate object).
    pub fn filter_config(&self) -> &FilterConfig {
        &self.filter_config
    }

    /// Copy of the current runtime-subscription state.
    pub fn runtime_subscription(&self) -> RuntimeSubscription {
        self.subscription.read().expect("subscription lock").clone()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.upstream.connection_state()
    }

    /// Consume the upstream event feed until the sender side closes.
    /// One frame at a time: ordering across bus subscribers follows
    /// upstream order.
    pub async fn run_ingest(self: Arc<Self>, mut events_rx: mpsc::Receiver<WireEvent>) {
        while let Some(frame) = events_rx.recv().await {
            self.ingest_frame(frame).await;
        }
        debug!("upstream event feed closed, ingest loop ending");
    }

    /// The per-frame admission pipeline.
    pub async fn ingest_frame(&self, frame: WireEvent) {
        let event = match frame.validate() {
            Ok(event) => event,
            Err(EventParseError::UnknownType(raw)) => {
                // Structurally sound but unclassifiable: counted, then
                // dropped.
                if self.stats.record_unknown_type(&raw) {
                    warn!(raw_type = %raw, "unknown event type from upstream");
                }
                return;
            }
            Err(e) => {
                if self.debug {
                    debug!(error = %e, "dropping invalid event frame");
                }
                return;
            }
        };

        self.stats.record_event(event.kind);

        // Admission control: filtered drops are normal outcomes, not
        // errors, and intentionally silent.
        if !self.filters.apply(&event) {
            return;
        }

        let fp = fingerprint(&event);
        {
            let mut dedup = self.dedup.lock().expect("dedup lock");
            if dedup.seen(&fp) {
                self.stats.record_deduped();
                return;
            }
            dedup.admit(&fp);
        }
        self.stats.record_delivered();

        tokio::join!(
            self.bus.publish(channels::CLI, &event),
            self.bus.publish(channels::DASHBOARD, &event),
            self.bus.publish(channels::ALERTS, &event),
        );

        if self.debug {
            info!(
                "Event processed: {} from @{}",
                event.kind, event.user.username
            );
        }
    }

    /// Apply new selectors: normalize, subscribe upstream, await the ack,
    /// then swap the state. On timeout or transport error the state is
    /// left untouched (the server side is not rolled back either; the
    /// next reconnect re-asserts whatever was last sent).
    pub async fn update_runtime_subscription(
        &self,
        channels: Vec<Channel>,
        users: Vec<String>,
    ) -> Result<RuntimeSubscription, SubscriptionError> {
        let _guard = self
            .update_lock
            .try_lock()
            .map_err(|_| SubscriptionError::UpdateInProgress)?;

        let state = self.upstream.connection_state();
        if state != ConnectionState::Connected {
            return Err(SubscriptionError::Upstream(UpstreamError::NotConnected(
                state,
            )));
        }

        let channels = relay_protocol::normalize_channels(&channels);
        let users = relay_protocol::normalize_users(&users);

        self.upstream
            .update_subscription(channels.clone(), users.clone(), self.ack_timeout)
            .await?;

        let updated = RuntimeSubscription::new(
            &channels,
            &users,
            SubscriptionSource::Runtime,
            chrono::Utc::now().to_rfc3339(),
        );
        *self.subscription.write().expect("subscription lock") = updated.clone();
        info!(
            channels = ?updated.channels,
            users = updated.users.len(),
            "runtime subscription updated"
        );
        Ok(updated)
    }

    /// Reset the ingest counters and the dedup cache (admin surface).
    pub fn reset(&self) {
        self.stats.reset();
        self.dedup.lock().expect("dedup lock").clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamConfig;
    use relay_protocol::SubscriptionMode;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_core(
        filter: FilterConfig,
        initial_channels: &[Channel],
    ) -> (Arc<StreamCore>, Arc<EventBus>) {
        let bus = Arc::new(EventBus::new());
        let (events_tx, _events_rx) = mpsc::channel(16);
        let upstream = Arc::new(UpstreamClient::new(
            UpstreamConfig {
                url: "ws://127.0.0.1:1/stream".to_owned(),
                token: "token".to_owned(),
                channels: initial_channels.to_vec(),
                users: Vec::new(),
            },
            events_tx,
        ));
        let stats = Arc::new(StatsRegistry::new());
        let core = Arc::new(StreamCore::new(
            Arc::clone(&bus),
            upstream,
            stats,
            filter,
            initial_channels,
            &[],
            false,
        ));
        (core, bus)
    }

    fn post_frame(username: &str, tweet_id: &str, text: &str, timestamp: &str) -> WireEvent {
        serde_json::from_value(json!({
            "type": "post_created",
            "timestamp": timestamp,
            "primaryId": tweet_id,
            "user": {"username": username, "displayName": "", "userId": "u1"},
            "data": {"tweet": {"id": tweet_id, "body": {"text": text}}},
        }))
        .expect("frame")
    }

    fn count_subscriber(bus: &EventBus, channel: &str) -> Arc<AtomicUsize> {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        bus.subscribe_fn(channel, move |_| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });
        seen
    }

    #[tokio::test]
    async fn replayed_event_dedups_across_differing_timestamps() {
        let (core, bus) = make_core(FilterConfig::default(), &[Channel::All]);
        let published = count_subscriber(&bus, channels::DASHBOARD);

        core.ingest_frame(post_frame("alice", "tw1", "gm", "2026-07-01T10:00:00Z"))
            .await;
        core.ingest_frame(post_frame("alice", "tw1", "gm", "2026-07-01T10:05:00Z"))
            .await;

        let stats = core.stats().snapshot();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.deduped, 1);
        assert_eq!(published.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn filters_are_an_and_across_dimensions() {
        let (core, bus) = make_core(
            FilterConfig {
                users: vec!["alice".to_owned()],
                keywords: vec!["btc".to_owned()],
                event_types: vec![],
            },
            &[Channel::All],
        );
        let published = count_subscriber(&bus, channels::DASHBOARD);

        core.ingest_frame(post_frame("alice", "tw1", "btc news", "2026-07-01T10:00:00Z"))
            .await;
        core.ingest_frame(post_frame("alice", "tw2", "eth news", "2026-07-01T10:00:01Z"))
            .await;
        core.ingest_frame(post_frame("bob", "tw3", "btc news", "2026-07-01T10:00:02Z"))
            .await;

        assert_eq!(published.load(Ordering::SeqCst), 1);
        let stats = core.stats().snapshot();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.deduped, 0, "filtered drops are not dedup drops");
    }

    #[tokio::test]
    async fn unknown_type_counts_but_never_publishes() {
        let (core, bus) = make_core(FilterConfig::default(), &[Channel::All]);
        let published = count_subscriber(&bus, channels::DASHBOARD);

        let frame: WireEvent = serde_json::from_value(json!({
            "type": "space_launched",
            "timestamp": "2026-07-01T10:00:00Z",
            "primaryId": "x1",
            "user": {"username": "alice"},
            "data": {},
        }))
        .expect("frame");
        core.ingest_frame(frame).await;

        let stats = core.stats().snapshot();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.unknown_types.get("space_launched"), Some(&1));
        assert_eq!(stats.delivered, 0);
        assert_eq!(published.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn structurally_broken_frames_touch_no_counters() {
        let (core, bus) = make_core(FilterConfig::default(), &[Channel::All]);
        let published = count_subscriber(&bus, channels::DASHBOARD);

        let frame: WireEvent = serde_json::from_value(json!({
            "type": "post_created",
            "timestamp": "",
            "primaryId": "tw1",
            "user": {"username": "alice"},
            "data": {"tweet": {"id": "tw1"}},
        }))
        .expect("frame");
        core.ingest_frame(frame).await;

        assert_eq!(core.stats().snapshot().total, 0);
        assert_eq!(published.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn initial_state_is_config_sourced_and_mode_tracks_channels() {
        let (core, _) = make_core(FilterConfig::default(), &[Channel::Tweets]);
        let sub = core.runtime_subscription();
        assert_eq!(sub.source, SubscriptionSource::Config);
        assert_eq!(sub.mode, SubscriptionMode::Active);

        let (idle_core, _) = make_core(FilterConfig::default(), &[]);
        assert_eq!(idle_core.runtime_subscription().mode, SubscriptionMode::Idle);
    }

    #[tokio::test]
    async fn update_is_rejected_while_disconnected() {
        let (core, _) = make_core(FilterConfig::default(), &[Channel::All]);
        let err = core
            .update_runtime_subscription(vec![Channel::Tweets], vec![])
            .await
            .expect_err("client is not connected");
        assert!(matches!(
            err,
            SubscriptionError::Upstream(UpstreamError::NotConnected(_))
        ));
        // State untouched on failure.
        assert_eq!(core.runtime_subscription().source, SubscriptionSource::Config);
    }

    #[tokio::test]
    async fn reset_clears_counters_and_the_dedup_cache() {
        let (core, _) = make_core(FilterConfig::default(), &[Channel::All]);
        core.ingest_frame(post_frame("alice", "tw1", "gm", "2026-07-01T10:00:00Z"))
            .await;
        core.reset();

        assert_eq!(core.stats().snapshot().total, 0);
        // The fingerprint was forgotten: the same tweet is admitted again.
        core.ingest_frame(post_frame("alice", "tw1", "gm", "2026-07-01T10:00:00Z"))
            .await;
        let stats = core.stats().snapshot();
        assert_eq!(stats.delivered, 1);
        assert_eq!(stats.deduped, 0);
    }

    #[tokio::test]
    async fn concurrent_update_is_rejected_not_queued() {
        let (core, _) = make_core(FilterConfig::default(), &[Channel::All]);
        let guard = core.update_lock.try_lock().expect("free lock");
        let err = core
            .update_runtime_subscription(vec![Channel::Tweets], vec![])
            .await
            .expect_err("update slot is held");
        assert!(matches!(err, SubscriptionError::UpdateInProgress));
        drop(guard);
    }
}
