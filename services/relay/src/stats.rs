//! Ingest counters.
//!
//! Written only from the ingest path (plus the console test hook); every
//! reader takes a point-in-time snapshot. `delivered` is what survived
//! validation, filtering, and dedup.

use chrono::{DateTime, Utc};
use relay_protocol::{EventType, StatsSnapshot};
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Instant;

#[derive(Debug)]
struct StatsInner {
    total: u64,
    delivered: u64,
    deduped: u64,
    by_type: BTreeMap<String, u64>,
    unknown_types: BTreeMap<String, u64>,
    start_time: DateTime<Utc>,
    started_at: Instant,
    last_event_time: Option<DateTime<Utc>>,
}

impl StatsInner {
    fn fresh() -> Self {
        StatsInner {
            total: 0,
            delivered: 0,
            deduped: 0,
            by_type: BTreeMap::new(),
            unknown_types: BTreeMap::new(),
            start_time: Utc::now(),
            started_at: Instant::now(),
            last_event_time: None,
        }
    }
}

/// Shared counter registry. Cheap locking: every operation is a few map
/// touches, never held across awaits.
#[derive(Debug)]
pub struct StatsRegistry {
    inner: Mutex<StatsInner>,
}

impl Default for StatsRegistry {
    fn default() -> Self {
        StatsRegistry::new()
    }
}

impl StatsRegistry {
    pub fn new() -> Self {
        StatsRegistry {
            inner: Mutex::new(StatsInner::fresh()),
        }
    }

    /// Count a frame that reached the ingest pipeline with a known kind.
    pub fn record_event(&self, kind: EventType) {
        let mut inner = self.inner.lock().expect("stats lock");
        inner.total += 1;
        inner.last_event_time = Some(Utc::now());
        *inner.by_type.entry(kind.as_str().to_owned()).or_insert(0) += 1;
    }

    /// Count a frame with an unknown discriminator. Returns true on the
    /// first occurrence of this raw type, so the caller can warn once.
    pub fn record_unknown_type(&self, raw: &str) -> bool {
        let mut inner = self.inner.lock().expect("stats lock");
        inner.total += 1;
        inner.last_event_time = Some(Utc::now());
        let count = inner.unknown_types.entry(raw.to_owned()).or_insert(0);
        *count += 1;
        *count == 1
    }

    pub fn record_deduped(&self) {
        self.inner.lock().expect("stats lock").deduped += 1;
    }

    pub fn record_delivered(&self) {
        self.inner.lock().expect("stats lock").delivered += 1;
    }

    /// Events per second since start.
    pub fn rate(&self) -> f64 {
        let inner = self.inner.lock().expect("stats lock");
        let elapsed = inner.started_at.elapsed().as_secs_f64();
        if elapsed <= 0.0 {
            return 0.0;
        }
        inner.total as f64 / elapsed
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.inner.lock().expect("stats lock").started_at.elapsed().as_secs()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock().expect("stats lock");
        StatsSnapshot {
            total: inner.total,
            delivered: inner.delivered,
            deduped: inner.deduped,
            by_type: inner.by_type.clone(),
            unknown_types: inner.unknown_types.clone(),
            start_time: inner.start_time.to_rfc3339(),
            last_event_time: inner.last_event_time.map(|t| t.to_rfc3339()),
        }
    }

    pub fn unknown_types(&self) -> BTreeMap<String, u64> {
        self.inner.lock().expect("stats lock").unknown_types.clone()
    }

    /// Zero every counter and restart the clock.
    pub fn reset(&self) {
        *self.inner.lock().expect("stats lock") = StatsInner::fresh();
    }
}
