//! Bounded TTL/LRU set of event fingerprints.
//!
//! The fingerprint excludes timestamps so a replay of the same entity
//! after a reconnect still dedups, while independent entities never
//! collide. TTL is measured from insertion (a `seen` hit refreshes
//! recency, not lifetime); capacity evicts least-recently-used.

use relay_protocol::{Event, EventData};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_ENTRIES: usize = 10_000;
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Dedup key for an event.
///
/// - post kinds: `post:{tweet.id}`
/// - follow kinds: `follow:{user.id}→{following.id}`
/// - everything else: `user:{primaryId}:{type}`
pub fn fingerprint(event: &Event) -> String {
    match &event.data {
        EventData::Post(post) if event.kind.is_post() => {
            format!("post:{}", post.tweet.id)
        }
        EventData::Following(follow) if event.kind.is_follow() => {
            format!("follow:{}→{}", event.user.user_id, follow.following.id)
        }
        _ => format!("user:{}:{}", event.primary_id, event.kind),
    }
}

#[derive(Debug)]
struct Slot {
    inserted_at: Instant,
    /// Logical clock value of the most recent touch; pairs with the
    /// recency queue for lazy LRU invalidation.
    last_used: u64,
}

/// Fingerprint cache with combined TTL and LRU eviction.
///
/// Not internally synchronized: the ingest path is the single writer.
#[derive(Debug)]
pub struct DedupCache {
    max_entries: usize,
    ttl: Duration,
    entries: HashMap<String, Slot>,
    /// Touch order, possibly containing stale entries; validated against
    /// `Slot::last_used` when popped.
    recency: VecDeque<(u64, String)>,
    /// Insertion order for TTL sweeps; validated against
    /// `Slot::inserted_at` when popped.
    insertions: VecDeque<(Instant, String)>,
    clock: u64,
}

impl Default for DedupCache {
    fn default() -> Self {
        DedupCache::new(DEFAULT_MAX_ENTRIES, DEFAULT_TTL)
    }
}

impl DedupCache {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        DedupCache {
            max_entries: max_entries.max(1),
            ttl,
            entries: HashMap::new(),
            recency: VecDeque::new(),
            insertions: VecDeque::new(),
            clock: 0,
        }
    }

    /// True iff the fingerprint is present and not TTL-expired. A hit
    /// refreshes recency; an expired entry is removed and reported unseen.
    pub fn seen(&mut self, fp: &str) -> bool {
        self.seen_at(fp, Instant::now())
    }

    /// Insert a fingerprint, evicting expired entries opportunistically
    /// and the least-recently-used while over capacity.
    pub fn admit(&mut self, fp: &str) {
        self.admit_at(fp, Instant::now());
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.recency.clear();
        self.insertions.clear();
    }

    // Clock-injected forms, used directly by tests.

    pub fn seen_at(&mut self, fp: &str, now: Instant) -> bool {
        let expired = match self.entries.get(fp) {
            None => return false,
            Some(slot) => now.duration_since(slot.inserted_at) >= self.ttl,
        };
        if expired {
            self.entries.remove(fp);
            return false;
        }
        self.clock += 1;
        let clock = self.clock;
        if let Some(slot) = self.entries.get_mut(fp) {
            slot.last_used = clock;
        }
        self.recency.push_back((clock, fp.to_owned()));
        true
    }

    pub fn admit_at(&mut self, fp: &str, now: Instant) {
        self.evict_expired(now);
        while self.entries.len() >= self.max_entries {
            if !self.evict_lru() {
                break;
            }
        }
        self.clock += 1;
        self.entries.insert(
            fp.to_owned(),
            Slot {
                inserted_at: now,
                last_used: self.clock,
            },
        );
        self.recency.push_back((self.clock, fp.to_owned()));
        self.insertions.push_back((now, fp.to_owned()));
    }

    /// Drop every entry whose insertion has aged past the TTL. The
    /// insertion queue is oldest-first, so this stops at the first live
    /// entry.
    fn evict_expired(&mut self, now: Instant) {
        while let Some((inserted_at, fp)) = self.insertions.front() {
            if now.duration_since(*inserted_at) < self.ttl {
                break;
            }
            // Stale queue entry: the key was evicted and re-admitted with
            // a fresh insertion time. Skip without touching the live slot.
            let matches_live = self
                .entries
                .get(fp.as_str())
                .is_some_and(|slot| slot.inserted_at == *inserted_at);
            let fp = fp.clone();
            self.insertions.pop_front();
            if matches_live {
                self.entries.remove(&fp);
            }
        }
    }

    /// Remove the least-recently-used live entry. Returns false when
    /// nothing removable remains.
    fn evict_lru(&mut self) -> bool {
        while let Some((clock, fp)) = self.recency.pop_front() {
            let is_current = self
                .entries
                .get(fp.as_str())
                .is_some_and(|slot| slot.last_used == clock);
            if is_current {
                self.entries.remove(&fp);
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::{EventType, EventUser, FollowTarget, FollowingData, PostData, Tweet};

    fn post_event(tweet_id: &str, timestamp: &str) -> Event {
        Event {
            kind: EventType::PostCreated,
            timestamp: timestamp.to_owned(),
            primary_id: tweet_id.to_owned(),
            user: EventUser {
                username: "alice".to_owned(),
                display_name: "Alice".to_owned(),
                user_id: "u1".to_owned(),
            },
            data: EventData::Post(PostData {
                tweet: Tweet {
                    id: tweet_id.to_owned(),
                    body: Default::default(),
                },
            }),
        }
    }

    #[test]
    fn fingerprint_is_stable_across_timestamps() {
        let first = post_event("tw1", "2026-07-01T10:00:00Z");
        let second = post_event("tw1", "2026-07-01T10:05:00Z");
        assert_eq!(fingerprint(&first), fingerprint(&second));
        assert_eq!(fingerprint(&first), "post:tw1");
    }

    #[test]
    fn fingerprint_distinguishes_follow_edges() {
        let mut event = post_event("x", "2026-07-01T10:00:00Z");
        event.kind = EventType::FollowCreated;
        event.data = EventData::Following(FollowingData {
            user: Default::default(),
            following: FollowTarget {
                id: "u9".to_owned(),
                handle: "bob".to_owned(),
                profile: Default::default(),
            },
        });
        assert_eq!(fingerprint(&event), "follow:u1→u9");
    }

    #[test]
    fn fingerprint_falls_back_to_primary_id_and_type() {
        let mut event = post_event("u1", "2026-07-01T10:00:00Z");
        event.kind = EventType::ProfileUpdated;
        event.data = EventData::Profile(relay_protocol::ProfileData {
            user: Default::default(),
            pinned: None,
            before: None,
        });
        assert_eq!(fingerprint(&event), "user:u1:profile_updated");
    }

    #[test]
    fn seen_after_admit_until_ttl_expiry() {
        let mut cache = DedupCache::new(16, Duration::from_millis(100));
        let start = Instant::now();
        cache.admit_at("post:tw1", start);
        assert!(cache.seen_at("post:tw1", start + Duration::from_millis(50)));
        assert!(
            !cache.seen_at("post:tw1", start + Duration::from_millis(150)),
            "expired entries are unseen"
        );
        assert_eq!(cache.size(), 0, "expired probe removes the entry");
    }

    #[test]
    fn capacity_evicts_least_recently_used() {
        let mut cache = DedupCache::new(2, Duration::from_secs(300));
        let now = Instant::now();
        cache.admit_at("a", now);
        cache.admit_at("b", now);
        // Touch "a" so "b" becomes the LRU victim.
        assert!(cache.seen_at("a", now));
        cache.admit_at("c", now);
        assert_eq!(cache.size(), 2);
        assert!(cache.seen_at("a", now));
        assert!(!cache.seen_at("b", now));
        assert!(cache.seen_at("c", now));
    }

    #[test]
    fn admit_sweeps_expired_entries() {
        let mut cache = DedupCache::new(16, Duration::from_millis(100));
        let start = Instant::now();
        cache.admit_at("a", start);
        cache.admit_at("b", start);
        cache.admit_at("c", start + Duration::from_millis(150));
        assert_eq!(cache.size(), 1, "expired a and b must be swept on admit");
    }

    #[test]
    fn clear_empties_everything() {
        let mut cache = DedupCache::new(16, Duration::from_secs(300));
        cache.admit("a");
        cache.admit("b");
        cache.clear();
        assert_eq!(cache.size(), 0);
        assert!(!cache.seen("a"));
    }
}
