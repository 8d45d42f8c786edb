//! Event Deduplicator (spec §4.2).

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Identifies a single Event notification for dedup purposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventKey {
    /// Cluster context.
    pub cluster: String,
    /// Event's own namespace.
    pub namespace: String,
    /// Event name.
    pub name: String,
    /// Event UID.
    pub uid: String,
    /// Event resource version at the time it was observed.
    pub resource_version: String,
}

/// Bounded in-memory `(cluster, namespace, name, uid, resourceVersion) -> insertion time` map,
/// TTL 5s (spec §4.2). Thread-safe for concurrent readers/writers via `DashMap`'s
/// per-shard locking, the same structure `kube_runtime::reflector::store::Writer`
/// uses for its object cache.
#[derive(Clone)]
pub struct EventDeduplicator {
    seen: Arc<DashMap<EventKey, Instant>>,
    ttl: Duration,
    capacity: usize,
}

impl EventDeduplicator {
    /// Build a deduplicator with the given TTL and hard capacity (spec: "an
    /// implementation should impose one" — the unspecified bound, §9 open questions).
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        Self {
            seen: Arc::new(DashMap::new()),
            ttl,
            capacity,
        }
    }

    /// Returns `true` if `key` was already seen within the TTL window (and
    /// leaves it untouched); otherwise records it and returns `false`.
    ///
    /// When the cache is at capacity and `key` is new, the oldest entries are
    /// swept first so the cache cannot grow without bound even if the sweeper
    /// task falls behind (spec: "hard cap prevents unbounded growth").
    pub fn seen(&self, key: EventKey) -> bool {
        let now = Instant::now();
        if let Some(entry) = self.seen.get(&key) {
            if now.duration_since(*entry) < self.ttl {
                return true;
            }
        }
        if self.seen.len() >= self.capacity {
            self.sweep_expired(now);
        }
        if self.seen.len() >= self.capacity {
            // Still full after sweeping expired entries: the key-space is
            // actively exceeding capacity. Drop the oldest entry to make room
            // rather than let the map grow unbounded.
            if let Some(oldest) = self
                .seen
                .iter()
                .min_by_key(|e| *e.value())
                .map(|e| e.key().clone())
            {
                self.seen.remove(&oldest);
            }
        }
        self.seen.insert(key, now);
        false
    }

    /// Periodic sweep of expired entries (spec §4.2 "entries age out lazily...
    /// bounded by periodic sweep"). Intended to be driven by a background
    /// interval task; exposed directly so it can also be called eagerly when
    /// the cache is full.
    pub fn sweep_expired(&self, now: Instant) {
        self.seen.retain(|_, inserted| now.duration_since(*inserted) < self.ttl);
    }

    /// Current number of tracked keys, for tests and introspection.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Whether the cache currently tracks no keys.
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(rv: &str) -> EventKey {
        EventKey {
            cluster: "dev".into(),
            namespace: "kube-system".into(),
            name: "pod-a".into(),
            uid: "uid-1".into(),
            resource_version: rv.into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_within_ttl_is_suppressed() {
        let dedup = EventDeduplicator::new(Duration::from_secs(5), 1024);
        assert!(!dedup.seen(key("100")));
        assert!(dedup.seen(key("100")));
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_after_ttl_fires_again() {
        let dedup = EventDeduplicator::new(Duration::from_secs(5), 1024);
        assert!(!dedup.seen(key("100")));
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(!dedup.seen(key("100")));
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_resource_versions_both_fire() {
        let dedup = EventDeduplicator::new(Duration::from_secs(5), 1024);
        assert!(!dedup.seen(key("100")));
        assert!(!dedup.seen(key("101")));
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_is_enforced() {
        let dedup = EventDeduplicator::new(Duration::from_secs(5), 2);
        assert!(!dedup.seen(key("100")));
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!dedup.seen(key("101")));
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(!dedup.seen(key("102")));
        assert!(dedup.len() <= 2);
    }
}
