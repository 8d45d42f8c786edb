//! Fault Deduplicator (spec §4.3).
//!
//! One instance guards a single cluster's fault conditions — the
//! `ResourceWatcher` (§4.7) owns one per cluster, mirroring how
//! `kube_runtime`'s shared informers are themselves process-wide-but-per-cluster
//! singletons.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// `(faultType, resourceUID, containerName)` — deterministic within a cluster (spec §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FaultConditionKey {
    /// One of `CrashLoop`, `NodeUnhealthy`, `DeploymentFailure`, `JobFailure`, `PodCrash`.
    pub fault_type: String,
    /// Stable cluster-assigned UID of the affected resource.
    pub resource_uid: String,
    /// Empty for non-pod faults.
    pub container_name: String,
}

#[derive(Debug, Clone)]
struct EmissionRecord {
    first_seen: Instant,
    last_seen: Instant,
    ttl_expires_at: Instant,
}

/// Tracks open fault conditions with a TTL, so re-emissions of the same
/// condition collapse into a single notification within the window
/// (spec §4.3, §8 "Fault dedup").
#[derive(Clone)]
pub struct FaultDeduplicator {
    open: Arc<DashMap<FaultConditionKey, EmissionRecord>>,
    ttl: Duration,
}

impl FaultDeduplicator {
    /// Build a deduplicator with the spec's default 15-minute TTL, or a custom one from config.
    pub fn new(ttl: Duration) -> Self {
        Self {
            open: Arc::new(DashMap::new()),
            ttl,
        }
    }

    /// If no open record exists for `key` (or its TTL has expired), opens a new
    /// record and returns `(true, true)` — emit, and this is the first emission.
    /// Otherwise refreshes `last_seen` and returns `(false, false)` — suppress.
    pub fn observe(&self, key: FaultConditionKey) -> (bool, bool) {
        let now = Instant::now();
        if let Some(mut record) = self.open.get_mut(&key) {
            if now < record.ttl_expires_at {
                record.last_seen = now;
                return (false, false);
            }
        }
        self.open.insert(key, EmissionRecord {
            first_seen: now,
            last_seen: now,
            ttl_expires_at: now + self.ttl,
        });
        (true, true)
    }

    /// Close a condition early, e.g. when a resolution signal is computed
    /// (spec §9 design notes: callers that emit "resolved" notifications must
    /// call this before emitting).
    pub fn clear(&self, key: &FaultConditionKey) {
        self.open.remove(key);
    }

    /// Periodic removal of expired records (spec §4.3 "Sweeper").
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        self.open.retain(|_, record| now < record.ttl_expires_at);
    }

    /// Number of currently open conditions, for tests and introspection.
    pub fn open_count(&self) -> usize {
        self.open.len()
    }
}
