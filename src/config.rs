//! Engine-wide limits and tunables.
//!
//! A plain struct with a `Default` impl, in the style of
//! `kube_runtime::watcher::Config`: this crate never reads the
//! environment or process arguments, callers build this and hand it to
//! [`crate::subscription::SubscriptionManager::new`].

use std::time::Duration;

/// Limits and tunables for the subscription engine (spec §4.8, §6).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum live subscriptions for a single session.
    pub max_subscriptions_per_session: usize,
    /// Maximum live subscriptions across all sessions.
    pub max_subscriptions_global: usize,
    /// Maximum simultaneous log captures per cluster.
    pub max_log_captures_per_cluster: usize,
    /// Maximum simultaneous log captures across all clusters.
    pub max_log_captures_global: usize,
    /// Maximum bytes read per container during log-based enrichment.
    pub max_log_bytes_per_container: usize,
    /// Maximum containers sampled per fault notification.
    pub max_containers_per_notification: usize,
    /// TTL for the event deduplicator (spec §4.2).
    pub event_dedup_ttl: Duration,
    /// Hard cap on the number of entries the event deduplicator may hold.
    pub event_dedup_capacity: usize,
    /// TTL for an open fault condition (spec §4.3).
    pub fault_dedup_ttl: Duration,
    /// Interval between session-reaper sweeps (spec §4.8).
    pub reaper_interval: Duration,
    /// Per-call timeout for [`crate::transport::SessionTransport::deliver`] (spec §5).
    pub deliver_timeout: Duration,
    /// Timeout for the startup resource-version `List` call (spec §5).
    pub list_timeout: Duration,
    /// Per-container timeout for log fetches (spec §5).
    pub log_fetch_timeout: Duration,
    /// Number of consecutive watch failures before a subscription is marked degraded (spec §4.6).
    pub retry_budget: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_subscriptions_per_session: 10,
            max_subscriptions_global: 100,
            max_log_captures_per_cluster: 5,
            max_log_captures_global: 20,
            max_log_bytes_per_container: 10 * 1024,
            max_containers_per_notification: 5,
            event_dedup_ttl: Duration::from_secs(5),
            event_dedup_capacity: 50_000,
            fault_dedup_ttl: Duration::from_secs(15 * 60),
            reaper_interval: Duration::from_secs(30),
            deliver_timeout: Duration::from_secs(2),
            list_timeout: Duration::from_secs(5),
            log_fetch_timeout: Duration::from_secs(10),
            retry_budget: 5,
        }
    }
}
