//! Resource Watcher (spec §4.7): per-cluster shared informers over
//! Pod/Node/Deployment/Job, edge-triggered detector dispatch, fault dedup,
//! enrichment, and delivery fan-out.
//!
//! Grounded on `kube_runtime`'s own `watcher()`/`reflector` machinery (the
//! `kube` crate's `runtime` feature re-exports both): we consume the raw
//! `watcher::Event` stream ourselves rather than going through a `reflector`,
//! because we need the *previous* value of each object at the moment a new
//! one arrives (to hand detectors an `(old, new)` pair) — a `Store` only
//! exposes the latest snapshot, which is already overwritten by the time a
//! caller observes the `Apply` event that produced it.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{ContainerStatus, Node, Pod};
use kube::runtime::watcher::{self, Event as WatchEvent};
use kube::{Api, Client, Resource, ResourceExt};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::dedup::{FaultConditionKey, FaultDeduplicator};
use crate::detectors::{self, FaultSignal};
use crate::enrich::{ContainerSample, ContextEnricher};
use crate::fault_id::fault_id;
use crate::notification::FaultNotification;
use crate::object_ref::{api_version_for_kind, ObjectRef};
use crate::subscription::types::SharedSubscription;
use crate::transport::DeliveryGate;

/// Live handle to a cluster's shared informer set. Lazily created on the
/// first `faults` subscription for the cluster, torn down when the last one
/// closes (spec §4.7, §3 "Ownership").
pub struct ResourceWatcher {
    cluster: String,
    subscribers: Arc<RwLock<Vec<SharedSubscription>>>,
    refcount: AtomicUsize,
    cancel: CancellationToken,
    fault_dedup: FaultDeduplicator,
    enricher: Arc<ContextEnricher>,
    delivery: Arc<dyn DeliveryGate>,
}

impl ResourceWatcher {
    pub fn start(
        cluster: String,
        client: Client,
        fault_dedup_ttl: std::time::Duration,
        enricher: Arc<ContextEnricher>,
        delivery: Arc<dyn DeliveryGate>,
    ) -> Arc<Self> {
        let watcher = Arc::new(Self {
            cluster: cluster.clone(),
            subscribers: Arc::new(RwLock::new(Vec::new())),
            refcount: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
            fault_dedup: FaultDeduplicator::new(fault_dedup_ttl),
            enricher,
            delivery,
        });

        let pods: Api<Pod> = Api::all(client.clone());
        let nodes: Api<Node> = Api::all(client.clone());
        let deployments: Api<Deployment> = Api::all(client.clone());
        let jobs: Api<Job> = Api::all(client);

        tokio::spawn(run_pods(watcher.clone(), pods));
        tokio::spawn(run_kind(watcher.clone(), nodes, detectors::NODE_DETECTORS));
        tokio::spawn(run_kind(watcher.clone(), deployments, detectors::DEPLOYMENT_DETECTORS));
        tokio::spawn(run_kind(watcher.clone(), jobs, detectors::JOB_DETECTORS));

        watcher
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Attach a new `faults` subscription; bumps the informer refcount.
    pub fn attach(&self, subscription: SharedSubscription) {
        self.subscribers.write().push(subscription);
        self.refcount.fetch_add(1, Ordering::SeqCst);
    }

    /// Detach a subscription; returns the resulting subscriber count. The
    /// caller is responsible for tearing the watcher down (stopping its
    /// tasks) once this reaches zero.
    pub fn detach(&self, subscription_id: &str) -> usize {
        self.subscribers.write().retain(|s| s.id != subscription_id);
        self.refcount.fetch_sub(1, Ordering::SeqCst) - 1
    }

    pub fn subscriber_count(&self) -> usize {
        self.refcount.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Delivery fan-out for one signal (spec §4.7 "Delivery fan-out").
    async fn dispatch(&self, signal: FaultSignal, containers: Vec<ContainerSample>, labels: BTreeMap<String, String>) {
        let key = FaultConditionKey {
            fault_type: signal.fault_type.to_string(),
            resource_uid: signal.resource_uid.clone(),
            container_name: signal.container_name.clone(),
        };
        let (should_emit, _first) = self.fault_dedup.observe(key);
        if !should_emit {
            return;
        }

        let enriched = self.enricher.enrich(&self.cluster, signal, &containers).await;
        let fault_id = fault_id(
            &self.cluster,
            enriched.fault_type,
            &enriched.resource_uid,
            &enriched.container_name,
        );

        let subscribers: Vec<SharedSubscription> = self
            .subscribers
            .read()
            .iter()
            .filter(|s| s.filters.matches_resource(&enriched.namespace, enriched.kind, &enriched.name, &labels))
            .cloned()
            .collect();

        for subscription in subscribers {
            let notification = FaultNotification {
                subscription_id: subscription.id.clone(),
                cluster: self.cluster.clone(),
                fault_id: fault_id.clone(),
                fault_type: enriched.fault_type,
                severity: enriched.severity,
                resource: ObjectRef {
                    api_version: api_version_for_kind(enriched.kind),
                    kind: enriched.kind,
                    namespace: enriched.namespace.clone(),
                    name: enriched.name.clone(),
                    uid: enriched.resource_uid.clone(),
                },
                context: enriched.context.clone(),
                timestamp: enriched.timestamp,
            }
            .into_notification();

            self.delivery.deliver(&subscription.session_id, notification).await;
        }
    }
}

fn container_samples(statuses: &[ContainerStatus]) -> Vec<ContainerSample> {
    statuses
        .iter()
        .map(|status| ContainerSample {
            name: status.name.clone(),
            restarted: status.restart_count > 0,
        })
        .collect()
}

#[instrument(skip_all, fields(cluster = %watcher_handle.cluster, kind = %std::any::type_name::<K>()))]
async fn run_kind<K>(watcher_handle: Arc<ResourceWatcher>, api: Api<K>, registry: &'static [detectors::Detector<K>])
where
    K: Resource + Clone + std::fmt::Debug + Send + Sync + serde::de::DeserializeOwned + 'static,
    K::DynamicType: Default,
{
    let stream = Box::pin(watcher::watcher(api, watcher::Config::default()));
    consume_kind_stream(watcher_handle, stream, registry).await;
}

/// The informer loop's state machine, decoupled from the real `watcher()`
/// stream so it can be driven by a `futures::stream::iter` fake in tests.
async fn consume_kind_stream<K, S>(watcher_handle: Arc<ResourceWatcher>, mut stream: S, registry: &'static [detectors::Detector<K>])
where
    K: Resource + Clone + std::fmt::Debug + Send + Sync + 'static,
    K::DynamicType: Default,
    S: futures::Stream<Item = Result<WatchEvent<K>, watcher::Error>> + Unpin,
{
    let cache: DashMap<String, K> = DashMap::new();

    loop {
        tokio::select! {
            _ = watcher_handle.cancel.cancelled() => return,
            next = stream.next() => {
                let Some(event) = next else { return };
                match event {
                    Ok(WatchEvent::InitApply(obj)) => {
                        if let Some(uid) = obj.uid() {
                            cache.insert(uid, obj);
                        }
                    }
                    Ok(WatchEvent::Init) | Ok(WatchEvent::InitDone) => {}
                    Ok(WatchEvent::Apply(obj)) => {
                        let Some(uid) = obj.uid() else { continue };
                        let old = cache.insert(uid.clone(), obj.clone());
                        if let Some(old) = old {
                            dispatch_update(&watcher_handle, registry, &old, &obj).await;
                        }
                    }
                    Ok(WatchEvent::Delete(obj)) => {
                        if let Some(uid) = obj.uid() {
                            cache.remove(&uid);
                        }
                    }
                    Err(err) => {
                        debug!(error = %err, "informer stream error, kube_runtime will retry internally");
                    }
                }
            }
        }
    }
}

async fn dispatch_update<K>(watcher_handle: &Arc<ResourceWatcher>, registry: &'static [detectors::Detector<K>], old: &K, new: &K)
where
    K: Resource + Clone + std::fmt::Debug + Send + Sync + 'static,
{
    dispatch_signals(watcher_handle, registry, old, new, Vec::new()).await;
}

async fn dispatch_signals<K>(
    watcher_handle: &Arc<ResourceWatcher>,
    registry: &'static [detectors::Detector<K>],
    old: &K,
    new: &K,
    containers: Vec<ContainerSample>,
) where
    K: Resource + Clone + std::fmt::Debug + Send + Sync + 'static,
{
    let mut signals = Vec::new();
    for detector in registry {
        signals.extend(detector(Some(old), new));
    }
    if signals.is_empty() {
        return;
    }

    let labels: BTreeMap<String, String> = new.labels().clone().into_iter().collect();
    for signal in signals {
        watcher_handle.dispatch(signal, containers.clone(), labels.clone()).await;
    }
}

/// Pod-specific informer loop: same state machine as [`run_kind`], but also
/// extracts per-container restart info for the Context Enricher (spec §4.5
/// "fetch logs for up to N containers ... both current and previous when the
/// container has restarted").
#[instrument(skip_all, fields(cluster = %watcher_handle.cluster))]
async fn run_pods(watcher_handle: Arc<ResourceWatcher>, api: Api<Pod>) {
    let stream = Box::pin(watcher::watcher(api, watcher::Config::default()));
    consume_pod_stream(watcher_handle, stream).await;
}

async fn consume_pod_stream<S>(watcher_handle: Arc<ResourceWatcher>, mut stream: S)
where
    S: futures::Stream<Item = Result<WatchEvent<Pod>, watcher::Error>> + Unpin,
{
    let cache: DashMap<String, Pod> = DashMap::new();

    loop {
        tokio::select! {
            _ = watcher_handle.cancel.cancelled() => return,
            next = stream.next() => {
                let Some(event) = next else { return };
                match event {
                    Ok(WatchEvent::InitApply(obj)) => {
                        if let Some(uid) = obj.uid() {
                            cache.insert(uid, obj);
                        }
                    }
                    Ok(WatchEvent::Init) | Ok(WatchEvent::InitDone) => {}
                    Ok(WatchEvent::Apply(obj)) => {
                        let Some(uid) = obj.uid() else { continue };
                        let old = cache.insert(uid.clone(), obj.clone());
                        if let Some(old) = old {
                            let containers = obj
                                .status
                                .as_ref()
                                .and_then(|s| s.container_statuses.as_ref())
                                .map(|statuses| container_samples(statuses))
                                .unwrap_or_default();
                            dispatch_signals(&watcher_handle, detectors::POD_DETECTORS, &old, &obj, containers).await;
                        }
                    }
                    Ok(WatchEvent::Delete(obj)) => {
                        if let Some(uid) = obj.uid() {
                            cache.remove(&uid);
                        }
                    }
                    Err(err) => {
                        debug!(error = %err, "informer stream error, kube_runtime will retry internally");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LogFetchError;
    use crate::filter::FilterSet;
    use crate::notification::Notification;
    use crate::subscription::types::Subscription;
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    struct NeverFetcher;

    #[async_trait]
    impl crate::transport::LogFetcher for NeverFetcher {
        async fn fetch(
            &self,
            _cluster: &str,
            _namespace: &str,
            _pod_name: &str,
            _container: &str,
            _previous: bool,
            _max_bytes: usize,
            _timeout: Duration,
        ) -> Result<String, LogFetchError> {
            Err(LogFetchError::Other("unused in tests".into()))
        }
    }

    struct FakeDelivery {
        delivered: parking_lot::Mutex<Vec<(String, Notification)>>,
    }

    impl FakeDelivery {
        fn new() -> Self {
            Self {
                delivered: parking_lot::Mutex::new(Vec::new()),
            }
        }

        fn count(&self) -> usize {
            self.delivered.lock().len()
        }
    }

    #[async_trait]
    impl DeliveryGate for FakeDelivery {
        async fn deliver(&self, session_id: &str, notification: Notification) {
            self.delivered.lock().push((session_id.to_string(), notification));
        }
    }

    fn test_watcher(delivery: Arc<FakeDelivery>, subscribers: Vec<SharedSubscription>) -> Arc<ResourceWatcher> {
        Arc::new(ResourceWatcher {
            cluster: "dev".to_string(),
            subscribers: Arc::new(RwLock::new(subscribers)),
            refcount: AtomicUsize::new(0),
            cancel: CancellationToken::new(),
            fault_dedup: FaultDeduplicator::new(Duration::from_secs(900)),
            enricher: Arc::new(ContextEnricher::new(
                Arc::new(NeverFetcher),
                5,
                20,
                5,
                10_240,
                Duration::from_secs(1),
            )),
            delivery,
        })
    }

    fn subscription(id: &str, session_id: &str, filters: FilterSet) -> SharedSubscription {
        Arc::new(Subscription::new(
            id.to_string(),
            session_id.to_string(),
            "dev".to_string(),
            crate::filter::Mode::Faults,
            filters,
        ))
    }

    fn node_with_ready(status: &str) -> Node {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Node",
            "metadata": {"name": "node-1", "uid": "node-uid-1"},
            "status": {
                "conditions": [{"type": "Ready", "status": status, "reason": "KubeletNotReady", "message": "PLEG is not healthy"}],
            },
        }))
        .unwrap()
    }

    fn pod_with_crash_loop(reason: &str, termination_message: &str) -> Pod {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "worker-0", "namespace": "dev", "uid": "pod-uid-abc"},
            "spec": {"containers": [{"name": "app", "image": "example/app:1"}]},
            "status": {
                "containerStatuses": [{
                    "name": "app",
                    "ready": false,
                    "restartCount": 3,
                    "image": "example/app:1",
                    "imageID": "",
                    "state": {"waiting": {"reason": reason}},
                    "lastState": {"terminated": {"message": termination_message, "exitCode": 137}},
                }],
            },
        }))
        .unwrap()
    }

    type NodeItem = Result<WatchEvent<Node>, watcher::Error>;
    type PodItem = Result<WatchEvent<Pod>, watcher::Error>;

    #[tokio::test]
    async fn init_apply_never_fires_detectors() {
        let delivery = Arc::new(FakeDelivery::new());
        let sub = subscription("sub-1", "session-1", FilterSet::default());
        let watcher = test_watcher(delivery.clone(), vec![sub]);

        // A lone InitApply (the informer's initial list snapshot) must never
        // dispatch: there is no `old` to diff against, so the cache only
        // warms up here (spec §4.7 "OnAdd never fires edge-triggered detectors").
        let events: Vec<NodeItem> = vec![Ok(WatchEvent::InitApply(node_with_ready("False")))];
        consume_kind_stream(watcher, futures::stream::iter(events), detectors::NODE_DETECTORS).await;

        assert_eq!(delivery.count(), 0);
    }

    #[tokio::test]
    async fn apply_after_cached_init_dispatches_through_delivery() {
        let delivery = Arc::new(FakeDelivery::new());
        let sub = subscription("sub-1", "session-1", FilterSet::default());
        let watcher = test_watcher(delivery.clone(), vec![sub]);

        let events: Vec<NodeItem> = vec![
            Ok(WatchEvent::InitApply(node_with_ready("True"))),
            Ok(WatchEvent::Apply(node_with_ready("False"))),
        ];
        consume_kind_stream(watcher, futures::stream::iter(events), detectors::NODE_DETECTORS).await;

        assert_eq!(delivery.count(), 1);
        let (session_id, notification) = &delivery.delivered.lock()[0];
        assert_eq!(session_id, "session-1");
        assert_eq!(notification.logger, "kubernetes/faults");
    }

    #[tokio::test]
    async fn delivery_fan_out_only_reaches_subscriptions_whose_filters_match() {
        let delivery = Arc::new(FakeDelivery::new());
        let matching = subscription("sub-match", "session-match", FilterSet::default());
        let non_matching = subscription(
            "sub-miss",
            "session-miss",
            FilterSet {
                involved_name: Some("node-2".to_string()),
                ..FilterSet::default()
            },
        );
        let watcher = test_watcher(delivery.clone(), vec![matching, non_matching]);

        let events: Vec<NodeItem> = vec![
            Ok(WatchEvent::InitApply(node_with_ready("True"))),
            Ok(WatchEvent::Apply(node_with_ready("False"))),
        ];
        consume_kind_stream(watcher, futures::stream::iter(events), detectors::NODE_DETECTORS).await;

        let delivered = delivery.delivered.lock();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "session-match");
    }

    #[tokio::test]
    async fn repeated_apply_of_same_condition_is_deduped() {
        let delivery = Arc::new(FakeDelivery::new());
        let sub = subscription("sub-1", "session-1", FilterSet::default());
        let watcher = test_watcher(delivery.clone(), vec![sub]);

        let events: Vec<NodeItem> = vec![
            Ok(WatchEvent::InitApply(node_with_ready("True"))),
            Ok(WatchEvent::Apply(node_with_ready("False"))),
            Ok(WatchEvent::Apply(node_with_ready("True"))),
            Ok(WatchEvent::Apply(node_with_ready("False"))),
        ];
        consume_kind_stream(watcher, futures::stream::iter(events), detectors::NODE_DETECTORS).await;

        // Still within the fault dedup TTL, so the second CrashLoop-equivalent
        // condition collapses into the first (spec §4.3).
        assert_eq!(delivery.count(), 1);
    }

    #[tokio::test]
    async fn pod_stream_dispatches_crash_loop_and_carries_termination_context() {
        let delivery = Arc::new(FakeDelivery::new());
        let sub = subscription("sub-1", "session-1", FilterSet::default());
        let watcher = test_watcher(delivery.clone(), vec![sub]);

        let events: Vec<PodItem> = vec![
            Ok(WatchEvent::InitApply(pod_with_crash_loop("ContainerCreating", ""))),
            Ok(WatchEvent::Apply(pod_with_crash_loop("CrashLoopBackOff", "exit code 137"))),
        ];
        consume_pod_stream(watcher, futures::stream::iter(events)).await;

        assert_eq!(delivery.count(), 1);
        let (_, notification) = &delivery.delivered.lock()[0];
        let Notification { data, .. } = notification;
        let crate::notification::NotificationData::Fault(fault) = data else {
            panic!("expected a fault notification");
        };
        assert_eq!(fault.fault_type, "CrashLoop");
        assert_eq!(fault.context, "exit code 137");
    }

    #[tokio::test]
    async fn delete_clears_cache_so_a_later_reinsert_is_treated_as_new() {
        let delivery = Arc::new(FakeDelivery::new());
        let sub = subscription("sub-1", "session-1", FilterSet::default());
        let watcher = test_watcher(delivery.clone(), vec![sub]);

        let events: Vec<NodeItem> = vec![
            Ok(WatchEvent::InitApply(node_with_ready("True"))),
            Ok(WatchEvent::Delete(node_with_ready("True"))),
            // Re-added via InitApply never fires, same as the initial snapshot.
            Ok(WatchEvent::InitApply(node_with_ready("False"))),
        ];
        consume_kind_stream(watcher, futures::stream::iter(events), detectors::NODE_DETECTORS).await;

        assert_eq!(delivery.count(), 0);
    }
}
