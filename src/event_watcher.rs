//! Event Watcher (spec §4.6): a resumable, lossless-on-reconnect watch of
//! Event objects for one `events`-mode subscription.
//!
//! Hand-rolled around the raw `Api::list`/`Api::watch` calls rather than
//! `kube_runtime::watcher()` — grounded on the retry-loop shape in
//! `chris-henderson-alation-GHActionsRustTest`'s `podmanager/event_watcher.rs`
//! (its own `loop { client.try_next().await ... backoff.next_backoff() }`
//! pattern), but using our own deterministic [`crate::backoff::EventBackoff`]
//! instead of the `backoff` crate, since the spec pins an exact schedule.
//! We need direct control over the initial `List(limit=1)` call (for
//! historical suppression) and over exactly when a `Gone` response clears
//! the resource-version, neither of which the managed `watcher()` exposes.
//!
//! The `List`/`Watch` calls against the cluster sit behind the
//! [`EventSource`] trait rather than a bare `kube::Api`, the same way
//! [`crate::transport::LogFetcher`] lets the Context Enricher be unit
//! tested without a real API server (spec §1.5) — it's the one seam that
//! lets the reconnect/back-off/410-recovery state machine below run
//! against a canned event sequence in tests instead of a live cluster.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::Event as K8sEvent;
use kube::api::{ListParams, WatchEvent, WatchParams};
use kube::{Api, Client};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::backoff::EventBackoff;
use crate::dedup::{EventDeduplicator, EventKey};
use crate::error::SubscriptionError;
use crate::filter::FilterSet;
use crate::notification::{EventNotification, SubscriptionErrorNotification};
use crate::subscription::types::SharedSubscription;
use crate::transport::DeliveryGate;

/// The Event Watcher's `List`/`Watch` calls against one cluster, abstracted
/// so the reconnect state machine in [`EventWatcher`] can be driven by a
/// fake in tests (spec §1.4, §1.5).
#[async_trait]
pub trait EventSource: Send + Sync {
    /// `List(limit=1)`, returning just the resource-version that marks "now".
    async fn list_resource_version(&self) -> Result<String, kube::Error>;

    /// Open a watch starting just after `resource_version`.
    async fn watch(
        &self,
        resource_version: &str,
    ) -> Result<BoxStream<'static, Result<WatchEvent<K8sEvent>, kube::Error>>, kube::Error>;
}

/// Production [`EventSource`]: wraps a real `Api<Event>`, scoped to a single
/// namespace when the subscription's filters name exactly one (spec §4.6
/// "scope the List/Watch call when the filter set names exactly one
/// namespace").
struct KubeEventSource {
    api: Api<K8sEvent>,
}

impl KubeEventSource {
    fn new(client: Client, filters: &FilterSet) -> Self {
        let api = match filters.namespaces.as_slice() {
            [single] => Api::namespaced(client, single),
            _ => Api::all(client),
        };
        Self { api }
    }
}

#[async_trait]
impl EventSource for KubeEventSource {
    async fn list_resource_version(&self) -> Result<String, kube::Error> {
        let lp = ListParams::default().limit(1);
        let list = self.api.list(&lp).await?;
        Ok(list.metadata.resource_version.unwrap_or_default())
    }

    async fn watch(
        &self,
        resource_version: &str,
    ) -> Result<BoxStream<'static, Result<WatchEvent<K8sEvent>, kube::Error>>, kube::Error> {
        let wp = WatchParams::default();
        let stream = self.api.watch(&wp, resource_version).await?;
        Ok(Box::pin(stream))
    }
}

/// Builds the production [`EventSource`] for a subscription's cluster client
/// and filters. The only place `KubeEventSource` is named outside this module.
pub fn kube_event_source(client: Client, filters: &FilterSet) -> Arc<dyn EventSource> {
    Arc::new(KubeEventSource::new(client, filters))
}

/// Whether a connected watch stream ended because the watcher was cancelled
/// (stop for good) or because the connection needs to be re-opened (spec
/// §4.6 "restart from lastResourceVersion" on stream close or recoverable error).
enum StreamOutcome {
    Cancelled,
    Reconnect,
}

/// Drives one subscription's Event watch to completion (cancellation) or
/// permanent failure (retry budget exhausted is not permanent — see below).
pub struct EventWatcher {
    pub cluster: String,
    pub subscription_id: String,
    pub session_id: String,
    pub filters: FilterSet,
    pub cancel: CancellationToken,
    pub source: Arc<dyn EventSource>,
    pub dedup: EventDeduplicator,
    pub delivery: Arc<dyn DeliveryGate>,
    pub subscription: SharedSubscription,
    pub retry_budget: u32,
    pub list_timeout: Duration,
}

impl EventWatcher {
    /// Startup sequence (spec §4.6 step 2): `List(limit=1)` to capture the
    /// resource-version that marks "now", so every pre-existing Event is
    /// suppressed. Subscription creation fails if this call fails.
    pub async fn initial_resource_version(&self) -> Result<String, SubscriptionError> {
        let result = tokio::time::timeout(self.list_timeout, self.source.list_resource_version()).await;
        match result {
            Ok(Ok(rv)) => Ok(rv),
            Ok(Err(source)) => Err(SubscriptionError::WatchStartFailed {
                cluster: self.cluster.clone(),
                source,
            }),
            Err(_) => Err(SubscriptionError::WatchStartTimeout {
                cluster: self.cluster.clone(),
            }),
        }
    }

    /// Drives the steady-state loop until cancelled. `resource_version`
    /// starts at the value [`Self::initial_resource_version`] returned.
    #[instrument(skip_all, fields(cluster = %self.cluster, subscription_id = %self.subscription_id))]
    pub async fn run(self, mut resource_version: String) {
        let mut backoff = EventBackoff::new();

        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let stream = match self.source.watch(&resource_version).await {
                Ok(stream) => stream,
                Err(err) => {
                    self.log_attempt(backoff.attempt() + 1, &err);
                    if self.note_failure_and_maybe_exhaust(&mut backoff).await {
                        return;
                    }
                    continue;
                }
            };

            match self.consume_stream(stream, &mut resource_version, &mut backoff).await {
                StreamOutcome::Cancelled => return,
                StreamOutcome::Reconnect => continue,
            }
        }
    }

    /// One connected watch stream's worth of events (spec §4.6 steady state).
    /// Factored out of [`Self::run`] so it can be driven by a fake
    /// `futures::stream::iter` sequence in tests instead of a live socket.
    async fn consume_stream(
        &self,
        mut stream: BoxStream<'static, Result<WatchEvent<K8sEvent>, kube::Error>>,
        resource_version: &mut String,
        backoff: &mut EventBackoff,
    ) -> StreamOutcome {
        loop {
            let next = tokio::select! {
                _ = self.cancel.cancelled() => return StreamOutcome::Cancelled,
                item = futures::StreamExt::next(&mut stream) => item,
            };
            let Some(item) = next else {
                // Channel closed: restart from lastResourceVersion (spec §4.6).
                return StreamOutcome::Reconnect;
            };
            match item {
                Ok(WatchEvent::Added(event)) | Ok(WatchEvent::Modified(event)) => {
                    if let Some(rv) = event.metadata.resource_version.clone() {
                        *resource_version = rv;
                    }
                    backoff.reset();
                    self.handle_event(event).await;
                }
                Ok(WatchEvent::Deleted(_)) => {
                    backoff.reset();
                }
                Ok(WatchEvent::Bookmark(bookmark)) => {
                    *resource_version = bookmark.metadata.resource_version;
                    backoff.reset();
                }
                Ok(WatchEvent::Error(err)) if err.code == 410 => {
                    // Gone: the resource-version aged out of server history.
                    // Clearing it (rather than retrying with the stale value)
                    // is the fix for the reconnect-storm failure mode (spec
                    // §4.6, §8 "410 loop fix"). Exactly one re-list attempt is
                    // made per tick; if it fails we still fall through to the
                    // shared back-off/exhaustion bookkeeping below rather than
                    // spinning on `relist_after_gone` ourselves.
                    resource_version.clear();
                    if self.relist_after_gone(resource_version).await.is_err() {
                        warn!(cluster = %self.cluster, "re-list after Gone failed");
                    }
                    if self.note_failure_and_maybe_exhaust(backoff).await {
                        return StreamOutcome::Cancelled;
                    }
                    return StreamOutcome::Reconnect;
                }
                Ok(WatchEvent::Error(err)) => {
                    self.log_attempt(backoff.attempt() + 1, &err);
                    if self.note_failure_and_maybe_exhaust(backoff).await {
                        return StreamOutcome::Cancelled;
                    }
                    return StreamOutcome::Reconnect;
                }
                Err(err) => {
                    self.log_attempt(backoff.attempt() + 1, &err);
                    if self.note_failure_and_maybe_exhaust(backoff).await {
                        return StreamOutcome::Cancelled;
                    }
                    return StreamOutcome::Reconnect;
                }
            }
        }
    }

    /// Bounded to one re-list attempt per back-off tick (spec §8 "410 recovery").
    async fn relist_after_gone(&self, resource_version: &mut String) -> Result<(), ()> {
        match self.initial_resource_version().await {
            Ok(rv) => {
                *resource_version = rv;
                Ok(())
            }
            Err(_) => Err(()),
        }
    }

    fn log_attempt(&self, attempt: u32, err: &impl std::fmt::Display) {
        if attempt <= 2 {
            debug!(cluster = %self.cluster, subscription_id = %self.subscription_id, attempt, error = %err, "event watch failure");
        } else {
            warn!(cluster = %self.cluster, subscription_id = %self.subscription_id, attempt, error = %err, "event watch failure");
        }
    }

    async fn handle_event(&self, event: K8sEvent) {
        if !self.filters.matches_event(&event) {
            return;
        }
        let key = EventKey {
            cluster: self.cluster.clone(),
            namespace: event.metadata.namespace.clone().unwrap_or_default(),
            name: event.metadata.name.clone().unwrap_or_default(),
            uid: event.metadata.uid.clone().unwrap_or_default(),
            resource_version: event.metadata.resource_version.clone().unwrap_or_default(),
        };
        if self.dedup.seen(key) {
            return;
        }

        let notification = EventNotification {
            subscription_id: self.subscription_id.clone(),
            cluster: self.cluster.clone(),
            event: serde_json::to_value(&event).unwrap_or(serde_json::Value::Null),
        }
        .into_notification();

        self.delivery.deliver(&self.session_id, notification).await;
    }

    /// Sleeps the next back-off tick. Returns `true` if the watcher was
    /// cancelled while sleeping.
    ///
    /// Retry-budget exhaustion (spec §4.6, §7) is a single state transition,
    /// not a recurring alarm: the subscription-error notification and
    /// `mark_degraded()` fire exactly once, on the tick where the attempt
    /// counter first reaches `retry_budget`. Every failure after that keeps
    /// `budget_exhausted()` true (the counter only resets on success), so
    /// without this guard the notification would re-fire on every back-off
    /// tick for as long as the watch stays broken.
    async fn note_failure_and_maybe_exhaust(&self, backoff: &mut EventBackoff) -> bool {
        let delay = backoff.next_delay();
        if backoff.attempt() == self.retry_budget {
            self.subscription.mark_degraded();
            let notification = SubscriptionErrorNotification {
                subscription_id: self.subscription_id.clone(),
                cluster: self.cluster.clone(),
                error: "retry budget exhausted".to_string(),
                degraded: true,
            }
            .into_notification();
            self.delivery.deliver(&self.session_id, notification).await;
        }
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }
}
