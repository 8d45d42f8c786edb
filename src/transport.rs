//! External-collaborator boundaries (spec §1 "Out of scope").
//!
//! The streaming transport, the cluster-client factory, and the log-fetching
//! backend are all owned by the surrounding server; this crate only depends
//! on the seams it actually calls through, expressed as `async_trait`
//! object-safe traits so the Manager can hold them as `Arc<dyn ...>` without
//! generic parameters leaking through every public type (the same shape
//! `kube_client::Client` gives callers: a cheaply-cloned handle backed by a
//! trait object, not a concrete transport type).

use std::time::Duration;

use async_trait::async_trait;
use kube::Client;

use crate::error::{ClientError, LogFetchError, TransportError};
use crate::notification::Notification;

/// The bidirectional session transport that exposes tool calls and accepts
/// notifications for delivery (spec §6 "Notification channel").
#[async_trait]
pub trait SessionTransport: Send + Sync {
    /// Session ids currently open, used by the periodic reaper (spec §4.8).
    async fn list_open_sessions(&self) -> Vec<String>;

    /// Best-effort delivery of one notification to `session_id`. Any error
    /// — including a caller-observed timeout — is treated as evidence the
    /// session is dead (spec §4.8 "Delivery policy").
    async fn deliver(&self, session_id: &str, notification: Notification) -> Result<(), TransportError>;
}

/// Internal delivery seam between a watcher (Event or Resource) and the
/// Manager (spec §4.8 "Deliver"): applies the per-call timeout and cascades
/// session-wide cancellation on failure, so individual watchers never see a
/// transport error directly and never decide session lifetime themselves.
/// Implemented by [`crate::subscription::manager::SubscriptionManager`].
#[async_trait]
pub trait DeliveryGate: Send + Sync {
    async fn deliver(&self, session_id: &str, notification: Notification);
}

/// Produces a typed cluster client for a named cluster context (spec §1,
/// "the cluster-client factory").
#[async_trait]
pub trait ClusterClient: Send + Sync {
    async fn client_for(&self, cluster: &str) -> Result<Client, ClientError>;
}

/// Fetches a bounded sample of container logs for the Context Enricher
/// (spec §4.5).
#[async_trait]
pub trait LogFetcher: Send + Sync {
    /// Fetch up to `max_bytes` of the most recent log output for
    /// `container` in `namespace`/`pod_name`. `previous` requests the
    /// prior (crashed) container instance's log, mirroring the Kubernetes
    /// `previous=true` log query parameter.
    async fn fetch(
        &self,
        cluster: &str,
        namespace: &str,
        pod_name: &str,
        container: &str,
        previous: bool,
        max_bytes: usize,
        timeout: Duration,
    ) -> Result<String, LogFetchError>;
}
