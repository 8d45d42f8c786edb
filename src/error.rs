//! Crate-wide error kinds.
//!
//! Shaped like [`kube::Error`] and `kube_runtime::controller::Error`: one
//! flat enum, `thiserror` messages, `#[source]` wrapping the underlying
//! `kube::Error` where a failure originated from the cluster API.

use thiserror::Error;

/// Errors returned by [`crate::subscription::SubscriptionManager`] operations
/// and surfaced to the tool caller (see spec §7 propagation policy).
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// `Create` was called with an empty `sessionId`.
    #[error("subscription requires a session id; connect through the streaming transport first")]
    SessionRequired,

    /// The filter set failed validation for the requested mode.
    #[error("invalid filters: {0}")]
    InvalidFilters(String),

    /// One of the configured limits (per-session, global, or log-capture) was hit.
    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    /// The backing watch or informer could not be started.
    #[error("failed to start watch for cluster {cluster:?}: {source}")]
    WatchStartFailed {
        /// Cluster context the watch was being started for.
        cluster: String,
        /// Underlying client error.
        #[source]
        source: kube::Error,
    },

    /// The initial `List` call used to capture a starting resource version
    /// did not complete within the configured timeout.
    #[error("failed to start watch for cluster {cluster:?}: initial list timed out")]
    WatchStartTimeout {
        /// Cluster context the watch was being started for.
        cluster: String,
    },

    /// `CancelBySessionAndID` was called for a subscription the session does not own,
    /// or a lookup by id found nothing.
    #[error("subscription {0} not found")]
    NotFound(String),

    /// The cluster-client factory could not produce a client for the requested cluster.
    #[error("failed to obtain client for cluster {cluster:?}: {source}")]
    ClientUnavailable {
        /// Cluster context that was requested.
        cluster: String,
        /// Underlying cause from the cluster-client factory.
        #[source]
        source: ClientError,
    },
}

/// Internal error raised by a [`crate::transport::SessionTransport::deliver`] call.
///
/// Never surfaced to a tool caller directly: the [`SubscriptionManager`](crate::subscription::SubscriptionManager)
/// treats any `TransportError` as evidence that the owning session is dead and
/// reacts by cancelling that session's subscriptions (spec §4.8, §7).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport reported the session does not exist (already disconnected).
    #[error("session {0} is not connected")]
    SessionGone(String),

    /// The delivery timed out.
    #[error("delivery timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Any other transport-level failure.
    #[error("transport failure: {0}")]
    Other(String),
}

/// Internal error raised while obtaining a [`kube::Client`] for a cluster context.
#[derive(Debug, Error)]
pub enum ClientError {
    /// No such cluster context is configured.
    #[error("unknown cluster context: {0}")]
    UnknownCluster(String),

    /// The factory failed to build a client (bad credentials, unreachable API server, ...).
    #[error("failed to build client for cluster {cluster}: {source}")]
    BuildFailed {
        /// Cluster context that failed.
        cluster: String,
        /// Underlying cause, opaque to this crate.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Internal error raised by a [`crate::transport::LogFetcher`] call.
///
/// Handled by [`crate::enrich`] as a per-container error entry; never fatal
/// to the fault signal it was enriching (spec §4.5 point 4).
#[derive(Debug, Error)]
pub enum LogFetchError {
    /// The caller lacks permission to read logs for this container.
    #[error("forbidden")]
    Forbidden,

    /// The container (or its previous incarnation) no longer exists.
    #[error("gone")]
    Gone,

    /// The fetch did not complete within the per-container timeout.
    #[error("timeout")]
    Timeout,

    /// Any other fetch failure.
    #[error("{0}")]
    Other(String),
}
