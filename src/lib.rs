//! An event & fault subscription engine for Kubernetes-like clusters.
//!
//! Connected clients open a long-lived session and declare a *subscription*
//! with filters and a mode; the engine thereafter pushes asynchronous
//! notifications onto that session until the client cancels or disconnects.
//!
//! Two subscription modes exist:
//!
//! - [`filter::Mode::Events`] — a filtered stream of cluster Event objects,
//!   driven by [`event_watcher::EventWatcher`].
//! - [`filter::Mode::Faults`] — an edge-triggered state-change detector over
//!   Pods, Nodes, Deployments, and Jobs, driven by
//!   [`resource_watcher::ResourceWatcher`] and the [`detectors`] registry.
//!
//! [`subscription::SubscriptionManager`] is the orchestrator: lifecycle,
//! limits, session binding, notification delivery, and periodic reaping of
//! dead sessions all live there. Everything this crate needs from its host
//! process — the streaming transport, the cluster-client factory, and the
//! log-fetching backend — is expressed as the `async_trait`s in
//! [`transport`] and supplied by the caller.

pub mod backoff;
pub mod config;
pub mod dedup;
pub mod detectors;
pub mod enrich;
pub mod error;
pub mod event_watcher;
pub mod fault_id;
pub mod filter;
pub mod notification;
pub mod object_ref;
pub mod resource_watcher;
pub mod subscription;
pub mod transport;

pub use config::EngineConfig;
pub use error::SubscriptionError;
pub use subscription::{Subscription, SubscriptionManager, SubscriptionView};
pub use transport::{ClusterClient, LogFetcher, SessionTransport};
