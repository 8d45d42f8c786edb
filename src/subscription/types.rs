//! Subscription record (spec §3).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::filter::{FilterSet, Mode};

/// A registered, session-bound intent to receive notifications.
///
/// Owned exclusively by the [`super::manager::SubscriptionManager`]. `cancel`
/// is the one-shot release the Manager pulls to stop the backing watch or
/// detach from shared informers; `degraded` is set in place so readers don't
/// need to go back through the Manager to check it (spec §3, §4.6 "mark the
/// subscription degraded=true but do not remove it").
pub struct Subscription {
    pub id: String,
    pub session_id: String,
    pub cluster: String,
    pub mode: Mode,
    pub filters: FilterSet,
    pub created_at: DateTime<Utc>,
    degraded: AtomicBool,
    cancel: CancellationToken,
}

impl Subscription {
    pub fn new(id: String, session_id: String, cluster: String, mode: Mode, filters: FilterSet) -> Self {
        Self {
            id,
            session_id,
            cluster,
            mode,
            filters,
            created_at: Utc::now(),
            degraded: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Mark degraded after the backing watch exhausts its retry budget
    /// (spec §4.6, §7). The subscription stays registered.
    pub fn mark_degraded(&self) {
        self.degraded.store(true, Ordering::Relaxed);
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the backing watch / detach from shared informers.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A [`Subscription`] behind the reference count the Manager's registries share.
pub type SharedSubscription = Arc<Subscription>;

/// Snapshot returned from `events_subscribe`/`ListForSession` (spec §6).
#[derive(Debug, Clone, serde::Serialize)]
pub struct SubscriptionView {
    pub subscription_id: String,
    pub cluster: String,
    pub mode: &'static str,
    pub created_at: DateTime<Utc>,
    pub status: &'static str,
}

impl From<&Subscription> for SubscriptionView {
    fn from(sub: &Subscription) -> Self {
        Self {
            subscription_id: sub.id.clone(),
            cluster: sub.cluster.clone(),
            mode: match sub.mode {
                Mode::Events => "events",
                Mode::Faults => "faults",
            },
            created_at: sub.created_at,
            status: if sub.is_degraded() { "degraded" } else { "active" },
        }
    }
}
