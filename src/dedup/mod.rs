//! Deduplication caches (spec §4.2, §4.3).
//!
//! Both caches follow the same shape as `kube_runtime::reflector::store::Store`:
//! an `Arc<DashMap<K, V>>` behind a cheaply-clonable handle, read and
//! written under per-entry locks rather than one coarse mutex, with no
//! lock held across `.await` (spec §5 shared-resource policy).

pub mod event_dedup;
pub mod fault_dedup;

pub use event_dedup::{EventDeduplicator, EventKey};
pub use fault_dedup::{FaultConditionKey, FaultDeduplicator};
