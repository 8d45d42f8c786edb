//! Detectors (spec §4.4): stateless `(oldObj, newObj) -> []FaultSignal`
//! functions run by the Resource Watcher on every informer `OnUpdate`.
//!
//! Modelled as a tagged registry of plain functions rather than a trait
//! object registry or a runtime plugin system — the spec's design notes call
//! out that detector dispatch is a compile-time extension point, not dynamic.
//! This mirrors how `kube_runtime::utils::predicate` exposes its predicate
//! functions as a flat `pub mod predicates` of free functions rather than
//! an object-safe trait hierarchy.

mod crash_loop;
mod deployment_failure;
mod job_failure;
mod node_unhealthy;
mod pod_crash;

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::{Node, Pod};
use serde::Serialize;

/// Severity carried by a fault signal (spec §3: `info|warning|critical`).
///
/// Distinct from [`crate::notification::NotificationLevel`], which is the
/// transport-level log level a notification is delivered at — fault
/// notifications are always delivered at `level=warning` regardless of the
/// signal's own severity (spec §3 "Outbound Notifications").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// One detected state transition, before dedup or enrichment (spec §3, §4.4).
#[derive(Debug, Clone)]
pub struct FaultSignal {
    pub fault_type: &'static str,
    pub resource_uid: String,
    pub kind: &'static str,
    pub name: String,
    pub namespace: String,
    /// Empty for non-pod faults.
    pub container_name: String,
    pub severity: Severity,
    pub context: String,
    pub timestamp: DateTime<Utc>,
}

/// Detector for a single resource kind `K`: compares an old/new object pair
/// and emits zero or more signals. `old` is `None` on an informer `OnAdd`,
/// which never fires edge-triggered detectors (spec §4.7).
pub type Detector<K> = fn(old: Option<&K>, new: &K) -> Vec<FaultSignal>;

/// Immutable, process-wide Pod detector registry (spec §4.7 "process-wide and
/// immutable at runtime"). `pod_crash::detect` stays registered even though
/// `crash_loop::detect` supersedes it — see the module's own doc comment.
#[allow(deprecated)]
pub const POD_DETECTORS: &[Detector<Pod>] = &[crash_loop::detect, pod_crash::detect];

pub const NODE_DETECTORS: &[Detector<Node>] = &[node_unhealthy::detect];

pub const DEPLOYMENT_DETECTORS: &[Detector<Deployment>] = &[deployment_failure::detect];

pub const JOB_DETECTORS: &[Detector<Job>] = &[job_failure::detect];

/// Simple heuristic scan for panic/fatal/segfault/stack-trace markers used by
/// the Context Enricher to tag a log segment (spec §4.5).
pub fn looks_like_panic(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    ["panic:", "fatal", "segfault", "goroutine ", "stack trace", "panicked at"]
        .iter()
        .any(|marker| lower.contains(marker))
}

#[cfg(test)]
mod panic_heuristic_tests {
    use super::*;

    #[test]
    fn detects_common_markers() {
        assert!(looks_like_panic("thread 'main' panicked at 'oops'"));
        assert!(looks_like_panic("runtime error: segfault"));
        assert!(looks_like_panic("FATAL: out of memory"));
    }

    #[test]
    fn ignores_plain_output() {
        assert!(!looks_like_panic("server listening on :8080"));
    }
}
