//! A small resource-identity key, grounded on `kube_runtime::reflector::ObjectRef`.
//!
//! We don't need the full generic `ObjectRef<K>` (with its `DynamicType`
//! machinery for CRD support) since every fault-producing kind here is a
//! fixed, known-at-compile-time set (Pod/Node/Deployment/Job). A flat
//! struct capturing kind/namespace/name/uid is enough for detectors and
//! the fault deduplicator to key on.

use std::fmt;

use serde::Serialize;

/// Identifies a single Kubernetes-like resource within a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    /// `v1`, `apps/v1`, or `batch/v1` depending on `kind`.
    pub api_version: &'static str,
    /// `Pod`, `Node`, `Deployment`, or `Job`.
    pub kind: &'static str,
    /// Empty for cluster-scoped kinds (`Node`).
    pub namespace: String,
    /// Resource name.
    pub name: String,
    /// Stable cluster-assigned UID.
    pub uid: String,
}

/// `apiVersion` for each detector-producible kind (spec §3 `involvedObject`/`resource`).
pub fn api_version_for_kind(kind: &str) -> &'static str {
    match kind {
        "Deployment" => "apps/v1",
        "Job" => "batch/v1",
        _ => "v1",
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{}/{}", self.kind, self.name)
        } else {
            write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}
