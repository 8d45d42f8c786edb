//! Deprecated PodCrash detector.
//!
//! Superseded by [`super::crash_loop`], which fires on the narrower
//! `waiting.reason == "CrashLoopBackOff"` edge instead of phase alone. Kept
//! registered per the open question in spec §9: sources disagree on whether
//! `PodCrash` has actually been removed, so it stays present but deprecated
//! rather than deleted.

use chrono::Utc;
use k8s_openapi::api::core::v1::Pod;

use super::{FaultSignal, Severity};

fn phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref()?.phase.as_deref()
}

/// Emits when a Pod's phase transitions to `Failed` from anything else.
#[deprecated(note = "superseded by crash_loop::detect; kept registered per open fault-type question")]
pub fn detect(old: Option<&Pod>, new: &Pod) -> Vec<FaultSignal> {
    let Some(uid) = new.metadata.uid.clone() else {
        return Vec::new();
    };
    if phase(new) != Some("Failed") {
        return Vec::new();
    }
    if old.is_some_and(|o| phase(o) == Some("Failed")) {
        return Vec::new();
    }

    let namespace = new.metadata.namespace.clone().unwrap_or_default();
    let name = new.metadata.name.clone().unwrap_or_default();
    let context = new.status.as_ref().and_then(|s| s.message.clone()).unwrap_or_default();

    vec![FaultSignal {
        fault_type: "PodCrash",
        resource_uid: uid,
        kind: "Pod",
        name,
        namespace,
        container_name: String::new(),
        severity: Severity::Critical,
        context,
        timestamp: Utc::now(),
    }]
}

#[cfg(test)]
#[allow(deprecated)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pod_with_phase(phase: &str) -> Pod {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {"name": "worker-0", "namespace": "dev", "uid": "pod-uid-abc"},
            "spec": {"containers": [{"name": "app", "image": "example/app:1"}]},
            "status": {"phase": phase, "message": "OOMKilled"},
        }))
        .unwrap()
    }

    #[test]
    fn fires_on_transition_to_failed() {
        let old = pod_with_phase("Running");
        let new = pod_with_phase("Failed");
        let signals = detect(Some(&old), &new);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].context, "OOMKilled");
    }

    #[test]
    fn no_refire_while_already_failed() {
        let old = pod_with_phase("Failed");
        let new = pod_with_phase("Failed");
        assert!(detect(Some(&old), &new).is_empty());
    }
}
