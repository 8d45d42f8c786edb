//! CrashLoop detector (spec §4.4).

use chrono::Utc;
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};

use super::{FaultSignal, Severity};

const CRASH_LOOP_BACKOFF: &str = "CrashLoopBackOff";

fn waiting_reason(status: &ContainerStatus) -> Option<&str> {
    status.state.as_ref()?.waiting.as_ref()?.reason.as_deref()
}

fn find<'a>(statuses: &'a [ContainerStatus], name: &str) -> Option<&'a ContainerStatus> {
    statuses.iter().find(|c| c.name == name)
}

/// Emits one signal per container that just entered `CrashLoopBackOff`:
/// the container either had no prior status or its prior `waiting.reason`
/// was something other than `CrashLoopBackOff`.
pub fn detect(old: Option<&Pod>, new: &Pod) -> Vec<FaultSignal> {
    let Some(uid) = new.metadata.uid.clone() else {
        return Vec::new();
    };
    let namespace = new.metadata.namespace.clone().unwrap_or_default();
    let name = new.metadata.name.clone().unwrap_or_default();

    let new_statuses = new
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(Vec::as_slice)
        .unwrap_or(&[]);
    let old_statuses = old
        .and_then(|p| p.status.as_ref())
        .and_then(|s| s.container_statuses.as_ref())
        .map(Vec::as_slice)
        .unwrap_or(&[]);

    let mut signals = Vec::new();
    for status in new_statuses {
        if waiting_reason(status) != Some(CRASH_LOOP_BACKOFF) {
            continue;
        }
        let previously_looping = find(old_statuses, &status.name)
            .map(|prior| waiting_reason(prior) == Some(CRASH_LOOP_BACKOFF))
            .unwrap_or(false);
        if previously_looping {
            continue;
        }
        let context = status
            .last_state
            .as_ref()
            .and_then(|s| s.terminated.as_ref())
            .and_then(|t| t.message.clone())
            .unwrap_or_default();
        signals.push(FaultSignal {
            fault_type: "CrashLoop",
            resource_uid: uid.clone(),
            kind: "Pod",
            name: name.clone(),
            namespace: namespace.clone(),
            container_name: status.name.clone(),
            severity: Severity::Critical,
            context,
            timestamp: Utc::now(),
        });
    }
    signals
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{ContainerState, ContainerStateTerminated};
    use serde_json::json;

    fn pod_with(container_states: serde_json::Value) -> Pod {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": "worker-0",
                "namespace": "dev",
                "uid": "pod-uid-abc",
            },
            "spec": {
                "containers": [{"name": "app", "image": "example/app:1"}],
            },
            "status": {
                "containerStatuses": container_states,
            },
        }))
        .unwrap()
    }

    fn waiting_status(name: &str, reason: &str) -> serde_json::Value {
        json!([{
            "name": name,
            "ready": false,
            "restartCount": 3,
            "image": "example/app:1",
            "imageID": "",
            "state": {"waiting": {"reason": reason}},
        }])
    }

    #[test]
    fn fires_on_transition_into_crash_loop() {
        let old = pod_with(waiting_status("app", "ContainerCreating"));
        let new = pod_with(waiting_status("app", "CrashLoopBackOff"));
        let signals = detect(Some(&old), &new);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].container_name, "app");
        assert_eq!(signals[0].resource_uid, "pod-uid-abc");
        assert!(matches!(signals[0].severity, Severity::Critical));
    }

    #[test]
    fn does_not_refire_while_still_looping() {
        let old = pod_with(waiting_status("app", "CrashLoopBackOff"));
        let new = pod_with(waiting_status("app", "CrashLoopBackOff"));
        assert!(detect(Some(&old), &new).is_empty());
    }

    #[test]
    fn new_object_without_prior_state_still_fires() {
        let new = pod_with(waiting_status("app", "CrashLoopBackOff"));
        let signals = detect(None, &new);
        assert_eq!(signals.len(), 1);
    }

    #[test]
    fn context_uses_last_termination_message_when_present() {
        let mut new = pod_with(waiting_status("app", "CrashLoopBackOff"));
        new.status.as_mut().unwrap().container_statuses.as_mut().unwrap()[0].last_state =
            Some(ContainerState {
                terminated: Some(ContainerStateTerminated {
                    message: Some("exit code 137".into()),
                    ..Default::default()
                }),
                ..Default::default()
            });
        let signals = detect(None, &new);
        assert_eq!(signals[0].context, "exit code 137");
    }

    #[test]
    fn ignores_containers_not_in_crash_loop() {
        let new = pod_with(waiting_status("app", "ContainerCreating"));
        assert!(detect(None, &new).is_empty());
    }

    #[test]
    fn distinguishes_containers_within_one_update() {
        let old = pod_with(json!([
            {"name": "app", "state": {"waiting": {"reason": "ContainerCreating"}}},
            {"name": "sidecar", "state": {"waiting": {"reason": "ContainerCreating"}}},
        ]));
        let new = pod_with(json!([
            {"name": "app", "state": {"waiting": {"reason": "CrashLoopBackOff"}}},
            {"name": "sidecar", "state": {"waiting": {"reason": "CrashLoopBackOff"}}},
        ]));
        let mut signals = detect(Some(&old), &new);
        signals.sort_by(|a, b| a.container_name.cmp(&b.container_name));
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].container_name, "app");
        assert_eq!(signals[1].container_name, "sidecar");
    }
}
