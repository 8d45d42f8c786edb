//! NodeUnhealthy detector (spec §4.4).

use chrono::Utc;
use k8s_openapi::api::core::v1::{Node, NodeCondition};

use super::{FaultSignal, Severity};

fn ready_condition<'a>(node: &'a Node) -> Option<&'a NodeCondition> {
    node.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == "Ready")
}

/// Emits when `Ready` transitions from `True` (or absent) to `False`/`Unknown`.
pub fn detect(old: Option<&Node>, new: &Node) -> Vec<FaultSignal> {
    let Some(uid) = new.metadata.uid.clone() else {
        return Vec::new();
    };
    let name = new.metadata.name.clone().unwrap_or_default();

    let old_status = old.and_then(ready_condition).map(|c| c.status.as_str());
    let Some(new_condition) = ready_condition(new) else {
        return Vec::new();
    };

    let was_ready = old_status.is_none_or(|s| s == "True");
    if !was_ready || new_condition.status == "True" {
        return Vec::new();
    }

    let severity = match new_condition.status.as_str() {
        "False" => Severity::Critical,
        "Unknown" => Severity::Warning,
        _ => return Vec::new(),
    };

    let context = format!(
        "{}: {}",
        new_condition.reason.clone().unwrap_or_default(),
        new_condition.message.clone().unwrap_or_default()
    );

    vec![FaultSignal {
        fault_type: "NodeUnhealthy",
        resource_uid: uid,
        kind: "Node",
        name,
        namespace: String::new(),
        container_name: String::new(),
        severity,
        context,
        timestamp: Utc::now(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node_with_ready(status: &str) -> Node {
        serde_json::from_value(json!({
            "apiVersion": "v1",
            "kind": "Node",
            "metadata": {"name": "node-1", "uid": "node-uid-1"},
            "status": {
                "conditions": [{"type": "Ready", "status": status, "reason": "KubeletNotReady", "message": "PLEG is not healthy"}],
            },
        }))
        .unwrap()
    }

    #[test]
    fn fires_on_ready_true_to_false() {
        let old = node_with_ready("True");
        let new = node_with_ready("False");
        let signals = detect(Some(&old), &new);
        assert_eq!(signals.len(), 1);
        assert!(matches!(signals[0].severity, Severity::Critical));
        assert_eq!(signals[0].context, "KubeletNotReady: PLEG is not healthy");
    }

    #[test]
    fn fires_on_ready_true_to_unknown_as_warning() {
        let old = node_with_ready("True");
        let new = node_with_ready("Unknown");
        let signals = detect(Some(&old), &new);
        assert_eq!(signals.len(), 1);
        assert!(matches!(signals[0].severity, Severity::Warning));
    }

    #[test]
    fn missing_old_condition_counts_as_ready() {
        let new = node_with_ready("False");
        let signals = detect(None, &new);
        assert_eq!(signals.len(), 1);
    }

    #[test]
    fn no_signal_when_already_unhealthy() {
        let old = node_with_ready("False");
        let new = node_with_ready("False");
        assert!(detect(Some(&old), &new).is_empty());
    }

    #[test]
    fn no_signal_on_recovery() {
        let old = node_with_ready("False");
        let new = node_with_ready("True");
        assert!(detect(Some(&old), &new).is_empty());
    }
}
