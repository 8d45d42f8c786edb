//! DeploymentFailure detector (spec §4.4).

use chrono::Utc;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentCondition};

use super::{FaultSignal, Severity};

const PROGRESS_DEADLINE_EXCEEDED: &str = "ProgressDeadlineExceeded";

fn progressing_condition(deploy: &Deployment) -> Option<&DeploymentCondition> {
    deploy
        .status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == "Progressing")
}

/// Emits on a fresh transition to `Progressing=False` with
/// `reason=ProgressDeadlineExceeded`.
pub fn detect(old: Option<&Deployment>, new: &Deployment) -> Vec<FaultSignal> {
    let Some(uid) = new.metadata.uid.clone() else {
        return Vec::new();
    };
    let namespace = new.metadata.namespace.clone().unwrap_or_default();
    let name = new.metadata.name.clone().unwrap_or_default();

    let Some(new_condition) = progressing_condition(new) else {
        return Vec::new();
    };
    if new_condition.status != "False" || new_condition.reason.as_deref() != Some(PROGRESS_DEADLINE_EXCEEDED) {
        return Vec::new();
    }

    let already_failed = old
        .and_then(progressing_condition)
        .map(|c| c.status == "False" && c.reason.as_deref() == Some(PROGRESS_DEADLINE_EXCEEDED))
        .unwrap_or(false);
    if already_failed {
        return Vec::new();
    }

    vec![FaultSignal {
        fault_type: "DeploymentFailure",
        resource_uid: uid,
        kind: "Deployment",
        name,
        namespace,
        container_name: String::new(),
        severity: Severity::Critical,
        context: new_condition.message.clone().unwrap_or_default(),
        timestamp: Utc::now(),
    }]
}
