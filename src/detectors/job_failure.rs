//! JobFailure detector (spec §4.4).

use chrono::Utc;
use k8s_openapi::api::batch::v1::{Job, JobCondition};

use super::{FaultSignal, Severity};

fn failed_condition(job: &Job) -> Option<&JobCondition> {
    job.status
        .as_ref()?
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == "Failed" && c.status == "True")
}

fn indicates_backoff_exhaustion(condition: &JobCondition) -> bool {
    condition
        .reason
        .as_deref()
        .is_some_and(|reason| reason.eq_ignore_ascii_case("BackoffLimitExceeded"))
}

/// Emits when a `Failed=True` condition is newly added.
pub fn detect(old: Option<&Job>, new: &Job) -> Vec<FaultSignal> {
    let Some(uid) = new.metadata.uid.clone() else {
        return Vec::new();
    };
    let namespace = new.metadata.namespace.clone().unwrap_or_default();
    let name = new.metadata.name.clone().unwrap_or_default();

    let Some(new_condition) = failed_condition(new) else {
        return Vec::new();
    };
    if old.is_some_and(|o| failed_condition(o).is_some()) {
        return Vec::new();
    }

    let severity = if indicates_backoff_exhaustion(new_condition) {
        Severity::Critical
    } else {
        Severity::Warning
    };

    vec![FaultSignal {
        fault_type: "JobFailure",
        resource_uid: uid,
        kind: "Job",
        name,
        namespace,
        container_name: String::new(),
        severity,
        context: new_condition.message.clone().unwrap_or_default(),
        timestamp: Utc::now(),
    }]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job_with_conditions(conditions: serde_json::Value) -> Job {
        serde_json::from_value(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": {"name": "migrate", "namespace": "dev", "uid": "job-uid-1"},
            "spec": {"template": {"spec": {"containers": [{"name": "migrate", "image": "example/migrate:1"}], "restartPolicy": "Never"}}},
            "status": {"conditions": conditions},
        }))
        .unwrap()
    }

    #[test]
    fn fires_on_new_failed_condition() {
        let old = job_with_conditions(json!([]));
        let new = job_with_conditions(json!([{"type": "Failed", "status": "True", "reason": "DeadlineExceeded", "message": "job exceeded deadline"}]));
        let signals = detect(Some(&old), &new);
        assert_eq!(signals.len(), 1);
        assert!(matches!(signals[0].severity, Severity::Warning));
    }

    #[test]
    fn backoff_exhaustion_is_critical() {
        let new = job_with_conditions(json!([{"type": "Failed", "status": "True", "reason": "BackoffLimitExceeded", "message": "too many retries"}]));
        let signals = detect(None, &new);
        assert_eq!(signals.len(), 1);
        assert!(matches!(signals[0].severity, Severity::Critical));
    }

    #[test]
    fn no_refire_once_already_failed() {
        let old = job_with_conditions(json!([{"type": "Failed", "status": "True", "reason": "DeadlineExceeded"}]));
        let new = job_with_conditions(json!([{"type": "Failed", "status": "True", "reason": "DeadlineExceeded"}]));
        assert!(detect(Some(&old), &new).is_empty());
    }
}
