//! Outbound notification shapes (spec §3, §6).
//!
//! These are the values handed to [`crate::transport::SessionTransport::deliver`].
//! Shape and `logger` namespace are fixed by the spec; serialization is
//! `serde_json` the way `kube_core` renders its own API objects.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::detectors::Severity;
use crate::object_ref::ObjectRef;

/// Logging level attached to a notification, mirrored from `tracing`'s levels
/// but kept as data here since it crosses the transport boundary as a plain field.
///
/// This is the transport-level delivery level, fixed per notification kind
/// (spec §3 "Outbound Notifications") — it is never derived from a fault
/// signal's own [`Severity`], which has its own `info|warning|critical`
/// vocabulary and travels in `FaultNotification::severity` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// A single outbound message bound for one session (spec §3 "Outbound Notifications").
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub logger: &'static str,
    pub level: NotificationLevel,
    pub data: NotificationData,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum NotificationData {
    Event(EventNotification),
    Fault(FaultNotification),
    SubscriptionError(SubscriptionErrorNotification),
}

#[derive(Debug, Clone, Serialize)]
pub struct EventNotification {
    pub subscription_id: String,
    pub cluster: String,
    pub event: serde_json::Value,
}

impl EventNotification {
    pub fn into_notification(self) -> Notification {
        Notification {
            logger: "kubernetes/events",
            level: NotificationLevel::Info,
            data: NotificationData::Event(self),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FaultNotification {
    pub subscription_id: String,
    pub cluster: String,
    pub fault_id: String,
    pub fault_type: &'static str,
    pub severity: Severity,
    pub resource: ObjectRef,
    pub context: String,
    pub timestamp: DateTime<Utc>,
}

impl FaultNotification {
    pub fn into_notification(self) -> Notification {
        Notification {
            logger: "kubernetes/faults",
            level: NotificationLevel::Warning,
            data: NotificationData::Fault(self),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionErrorNotification {
    pub subscription_id: String,
    pub cluster: String,
    pub error: String,
    pub degraded: bool,
}

impl SubscriptionErrorNotification {
    pub fn into_notification(self) -> Notification {
        Notification {
            logger: "kubernetes/subscription_error",
            level: NotificationLevel::Error,
            data: NotificationData::SubscriptionError(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_notification_uses_events_logger_and_info_level() {
        let notification = EventNotification {
            subscription_id: "sub-1".into(),
            cluster: "dev".into(),
            event: serde_json::json!({"reason": "Pulled"}),
        }
        .into_notification();
        assert_eq!(notification.logger, "kubernetes/events");
        assert_eq!(notification.level, NotificationLevel::Info);
    }

    #[test]
    fn fault_notification_uses_faults_logger() {
        let notification = FaultNotification {
            subscription_id: "sub-2".into(),
            cluster: "dev".into(),
            fault_id: "abc123".into(),
            fault_type: "CrashLoop",
            severity: Severity::Critical,
            resource: ObjectRef {
                api_version: "v1",
                kind: "Pod",
                namespace: "dev".into(),
                name: "worker-0".into(),
                uid: "pod-uid-abc".into(),
            },
            context: String::new(),
            timestamp: Utc::now(),
        }
        .into_notification();
        assert_eq!(notification.logger, "kubernetes/faults");
        assert_eq!(notification.level, NotificationLevel::Warning);
    }

    #[test]
    fn fault_notification_severity_serializes_as_critical_not_error() {
        let notification = FaultNotification {
            subscription_id: "sub-4".into(),
            cluster: "dev".into(),
            fault_id: "abc123".into(),
            fault_type: "CrashLoop",
            severity: Severity::Critical,
            resource: ObjectRef {
                api_version: "v1",
                kind: "Pod",
                namespace: "dev".into(),
                name: "worker-0".into(),
                uid: "pod-uid-abc".into(),
            },
            context: String::new(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&notification).unwrap();
        assert_eq!(json["severity"], "critical");
    }

    #[test]
    fn subscription_error_marks_degraded() {
        let notification = SubscriptionErrorNotification {
            subscription_id: "sub-3".into(),
            cluster: "dev".into(),
            error: "retry budget exhausted".into(),
            degraded: true,
        }
        .into_notification();
        assert_eq!(notification.logger, "kubernetes/subscription_error");
        assert_eq!(notification.level, NotificationLevel::Error);
    }
}
