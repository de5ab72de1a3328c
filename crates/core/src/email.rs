use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A decision event submitted by an edge worker for a candidate email.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailEvent {
    /// Sender address.
    pub from: String,
    /// Recipient address.
    pub to: String,
    /// Message subject.
    pub subject: String,
    /// When the worker received the message.
    pub timestamp: DateTime<Utc>,
    /// Submitting worker; absent means the event is unattributed and is
    /// treated as `global`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_name: Option<String>,
}

impl EmailEvent {
    /// Create an event timestamped now.
    #[must_use]
    pub fn new(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            timestamp: Utc::now(),
            worker_name: None,
        }
    }

    /// Set the event timestamp.
    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Attribute the event to a worker.
    #[must_use]
    pub fn from_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker_name = Some(worker.into());
        self
    }

    /// The worker name, defaulted to `global` when unattributed.
    #[must_use]
    pub fn worker(&self) -> &str {
        self.worker_name
            .as_deref()
            .unwrap_or(crate::types::GLOBAL_WORKER)
    }
}

/// The strict inbound event accepted by the monitoring layer.
///
/// Exactly these fields may reach the hit log; anything else on the wire is
/// ignored at deserialization and never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringEvent {
    pub sender: String,
    pub subject: String,
    pub recipient: String,
    pub received_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_name: Option<String>,
}

impl MonitoringEvent {
    /// Validate the event, failing fast with the offending field name.
    ///
    /// All three string fields must be non-empty after trimming.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.sender.trim().is_empty() {
            return Err(ValidationError::new("sender", "must be a non-empty string"));
        }
        if self.subject.trim().is_empty() {
            return Err(ValidationError::new("subject", "must be a non-empty string"));
        }
        if self.recipient.trim().is_empty() {
            return Err(ValidationError::new(
                "recipient",
                "must be a non-empty string",
            ));
        }
        Ok(())
    }

    /// The worker name, defaulted to `global` when unattributed.
    #[must_use]
    pub fn worker(&self) -> &str {
        self.worker_name
            .as_deref()
            .unwrap_or(crate::types::GLOBAL_WORKER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_worker_defaults_to_global() {
        let event = EmailEvent::new("a@x.com", "b@y.com", "hi");
        assert_eq!(event.worker(), "global");
        assert_eq!(event.clone().from_worker("w1").worker(), "w1");
    }

    #[test]
    fn monitoring_event_rejects_empty_fields() {
        let event = MonitoringEvent {
            sender: "a@x.com".into(),
            subject: "  ".into(),
            recipient: "b@y.com".into(),
            received_at: Utc::now(),
            worker_name: None,
        };
        let err = event.validate().unwrap_err();
        assert_eq!(err.field, "subject");
    }

    #[test]
    fn monitoring_event_ignores_extra_wire_fields() {
        let json = r#"{
            "sender": "a@x.com",
            "subject": "Order shipped",
            "recipient": "b@y.com",
            "receivedAt": "2025-06-01T00:00:00Z",
            "internalNote": "must not survive deserialization"
        }"#;
        let event: MonitoringEvent = serde_json::from_str(json).unwrap();
        event.validate().unwrap();
        let back = serde_json::to_value(&event).unwrap();
        assert!(back.get("internalNote").is_none());
    }

    #[test]
    fn monitoring_event_rejects_non_date_received_at() {
        let json = r#"{
            "sender": "a@x.com",
            "subject": "s",
            "recipient": "b@y.com",
            "receivedAt": "not-a-date"
        }"#;
        assert!(serde_json::from_str::<MonitoringEvent>(json).is_err());
    }
}
