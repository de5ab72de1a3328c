use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{MerchantId, ProjectId};

/// Accumulated sightings of one subject from one merchant domain on one
/// worker. Unique on `(subject_hash, merchant_domain, worker_name)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectStats {
    pub id: Uuid,
    pub subject: String,
    pub subject_hash: String,
    pub merchant_domain: String,
    pub worker_name: String,
    pub email_count: i64,
    /// Operator-flagged subjects surfaced first in aggregation views.
    pub is_focused: bool,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Category of an activity-log row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogCategory {
    EmailForward,
    EmailDrop,
    AdminAction,
    System,
}

impl LogCategory {
    /// Stable string form used in storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmailForward => "email_forward",
            Self::EmailDrop => "email_drop",
            Self::AdminAction => "admin_action",
            Self::System => "system",
        }
    }

    /// Parse the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email_forward" => Some(Self::EmailForward),
            "email_drop" => Some(Self::EmailDrop),
            "admin_action" => Some(Self::AdminAction),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// One structured activity-log row, bulk-inserted by the log processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: Uuid,
    pub category: LogCategory,
    pub message: String,
    pub worker_name: String,
    pub created_at: DateTime<Utc>,
}

impl LogEntry {
    /// Create a log row timestamped now, attributed to `global` unless a
    /// worker is given.
    #[must_use]
    pub fn new(category: LogCategory, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            category,
            message: message.into(),
            worker_name: crate::types::GLOBAL_WORKER.to_owned(),
            created_at: Utc::now(),
        }
    }

    /// Attribute the row to a worker.
    #[must_use]
    pub fn from_worker(mut self, worker: impl Into<String>) -> Self {
        self.worker_name = worker.into();
        self
    }
}

/// Lifecycle of an analysis project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Active,
    Archived,
}

impl ProjectStatus {
    /// Stable string form used in storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    /// Parse the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// A named, label-only view over existing merchant data. Deleting a
/// project never touches the underlying rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisProject {
    pub id: ProjectId,
    pub name: String,
    pub merchant_id: MerchantId,
    /// Workers the view is restricted to; empty means unrestricted.
    pub worker_names: Vec<String>,
    pub status: ProjectStatus,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_category_roundtrip() {
        for cat in [
            LogCategory::EmailForward,
            LogCategory::EmailDrop,
            LogCategory::AdminAction,
            LogCategory::System,
        ] {
            assert_eq!(LogCategory::parse(cat.as_str()), Some(cat));
        }
    }

    #[test]
    fn log_entry_defaults_to_global() {
        let entry = LogEntry::new(LogCategory::System, "startup");
        assert_eq!(entry.worker_name, "global");
        assert_eq!(
            LogEntry::new(LogCategory::AdminAction, "x")
                .from_worker("w1")
                .worker_name,
            "w1"
        );
    }
}
