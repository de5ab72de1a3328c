use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::decision::FilterAction;
use crate::email::{EmailEvent, MonitoringEvent};
use crate::rule::RuleCategory;
use crate::stats::LogCategory;
use crate::types::{RuleId, TaskId};

/// The closed set of follow-up task kinds the async processor fans out to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Stats,
    Log,
    Watch,
    Dynamic,
    Campaign,
    Monitoring,
}

impl TaskKind {
    /// Stable string form used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stats => "stats",
            Self::Log => "log",
            Self::Watch => "watch",
            Self::Dynamic => "dynamic",
            Self::Campaign => "campaign",
            Self::Monitoring => "monitoring",
        }
    }
}

/// Outcome summary carried by a stats task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsTask {
    /// The rule that decided the message, if any.
    pub rule_id: Option<RuleId>,
    /// Category of the matched rule, if any.
    pub category: Option<RuleCategory>,
    /// What happened to the message.
    pub action: FilterAction,
    /// Submitting worker.
    pub worker_name: String,
}

/// A structured log line to persist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogTask {
    pub category: LogCategory,
    pub message: String,
    pub worker_name: String,
}

/// Typed payload of a task envelope; the variant determines which batch
/// processor receives it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum TaskPayload {
    Stats(StatsTask),
    Log(LogTask),
    Watch(EmailEvent),
    Dynamic(EmailEvent),
    Campaign(EmailEvent),
    Monitoring(MonitoringEvent),
}

impl TaskPayload {
    /// The kind used for batching.
    #[must_use]
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Stats(_) => TaskKind::Stats,
            Self::Log(_) => TaskKind::Log,
            Self::Watch(_) => TaskKind::Watch,
            Self::Dynamic(_) => TaskKind::Dynamic,
            Self::Campaign(_) => TaskKind::Campaign,
            Self::Monitoring(_) => TaskKind::Monitoring,
        }
    }
}

/// A queued unit of follow-up work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub id: TaskId,
    pub payload: TaskPayload,
    pub enqueued_at: DateTime<Utc>,
}

impl TaskEnvelope {
    /// Wrap a payload, stamped now.
    #[must_use]
    pub fn new(payload: TaskPayload) -> Self {
        Self {
            id: TaskId::new(),
            payload,
            enqueued_at: Utc::now(),
        }
    }

    /// The kind used for batching.
    #[must_use]
    pub fn kind(&self) -> TaskKind {
        self.payload.kind()
    }
}
