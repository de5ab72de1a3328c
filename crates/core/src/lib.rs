//! Core types and pure logic for the mailsieve filtering control plane.
//!
//! Everything here is storage-agnostic: domain rows, the pattern matcher,
//! root-domain extraction, subject hashing, the dynamic-detector
//! configuration, and the task envelope model shared by the synchronous
//! filter path and the async processor.

pub mod campaign;
pub mod config;
pub mod decision;
pub mod domain;
pub mod email;
pub mod error;
pub mod hash;
pub mod matcher;
pub mod monitoring;
pub mod rule;
pub mod stats;
pub mod task;
pub mod types;

pub use campaign::{
    AnalysisStatus, Campaign, CampaignEmail, Merchant, MerchantWorkerStatus, RecipientPathEntry,
};
pub use config::DetectorConfig;
pub use decision::{FilterAction, FilterDecision};
pub use domain::{extract_domain, extract_root_domain, SecondLevelTlds};
pub use email::{EmailEvent, MonitoringEvent};
pub use error::{CoreError, ValidationError};
pub use hash::{campaign_subject_hash, tracker_subject_hash};
pub use matcher::{MatchOutcome, PatternMatcher};
pub use monitoring::{
    Alert, AlertKind, HitLogEntry, MonitoringRule, RatioAlert, RatioHealth, RatioMonitor,
    RatioState, SignalHealth, SignalState, SignalStatus,
};
pub use rule::{FilterRule, MatchField, MatchMode, RuleCategory, RuleStats};
pub use stats::{AnalysisProject, LogCategory, LogEntry, ProjectStatus, SubjectStats};
pub use task::{LogTask, StatsTask, TaskEnvelope, TaskKind, TaskPayload};
pub use types::{
    AlertId, CampaignId, MerchantId, MonitorRuleId, ProjectId, RatioMonitorId, RuleId, TaskId,
    WorkerScope, GLOBAL_WORKER,
};
