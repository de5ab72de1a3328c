use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rule::MatchMode;
use crate::types::{AlertId, MonitorRuleId, RatioMonitorId, RuleId, WorkerScope};

/// A monitoring rule describing one expected email signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringRule {
    pub id: MonitorRuleId,
    /// Merchant label the signal belongs to (free-form, for grouping).
    pub merchant: String,
    pub name: String,
    /// Pattern matched against inbound subjects.
    pub subject_pattern: String,
    /// Match mode; `contains` unless configured otherwise.
    pub match_mode: MatchMode,
    /// Expected cadence of the signal, minutes.
    pub expected_interval_minutes: i64,
    /// Gap after which the signal is declared dead, minutes.
    pub dead_after_minutes: i64,
    /// Worker the rule listens to; `global` listens to all.
    pub worker_scope: WorkerScope,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MonitoringRule {
    /// Create an enabled rule with a fresh id, matching by `contains`.
    #[must_use]
    pub fn new(
        merchant: impl Into<String>,
        name: impl Into<String>,
        subject_pattern: impl Into<String>,
        expected_interval_minutes: i64,
        dead_after_minutes: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: MonitorRuleId::new(),
            merchant: merchant.into(),
            name: name.into(),
            subject_pattern: subject_pattern.into(),
            match_mode: MatchMode::Contains,
            expected_interval_minutes,
            dead_after_minutes,
            worker_scope: WorkerScope::global(),
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    /// Scope the rule to a specific worker.
    #[must_use]
    pub fn with_worker_scope(mut self, scope: impl Into<WorkerScope>) -> Self {
        self.worker_scope = scope.into();
        self
    }
}

/// Liveness of a monitored signal.
///
/// The derived order is the listing order: `Dead < Weak < Active`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalHealth {
    Dead,
    Weak,
    Active,
}

impl SignalHealth {
    /// Stable string form used in storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dead => "DEAD",
            Self::Weak => "WEAK",
            Self::Active => "ACTIVE",
        }
    }

    /// Parse the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DEAD" => Some(Self::Dead),
            "WEAK" => Some(Self::Weak),
            "ACTIVE" => Some(Self::Active),
            _ => None,
        }
    }

    /// Classify a signal from the gap since it was last seen.
    ///
    /// `None` (never seen) classifies as the gap being unbounded: WEAK
    /// until `dead_after_minutes` could not possibly have elapsed, which
    /// it always has, so the result is DEAD.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn classify(
        gap_minutes: Option<f64>,
        expected_interval_minutes: i64,
        dead_after_minutes: i64,
    ) -> Self {
        match gap_minutes {
            Some(gap) if gap <= 1.5 * expected_interval_minutes as f64 => Self::Active,
            Some(gap) if gap <= dead_after_minutes as f64 => Self::Weak,
            _ => Self::Dead,
        }
    }
}

/// Persistent liveness state, one-to-one with a monitoring rule.
///
/// Created alongside the rule as `DEAD` with no sightings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalState {
    pub rule_id: MonitorRuleId,
    pub state: SignalHealth,
    pub last_seen_at: Option<DateTime<Utc>>,
    pub count_1h: i64,
    pub count_12h: i64,
    pub count_24h: i64,
    pub updated_at: DateTime<Utc>,
}

impl SignalState {
    /// The initial state row for a freshly created rule.
    #[must_use]
    pub fn initial(rule_id: MonitorRuleId) -> Self {
        Self {
            rule_id,
            state: SignalHealth::Dead,
            last_seen_at: None,
            count_1h: 0,
            count_12h: 0,
            count_24h: 0,
            updated_at: Utc::now(),
        }
    }
}

/// Combined rule + state answer to a status query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalStatus {
    pub rule: MonitoringRule,
    pub state: SignalHealth,
    pub last_seen_at: Option<DateTime<Utc>>,
    /// Whole minutes since the last sighting; `None` when never seen
    /// (serialized as `null`, compared as larger than any bound).
    pub gap_minutes: Option<i64>,
    pub count_1h: i64,
    pub count_12h: i64,
    pub count_24h: i64,
    pub updated_at: DateTime<Utc>,
}

/// One persisted sighting of a monitored signal.
///
/// Exactly these email fields may be stored; the monitoring layer refuses
/// any extra payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HitLogEntry {
    pub id: Uuid,
    pub rule_id: MonitorRuleId,
    pub sender: String,
    pub subject: String,
    pub recipient: String,
    pub received_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Kind of signal-state transition an alert reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertKind {
    SignalRecovered,
    SignalWeakened,
    SignalDead,
}

impl AlertKind {
    /// Stable string form used in storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SignalRecovered => "SIGNAL_RECOVERED",
            Self::SignalWeakened => "SIGNAL_WEAKENED",
            Self::SignalDead => "SIGNAL_DEAD",
        }
    }

    /// Parse the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SIGNAL_RECOVERED" => Some(Self::SignalRecovered),
            "SIGNAL_WEAKENED" => Some(Self::SignalWeakened),
            "SIGNAL_DEAD" => Some(Self::SignalDead),
            _ => None,
        }
    }
}

/// A state-change alert emitted by the hit processor or the heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub rule_id: MonitorRuleId,
    pub kind: AlertKind,
    pub previous_state: SignalHealth,
    pub current_state: SignalHealth,
    pub gap_minutes: i64,
    pub count_1h: i64,
    pub count_12h: i64,
    pub count_24h: i64,
    pub message: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Health of a ratio monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RatioHealth {
    Healthy,
    Warn,
    Alert,
}

impl RatioHealth {
    /// Stable string form used in storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "HEALTHY",
            Self::Warn => "WARN",
            Self::Alert => "ALERT",
        }
    }

    /// Parse the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "HEALTHY" => Some(Self::Healthy),
            "WARN" => Some(Self::Warn),
            "ALERT" => Some(Self::Alert),
            _ => None,
        }
    }
}

/// Compares the hit counters of two filter rules over a rolling window
/// against stepped thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatioMonitor {
    pub id: RatioMonitorId,
    pub name: String,
    pub tag: Option<String>,
    pub first_rule_id: RuleId,
    pub second_rule_id: RuleId,
    /// Ordered ratio thresholds; crossing later steps escalates.
    pub steps: Vec<f64>,
    /// Ratio (percent) below which the monitor leaves HEALTHY.
    pub threshold_percent: f64,
    /// Comparison window, minutes.
    pub time_window_minutes: i64,
    pub worker_scope: WorkerScope,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RatioMonitor {
    /// The rule-id columns reference monitoring rules; re-key them into
    /// that id space for hit-count queries.
    #[must_use]
    pub fn first_signal_id(&self) -> MonitorRuleId {
        MonitorRuleId::from_uuid(self.first_rule_id.as_uuid())
    }

    #[must_use]
    pub fn second_signal_id(&self) -> MonitorRuleId {
        MonitorRuleId::from_uuid(self.second_rule_id.as_uuid())
    }
}

/// Evaluated state of a ratio monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatioState {
    pub monitor_id: RatioMonitorId,
    pub state: RatioHealth,
    pub first_count: i64,
    pub second_count: i64,
    /// `second / first` in percent; `None` when the first counter is 0.
    pub current_ratio: Option<f64>,
    /// Per-step evaluation snapshot, persisted as JSON.
    pub steps_data: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// A ratio state-change alert row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RatioAlert {
    pub id: AlertId,
    pub monitor_id: RatioMonitorId,
    pub previous_state: RatioHealth,
    pub current_state: RatioHealth,
    pub current_ratio: Option<f64>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_ordering_matches_listing_order() {
        assert!(SignalHealth::Dead < SignalHealth::Weak);
        assert!(SignalHealth::Weak < SignalHealth::Active);
    }

    #[test]
    fn classify_boundaries() {
        // expected 10 min, dead after 60 min: ACTIVE up to 15, WEAK to 60.
        assert_eq!(
            SignalHealth::classify(Some(15.0), 10, 60),
            SignalHealth::Active
        );
        assert_eq!(
            SignalHealth::classify(Some(15.1), 10, 60),
            SignalHealth::Weak
        );
        assert_eq!(
            SignalHealth::classify(Some(60.0), 10, 60),
            SignalHealth::Weak
        );
        assert_eq!(
            SignalHealth::classify(Some(60.1), 10, 60),
            SignalHealth::Dead
        );
        assert_eq!(SignalHealth::classify(None, 10, 60), SignalHealth::Dead);
    }

    #[test]
    fn initial_state_is_dead_and_unseen() {
        let state = SignalState::initial(MonitorRuleId::new());
        assert_eq!(state.state, SignalHealth::Dead);
        assert!(state.last_seen_at.is_none());
        assert_eq!(
            (state.count_1h, state.count_12h, state.count_24h),
            (0, 0, 0)
        );
    }

    #[test]
    fn alert_kind_roundtrip() {
        for kind in [
            AlertKind::SignalRecovered,
            AlertKind::SignalWeakened,
            AlertKind::SignalDead,
        ] {
            assert_eq!(AlertKind::parse(kind.as_str()), Some(kind));
        }
    }
}
