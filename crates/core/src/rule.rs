use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{RuleId, WorkerScope};

/// The category a filter rule belongs to.
///
/// The set is closed and ordered: evaluation precedence is
/// whitelist → blacklist → dynamic, with watch rules only consulted by the
/// async watch processor, never on the decision path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleCategory {
    /// Matching mail is always forwarded.
    Whitelist,
    /// Matching mail is dropped.
    Blacklist,
    /// Auto-created drop rules learned from traffic.
    Dynamic,
    /// Observation-only rules counted by the async processor.
    Watch,
}

impl RuleCategory {
    /// Stable string form used in storage and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Whitelist => "whitelist",
            Self::Blacklist => "blacklist",
            Self::Dynamic => "dynamic",
            Self::Watch => "watch",
        }
    }

    /// Parse the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "whitelist" => Some(Self::Whitelist),
            "blacklist" => Some(Self::Blacklist),
            "dynamic" => Some(Self::Dynamic),
            "watch" => Some(Self::Watch),
            _ => None,
        }
    }
}

/// Which field of the message a rule matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchField {
    /// The full sender address.
    Sender,
    /// The message subject.
    Subject,
    /// The sender's root registrable domain.
    Domain,
}

impl MatchField {
    /// Stable string form used in storage and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Subject => "subject",
            Self::Domain => "domain",
        }
    }

    /// Parse the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sender" => Some(Self::Sender),
            "subject" => Some(Self::Subject),
            "domain" => Some(Self::Domain),
            _ => None,
        }
    }
}

/// How a rule's pattern is compared against the derived value.
///
/// All non-regex modes compare on lowercased operands; regex compiles with
/// the case-insensitive flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchMode {
    Exact,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

impl MatchMode {
    /// Stable string form used in storage and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Contains => "contains",
            Self::StartsWith => "startsWith",
            Self::EndsWith => "endsWith",
            Self::Regex => "regex",
        }
    }

    /// Parse the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "exact" => Some(Self::Exact),
            "contains" => Some(Self::Contains),
            "startsWith" => Some(Self::StartsWith),
            "endsWith" => Some(Self::EndsWith),
            "regex" => Some(Self::Regex),
            _ => None,
        }
    }
}

/// A static filter rule.
///
/// Rules are created by admins or by the dynamic-rule detector, and deleted
/// by admins or by retention when a dynamic rule expires. A rule whose
/// regex pattern does not compile is silently skipped during matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterRule {
    /// Unique rule identifier.
    pub id: RuleId,
    /// Worker the rule is scoped to; `global` applies everywhere.
    #[serde(default)]
    pub worker: WorkerScope,
    /// Category controlling evaluation precedence.
    pub category: RuleCategory,
    /// Which message field the pattern is compared against.
    pub match_field: MatchField,
    /// Comparison mode.
    pub match_mode: MatchMode,
    /// The pattern; never empty.
    pub pattern: String,
    /// Disabled rules are skipped during matching.
    pub enabled: bool,
    /// Creation timestamp; first key of the deterministic scan order.
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp.
    pub updated_at: DateTime<Utc>,
    /// When the rule last matched a message. Updated by the async stats
    /// processor, not by the filter engine.
    pub last_hit_at: Option<DateTime<Utc>>,
}

impl FilterRule {
    /// Create an enabled rule with a fresh id, timestamped now.
    #[must_use]
    pub fn new(
        category: RuleCategory,
        match_field: MatchField,
        match_mode: MatchMode,
        pattern: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: RuleId::new(),
            worker: WorkerScope::global(),
            category,
            match_field,
            match_mode,
            pattern: pattern.into(),
            enabled: true,
            created_at: now,
            updated_at: now,
            last_hit_at: None,
        }
    }

    /// Scope the rule to a specific worker.
    #[must_use]
    pub fn with_worker(mut self, worker: impl Into<WorkerScope>) -> Self {
        self.worker = worker.into();
        self
    }

    /// Create the dynamic rule the detector promotes a hot subject into:
    /// `contains` on the subject, enabled immediately.
    #[must_use]
    pub fn dynamic_for_subject(subject: impl Into<String>) -> Self {
        Self::new(
            RuleCategory::Dynamic,
            MatchField::Subject,
            MatchMode::Contains,
            subject,
        )
    }
}

/// Per-rule processing counters, kept in a side table and updated only via
/// batched, idempotent increments from the async processor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleStats {
    pub rule_id: Option<RuleId>,
    /// Messages this rule was evaluated against and matched.
    pub total_processed: u64,
    /// Messages dropped because of this rule.
    pub deleted_count: u64,
    /// Processing errors attributed to this rule.
    pub error_count: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_string_roundtrip() {
        for cat in [
            RuleCategory::Whitelist,
            RuleCategory::Blacklist,
            RuleCategory::Dynamic,
            RuleCategory::Watch,
        ] {
            assert_eq!(RuleCategory::parse(cat.as_str()), Some(cat));
        }
        assert_eq!(RuleCategory::parse("bogus"), None);
    }

    #[test]
    fn match_mode_string_roundtrip() {
        for mode in [
            MatchMode::Exact,
            MatchMode::Contains,
            MatchMode::StartsWith,
            MatchMode::EndsWith,
            MatchMode::Regex,
        ] {
            assert_eq!(MatchMode::parse(mode.as_str()), Some(mode));
        }
    }

    #[test]
    fn dynamic_rule_shape() {
        let rule = FilterRule::dynamic_for_subject("FLASH SALE");
        assert_eq!(rule.category, RuleCategory::Dynamic);
        assert_eq!(rule.match_field, MatchField::Subject);
        assert_eq!(rule.match_mode, MatchMode::Contains);
        assert_eq!(rule.pattern, "FLASH SALE");
        assert!(rule.enabled);
        assert!(rule.worker.is_global());
    }
}
