use serde::{Deserialize, Serialize};

use crate::rule::{FilterRule, RuleCategory};

/// What the worker should do with the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterAction {
    Forward,
    Drop,
}

/// The synchronous decision returned to the submitting worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterDecision {
    /// Forward or drop.
    pub action: FilterAction,
    /// Destination override; present only on forward.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forward_to: Option<String>,
    /// Human-readable explanation of the decision.
    pub reason: String,
    /// Category of the matched rule; absent on default-forward.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_category: Option<RuleCategory>,
    /// The rule that decided the message, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_rule: Option<FilterRule>,
}

impl FilterDecision {
    /// The default-forward decision: nothing matched.
    #[must_use]
    pub fn default_forward() -> Self {
        Self {
            action: FilterAction::Forward,
            forward_to: None,
            reason: "no rule matched".to_owned(),
            matched_category: None,
            matched_rule: None,
        }
    }

    /// Forward because a whitelist rule matched.
    #[must_use]
    pub fn whitelisted(rule: FilterRule) -> Self {
        Self {
            action: FilterAction::Forward,
            forward_to: None,
            reason: format!("whitelist rule matched: {}", rule.pattern),
            matched_category: Some(RuleCategory::Whitelist),
            matched_rule: Some(rule),
        }
    }

    /// Drop because a blacklist or dynamic rule matched.
    #[must_use]
    pub fn dropped(rule: FilterRule) -> Self {
        let category = rule.category;
        Self {
            action: FilterAction::Drop,
            forward_to: None,
            reason: format!("{} rule matched: {}", category.as_str(), rule.pattern),
            matched_category: Some(category),
            matched_rule: Some(rule),
        }
    }

    /// Whether the message should feed the dynamic-rule detector.
    ///
    /// Only default-forward outcomes are tracked; any categorized match
    /// (including whitelist) excludes the message from learning.
    #[must_use]
    pub fn should_track(&self) -> bool {
        self.matched_category.is_none()
    }
}
