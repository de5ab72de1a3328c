use std::sync::Arc;

use dashmap::DashSet;
use moka::sync::Cache;
use regex::{Regex, RegexBuilder};
use tracing::warn;

use crate::rule::MatchMode;
use crate::types::RuleId;

/// Upper bound on cached compiled regexes. User-supplied patterns sit on
/// the hot decision path; the cache keeps compilation out of it while
/// bounding memory.
const REGEX_CACHE_CAPACITY: u64 = 1024;

/// Result of matching one pattern against one value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchOutcome {
    /// Whether the pattern matched.
    pub matched: bool,
    /// Compile error message when a regex pattern was invalid. The caller
    /// never sees a hard error from matching.
    pub error: Option<String>,
}

impl MatchOutcome {
    fn hit(matched: bool) -> Self {
        Self {
            matched,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            matched: false,
            error: Some(error),
        }
    }
}

/// Case-insensitive pattern matcher shared by the filter engine, the watch
/// processor, and the monitoring hit processor.
///
/// Non-regex modes compare on lowercased operands. Regex patterns compile
/// with the case-insensitive flag through a bounded cache; a pattern that
/// fails to compile yields `matched = false` plus the error message, never
/// a panic or an `Err` to the caller.
pub struct PatternMatcher {
    regex_cache: Cache<String, Arc<Result<Regex, String>>>,
    warned_rules: DashSet<RuleId>,
}

impl PatternMatcher {
    #[must_use]
    pub fn new() -> Self {
        Self {
            regex_cache: Cache::new(REGEX_CACHE_CAPACITY),
            warned_rules: DashSet::new(),
        }
    }

    /// Match `value` against `pattern` using the given mode.
    #[must_use]
    pub fn matches(&self, pattern: &str, value: &str, mode: MatchMode) -> MatchOutcome {
        match mode {
            MatchMode::Regex => match self.compiled(pattern).as_ref() {
                Ok(re) => MatchOutcome::hit(re.is_match(value)),
                Err(message) => MatchOutcome::failed(message.clone()),
            },
            _ => {
                let value = value.to_lowercase();
                let pattern = pattern.to_lowercase();
                let matched = match mode {
                    MatchMode::Exact => value == pattern,
                    MatchMode::Contains => value.contains(&pattern),
                    MatchMode::StartsWith => value.starts_with(&pattern),
                    MatchMode::EndsWith => value.ends_with(&pattern),
                    MatchMode::Regex => unreachable!(),
                };
                MatchOutcome::hit(matched)
            }
        }
    }

    /// Match on behalf of a rule, logging a compile-failure warning at most
    /// once per rule id for the process lifetime.
    #[must_use]
    pub fn matches_for_rule(
        &self,
        rule_id: RuleId,
        pattern: &str,
        value: &str,
        mode: MatchMode,
    ) -> MatchOutcome {
        let outcome = self.matches(pattern, value, mode);
        if let Some(ref error) = outcome.error {
            if self.warned_rules.insert(rule_id) {
                warn!(rule_id = %rule_id, pattern, error = %error, "skipping rule with invalid regex");
            }
        }
        outcome
    }

    /// Validate a pattern for the given mode without matching.
    ///
    /// Non-regex patterns are valid whenever they are non-empty.
    pub fn validate(&self, pattern: &str, mode: MatchMode) -> Result<(), String> {
        if pattern.is_empty() {
            return Err("pattern must not be empty".to_owned());
        }
        if mode == MatchMode::Regex {
            if let Err(message) = self.compiled(pattern).as_ref() {
                return Err(message.clone());
            }
        }
        Ok(())
    }

    /// Return the first pattern in `patterns` that matches `value`, or
    /// `None`. Invalid regex patterns are skipped.
    #[must_use]
    pub fn find_first<'a>(
        &self,
        patterns: &'a [String],
        value: &str,
        mode: MatchMode,
    ) -> Option<&'a str> {
        patterns
            .iter()
            .find(|pattern| self.matches(pattern, value, mode).matched)
            .map(String::as_str)
    }

    fn compiled(&self, pattern: &str) -> Arc<Result<Regex, String>> {
        self.regex_cache
            .get_with(pattern.to_owned(), || {
                Arc::new(
                    RegexBuilder::new(pattern)
                        .case_insensitive(true)
                        .build()
                        .map_err(|e| e.to_string()),
                )
            })
    }
}

impl Default for PatternMatcher {
    fn default() -> Self {
        Self::new()
    }
}
