use std::sync::Arc;

use mailsieve_core::{
    extract_domain, EmailEvent, FilterDecision, FilterRule, MatchField, PatternMatcher,
    RuleCategory, SecondLevelTlds,
};

use crate::cache::RuleCache;

/// The synchronous decision engine.
///
/// Evaluation order is fixed: whitelist rules forward, then blacklist and
/// dynamic rules drop, then the default forward. Within a category the
/// cache supplies rules in creation order with the id as tiebreak. The
/// engine never touches storage and never updates counters; follow-up
/// work is the async processor's job.
pub struct FilterEngine {
    cache: Arc<RuleCache>,
    matcher: Arc<PatternMatcher>,
    tlds: Arc<SecondLevelTlds>,
}

impl FilterEngine {
    #[must_use]
    pub fn new(
        cache: Arc<RuleCache>,
        matcher: Arc<PatternMatcher>,
        tlds: Arc<SecondLevelTlds>,
    ) -> Self {
        Self {
            cache,
            matcher,
            tlds,
        }
    }

    /// Decide what to do with a message.
    #[must_use]
    pub fn evaluate(&self, event: &EmailEvent) -> FilterDecision {
        if let Some(rule) = self.first_match(RuleCategory::Whitelist, event) {
            return FilterDecision::whitelisted(rule);
        }
        if let Some(rule) = self.first_match(RuleCategory::Blacklist, event) {
            return FilterDecision::dropped(rule);
        }
        if let Some(rule) = self.first_match(RuleCategory::Dynamic, event) {
            return FilterDecision::dropped(rule);
        }
        FilterDecision::default_forward()
    }

    /// First rule of `category` matching the event, in scan order.
    /// Rules scoped to other workers and rules with uncompilable regex
    /// patterns are skipped.
    fn first_match(&self, category: RuleCategory, event: &EmailEvent) -> Option<FilterRule> {
        let worker = event.worker();
        for rule in self.cache.snapshot(category) {
            if !rule.worker.applies_to(worker) {
                continue;
            }
            let Some(value) = self.value_for(rule.match_field, event) else {
                continue;
            };
            let outcome =
                self.matcher
                    .matches_for_rule(rule.id, &rule.pattern, &value, rule.match_mode);
            if outcome.matched {
                return Some(rule.as_ref().clone());
            }
        }
        None
    }

    /// Derive the compared value from the event per the rule's field.
    fn value_for(&self, field: MatchField, event: &EmailEvent) -> Option<String> {
        match field {
            MatchField::Sender => Some(event.from.clone()),
            MatchField::Subject => Some(event.subject.clone()),
            MatchField::Domain => extract_domain(&event.from, &self.tlds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailsieve_core::{FilterAction, MatchMode};

    fn engine_with(rules: Vec<FilterRule>) -> FilterEngine {
        let cache = Arc::new(RuleCache::new());
        for rule in rules {
            cache.insert(rule);
        }
        FilterEngine::new(
            cache,
            Arc::new(PatternMatcher::new()),
            Arc::new(SecondLevelTlds::default_set()),
        )
    }

    fn rule(category: RuleCategory, field: MatchField, pattern: &str) -> FilterRule {
        FilterRule::new(category, field, MatchMode::Contains, pattern)
    }

    #[test]
    fn whitelist_wins_over_blacklist() {
        let engine = engine_with(vec![
            rule(RuleCategory::Blacklist, MatchField::Subject, "sale"),
            rule(RuleCategory::Whitelist, MatchField::Sender, "trusted.com"),
        ]);

        let event = EmailEvent::new("news@trusted.com", "u@x.com", "Big SALE today");
        let decision = engine.evaluate(&event);
        assert_eq!(decision.action, FilterAction::Forward);
        assert_eq!(decision.matched_category, Some(RuleCategory::Whitelist));
    }

    #[test]
    fn blacklist_precedes_dynamic() {
        let engine = engine_with(vec![
            FilterRule::dynamic_for_subject("sale"),
            rule(RuleCategory::Blacklist, MatchField::Subject, "sale"),
        ]);

        let decision = engine.evaluate(&EmailEvent::new("a@b.com", "u@x.com", "SALE"));
        assert_eq!(decision.action, FilterAction::Drop);
        assert_eq!(decision.matched_category, Some(RuleCategory::Blacklist));
    }

    #[test]
    fn dynamic_rules_drop() {
        let engine = engine_with(vec![FilterRule::dynamic_for_subject("flash sale")]);
        let decision = engine.evaluate(&EmailEvent::new("a@b.com", "u@x.com", "FLASH SALE now"));
        assert_eq!(decision.action, FilterAction::Drop);
        assert_eq!(decision.matched_category, Some(RuleCategory::Dynamic));
    }

    #[test]
    fn nothing_matched_is_default_forward() {
        let engine = engine_with(vec![rule(
            RuleCategory::Blacklist,
            MatchField::Subject,
            "casino",
        )]);
        let decision = engine.evaluate(&EmailEvent::new("a@b.com", "u@x.com", "weekly digest"));
        assert_eq!(decision.action, FilterAction::Forward);
        assert!(decision.matched_category.is_none());
        assert!(decision.should_track());
    }

    #[test]
    fn domain_rules_match_root_domain() {
        let engine = engine_with(vec![rule(
            RuleCategory::Blacklist,
            MatchField::Domain,
            "example.co.uk",
        )]);

        let decision = engine.evaluate(&EmailEvent::new(
            "promo@mail.shop.example.co.uk",
            "u@x.com",
            "hello",
        ));
        assert_eq!(decision.action, FilterAction::Drop);

        // A malformed sender cannot match a domain rule.
        let decision = engine.evaluate(&EmailEvent::new("invalid", "u@x.com", "hello"));
        assert_eq!(decision.action, FilterAction::Forward);
    }

    #[test]
    fn worker_scoped_rules_only_apply_to_their_worker() {
        let engine = engine_with(vec![
            rule(RuleCategory::Blacklist, MatchField::Subject, "spam").with_worker("w1"),
        ]);

        let matching = EmailEvent::new("a@b.com", "u@x.com", "spam run").from_worker("w1");
        assert_eq!(engine.evaluate(&matching).action, FilterAction::Drop);

        let other = EmailEvent::new("a@b.com", "u@x.com", "spam run").from_worker("w2");
        assert_eq!(engine.evaluate(&other).action, FilterAction::Forward);
    }

    #[test]
    fn invalid_regex_rule_is_skipped_not_fatal() {
        let engine = engine_with(vec![
            FilterRule::new(
                RuleCategory::Blacklist,
                MatchField::Subject,
                MatchMode::Regex,
                "[unclosed",
            ),
            rule(RuleCategory::Blacklist, MatchField::Subject, "spam"),
        ]);

        let decision = engine.evaluate(&EmailEvent::new("a@b.com", "u@x.com", "spam mail"));
        assert_eq!(decision.action, FilterAction::Drop);
        assert_eq!(decision.matched_rule.unwrap().pattern, "spam");
    }
}
