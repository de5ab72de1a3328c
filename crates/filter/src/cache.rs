use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use mailsieve_core::{FilterRule, RuleCategory, RuleId};
use mailsieve_state::RuleStore;

use crate::error::FilterError;

/// In-memory index of enabled rules, grouped by category and kept in the
/// deterministic scan order (creation time ascending, id tiebreak).
///
/// The filter engine reads the cache on every decision; writers are the
/// admin surface, retention, and the dynamic-rule detector. Because the
/// detector is the single writer on the hot path, a rule it inserts is
/// visible to the evaluation that triggered it before `track_subject`
/// returns.
pub struct RuleCache {
    rules: RwLock<HashMap<RuleCategory, Vec<Arc<FilterRule>>>>,
}

impl RuleCache {
    /// An empty cache; call [`RuleCache::reload`] to populate it.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
        }
    }

    /// Load a populated cache from the store.
    pub async fn load(store: &RuleStore) -> Result<Self, FilterError> {
        let cache = Self::new();
        cache.reload(store).await?;
        Ok(cache)
    }

    /// Replace the cache contents from the store.
    pub async fn reload(&self, store: &RuleStore) -> Result<(), FilterError> {
        let mut fresh: HashMap<RuleCategory, Vec<Arc<FilterRule>>> = HashMap::new();
        for category in [
            RuleCategory::Whitelist,
            RuleCategory::Blacklist,
            RuleCategory::Dynamic,
            RuleCategory::Watch,
        ] {
            let rules = store.list_enabled(category).await?;
            fresh.insert(category, rules.into_iter().map(Arc::new).collect());
        }

        let total: usize = fresh.values().map(Vec::len).sum();
        *self.rules.write().expect("rule cache lock poisoned") = fresh;
        debug!(total, "rule cache reloaded");
        Ok(())
    }

    /// Enabled rules of one category, in scan order.
    #[must_use]
    pub fn snapshot(&self, category: RuleCategory) -> Vec<Arc<FilterRule>> {
        self.rules
            .read()
            .expect("rule cache lock poisoned")
            .get(&category)
            .cloned()
            .unwrap_or_default()
    }

    /// Insert a rule, keeping the category's scan order.
    pub fn insert(&self, rule: FilterRule) {
        if !rule.enabled {
            return;
        }
        let mut rules = self.rules.write().expect("rule cache lock poisoned");
        let bucket = rules.entry(rule.category).or_default();
        let position = bucket
            .iter()
            .position(|existing| {
                (existing.created_at, existing.id) > (rule.created_at, rule.id)
            })
            .unwrap_or(bucket.len());
        bucket.insert(position, Arc::new(rule));
    }

    /// Drop a rule from whatever category holds it. Returns whether it
    /// was present.
    pub fn remove(&self, id: RuleId) -> bool {
        let mut rules = self.rules.write().expect("rule cache lock poisoned");
        for bucket in rules.values_mut() {
            if let Some(position) = bucket.iter().position(|rule| rule.id == id) {
                bucket.remove(position);
                return true;
            }
        }
        false
    }

    /// Find the enabled dynamic rule with this exact pattern, if cached.
    #[must_use]
    pub fn find_dynamic_by_pattern(&self, pattern: &str) -> Option<Arc<FilterRule>> {
        self.rules
            .read()
            .expect("rule cache lock poisoned")
            .get(&RuleCategory::Dynamic)
            .and_then(|bucket| bucket.iter().find(|rule| rule.pattern == pattern))
            .cloned()
    }

    /// Total cached rules across categories.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules
            .read()
            .expect("rule cache lock poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RuleCache {
    fn default() -> Self {
        Self::new()
    }
}
