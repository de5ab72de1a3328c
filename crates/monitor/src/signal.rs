use chrono::{DateTime, Utc};

use mailsieve_core::{MonitorRuleId, SignalStatus};
use mailsieve_state::MonitorStore;

use crate::error::MonitorError;

/// Read-side queries over signal liveness.
pub struct SignalMonitor {
    store: MonitorStore,
}

impl SignalMonitor {
    #[must_use]
    pub fn new(store: MonitorStore) -> Self {
        Self { store }
    }

    /// Combined rule + state answer for one rule. The gap is the whole
    /// minutes since the last sighting; `None` when never seen.
    pub async fn status(
        &self,
        rule_id: MonitorRuleId,
        now: DateTime<Utc>,
    ) -> Result<SignalStatus, MonitorError> {
        let rule = self
            .store
            .get_rule(rule_id)
            .await?
            .ok_or_else(|| MonitorError::RuleNotFound(rule_id.to_string()))?;
        let state = self
            .store
            .get_state(rule_id)
            .await?
            .ok_or_else(|| MonitorError::RuleNotFound(rule_id.to_string()))?;

        Ok(SignalStatus {
            gap_minutes: state
                .last_seen_at
                .map(|seen| (now - seen).num_minutes()),
            rule,
            state: state.state,
            last_seen_at: state.last_seen_at,
            count_1h: state.count_1h,
            count_12h: state.count_12h,
            count_24h: state.count_24h,
            updated_at: state.updated_at,
        })
    }

    /// Every signal's status in the listing order: DEAD first, then WEAK,
    /// then ACTIVE; ties broken by descending rule creation time.
    pub async fn list_statuses(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<SignalStatus>, MonitorError> {
        let mut statuses: Vec<SignalStatus> = self
            .store
            .list_with_states()
            .await?
            .into_iter()
            .map(|(rule, state)| SignalStatus {
                gap_minutes: state.last_seen_at.map(|seen| (now - seen).num_minutes()),
                rule,
                state: state.state,
                last_seen_at: state.last_seen_at,
                count_1h: state.count_1h,
                count_12h: state.count_12h,
                count_24h: state.count_24h,
                updated_at: state.updated_at,
            })
            .collect();

        statuses.sort_by(|a, b| {
            a.state
                .cmp(&b.state)
                .then_with(|| b.rule.created_at.cmp(&a.rule.created_at))
        });
        Ok(statuses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mailsieve_core::{MonitoringRule, SignalHealth};
    use mailsieve_state::{HitMeta, SqliteStore};

    #[tokio::test]
    async fn status_reports_gap_minutes() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let monitor = store.monitor();
        let rule = MonitoringRule::new("acme", "sig", "ping", 10, 60);
        monitor.create_rule(&rule).await.unwrap();

        let signals = SignalMonitor::new(store.monitor());
        let now = Utc::now();

        let unseen = signals.status(rule.id, now).await.unwrap();
        assert_eq!(unseen.gap_minutes, None);
        assert_eq!(unseen.state, SignalHealth::Dead);

        monitor
            .record_hit(rule.id, now - Duration::minutes(7), None)
            .await
            .unwrap();
        let seen = signals.status(rule.id, now).await.unwrap();
        assert_eq!(seen.gap_minutes, Some(7));
        assert_eq!(seen.state, SignalHealth::Active);
        assert_eq!(seen.count_24h, 1);
    }

    #[tokio::test]
    async fn listing_sorts_dead_weak_active_then_newest_rule() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let monitor = store.monitor();
        let base = Utc::now();

        let mut rules = Vec::new();
        for (i, name) in ["old-dead", "new-dead", "live"].iter().enumerate() {
            let mut rule = MonitoringRule::new("acme", *name, "ping", 10, 60);
            rule.created_at = base + Duration::seconds(i as i64);
            rule.updated_at = rule.created_at;
            monitor.create_rule(&rule).await.unwrap();
            rules.push(rule);
        }
        let meta = HitMeta {
            sender: "s@x.com".into(),
            subject: "ping".into(),
            recipient: "r@x.com".into(),
        };
        monitor.record_hit(rules[2].id, base, Some(&meta)).await.unwrap();

        let listed = SignalMonitor::new(store.monitor())
            .list_statuses(base)
            .await
            .unwrap();
        let names: Vec<&str> = listed.iter().map(|s| s.rule.name.as_str()).collect();
        // Both dead signals first (newest rule first), the active one last.
        assert_eq!(names, ["new-dead", "old-dead", "live"]);
        assert!(listed[0].state <= listed[1].state);
        assert!(listed[1].state <= listed[2].state);
    }
}
