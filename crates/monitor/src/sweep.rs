use chrono::{DateTime, Utc};
use tracing::{info, warn};

use mailsieve_core::{Alert, AlertId, AlertKind, SignalHealth};
use mailsieve_state::MonitorStore;

use crate::error::MonitorError;

/// The heartbeat side of signal monitoring: periodic state recomputation
/// and rolling-counter decay.
pub struct HeartbeatSweeper {
    store: MonitorStore,
}

impl HeartbeatSweeper {
    #[must_use]
    pub fn new(store: MonitorStore) -> Self {
        Self { store }
    }

    /// Recompute every signal's state from `last_seen_at` and the rule's
    /// intervals. Downward transitions (to WEAK or DEAD) persist the new
    /// state and emit an alert; a failure on one signal skips it and
    /// continues.
    ///
    /// Returns the alerts emitted this sweep.
    pub async fn sweep_states(&self, now: DateTime<Utc>) -> Result<Vec<Alert>, MonitorError> {
        let mut emitted = Vec::new();

        for (rule, state) in self.store.list_with_states().await? {
            if !rule.enabled {
                continue;
            }

            #[allow(clippy::cast_precision_loss)]
            let gap_minutes = state
                .last_seen_at
                .map(|seen| (now - seen).num_milliseconds() as f64 / 60_000.0);
            let computed = SignalHealth::classify(
                gap_minutes,
                rule.expected_interval_minutes,
                rule.dead_after_minutes,
            );
            if computed == state.state {
                continue;
            }

            if let Err(err) = self.store.set_state(rule.id, computed).await {
                warn!(rule_id = %rule.id, error = %err, "failed to persist swept state, skipping");
                continue;
            }

            let kind = match computed {
                SignalHealth::Weak => AlertKind::SignalWeakened,
                SignalHealth::Dead => AlertKind::SignalDead,
                // Upward transitions come from recorded hits, which carry
                // their own recovery alert.
                SignalHealth::Active => continue,
            };

            #[allow(clippy::cast_possible_truncation)]
            let alert = Alert {
                id: AlertId::new(),
                rule_id: rule.id,
                kind,
                previous_state: state.state,
                current_state: computed,
                gap_minutes: gap_minutes.map_or(i64::MAX, |gap| gap.floor() as i64),
                count_1h: state.count_1h,
                count_12h: state.count_12h,
                count_24h: state.count_24h,
                message: format!(
                    "signal {} went {} after {} minutes of silence",
                    rule.name,
                    computed.as_str(),
                    gap_minutes.map_or_else(|| "unbounded".to_owned(), |g| format!("{g:.0}")),
                ),
                sent_at: None,
                created_at: Utc::now(),
            };
            if let Err(err) = self.store.insert_alert(&alert).await {
                warn!(rule_id = %rule.id, error = %err, "failed to persist sweep alert");
                continue;
            }
            emitted.push(alert);
        }

        if !emitted.is_empty() {
            info!(alerts = emitted.len(), "signal sweep emitted transitions");
        }
        Ok(emitted)
    }

    /// Recompute every signal's rolling counters from its hit logs
    /// truncated to the 1h/12h/24h windows.
    pub async fn recompute_counters(&self, now: DateTime<Utc>) -> Result<u64, MonitorError> {
        let mut recomputed = 0u64;
        for (rule, _) in self.store.list_with_states().await? {
            if let Err(err) = self.store.recompute_counters(rule.id, now).await {
                warn!(rule_id = %rule.id, error = %err, "counter recompute failed, skipping");
                continue;
            }
            recomputed += 1;
        }
        Ok(recomputed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mailsieve_core::MonitoringRule;
    use mailsieve_state::SqliteStore;

    #[tokio::test]
    async fn sweep_walks_active_to_weak_to_dead() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let monitor = store.monitor();
        // Expected every 10 minutes, dead after an hour.
        let rule = MonitoringRule::new("acme", "sig", "ping", 10, 60);
        monitor.create_rule(&rule).await.unwrap();

        let t0 = Utc::now();
        monitor.record_hit(rule.id, t0, None).await.unwrap();

        let sweeper = HeartbeatSweeper::new(store.monitor());

        // Inside 1.5x the expected interval: still ACTIVE, no alert.
        let alerts = sweeper.sweep_states(t0 + Duration::minutes(12)).await.unwrap();
        assert!(alerts.is_empty());

        // Past the WEAK boundary.
        let alerts = sweeper.sweep_states(t0 + Duration::minutes(20)).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::SignalWeakened);
        assert_eq!(alerts[0].previous_state, SignalHealth::Active);

        // Past dead_after.
        let alerts = sweeper.sweep_states(t0 + Duration::minutes(90)).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::SignalDead);
        assert_eq!(alerts[0].gap_minutes, 90);

        // Steady state: no repeated alert.
        let alerts = sweeper.sweep_states(t0 + Duration::minutes(120)).await.unwrap();
        assert!(alerts.is_empty());
    }

    #[tokio::test]
    async fn never_seen_signal_stays_dead_without_alert_spam() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let rule = MonitoringRule::new("acme", "sig", "ping", 10, 60);
        store.monitor().create_rule(&rule).await.unwrap();

        let sweeper = HeartbeatSweeper::new(store.monitor());
        let alerts = sweeper.sweep_states(Utc::now()).await.unwrap();
        // Born DEAD and classified DEAD: no transition.
        assert!(alerts.is_empty());
    }
}
