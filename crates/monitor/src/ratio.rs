use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::info;

use mailsieve_core::{
    AlertId, MonitorRuleId, RatioAlert, RatioHealth, RatioMonitor, RatioState,
};
use mailsieve_state::MonitorStore;

use crate::error::MonitorError;

/// Evaluates ratio monitors: the hit counts of two monitoring rules are
/// compared over a rolling window against stepped thresholds.
///
/// A ratio at or above `threshold_percent` is HEALTHY. Below it, the
/// ordered steps grade the shortfall: dropping under some but not all
/// steps is WARN, dropping under every step is ALERT. State changes
/// persist and produce an alert row.
pub struct RatioEvaluator {
    store: MonitorStore,
}

impl RatioEvaluator {
    #[must_use]
    pub fn new(store: MonitorStore) -> Self {
        Self { store }
    }

    /// Evaluate every enabled monitor. Returns the number whose state
    /// changed.
    pub async fn evaluate_all(&self, now: DateTime<Utc>) -> Result<u64, MonitorError> {
        let mut changed = 0u64;
        for monitor in self.store.list_ratio_monitors(true).await? {
            if self.evaluate_one(&monitor, now).await? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn evaluate_one(
        &self,
        monitor: &RatioMonitor,
        now: DateTime<Utc>,
    ) -> Result<bool, MonitorError> {
        let window_start = now - Duration::minutes(monitor.time_window_minutes);
        let first_count = self
            .count_for(monitor.first_signal_id(), window_start, now)
            .await?;
        let second_count = self
            .count_for(monitor.second_signal_id(), window_start, now)
            .await?;

        #[allow(clippy::cast_precision_loss)]
        let current_ratio = (first_count > 0)
            .then(|| second_count as f64 / first_count as f64 * 100.0);

        let (state, steps_data) = grade(monitor, current_ratio);

        let previous = self
            .store
            .get_ratio_state(monitor.id)
            .await?
            .map_or(RatioHealth::Healthy, |s| s.state);

        self.store
            .save_ratio_state(&RatioState {
                monitor_id: monitor.id,
                state,
                first_count,
                second_count,
                current_ratio,
                steps_data,
                updated_at: now,
            })
            .await?;

        if state == previous {
            return Ok(false);
        }

        self.store
            .insert_ratio_alert(&RatioAlert {
                id: AlertId::new(),
                monitor_id: monitor.id,
                previous_state: previous,
                current_state: state,
                current_ratio,
                message: format!(
                    "ratio monitor {} moved {} -> {} (ratio {})",
                    monitor.name,
                    previous.as_str(),
                    state.as_str(),
                    current_ratio.map_or_else(|| "n/a".to_owned(), |r| format!("{r:.1}%")),
                ),
                created_at: Utc::now(),
            })
            .await?;

        info!(
            monitor = %monitor.name,
            previous = previous.as_str(),
            current = state.as_str(),
            "ratio monitor state changed"
        );
        Ok(true)
    }

    async fn count_for(
        &self,
        rule_id: MonitorRuleId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64, MonitorError> {
        Ok(self.store.count_hits_between(rule_id, from, to).await?)
    }
}

/// Grade a ratio against the monitor's threshold and steps.
fn grade(monitor: &RatioMonitor, ratio: Option<f64>) -> (RatioHealth, serde_json::Value) {
    let Some(ratio) = ratio else {
        // No traffic on the first rule: nothing to compare yet.
        return (RatioHealth::Healthy, json!([]));
    };

    if ratio >= monitor.threshold_percent {
        let steps_data: Vec<serde_json::Value> = monitor
            .steps
            .iter()
            .map(|step| json!({"step": step, "breached": false}))
            .collect();
        return (RatioHealth::Healthy, json!(steps_data));
    }

    let mut breached = 0usize;
    let steps_data: Vec<serde_json::Value> = monitor
        .steps
        .iter()
        .map(|&step| {
            let is_breached = ratio < step;
            if is_breached {
                breached += 1;
            }
            json!({"step": step, "breached": is_breached})
        })
        .collect();

    let state = if !monitor.steps.is_empty() && breached == monitor.steps.len() {
        RatioHealth::Alert
    } else {
        RatioHealth::Warn
    };
    (state, json!(steps_data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailsieve_core::{MonitoringRule, RuleId, WorkerScope};
    use mailsieve_state::{HitMeta, SqliteStore};

    async fn seed_pair(store: &SqliteStore) -> (MonitoringRule, MonitoringRule) {
        let first = MonitoringRule::new("acme", "sent", "Dispatch", 10, 60);
        let second = MonitoringRule::new("acme", "confirmed", "Confirm", 10, 60);
        store.monitor().create_rule(&first).await.unwrap();
        store.monitor().create_rule(&second).await.unwrap();
        (first, second)
    }

    fn monitor_over(
        first: &MonitoringRule,
        second: &MonitoringRule,
        steps: Vec<f64>,
        threshold: f64,
    ) -> RatioMonitor {
        let now = Utc::now();
        RatioMonitor {
            id: mailsieve_core::RatioMonitorId::new(),
            name: "confirm-rate".into(),
            tag: None,
            first_rule_id: RuleId::from_uuid(first.id.as_uuid()),
            second_rule_id: RuleId::from_uuid(second.id.as_uuid()),
            steps,
            threshold_percent: threshold,
            time_window_minutes: 60,
            worker_scope: WorkerScope::global(),
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    async fn hits(store: &SqliteStore, rule: &MonitoringRule, n: usize) {
        let meta = HitMeta {
            sender: "s@x.com".into(),
            subject: "subject".into(),
            recipient: "r@x.com".into(),
        };
        for _ in 0..n {
            store
                .monitor()
                .record_hit(rule.id, Utc::now(), Some(&meta))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn healthy_ratio_stays_quiet() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let (first, second) = seed_pair(&store).await;
        let monitor = monitor_over(&first, &second, vec![50.0, 25.0], 80.0);
        store.monitor().create_ratio_monitor(&monitor).await.unwrap();

        hits(&store, &first, 10).await;
        hits(&store, &second, 9).await;

        let changed = RatioEvaluator::new(store.monitor())
            .evaluate_all(Utc::now())
            .await
            .unwrap();
        assert_eq!(changed, 0);

        let state = store.monitor().get_ratio_state(monitor.id).await.unwrap().unwrap();
        assert_eq!(state.state, RatioHealth::Healthy);
        assert_eq!(state.first_count, 10);
        assert_eq!(state.second_count, 9);
    }

    #[tokio::test]
    async fn shortfall_walks_warn_then_alert() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let (first, second) = seed_pair(&store).await;
        let monitor = monitor_over(&first, &second, vec![50.0, 25.0], 80.0);
        store.monitor().create_ratio_monitor(&monitor).await.unwrap();

        // 40%: below threshold and the first step, above the second.
        hits(&store, &first, 10).await;
        hits(&store, &second, 4).await;

        let evaluator = RatioEvaluator::new(store.monitor());
        assert_eq!(evaluator.evaluate_all(Utc::now()).await.unwrap(), 1);
        let state = store.monitor().get_ratio_state(monitor.id).await.unwrap().unwrap();
        assert_eq!(state.state, RatioHealth::Warn);

        // 10%: under every step.
        hits(&store, &first, 30).await;
        assert_eq!(evaluator.evaluate_all(Utc::now()).await.unwrap(), 1);
        let state = store.monitor().get_ratio_state(monitor.id).await.unwrap().unwrap();
        assert_eq!(state.state, RatioHealth::Alert);
        assert!(state.current_ratio.unwrap() < 25.0);
    }

    #[tokio::test]
    async fn no_first_traffic_is_healthy() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let (first, second) = seed_pair(&store).await;
        let monitor = monitor_over(&first, &second, vec![50.0], 80.0);
        store.monitor().create_ratio_monitor(&monitor).await.unwrap();

        let changed = RatioEvaluator::new(store.monitor())
            .evaluate_all(Utc::now())
            .await
            .unwrap();
        assert_eq!(changed, 0);
        let state = store.monitor().get_ratio_state(monitor.id).await.unwrap().unwrap();
        assert_eq!(state.state, RatioHealth::Healthy);
        assert_eq!(state.current_ratio, None);
    }
}
