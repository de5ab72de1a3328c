use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use mailsieve_core::{
    Alert, AlertKind, AlertId, MatchMode, MonitorRuleId, MonitoringRule, RatioAlert, RatioHealth,
    RatioMonitor, RatioMonitorId, RatioState, RuleId, SignalHealth, SignalState, WorkerScope,
};

use crate::error::StateError;

/// The email fields the monitoring layer is permitted to persist with a
/// hit. Anything else never reaches this type, and therefore never
/// reaches the store.
#[derive(Debug, Clone)]
pub struct HitMeta {
    pub sender: String,
    pub subject: String,
    pub recipient: String,
}

/// Repository for monitoring rules, signal states, hit logs, alerts, and
/// ratio monitors.
#[derive(Debug, Clone)]
pub struct MonitorStore {
    pool: SqlitePool,
}

fn rule_from_row(row: &SqliteRow) -> Result<MonitoringRule, StateError> {
    let id: String = row.try_get("id")?;
    let mode: String = row.try_get("match_mode")?;
    let scope: String = row.try_get("worker_scope")?;
    Ok(MonitoringRule {
        id: MonitorRuleId::parse(&id).map_err(|e| StateError::Serialization(e.to_string()))?,
        merchant: row.try_get("merchant")?,
        name: row.try_get("name")?,
        subject_pattern: row.try_get("subject_pattern")?,
        match_mode: MatchMode::parse(&mode)
            .ok_or_else(|| StateError::Serialization(format!("unknown match mode: {mode}")))?,
        expected_interval_minutes: row.try_get("expected_interval_minutes")?,
        dead_after_minutes: row.try_get("dead_after_minutes")?,
        worker_scope: WorkerScope::new(scope),
        enabled: row.try_get("enabled")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn state_from_row(row: &SqliteRow) -> Result<SignalState, StateError> {
    let rule_id: String = row.try_get("rule_id")?;
    let state: String = row.try_get("state")?;
    Ok(SignalState {
        rule_id: MonitorRuleId::parse(&rule_id)
            .map_err(|e| StateError::Serialization(e.to_string()))?,
        state: SignalHealth::parse(&state)
            .ok_or_else(|| StateError::Serialization(format!("unknown signal state: {state}")))?,
        last_seen_at: row.try_get("last_seen_at")?,
        count_1h: row.try_get("count_1h")?,
        count_12h: row.try_get("count_12h")?,
        count_24h: row.try_get("count_24h")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn ratio_monitor_from_row(row: &SqliteRow) -> Result<RatioMonitor, StateError> {
    let id: String = row.try_get("id")?;
    let first: String = row.try_get("first_rule_id")?;
    let second: String = row.try_get("second_rule_id")?;
    let steps_raw: String = row.try_get("steps")?;
    let scope: String = row.try_get("worker_scope")?;
    Ok(RatioMonitor {
        id: RatioMonitorId::parse(&id).map_err(|e| StateError::Serialization(e.to_string()))?,
        name: row.try_get("name")?,
        tag: row.try_get("tag")?,
        first_rule_id: RuleId::parse(&first)
            .map_err(|e| StateError::Serialization(e.to_string()))?,
        second_rule_id: RuleId::parse(&second)
            .map_err(|e| StateError::Serialization(e.to_string()))?,
        steps: serde_json::from_str(&steps_raw)
            .map_err(|e| StateError::Serialization(format!("ratio steps: {e}")))?,
        threshold_percent: row.try_get("threshold_percent")?,
        time_window_minutes: row.try_get("time_window_minutes")?,
        worker_scope: WorkerScope::new(scope),
        enabled: row.try_get("enabled")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn ratio_state_from_row(row: &SqliteRow) -> Result<RatioState, StateError> {
    let monitor_id: String = row.try_get("monitor_id")?;
    let state: String = row.try_get("state")?;
    let steps_raw: String = row.try_get("steps_data")?;
    Ok(RatioState {
        monitor_id: RatioMonitorId::parse(&monitor_id)
            .map_err(|e| StateError::Serialization(e.to_string()))?,
        state: RatioHealth::parse(&state)
            .ok_or_else(|| StateError::Serialization(format!("unknown ratio state: {state}")))?,
        first_count: row.try_get("first_count")?,
        second_count: row.try_get("second_count")?,
        current_ratio: row.try_get("current_ratio")?,
        steps_data: serde_json::from_str(&steps_raw)
            .map_err(|e| StateError::Serialization(format!("ratio steps_data: {e}")))?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl MonitorStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a rule together with its initial signal state: `DEAD`,
    /// never seen, zeroed counters.
    pub async fn create_rule(&self, rule: &MonitoringRule) -> Result<(), StateError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO monitoring_rules
                (id, merchant, name, subject_pattern, match_mode,
                 expected_interval_minutes, dead_after_minutes, worker_scope,
                 enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )
        .bind(rule.id.to_string())
        .bind(&rule.merchant)
        .bind(&rule.name)
        .bind(&rule.subject_pattern)
        .bind(rule.match_mode.as_str())
        .bind(rule.expected_interval_minutes)
        .bind(rule.dead_after_minutes)
        .bind(rule.worker_scope.as_str())
        .bind(rule.enabled)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO signal_states (rule_id, state, last_seen_at, updated_at)
             VALUES (?1, 'DEAD', NULL, ?2)",
        )
        .bind(rule.id.to_string())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get_rule(&self, id: MonitorRuleId) -> Result<Option<MonitoringRule>, StateError> {
        let row = sqlx::query("SELECT * FROM monitoring_rules WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(rule_from_row).transpose()
    }

    pub async fn list_rules(&self, enabled_only: bool) -> Result<Vec<MonitoringRule>, StateError> {
        let sql = if enabled_only {
            "SELECT * FROM monitoring_rules WHERE enabled = 1 ORDER BY created_at ASC, id ASC"
        } else {
            "SELECT * FROM monitoring_rules ORDER BY created_at ASC, id ASC"
        };
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter().map(rule_from_row).collect()
    }

    pub async fn set_rule_enabled(
        &self,
        id: MonitorRuleId,
        enabled: bool,
    ) -> Result<bool, StateError> {
        let result = sqlx::query(
            "UPDATE monitoring_rules SET enabled = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id.to_string())
        .bind(enabled)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a rule; state, hit logs, and alerts cascade.
    pub async fn delete_rule(&self, id: MonitorRuleId) -> Result<bool, StateError> {
        let result = sqlx::query("DELETE FROM monitoring_rules WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_state(&self, rule_id: MonitorRuleId) -> Result<Option<SignalState>, StateError> {
        let row = sqlx::query("SELECT * FROM signal_states WHERE rule_id = ?1")
            .bind(rule_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(state_from_row).transpose()
    }

    /// Atomically record a hit: read the previous state, move to ACTIVE
    /// with `last_seen_at = hit_time`, bump all rolling counters, and
    /// append the hit-log row when meta is present.
    ///
    /// Returns `(previous, current)` where current is always ACTIVE.
    pub async fn record_hit(
        &self,
        rule_id: MonitorRuleId,
        hit_time: DateTime<Utc>,
        meta: Option<&HitMeta>,
    ) -> Result<(SignalHealth, SignalHealth), StateError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM signal_states WHERE rule_id = ?1")
            .bind(rule_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        let previous = match row {
            Some(ref row) => state_from_row(row)?.state,
            None => {
                return Err(StateError::NotFound(format!(
                    "signal state for rule {rule_id}"
                )))
            }
        };

        sqlx::query(
            "UPDATE signal_states
             SET state = 'ACTIVE',
                 last_seen_at = ?2,
                 count_1h = count_1h + 1,
                 count_12h = count_12h + 1,
                 count_24h = count_24h + 1,
                 updated_at = ?3
             WHERE rule_id = ?1",
        )
        .bind(rule_id.to_string())
        .bind(hit_time)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        if let Some(meta) = meta {
            sqlx::query(
                "INSERT INTO hit_logs (id, rule_id, sender, subject, recipient, received_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(rule_id.to_string())
            .bind(&meta.sender)
            .bind(&meta.subject)
            .bind(&meta.recipient)
            .bind(hit_time)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok((previous, SignalHealth::Active))
    }

    /// Overwrite a signal's computed state (heartbeat transitions).
    pub async fn set_state(
        &self,
        rule_id: MonitorRuleId,
        state: SignalHealth,
    ) -> Result<(), StateError> {
        sqlx::query(
            "UPDATE signal_states SET state = ?2, updated_at = ?3 WHERE rule_id = ?1",
        )
        .bind(rule_id.to_string())
        .bind(state.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Every rule joined to its signal state.
    pub async fn list_with_states(
        &self,
    ) -> Result<Vec<(MonitoringRule, SignalState)>, StateError> {
        let rules = self.list_rules(false).await?;
        let mut out = Vec::with_capacity(rules.len());
        for rule in rules {
            if let Some(state) = self.get_state(rule.id).await? {
                out.push((rule, state));
            }
        }
        Ok(out)
    }

    /// Count hit-log rows for a rule inside `(from, to]`.
    pub async fn count_hits_between(
        &self,
        rule_id: MonitorRuleId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<i64, StateError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM hit_logs
             WHERE rule_id = ?1 AND received_at > ?2 AND received_at <= ?3",
        )
        .bind(rule_id.to_string())
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    /// Recompute a signal's rolling counters from its hit logs truncated
    /// to each window. Naive but correct; run periodically by the
    /// heartbeat's counter tick.
    pub async fn recompute_counters(
        &self,
        rule_id: MonitorRuleId,
        now: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let count_1h = self
            .count_hits_between(rule_id, now - Duration::hours(1), now)
            .await?;
        let count_12h = self
            .count_hits_between(rule_id, now - Duration::hours(12), now)
            .await?;
        let count_24h = self
            .count_hits_between(rule_id, now - Duration::hours(24), now)
            .await?;

        sqlx::query(
            "UPDATE signal_states
             SET count_1h = ?2, count_12h = ?3, count_24h = ?4, updated_at = ?5
             WHERE rule_id = ?1",
        )
        .bind(rule_id.to_string())
        .bind(count_1h)
        .bind(count_12h)
        .bind(count_24h)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Drop hit-log rows older than `cutoff`.
    pub async fn purge_hit_logs_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StateError> {
        let result = sqlx::query("DELETE FROM hit_logs WHERE received_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn insert_alert(&self, alert: &Alert) -> Result<(), StateError> {
        sqlx::query(
            "INSERT INTO alerts
                (id, rule_id, alert_type, previous_state, current_state, gap_minutes,
                 count_1h, count_12h, count_24h, message, sent_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(alert.id.to_string())
        .bind(alert.rule_id.to_string())
        .bind(alert.kind.as_str())
        .bind(alert.previous_state.as_str())
        .bind(alert.current_state.as_str())
        .bind(alert.gap_minutes)
        .bind(alert.count_1h)
        .bind(alert.count_12h)
        .bind(alert.count_24h)
        .bind(&alert.message)
        .bind(alert.sent_at)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_alerts(&self, limit: i64) -> Result<Vec<Alert>, StateError> {
        let rows = sqlx::query(
            "SELECT * FROM alerts ORDER BY created_at DESC, id DESC LIMIT ?1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                let rule_id: String = row.try_get("rule_id")?;
                let kind: String = row.try_get("alert_type")?;
                let previous: String = row.try_get("previous_state")?;
                let current: String = row.try_get("current_state")?;
                Ok(Alert {
                    id: AlertId::parse(&id)
                        .map_err(|e| StateError::Serialization(e.to_string()))?,
                    rule_id: MonitorRuleId::parse(&rule_id)
                        .map_err(|e| StateError::Serialization(e.to_string()))?,
                    kind: AlertKind::parse(&kind).ok_or_else(|| {
                        StateError::Serialization(format!("unknown alert type: {kind}"))
                    })?,
                    previous_state: SignalHealth::parse(&previous).ok_or_else(|| {
                        StateError::Serialization(format!("unknown state: {previous}"))
                    })?,
                    current_state: SignalHealth::parse(&current).ok_or_else(|| {
                        StateError::Serialization(format!("unknown state: {current}"))
                    })?,
                    gap_minutes: row.try_get("gap_minutes")?,
                    count_1h: row.try_get("count_1h")?,
                    count_12h: row.try_get("count_12h")?,
                    count_24h: row.try_get("count_24h")?,
                    message: row.try_get("message")?,
                    sent_at: row.try_get("sent_at")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    /// Insert a ratio monitor together with its initial HEALTHY state.
    pub async fn create_ratio_monitor(&self, monitor: &RatioMonitor) -> Result<(), StateError> {
        let steps = serde_json::to_string(&monitor.steps)
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO ratio_monitors
                (id, name, tag, first_rule_id, second_rule_id, steps, threshold_percent,
                 time_window_minutes, worker_scope, enabled, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        )
        .bind(monitor.id.to_string())
        .bind(&monitor.name)
        .bind(&monitor.tag)
        .bind(monitor.first_rule_id.to_string())
        .bind(monitor.second_rule_id.to_string())
        .bind(steps)
        .bind(monitor.threshold_percent)
        .bind(monitor.time_window_minutes)
        .bind(monitor.worker_scope.as_str())
        .bind(monitor.enabled)
        .bind(monitor.created_at)
        .bind(monitor.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO ratio_states (monitor_id, state, updated_at) VALUES (?1, 'HEALTHY', ?2)",
        )
        .bind(monitor.id.to_string())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn list_ratio_monitors(
        &self,
        enabled_only: bool,
    ) -> Result<Vec<RatioMonitor>, StateError> {
        let sql = if enabled_only {
            "SELECT * FROM ratio_monitors WHERE enabled = 1 ORDER BY created_at ASC, id ASC"
        } else {
            "SELECT * FROM ratio_monitors ORDER BY created_at ASC, id ASC"
        };
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter().map(ratio_monitor_from_row).collect()
    }

    pub async fn get_ratio_state(
        &self,
        monitor_id: RatioMonitorId,
    ) -> Result<Option<RatioState>, StateError> {
        let row = sqlx::query("SELECT * FROM ratio_states WHERE monitor_id = ?1")
            .bind(monitor_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(ratio_state_from_row).transpose()
    }

    pub async fn save_ratio_state(&self, state: &RatioState) -> Result<(), StateError> {
        let steps_data = serde_json::to_string(&state.steps_data)
            .map_err(|e| StateError::Serialization(e.to_string()))?;
        sqlx::query(
            "INSERT INTO ratio_states
                (monitor_id, state, first_count, second_count, current_ratio, steps_data, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (monitor_id) DO UPDATE SET
                state = excluded.state,
                first_count = excluded.first_count,
                second_count = excluded.second_count,
                current_ratio = excluded.current_ratio,
                steps_data = excluded.steps_data,
                updated_at = excluded.updated_at",
        )
        .bind(state.monitor_id.to_string())
        .bind(state.state.as_str())
        .bind(state.first_count)
        .bind(state.second_count)
        .bind(state.current_ratio)
        .bind(steps_data)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_ratio_alert(&self, alert: &RatioAlert) -> Result<(), StateError> {
        sqlx::query(
            "INSERT INTO ratio_alerts
                (id, monitor_id, previous_state, current_state, current_ratio, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .bind(alert.id.to_string())
        .bind(alert.monitor_id.to_string())
        .bind(alert.previous_state.as_str())
        .bind(alert.current_state.as_str())
        .bind(alert.current_ratio)
        .bind(&alert.message)
        .bind(alert.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    #[tokio::test]
    async fn rule_creation_seeds_dead_state() {
        let monitor = SqliteStore::open_in_memory().await.unwrap().monitor();
        let rule = MonitoringRule::new("acme", "order-confirm", "Order shipped", 10, 60);
        monitor.create_rule(&rule).await.unwrap();

        let state = monitor.get_state(rule.id).await.unwrap().unwrap();
        assert_eq!(state.state, SignalHealth::Dead);
        assert!(state.last_seen_at.is_none());
        assert_eq!((state.count_1h, state.count_12h, state.count_24h), (0, 0, 0));
    }

    #[tokio::test]
    async fn record_hit_transitions_and_persists_exact_fields() {
        let monitor = SqliteStore::open_in_memory().await.unwrap().monitor();
        let rule = MonitoringRule::new("acme", "order-confirm", "Order shipped", 10, 60);
        monitor.create_rule(&rule).await.unwrap();

        let now = Utc::now();
        let meta = HitMeta {
            sender: "noreply@acme.com".into(),
            subject: "Order shipped".into(),
            recipient: "user@x.com".into(),
        };
        let (previous, current) = monitor.record_hit(rule.id, now, Some(&meta)).await.unwrap();
        assert_eq!(previous, SignalHealth::Dead);
        assert_eq!(current, SignalHealth::Active);

        let state = monitor.get_state(rule.id).await.unwrap().unwrap();
        assert_eq!(state.state, SignalHealth::Active);
        assert_eq!(state.last_seen_at, Some(now));
        assert_eq!(state.count_1h, 1);

        let hits = monitor
            .count_hits_between(rule.id, now - Duration::hours(1), now)
            .await
            .unwrap();
        assert_eq!(hits, 1);
    }

    #[tokio::test]
    async fn counter_recompute_truncates_to_windows() {
        let monitor = SqliteStore::open_in_memory().await.unwrap().monitor();
        let rule = MonitoringRule::new("acme", "sig", "ping", 10, 60);
        monitor.create_rule(&rule).await.unwrap();

        let now = Utc::now();
        let meta = HitMeta {
            sender: "s@x.com".into(),
            subject: "ping".into(),
            recipient: "r@x.com".into(),
        };
        for hours_ago in [0, 2, 13, 30] {
            monitor
                .record_hit(rule.id, now - Duration::hours(hours_ago), Some(&meta))
                .await
                .unwrap();
        }

        monitor.recompute_counters(rule.id, now).await.unwrap();
        let state = monitor.get_state(rule.id).await.unwrap().unwrap();
        assert_eq!(state.count_1h, 1);
        assert_eq!(state.count_12h, 2);
        assert_eq!(state.count_24h, 3);
    }
}
