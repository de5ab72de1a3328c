use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use mailsieve_core::{
    FilterRule, MatchField, MatchMode, RuleCategory, RuleId, RuleStats, WorkerScope,
};

use crate::error::StateError;

/// Batched per-rule counter increments produced by the stats processor.
#[derive(Debug, Clone, Copy)]
pub struct RuleStatDelta {
    pub rule_id: RuleId,
    pub processed: i64,
    pub deleted: i64,
    pub errors: i64,
}

/// Repository for filter rules and their side counters.
#[derive(Debug, Clone)]
pub struct RuleStore {
    pool: SqlitePool,
}

fn rule_from_row(row: &SqliteRow) -> Result<FilterRule, StateError> {
    let id: String = row.try_get("id")?;
    let category: String = row.try_get("category")?;
    let match_field: String = row.try_get("match_field")?;
    let match_mode: String = row.try_get("match_mode")?;
    let worker: String = row.try_get("worker_name")?;

    Ok(FilterRule {
        id: RuleId::parse(&id).map_err(|e| StateError::Serialization(e.to_string()))?,
        worker: WorkerScope::new(worker),
        category: RuleCategory::parse(&category)
            .ok_or_else(|| StateError::Serialization(format!("unknown rule category: {category}")))?,
        match_field: MatchField::parse(&match_field)
            .ok_or_else(|| StateError::Serialization(format!("unknown match field: {match_field}")))?,
        match_mode: MatchMode::parse(&match_mode)
            .ok_or_else(|| StateError::Serialization(format!("unknown match mode: {match_mode}")))?,
        pattern: row.try_get("pattern")?,
        enabled: row.try_get("enabled")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        last_hit_at: row.try_get("last_hit_at")?,
    })
}

impl RuleStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a rule and seed its zeroed counter row.
    pub async fn insert(&self, rule: &FilterRule) -> Result<(), StateError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO filter_rules
                (id, worker_name, category, match_field, match_mode, pattern,
                 enabled, created_at, updated_at, last_hit_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        )
        .bind(rule.id.to_string())
        .bind(rule.worker.as_str())
        .bind(rule.category.as_str())
        .bind(rule.match_field.as_str())
        .bind(rule.match_mode.as_str())
        .bind(&rule.pattern)
        .bind(rule.enabled)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .bind(rule.last_hit_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query("INSERT OR IGNORE INTO rule_stats (rule_id) VALUES (?1)")
            .bind(rule.id.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    pub async fn get(&self, id: RuleId) -> Result<Option<FilterRule>, StateError> {
        let row = sqlx::query("SELECT * FROM filter_rules WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(rule_from_row).transpose()
    }

    /// Every rule, in the deterministic scan order within each category.
    pub async fn list(&self) -> Result<Vec<FilterRule>, StateError> {
        let rows = sqlx::query(
            "SELECT * FROM filter_rules ORDER BY category, created_at ASC, id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(rule_from_row).collect()
    }

    /// Enabled rules of one category in the deterministic scan order:
    /// creation time ascending, tie-broken by id.
    pub async fn list_enabled(&self, category: RuleCategory) -> Result<Vec<FilterRule>, StateError> {
        let rows = sqlx::query(
            "SELECT * FROM filter_rules
             WHERE category = ?1 AND enabled = 1
             ORDER BY created_at ASC, id ASC",
        )
        .bind(category.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(rule_from_row).collect()
    }

    /// Find the dynamic rule whose pattern equals `pattern`, if any.
    pub async fn find_dynamic_by_pattern(
        &self,
        pattern: &str,
    ) -> Result<Option<FilterRule>, StateError> {
        let row = sqlx::query(
            "SELECT * FROM filter_rules
             WHERE category = 'dynamic' AND pattern = ?1
             ORDER BY created_at ASC, id ASC
             LIMIT 1",
        )
        .bind(pattern)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(rule_from_row).transpose()
    }

    pub async fn touch_last_hit(&self, id: RuleId, at: DateTime<Utc>) -> Result<(), StateError> {
        sqlx::query("UPDATE filter_rules SET last_hit_at = ?2, updated_at = ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Enable or disable a rule. Returns whether the rule existed.
    pub async fn set_enabled(&self, id: RuleId, enabled: bool) -> Result<bool, StateError> {
        let result = sqlx::query(
            "UPDATE filter_rules SET enabled = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id.to_string())
        .bind(enabled)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a rule (counters cascade). Returns whether it existed.
    pub async fn delete(&self, id: RuleId) -> Result<bool, StateError> {
        let result = sqlx::query("DELETE FROM filter_rules WHERE id = ?1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete dynamic rules that have been idle past the cutoff: created
    /// before it and never hit since it.
    pub async fn delete_expired_dynamic(&self, cutoff: DateTime<Utc>) -> Result<u64, StateError> {
        let result = sqlx::query(
            "DELETE FROM filter_rules
             WHERE category = 'dynamic'
               AND created_at < ?1
               AND (last_hit_at IS NULL OR last_hit_at < ?1)",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Apply one stats batch in a single transaction: per-rule counter
    /// increments plus the two global counters, with `last_hit_at`
    /// touched once per rule.
    pub async fn apply_stats_batch(
        &self,
        deltas: &[RuleStatDelta],
        forwarded: i64,
        deleted: i64,
        now: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let mut tx = self.pool.begin().await?;

        for delta in deltas {
            let id = delta.rule_id.to_string();
            sqlx::query(
                "INSERT INTO rule_stats (rule_id, total_processed, deleted_count, error_count, last_updated)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (rule_id) DO UPDATE SET
                    total_processed = total_processed + excluded.total_processed,
                    deleted_count = deleted_count + excluded.deleted_count,
                    error_count = error_count + excluded.error_count,
                    last_updated = excluded.last_updated",
            )
            .bind(&id)
            .bind(delta.processed)
            .bind(delta.deleted)
            .bind(delta.errors)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query("UPDATE filter_rules SET last_hit_at = ?2 WHERE id = ?1")
                .bind(&id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }

        for (name, value) in [("forwarded", forwarded), ("deleted", deleted)] {
            if value != 0 {
                sqlx::query(
                    "INSERT INTO global_counters (name, value) VALUES (?1, ?2)
                     ON CONFLICT (name) DO UPDATE SET value = value + excluded.value",
                )
                .bind(name)
                .bind(value)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(())
    }

    /// Bulk-apply aggregated watch-rule hits.
    pub async fn apply_watch_hits(
        &self,
        hits: &[(RuleId, i64)],
        now: DateTime<Utc>,
    ) -> Result<(), StateError> {
        let mut tx = self.pool.begin().await?;
        for (rule_id, count) in hits {
            let id = rule_id.to_string();
            sqlx::query(
                "INSERT INTO rule_stats (rule_id, total_processed, last_updated)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (rule_id) DO UPDATE SET
                    total_processed = total_processed + excluded.total_processed,
                    last_updated = excluded.last_updated",
            )
            .bind(&id)
            .bind(count)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            sqlx::query("UPDATE filter_rules SET last_hit_at = ?2 WHERE id = ?1")
                .bind(&id)
                .bind(now)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    #[allow(clippy::cast_sign_loss)]
    pub async fn stats_for(&self, id: RuleId) -> Result<RuleStats, StateError> {
        let row = sqlx::query("SELECT * FROM rule_stats WHERE rule_id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            None => Ok(RuleStats::default()),
            Some(row) => {
                let total: i64 = row.try_get("total_processed")?;
                let deleted: i64 = row.try_get("deleted_count")?;
                let errors: i64 = row.try_get("error_count")?;
                Ok(RuleStats {
                    rule_id: Some(id),
                    total_processed: total as u64,
                    deleted_count: deleted as u64,
                    error_count: errors as u64,
                    last_updated: row.try_get("last_updated")?,
                })
            }
        }
    }

    /// Read one of the process-wide counters (`forwarded`, `deleted`).
    pub async fn global_counter(&self, name: &str) -> Result<i64, StateError> {
        let row = sqlx::query("SELECT value FROM global_counters WHERE name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map_or(0, |r| r.get::<i64, _>("value")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    async fn store() -> SqliteStore {
        SqliteStore::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn insert_get_roundtrip() {
        let rules = store().await.rules();
        let rule = FilterRule::new(
            RuleCategory::Blacklist,
            MatchField::Subject,
            MatchMode::Contains,
            "casino",
        );
        rules.insert(&rule).await.unwrap();

        let loaded = rules.get(rule.id).await.unwrap().unwrap();
        assert_eq!(loaded.pattern, "casino");
        assert_eq!(loaded.category, RuleCategory::Blacklist);
        assert!(loaded.enabled);
        assert!(loaded.worker.is_global());
    }

    #[tokio::test]
    async fn list_enabled_is_deterministically_ordered() {
        let rules = store().await.rules();
        let base = Utc::now();
        for (i, pattern) in ["a", "b", "c"].iter().enumerate() {
            let mut rule = FilterRule::new(
                RuleCategory::Whitelist,
                MatchField::Subject,
                MatchMode::Contains,
                *pattern,
            );
            rule.created_at = base + chrono::Duration::seconds(i as i64);
            rules.insert(&rule).await.unwrap();
        }
        let mut disabled = FilterRule::new(
            RuleCategory::Whitelist,
            MatchField::Subject,
            MatchMode::Contains,
            "d",
        );
        disabled.enabled = false;
        rules.insert(&disabled).await.unwrap();

        let listed = rules.list_enabled(RuleCategory::Whitelist).await.unwrap();
        let patterns: Vec<_> = listed.iter().map(|r| r.pattern.as_str()).collect();
        assert_eq!(patterns, ["a", "b", "c"]);
    }

    #[tokio::test]
    async fn expired_dynamic_rules_are_reaped() {
        let rules = store().await.rules();
        let cutoff = Utc::now();

        let mut stale = FilterRule::dynamic_for_subject("old subject");
        stale.created_at = cutoff - chrono::Duration::hours(100);
        rules.insert(&stale).await.unwrap();

        // Created long ago but hit recently: kept only when the hit is
        // newer than the cutoff.
        let mut hit_recently = FilterRule::dynamic_for_subject("warm subject");
        hit_recently.created_at = cutoff - chrono::Duration::hours(100);
        hit_recently.last_hit_at = Some(cutoff + chrono::Duration::minutes(1));
        rules.insert(&hit_recently).await.unwrap();

        let reaped = rules.delete_expired_dynamic(cutoff).await.unwrap();
        assert_eq!(reaped, 1);
        assert!(rules.get(stale.id).await.unwrap().is_none());
        assert!(rules.get(hit_recently.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stats_batch_accumulates() {
        let rules = store().await.rules();
        let rule = FilterRule::dynamic_for_subject("spam run");
        rules.insert(&rule).await.unwrap();

        let now = Utc::now();
        let delta = RuleStatDelta {
            rule_id: rule.id,
            processed: 3,
            deleted: 3,
            errors: 0,
        };
        rules.apply_stats_batch(&[delta], 5, 3, now).await.unwrap();
        rules.apply_stats_batch(&[delta], 2, 3, now).await.unwrap();

        let stats = rules.stats_for(rule.id).await.unwrap();
        assert_eq!(stats.total_processed, 6);
        assert_eq!(stats.deleted_count, 6);
        assert_eq!(rules.global_counter("forwarded").await.unwrap(), 7);
        assert_eq!(rules.global_counter("deleted").await.unwrap(), 6);

        let reloaded = rules.get(rule.id).await.unwrap().unwrap();
        assert!(reloaded.last_hit_at.is_some());
    }
}
