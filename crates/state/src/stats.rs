use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use mailsieve_core::SubjectStats;

use crate::error::StateError;

/// Aggregate view over one merchant domain's subjects on one worker.
#[derive(Debug, Clone)]
pub struct DomainSubjectSummary {
    pub merchant_domain: String,
    pub subject_count: i64,
    pub email_count: i64,
}

/// Repository for per-subject sighting counters.
#[derive(Debug, Clone)]
pub struct StatsStore {
    pool: SqlitePool,
}

fn stats_from_row(row: &SqliteRow) -> Result<SubjectStats, StateError> {
    let id: String = row.try_get("id")?;
    Ok(SubjectStats {
        id: Uuid::parse_str(&id).map_err(|e| StateError::Serialization(e.to_string()))?,
        subject: row.try_get("subject")?,
        subject_hash: row.try_get("subject_hash")?,
        merchant_domain: row.try_get("merchant_domain")?,
        worker_name: row.try_get("worker_name")?,
        email_count: row.try_get("email_count")?,
        is_focused: row.try_get("is_focused")?,
        first_seen_at: row.try_get("first_seen_at")?,
        last_seen_at: row.try_get("last_seen_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl StatsStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Accumulate one sighting into the
    /// `(subject_hash, merchant_domain, worker)` counter, creating the row
    /// on first sight.
    pub async fn bump(
        &self,
        subject: &str,
        subject_hash: &str,
        merchant_domain: &str,
        worker: &str,
        seen_at: DateTime<Utc>,
        count: i64,
    ) -> Result<(), StateError> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO subject_stats
                (id, subject, subject_hash, merchant_domain, worker_name, email_count,
                 is_focused, first_seen_at, last_seen_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, ?7, ?8, ?8)
             ON CONFLICT (subject_hash, merchant_domain, worker_name) DO UPDATE SET
                email_count = email_count + excluded.email_count,
                last_seen_at = MAX(last_seen_at, excluded.last_seen_at),
                updated_at = excluded.updated_at",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(subject)
        .bind(subject_hash)
        .bind(merchant_domain)
        .bind(worker)
        .bind(count)
        .bind(seen_at)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Flag or unflag a subject for focused review.
    pub async fn set_focused(
        &self,
        subject_hash: &str,
        merchant_domain: &str,
        worker: &str,
        focused: bool,
    ) -> Result<bool, StateError> {
        let result = sqlx::query(
            "UPDATE subject_stats SET is_focused = ?4, updated_at = ?5
             WHERE subject_hash = ?1 AND merchant_domain = ?2 AND worker_name = ?3",
        )
        .bind(subject_hash)
        .bind(merchant_domain)
        .bind(worker)
        .bind(focused)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Focused subjects on a worker, most recently seen first.
    pub async fn list_focused(&self, worker: &str) -> Result<Vec<SubjectStats>, StateError> {
        let rows = sqlx::query(
            "SELECT * FROM subject_stats
             WHERE worker_name = ?1 AND is_focused = 1
             ORDER BY last_seen_at DESC",
        )
        .bind(worker)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(stats_from_row).collect()
    }

    /// Highest-volume subjects on a worker.
    pub async fn top_subjects(
        &self,
        worker: &str,
        limit: i64,
    ) -> Result<Vec<SubjectStats>, StateError> {
        let rows = sqlx::query(
            "SELECT * FROM subject_stats
             WHERE worker_name = ?1
             ORDER BY email_count DESC, last_seen_at DESC
             LIMIT ?2",
        )
        .bind(worker)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(stats_from_row).collect()
    }

    /// Per-domain rollup on a worker, highest email volume first.
    pub async fn domain_summaries(
        &self,
        worker: &str,
    ) -> Result<Vec<DomainSubjectSummary>, StateError> {
        let rows = sqlx::query(
            "SELECT merchant_domain,
                    COUNT(*) AS subject_count,
                    SUM(email_count) AS email_count
             FROM subject_stats
             WHERE worker_name = ?1
             GROUP BY merchant_domain
             ORDER BY email_count DESC",
        )
        .bind(worker)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(DomainSubjectSummary {
                    merchant_domain: row.try_get("merchant_domain")?,
                    subject_count: row.try_get("subject_count")?,
                    email_count: row.try_get("email_count")?,
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    #[tokio::test]
    async fn bump_accumulates_per_triple() {
        let stats = SqliteStore::open_in_memory().await.unwrap().stats();
        let t0 = Utc::now();

        stats.bump("Sale", "h1", "foo.com", "w1", t0, 1).await.unwrap();
        stats.bump("Sale", "h1", "foo.com", "w1", t0, 2).await.unwrap();
        stats.bump("Sale", "h1", "foo.com", "w2", t0, 1).await.unwrap();

        let top = stats.top_subjects("w1", 10).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].email_count, 3);

        let other = stats.top_subjects("w2", 10).await.unwrap();
        assert_eq!(other[0].email_count, 1);
    }

    #[tokio::test]
    async fn focus_flag_lifecycle() {
        let stats = SqliteStore::open_in_memory().await.unwrap().stats();
        stats
            .bump("Sale", "h1", "foo.com", "w1", Utc::now(), 1)
            .await
            .unwrap();

        assert!(stats.set_focused("h1", "foo.com", "w1", true).await.unwrap());
        assert_eq!(stats.list_focused("w1").await.unwrap().len(), 1);
        assert!(stats.set_focused("h1", "foo.com", "w1", false).await.unwrap());
        assert!(stats.list_focused("w1").await.unwrap().is_empty());
        // Unknown triple affects nothing.
        assert!(!stats.set_focused("h9", "foo.com", "w1", true).await.unwrap());
    }
}
