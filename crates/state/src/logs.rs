use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use mailsieve_core::{LogCategory, LogEntry};

use crate::error::StateError;

/// Repository for structured activity-log rows.
#[derive(Debug, Clone)]
pub struct LogStore {
    pool: SqlitePool,
}

impl LogStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Bulk-insert a batch of log rows in one transaction.
    pub async fn insert_batch(&self, entries: &[LogEntry]) -> Result<(), StateError> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for entry in entries {
            sqlx::query(
                "INSERT INTO activity_logs (id, category, message, worker_name, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(entry.id.to_string())
            .bind(entry.category.as_str())
            .bind(&entry.message)
            .bind(&entry.worker_name)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Most recent rows, optionally restricted to one category.
    pub async fn recent(
        &self,
        category: Option<LogCategory>,
        limit: i64,
    ) -> Result<Vec<LogEntry>, StateError> {
        let rows = match category {
            Some(category) => {
                sqlx::query(
                    "SELECT * FROM activity_logs WHERE category = ?1
                     ORDER BY created_at DESC LIMIT ?2",
                )
                .bind(category.as_str())
                .bind(limit)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM activity_logs ORDER BY created_at DESC LIMIT ?1")
                    .bind(limit)
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                let category: String = row.try_get("category")?;
                Ok(LogEntry {
                    id: Uuid::parse_str(&id)
                        .map_err(|e| StateError::Serialization(e.to_string()))?,
                    category: LogCategory::parse(&category).ok_or_else(|| {
                        StateError::Serialization(format!("unknown log category: {category}"))
                    })?,
                    message: row.try_get("message")?,
                    worker_name: row.try_get("worker_name")?,
                    created_at: row.try_get("created_at")?,
                })
            })
            .collect()
    }

    /// Delete rows older than `cutoff`. Returns the number removed.
    pub async fn trim_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StateError> {
        let result = sqlx::query("DELETE FROM activity_logs WHERE created_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    #[tokio::test]
    async fn batch_insert_and_trim() {
        let logs = SqliteStore::open_in_memory().await.unwrap().logs();

        let mut old = LogEntry::new(LogCategory::System, "ancient");
        old.created_at = Utc::now() - chrono::Duration::days(90);
        let fresh = LogEntry::new(LogCategory::EmailDrop, "dropped one").from_worker("w1");
        logs.insert_batch(&[old, fresh]).await.unwrap();

        let trimmed = logs
            .trim_before(Utc::now() - chrono::Duration::days(30))
            .await
            .unwrap();
        assert_eq!(trimmed, 1);

        let recent = logs.recent(None, 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].worker_name, "w1");
        assert_eq!(recent[0].category, LogCategory::EmailDrop);

        let filtered = logs.recent(Some(LogCategory::System), 10).await.unwrap();
        assert!(filtered.is_empty());
    }
}
