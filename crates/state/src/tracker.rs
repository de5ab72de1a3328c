use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::error::StateError;

/// Repository for the ephemeral subject-sighting table behind the
/// dynamic-rule detector. Rows live only until the detector promotes (or
/// retention reaps) their subject hash.
#[derive(Debug, Clone)]
pub struct TrackerStore {
    pool: SqlitePool,
}

impl TrackerStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record one sighting.
    pub async fn append(
        &self,
        worker: Option<&str>,
        subject_hash: &str,
        subject: &str,
        received_at: DateTime<Utc>,
    ) -> Result<(), StateError> {
        sqlx::query(
            "INSERT INTO email_subject_tracker (worker_name, subject_hash, subject, received_at)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(worker)
        .bind(subject_hash)
        .bind(subject)
        .bind(received_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Count sightings of a hash inside `[window_start, window_end]`.
    pub async fn count_in_window(
        &self,
        subject_hash: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
    ) -> Result<i64, StateError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM email_subject_tracker
             WHERE subject_hash = ?1 AND received_at >= ?2 AND received_at <= ?3",
        )
        .bind(subject_hash)
        .bind(window_start)
        .bind(window_end)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("n"))
    }

    /// The first `limit` sighting timestamps of a hash inside the window,
    /// ascending.
    pub async fn first_in_window(
        &self,
        subject_hash: &str,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DateTime<Utc>>, StateError> {
        let rows = sqlx::query(
            "SELECT received_at FROM email_subject_tracker
             WHERE subject_hash = ?1 AND received_at >= ?2 AND received_at <= ?3
             ORDER BY received_at ASC
             LIMIT ?4",
        )
        .bind(subject_hash)
        .bind(window_start)
        .bind(window_end)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get("received_at").map_err(StateError::from))
            .collect()
    }

    /// Purge sightings of one hash older than `cutoff`. Used when the
    /// detector promotes the subject into a rule.
    pub async fn purge_hash_before(
        &self,
        subject_hash: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StateError> {
        let result = sqlx::query(
            "DELETE FROM email_subject_tracker WHERE subject_hash = ?1 AND received_at < ?2",
        )
        .bind(subject_hash)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Purge all sightings older than `cutoff`, regardless of hash.
    pub async fn purge_all_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StateError> {
        let result = sqlx::query("DELETE FROM email_subject_tracker WHERE received_at < ?1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
