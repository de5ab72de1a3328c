use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use mailsieve_core::{AnalysisStatus, Merchant, MerchantId, MerchantWorkerStatus, GLOBAL_WORKER};

use crate::error::{is_unique_violation, StateError};

/// Repository for merchants and their per-worker analysis statuses.
#[derive(Debug, Clone)]
pub struct MerchantStore {
    pool: SqlitePool,
}

fn merchant_from_row(row: &SqliteRow) -> Result<Merchant, StateError> {
    let id: String = row.try_get("id")?;
    let status: String = row.try_get("analysis_status")?;
    Ok(Merchant {
        id: MerchantId::parse(&id).map_err(|e| StateError::Serialization(e.to_string()))?,
        domain: row.try_get("domain")?,
        display_name: row.try_get("display_name")?,
        note: row.try_get("note")?,
        analysis_status: AnalysisStatus::parse(&status)
            .ok_or_else(|| StateError::Serialization(format!("unknown analysis status: {status}")))?,
        total_campaigns: row.try_get("total_campaigns")?,
        total_emails: row.try_get("total_emails")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

impl MerchantStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: MerchantId) -> Result<Option<Merchant>, StateError> {
        let row = sqlx::query("SELECT * FROM merchants WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(merchant_from_row).transpose()
    }

    pub async fn get_by_domain(&self, domain: &str) -> Result<Option<Merchant>, StateError> {
        let row = sqlx::query("SELECT * FROM merchants WHERE domain = ?1")
            .bind(domain)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(merchant_from_row).transpose()
    }

    /// Look the merchant up by root domain, creating it with zeroed
    /// counters when absent. Returns the merchant and whether it is new.
    ///
    /// A concurrent insert of the same domain is resolved by re-reading.
    pub async fn upsert_by_domain(&self, domain: &str) -> Result<(Merchant, bool), StateError> {
        if let Some(existing) = self.get_by_domain(domain).await? {
            return Ok((existing, false));
        }

        let merchant = Merchant::new(domain);
        let insert = sqlx::query(
            "INSERT INTO merchants
                (id, domain, display_name, note, analysis_status,
                 total_campaigns, total_emails, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, 0, ?6, ?7)",
        )
        .bind(merchant.id.to_string())
        .bind(&merchant.domain)
        .bind(&merchant.display_name)
        .bind(&merchant.note)
        .bind(merchant.analysis_status.as_str())
        .bind(merchant.created_at)
        .bind(merchant.updated_at)
        .execute(&self.pool)
        .await;

        match insert {
            Ok(_) => Ok((merchant, true)),
            Err(err) if is_unique_violation(&err) => {
                let existing = self.get_by_domain(domain).await?.ok_or_else(|| {
                    StateError::Backend(format!("merchant {domain} vanished mid-upsert"))
                })?;
                Ok((existing, false))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn list(
        &self,
        status: Option<AnalysisStatus>,
    ) -> Result<Vec<Merchant>, StateError> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM merchants WHERE analysis_status = ?1 ORDER BY domain",
                )
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM merchants ORDER BY domain")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(merchant_from_row).collect()
    }

    pub async fn set_status(
        &self,
        id: MerchantId,
        status: AnalysisStatus,
    ) -> Result<bool, StateError> {
        let result = sqlx::query(
            "UPDATE merchants SET analysis_status = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(id.to_string())
        .bind(status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_details(
        &self,
        id: MerchantId,
        display_name: Option<&str>,
        note: Option<&str>,
    ) -> Result<bool, StateError> {
        let result = sqlx::query(
            "UPDATE merchants SET display_name = ?2, note = ?3, updated_at = ?4 WHERE id = ?1",
        )
        .bind(id.to_string())
        .bind(display_name)
        .bind(note)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Adjust the denormalized totals.
    pub async fn increment_totals(
        &self,
        id: MerchantId,
        email_delta: i64,
        campaign_delta: i64,
    ) -> Result<(), StateError> {
        sqlx::query(
            "UPDATE merchants
             SET total_emails = total_emails + ?2,
                 total_campaigns = total_campaigns + ?3,
                 updated_at = ?4
             WHERE id = ?1",
        )
        .bind(id.to_string())
        .bind(email_delta)
        .bind(campaign_delta)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// The analysis status effective for `worker`: the per-worker override
    /// when one exists, otherwise the merchant's own column. Queries for
    /// the `global` worker always read the merchant's column.
    pub async fn status_for_worker(
        &self,
        id: MerchantId,
        worker: &str,
    ) -> Result<Option<AnalysisStatus>, StateError> {
        if worker != GLOBAL_WORKER {
            let row = sqlx::query(
                "SELECT analysis_status FROM merchant_worker_status
                 WHERE merchant_id = ?1 AND worker_name = ?2",
            )
            .bind(id.to_string())
            .bind(worker)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                let status: String = row.try_get("analysis_status")?;
                return Ok(AnalysisStatus::parse(&status));
            }
        }
        Ok(self.get(id).await?.map(|m| m.analysis_status))
    }

    /// Upsert the per-worker analysis override.
    pub async fn set_worker_status(
        &self,
        id: MerchantId,
        worker: &str,
        status: AnalysisStatus,
        display_name: Option<&str>,
    ) -> Result<(), StateError> {
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO merchant_worker_status
                (merchant_id, worker_name, analysis_status, display_name, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)
             ON CONFLICT (merchant_id, worker_name) DO UPDATE SET
                analysis_status = excluded.analysis_status,
                display_name = excluded.display_name,
                updated_at = excluded.updated_at",
        )
        .bind(id.to_string())
        .bind(worker)
        .bind(status.as_str())
        .bind(display_name)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn worker_statuses(
        &self,
        id: MerchantId,
    ) -> Result<Vec<MerchantWorkerStatus>, StateError> {
        let rows = sqlx::query(
            "SELECT * FROM merchant_worker_status WHERE merchant_id = ?1 ORDER BY worker_name",
        )
        .bind(id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let merchant_id: String = row.try_get("merchant_id")?;
                let status: String = row.try_get("analysis_status")?;
                Ok(MerchantWorkerStatus {
                    merchant_id: MerchantId::parse(&merchant_id)
                        .map_err(|e| StateError::Serialization(e.to_string()))?,
                    worker_name: row.try_get("worker_name")?,
                    analysis_status: AnalysisStatus::parse(&status).ok_or_else(|| {
                        StateError::Serialization(format!("unknown analysis status: {status}"))
                    })?,
                    display_name: row.try_get("display_name")?,
                    created_at: row.try_get("created_at")?,
                    updated_at: row.try_get("updated_at")?,
                })
            })
            .collect()
    }

    /// Merchants marked ignored globally or by any worker. Input to the
    /// global ignored-data cleanup.
    pub async fn ignored_anywhere(&self) -> Result<Vec<MerchantId>, StateError> {
        let rows = sqlx::query(
            "SELECT DISTINCT m.id FROM merchants m
             LEFT JOIN merchant_worker_status mws ON mws.merchant_id = m.id
             WHERE m.analysis_status = 'ignored' OR mws.analysis_status = 'ignored'",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                MerchantId::parse(&id).map_err(|e| StateError::Serialization(e.to_string()))
            })
            .collect()
    }

    /// Merchants still `pending` whose last update is older than `cutoff`.
    pub async fn pending_older_than(
        &self,
        cutoff: chrono::DateTime<Utc>,
    ) -> Result<Vec<MerchantId>, StateError> {
        let rows = sqlx::query(
            "SELECT id FROM merchants
             WHERE analysis_status = 'pending' AND updated_at < ?1",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                MerchantId::parse(&id).map_err(|e| StateError::Serialization(e.to_string()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    #[tokio::test]
    async fn upsert_is_idempotent_on_domain() {
        let merchants = SqliteStore::open_in_memory().await.unwrap().merchants();

        let (first, is_new) = merchants.upsert_by_domain("foo.com").await.unwrap();
        assert!(is_new);
        assert_eq!(first.analysis_status, AnalysisStatus::Pending);

        let (second, is_new) = merchants.upsert_by_domain("foo.com").await.unwrap();
        assert!(!is_new);
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn worker_status_falls_through_to_merchant() {
        let merchants = SqliteStore::open_in_memory().await.unwrap().merchants();
        let (merchant, _) = merchants.upsert_by_domain("foo.com").await.unwrap();
        merchants
            .set_status(merchant.id, AnalysisStatus::Active)
            .await
            .unwrap();

        // No override: the merchant's own status answers for any worker.
        assert_eq!(
            merchants.status_for_worker(merchant.id, "w1").await.unwrap(),
            Some(AnalysisStatus::Active)
        );

        merchants
            .set_worker_status(merchant.id, "w1", AnalysisStatus::Ignored, None)
            .await
            .unwrap();
        assert_eq!(
            merchants.status_for_worker(merchant.id, "w1").await.unwrap(),
            Some(AnalysisStatus::Ignored)
        );
        // The global query keeps reading the merchant column.
        assert_eq!(
            merchants
                .status_for_worker(merchant.id, GLOBAL_WORKER)
                .await
                .unwrap(),
            Some(AnalysisStatus::Active)
        );
    }

    #[tokio::test]
    async fn ignored_anywhere_unions_worker_overrides() {
        let merchants = SqliteStore::open_in_memory().await.unwrap().merchants();
        let (globally, _) = merchants.upsert_by_domain("a.com").await.unwrap();
        merchants
            .set_status(globally.id, AnalysisStatus::Ignored)
            .await
            .unwrap();
        let (by_worker, _) = merchants.upsert_by_domain("b.com").await.unwrap();
        merchants
            .set_worker_status(by_worker.id, "w1", AnalysisStatus::Ignored, None)
            .await
            .unwrap();
        let (clean, _) = merchants.upsert_by_domain("c.com").await.unwrap();

        let ignored = merchants.ignored_anywhere().await.unwrap();
        assert!(ignored.contains(&globally.id));
        assert!(ignored.contains(&by_worker.id));
        assert!(!ignored.contains(&clean.id));
    }
}
