use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use mailsieve_core::{MerchantId, GLOBAL_WORKER};

use crate::error::StateError;

/// Outcome of one bulk cleanup operation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupSummary {
    /// Rows removed.
    pub items_deleted: u64,
    /// Rows touched without being removed (recomputed counters,
    /// cascaded parents).
    pub items_affected: u64,
}

/// Outcome of the staged per-worker merchant-data deletion.
#[derive(Debug, Clone, Copy, Default)]
pub struct MerchantDataSummary {
    pub emails_deleted: u64,
    pub paths_deleted: u64,
    pub campaigns_updated: u64,
    /// Whether the merchant itself was cascade-deleted because no emails
    /// remained.
    pub merchant_deleted: bool,
}

/// Bulk retention operations over the campaign graph. Every operation is
/// a single transaction, idempotent, and resumable.
#[derive(Debug, Clone)]
pub struct CleanupStore {
    pool: SqlitePool,
}

impl CleanupStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Delete data of ignored merchants.
    ///
    /// For a specific worker: remove that worker's campaign emails for
    /// merchants the worker has marked ignored, plus the matching
    /// worker-status rows. For the `global` worker: cascade-delete every
    /// merchant marked ignored globally or by any worker.
    pub async fn ignored_merchant_data(&self, worker: &str) -> Result<CleanupSummary, StateError> {
        let mut tx = self.pool.begin().await?;
        let mut summary = CleanupSummary::default();

        if worker == GLOBAL_WORKER {
            let merchants: Vec<String> = sqlx::query(
                "SELECT DISTINCT m.id FROM merchants m
                 LEFT JOIN merchant_worker_status mws ON mws.merchant_id = m.id
                 WHERE m.analysis_status = 'ignored' OR mws.analysis_status = 'ignored'",
            )
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| row.get("id"))
            .collect();

            for merchant_id in &merchants {
                // Campaigns, emails, paths, and status rows cascade from
                // the merchant row.
                let deleted = sqlx::query("DELETE FROM merchants WHERE id = ?1")
                    .bind(merchant_id)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                summary.items_deleted += deleted;
            }
            summary.items_affected = merchants.len() as u64;
        } else {
            let emails = sqlx::query(
                "DELETE FROM campaign_emails
                 WHERE worker_name = ?1
                   AND campaign_id IN (
                       SELECT c.id FROM campaigns c
                       JOIN merchant_worker_status mws ON mws.merchant_id = c.merchant_id
                       WHERE mws.worker_name = ?1 AND mws.analysis_status = 'ignored'
                   )",
            )
            .bind(worker)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            let statuses = sqlx::query(
                "DELETE FROM merchant_worker_status
                 WHERE worker_name = ?1 AND analysis_status = 'ignored'",
            )
            .bind(worker)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            summary.items_deleted = emails + statuses;
            summary.items_affected = statuses;
        }

        tx.commit().await?;
        Ok(summary)
    }

    /// Delete data of merchants stuck in `pending` since before `cutoff`,
    /// with the same worker semantics as the ignored-data cleanup.
    pub async fn old_pending_data(
        &self,
        cutoff: DateTime<Utc>,
        worker: &str,
    ) -> Result<CleanupSummary, StateError> {
        let mut tx = self.pool.begin().await?;
        let mut summary = CleanupSummary::default();

        if worker == GLOBAL_WORKER {
            let merchants: Vec<String> = sqlx::query(
                "SELECT id FROM merchants
                 WHERE analysis_status = 'pending' AND updated_at < ?1",
            )
            .bind(cutoff)
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|row| row.get("id"))
            .collect();

            for merchant_id in &merchants {
                let deleted = sqlx::query("DELETE FROM merchants WHERE id = ?1")
                    .bind(merchant_id)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();
                summary.items_deleted += deleted;
            }
            summary.items_affected = merchants.len() as u64;
        } else {
            let emails = sqlx::query(
                "DELETE FROM campaign_emails
                 WHERE worker_name = ?1
                   AND campaign_id IN (
                       SELECT c.id FROM campaigns c
                       JOIN merchants m ON m.id = c.merchant_id
                       WHERE m.analysis_status = 'pending' AND m.updated_at < ?2
                   )",
            )
            .bind(worker)
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            let statuses = sqlx::query(
                "DELETE FROM merchant_worker_status
                 WHERE worker_name = ?1
                   AND merchant_id IN (
                       SELECT id FROM merchants
                       WHERE analysis_status = 'pending' AND updated_at < ?2
                   )",
            )
            .bind(worker)
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();

            summary.items_deleted = emails + statuses;
            summary.items_affected = statuses;
        }

        tx.commit().await?;
        Ok(summary)
    }

    /// Remove path rows of recipients who never became new users at this
    /// merchant. With `preserve_first`, each such recipient keeps their
    /// earliest entry.
    pub async fn old_user_paths(
        &self,
        merchant_id: MerchantId,
        preserve_first: bool,
    ) -> Result<CleanupSummary, StateError> {
        let merchant = merchant_id.to_string();
        let sql = if preserve_first {
            "DELETE FROM recipient_paths
             WHERE merchant_id = ?1
               AND recipient IN (
                   SELECT recipient FROM recipient_paths
                   WHERE merchant_id = ?1
                   GROUP BY recipient
                   HAVING MAX(is_new_user) = 0
               )
               AND sequence_order > (
                   SELECT MIN(rp2.sequence_order) FROM recipient_paths rp2
                   WHERE rp2.merchant_id = ?1 AND rp2.recipient = recipient_paths.recipient
               )"
        } else {
            "DELETE FROM recipient_paths
             WHERE merchant_id = ?1
               AND recipient IN (
                   SELECT recipient FROM recipient_paths
                   WHERE merchant_id = ?1
                   GROUP BY recipient
                   HAVING MAX(is_new_user) = 0
               )"
        };

        let deleted = sqlx::query(sql)
            .bind(&merchant)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(CleanupSummary {
            items_deleted: deleted,
            items_affected: 0,
        })
    }

    /// Remove path rows of recipients never flagged as new users within
    /// the given worker set. Campaign emails are preserved.
    pub async fn old_customer_paths(
        &self,
        merchant_id: MerchantId,
        workers: Option<&[String]>,
    ) -> Result<CleanupSummary, StateError> {
        let merchant = merchant_id.to_string();

        let deleted = match workers {
            Some(workers) if !workers.is_empty() => {
                let placeholders = (0..workers.len())
                    .map(|i| format!("?{}", i + 2))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "DELETE FROM recipient_paths
                     WHERE merchant_id = ?1
                       AND recipient IN (
                           SELECT rp.recipient FROM recipient_paths rp
                           WHERE rp.merchant_id = ?1
                           GROUP BY rp.recipient
                           HAVING MAX(rp.is_new_user) = 0
                       )
                       AND recipient IN (
                           SELECT DISTINCT ce.recipient FROM campaign_emails ce
                           JOIN campaigns c ON c.id = ce.campaign_id
                           WHERE c.merchant_id = ?1 AND ce.worker_name IN ({placeholders})
                       )"
                );
                let mut query = sqlx::query(&sql).bind(&merchant);
                for worker in workers {
                    query = query.bind(worker);
                }
                query.execute(&self.pool).await?.rows_affected()
            }
            _ => {
                sqlx::query(
                    "DELETE FROM recipient_paths
                     WHERE merchant_id = ?1
                       AND recipient IN (
                           SELECT recipient FROM recipient_paths
                           WHERE merchant_id = ?1
                           GROUP BY recipient
                           HAVING MAX(is_new_user) = 0
                       )",
                )
                .bind(&merchant)
                .execute(&self.pool)
                .await?
                .rows_affected()
            }
        };

        Ok(CleanupSummary {
            items_deleted: deleted,
            items_affected: 0,
        })
    }

    /// Remove one worker's footprint from a merchant, in stages inside a
    /// single transaction:
    ///
    /// 1. delete the worker's emails under the merchant's campaigns;
    /// 2. drop path rows of recipients left with no emails at all;
    /// 3. recompute per-campaign totals and unique recipients;
    /// 4. cascade-delete the merchant when no emails remain anywhere.
    pub async fn delete_merchant_data(
        &self,
        merchant_id: MerchantId,
        worker: &str,
    ) -> Result<MerchantDataSummary, StateError> {
        let merchant = merchant_id.to_string();
        let mut tx = self.pool.begin().await?;

        let recipients: Vec<String> = sqlx::query(
            "SELECT DISTINCT ce.recipient FROM campaign_emails ce
             JOIN campaigns c ON c.id = ce.campaign_id
             WHERE c.merchant_id = ?1 AND ce.worker_name = ?2",
        )
        .bind(&merchant)
        .bind(worker)
        .fetch_all(&mut *tx)
        .await?
        .iter()
        .map(|row| row.get("recipient"))
        .collect();

        let emails_deleted = sqlx::query(
            "DELETE FROM campaign_emails
             WHERE worker_name = ?2
               AND campaign_id IN (SELECT id FROM campaigns WHERE merchant_id = ?1)",
        )
        .bind(&merchant)
        .bind(worker)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let mut paths_deleted = 0u64;
        for recipient in &recipients {
            let remaining: i64 = sqlx::query(
                "SELECT COUNT(*) AS n FROM campaign_emails ce
                 JOIN campaigns c ON c.id = ce.campaign_id
                 WHERE c.merchant_id = ?1 AND ce.recipient = ?2",
            )
            .bind(&merchant)
            .bind(recipient)
            .fetch_one(&mut *tx)
            .await?
            .get("n");

            if remaining == 0 {
                paths_deleted += sqlx::query(
                    "DELETE FROM recipient_paths WHERE merchant_id = ?1 AND recipient = ?2",
                )
                .bind(&merchant)
                .bind(recipient)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            }
        }

        let campaigns_updated = sqlx::query(
            "UPDATE campaigns SET
                total_emails = (SELECT COUNT(*) FROM campaign_emails ce WHERE ce.campaign_id = campaigns.id),
                unique_recipients = (SELECT COUNT(*) FROM recipient_paths rp WHERE rp.campaign_id = campaigns.id)
             WHERE merchant_id = ?1",
        )
        .bind(&merchant)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let emails_remaining: i64 = sqlx::query(
            "SELECT COUNT(*) AS n FROM campaign_emails ce
             JOIN campaigns c ON c.id = ce.campaign_id
             WHERE c.merchant_id = ?1",
        )
        .bind(&merchant)
        .fetch_one(&mut *tx)
        .await?
        .get("n");

        let merchant_deleted = if emails_remaining == 0 {
            sqlx::query("DELETE FROM merchants WHERE id = ?1")
                .bind(&merchant)
                .execute(&mut *tx)
                .await?
                .rows_affected()
                > 0
        } else {
            sqlx::query(
                "UPDATE merchants SET
                    total_emails = ?2,
                    total_campaigns = (SELECT COUNT(*) FROM campaigns c WHERE c.merchant_id = merchants.id),
                    updated_at = ?3
                 WHERE id = ?1",
            )
            .bind(&merchant)
            .bind(emails_remaining)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await?;
            false
        };

        tx.commit().await?;
        Ok(MerchantDataSummary {
            emails_deleted,
            paths_deleted,
            campaigns_updated,
            merchant_deleted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use mailsieve_core::{campaign_subject_hash, AnalysisStatus, CampaignEmail};

    async fn seed_two_worker_merchant() -> (SqliteStore, MerchantId) {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let (merchant, _) = store.merchants().upsert_by_domain("m.com").await.unwrap();
        let (campaign, _) = store
            .campaigns()
            .upsert(merchant.id, "Sale", &campaign_subject_hash("Sale"), Utc::now())
            .await
            .unwrap();

        for (recipient, worker) in [
            ("only-w1@x.com", "w1"),
            ("only-w2@x.com", "w2"),
            ("both@x.com", "w1"),
            ("both@x.com", "w2"),
        ] {
            store
                .campaigns()
                .record_email(&CampaignEmail {
                    id: uuid::Uuid::new_v4(),
                    campaign_id: campaign.id,
                    recipient: recipient.to_owned(),
                    received_at: Utc::now(),
                    worker_name: worker.to_owned(),
                })
                .await
                .unwrap();
            store
                .paths()
                .append_if_absent(merchant.id, recipient, campaign.id, Utc::now())
                .await
                .unwrap();
        }
        (store, merchant.id)
    }

    #[tokio::test]
    async fn delete_merchant_data_is_staged_per_worker() {
        let (store, merchant_id) = seed_two_worker_merchant().await;
        let cleanup = store.cleanup();

        let first = cleanup.delete_merchant_data(merchant_id, "w1").await.unwrap();
        assert_eq!(first.emails_deleted, 2);
        // only-w1 lost their last email; both@ keeps a w2 email.
        assert_eq!(first.paths_deleted, 1);
        assert!(!first.merchant_deleted);
        assert!(store.merchants().get(merchant_id).await.unwrap().is_some());

        let second = cleanup.delete_merchant_data(merchant_id, "w2").await.unwrap();
        assert_eq!(second.emails_deleted, 2);
        assert!(second.merchant_deleted);
        assert!(store.merchants().get(merchant_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn global_ignored_cleanup_cascades() {
        let (store, merchant_id) = seed_two_worker_merchant().await;
        store
            .merchants()
            .set_status(merchant_id, AnalysisStatus::Ignored)
            .await
            .unwrap();

        let summary = store.cleanup().ignored_merchant_data("global").await.unwrap();
        assert_eq!(summary.items_affected, 1);
        assert!(store.merchants().get(merchant_id).await.unwrap().is_none());

        // Cascades removed the graph too.
        let emails: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM campaign_emails")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(emails.0, 0);
        let paths: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM recipient_paths")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(paths.0, 0);
    }

    #[tokio::test]
    async fn worker_scoped_ignored_cleanup_spares_other_workers() {
        let (store, merchant_id) = seed_two_worker_merchant().await;
        store
            .merchants()
            .set_worker_status(merchant_id, "w1", AnalysisStatus::Ignored, None)
            .await
            .unwrap();

        let summary = store.cleanup().ignored_merchant_data("w1").await.unwrap();
        assert_eq!(summary.items_deleted, 3); // 2 emails + 1 status row

        let remaining: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM campaign_emails WHERE worker_name = 'w2'",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(remaining.0, 2);
        assert!(store.merchants().get(merchant_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn old_user_paths_can_preserve_first_entry() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let (merchant, _) = store.merchants().upsert_by_domain("m.com").await.unwrap();
        let mut campaigns = Vec::new();
        for subject in ["A", "B"] {
            let (c, _) = store
                .campaigns()
                .upsert(merchant.id, subject, &campaign_subject_hash(subject), Utc::now())
                .await
                .unwrap();
            campaigns.push(c.id);
        }
        for campaign in &campaigns {
            store
                .paths()
                .append_if_absent(merchant.id, "old@x.com", *campaign, Utc::now())
                .await
                .unwrap();
        }

        let summary = store.cleanup().old_user_paths(merchant.id, true).await.unwrap();
        assert_eq!(summary.items_deleted, 1);
        let path = store.paths().path_for(merchant.id, "old@x.com").await.unwrap();
        assert_eq!(path.len(), 1);
        assert_eq!(path[0].sequence_order, 0);

        let summary = store.cleanup().old_user_paths(merchant.id, false).await.unwrap();
        assert_eq!(summary.items_deleted, 1);
        assert!(store.paths().path_for(merchant.id, "old@x.com").await.unwrap().is_empty());
    }
}
