use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use mailsieve_core::{CampaignId, MerchantId, RecipientPathEntry};

use crate::error::{is_unique_violation, StateError};

/// How many times a path append retries after losing a sequence-order
/// race to a concurrent writer.
const APPEND_RETRIES: u32 = 3;

/// Repository for recipient paths: the ordered sequence of distinct
/// campaigns each recipient received from a merchant.
#[derive(Debug, Clone)]
pub struct PathStore {
    pool: SqlitePool,
}

fn entry_from_row(row: &SqliteRow) -> Result<RecipientPathEntry, StateError> {
    let merchant_id: String = row.try_get("merchant_id")?;
    let campaign_id: String = row.try_get("campaign_id")?;
    let first_root: Option<String> = row.try_get("first_root_campaign_id")?;
    Ok(RecipientPathEntry {
        merchant_id: MerchantId::parse(&merchant_id)
            .map_err(|e| StateError::Serialization(e.to_string()))?,
        recipient: row.try_get("recipient")?,
        campaign_id: CampaignId::parse(&campaign_id)
            .map_err(|e| StateError::Serialization(e.to_string()))?,
        sequence_order: row.try_get("sequence_order")?,
        first_received_at: row.try_get("first_received_at")?,
        is_new_user: row.try_get("is_new_user")?,
        first_root_campaign_id: first_root
            .map(|id| CampaignId::parse(&id).map_err(|e| StateError::Serialization(e.to_string())))
            .transpose()?,
    })
}

impl PathStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Append a campaign to a recipient's path unless it is already
    /// present. Returns whether a row was inserted (the caller bumps the
    /// campaign's unique-recipient counter on `true`).
    ///
    /// The sequence order is the next insertion rank for the
    /// `(merchant, recipient)` pair. Two writers racing on the same pair
    /// are serialized by the unique index on the rank; the loser recomputes
    /// and retries.
    pub async fn append_if_absent(
        &self,
        merchant_id: MerchantId,
        recipient: &str,
        campaign_id: CampaignId,
        received_at: DateTime<Utc>,
    ) -> Result<bool, StateError> {
        for _ in 0..APPEND_RETRIES {
            let mut tx = self.pool.begin().await?;

            let exists = sqlx::query(
                "SELECT 1 FROM recipient_paths
                 WHERE merchant_id = ?1 AND recipient = ?2 AND campaign_id = ?3",
            )
            .bind(merchant_id.to_string())
            .bind(recipient)
            .bind(campaign_id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
            if exists.is_some() {
                tx.rollback().await?;
                return Ok(false);
            }

            let next: i64 = sqlx::query(
                "SELECT COALESCE(MAX(sequence_order) + 1, 0) AS next
                 FROM recipient_paths WHERE merchant_id = ?1 AND recipient = ?2",
            )
            .bind(merchant_id.to_string())
            .bind(recipient)
            .fetch_one(&mut *tx)
            .await?
            .get("next");

            let insert = sqlx::query(
                "INSERT INTO recipient_paths
                    (merchant_id, recipient, campaign_id, sequence_order,
                     first_received_at, is_new_user, first_root_campaign_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, NULL)",
            )
            .bind(merchant_id.to_string())
            .bind(recipient)
            .bind(campaign_id.to_string())
            .bind(next)
            .bind(received_at)
            .execute(&mut *tx)
            .await;

            match insert {
                Ok(_) => {
                    tx.commit().await?;
                    return Ok(true);
                }
                Err(err) if is_unique_violation(&err) => {
                    // Either the triple landed concurrently (idempotent) or
                    // the rank was taken; re-run the existence check.
                    tx.rollback().await?;
                    continue;
                }
                Err(err) => {
                    tx.rollback().await?;
                    return Err(err.into());
                }
            }
        }
        // Retries exhausted: treat as already present rather than failing
        // ingestion.
        Ok(false)
    }

    /// One recipient's path, ordered by sequence.
    pub async fn path_for(
        &self,
        merchant_id: MerchantId,
        recipient: &str,
    ) -> Result<Vec<RecipientPathEntry>, StateError> {
        let rows = sqlx::query(
            "SELECT * FROM recipient_paths
             WHERE merchant_id = ?1 AND recipient = ?2
             ORDER BY sequence_order ASC",
        )
        .bind(merchant_id.to_string())
        .bind(recipient)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(entry_from_row).collect()
    }

    /// All paths at a merchant, ordered by recipient then sequence.
    ///
    /// When `workers` is non-empty, the result is restricted to recipients
    /// who have at least one campaign email from a worker in the set.
    pub async fn all_paths(
        &self,
        merchant_id: MerchantId,
        workers: Option<&[String]>,
    ) -> Result<Vec<RecipientPathEntry>, StateError> {
        let rows = match workers {
            Some(workers) if !workers.is_empty() => {
                let placeholders = (0..workers.len())
                    .map(|i| format!("?{}", i + 2))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "SELECT rp.* FROM recipient_paths rp
                     WHERE rp.merchant_id = ?1
                       AND rp.recipient IN (
                           SELECT DISTINCT ce.recipient FROM campaign_emails ce
                           JOIN campaigns c ON c.id = ce.campaign_id
                           WHERE c.merchant_id = ?1 AND ce.worker_name IN ({placeholders})
                       )
                     ORDER BY rp.recipient ASC, rp.sequence_order ASC"
                );
                let mut query = sqlx::query(&sql).bind(merchant_id.to_string());
                for worker in workers {
                    query = query.bind(worker);
                }
                query.fetch_all(&self.pool).await?
            }
            _ => {
                sqlx::query(
                    "SELECT * FROM recipient_paths
                     WHERE merchant_id = ?1
                     ORDER BY recipient ASC, sequence_order ASC",
                )
                .bind(merchant_id.to_string())
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(entry_from_row).collect()
    }

    /// Mark every recipient who saw `root` as a new user with `root` as
    /// their first root campaign, unless a first root is already set.
    /// Returns the number of recipients marked.
    pub async fn mark_new_users_for_root(
        &self,
        merchant_id: MerchantId,
        root: CampaignId,
    ) -> Result<u64, StateError> {
        let result = sqlx::query(
            "UPDATE recipient_paths
             SET is_new_user = 1, first_root_campaign_id = ?2
             WHERE merchant_id = ?1
               AND first_root_campaign_id IS NULL
               AND recipient IN (
                   SELECT recipient FROM recipient_paths
                   WHERE merchant_id = ?1 AND campaign_id = ?2
               )",
        )
        .bind(merchant_id.to_string())
        .bind(root.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Clear every new-user flag and first-root assignment at a merchant.
    pub async fn clear_new_users(&self, merchant_id: MerchantId) -> Result<u64, StateError> {
        let result = sqlx::query(
            "UPDATE recipient_paths
             SET is_new_user = 0, first_root_campaign_id = NULL
             WHERE merchant_id = ?1",
        )
        .bind(merchant_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Batch-assign first-root campaigns per recipient in one transaction.
    pub async fn assign_first_roots(
        &self,
        merchant_id: MerchantId,
        assignments: &[(String, CampaignId)],
    ) -> Result<(), StateError> {
        let mut tx = self.pool.begin().await?;
        for (recipient, root) in assignments {
            sqlx::query(
                "UPDATE recipient_paths
                 SET is_new_user = 1, first_root_campaign_id = ?3
                 WHERE merchant_id = ?1 AND recipient = ?2",
            )
            .bind(merchant_id.to_string())
            .bind(recipient)
            .bind(root.to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Delete every path row at a merchant (used by rebuild). Returns the
    /// number of rows removed.
    pub async fn delete_all_for_merchant(
        &self,
        merchant_id: MerchantId,
    ) -> Result<u64, StateError> {
        let result = sqlx::query("DELETE FROM recipient_paths WHERE merchant_id = ?1")
            .bind(merchant_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use mailsieve_core::campaign_subject_hash;

    async fn seed() -> (SqliteStore, MerchantId, Vec<CampaignId>) {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let (merchant, _) = store.merchants().upsert_by_domain("m.com").await.unwrap();
        let mut ids = Vec::new();
        for subject in ["A", "B", "C"] {
            let (campaign, _) = store
                .campaigns()
                .upsert(
                    merchant.id,
                    subject,
                    &campaign_subject_hash(subject),
                    Utc::now(),
                )
                .await
                .unwrap();
            ids.push(campaign.id);
        }
        (store, merchant.id, ids)
    }

    #[tokio::test]
    async fn appends_are_sequential_and_idempotent() {
        let (store, merchant, campaigns) = seed().await;
        let paths = store.paths();
        let t0 = Utc::now();

        // A, B, A (repeat), C: the repeat must not create a row.
        assert!(paths.append_if_absent(merchant, "r@x.com", campaigns[0], t0).await.unwrap());
        assert!(paths.append_if_absent(merchant, "r@x.com", campaigns[1], t0).await.unwrap());
        assert!(!paths.append_if_absent(merchant, "r@x.com", campaigns[0], t0).await.unwrap());
        assert!(paths.append_if_absent(merchant, "r@x.com", campaigns[2], t0).await.unwrap());

        let path = paths.path_for(merchant, "r@x.com").await.unwrap();
        let orders: Vec<i64> = path.iter().map(|p| p.sequence_order).collect();
        assert_eq!(orders, [0, 1, 2]);
        let ids: Vec<CampaignId> = path.iter().map(|p| p.campaign_id).collect();
        assert_eq!(ids, [campaigns[0], campaigns[1], campaigns[2]]);
    }

    #[tokio::test]
    async fn root_marking_skips_assigned_recipients() {
        let (store, merchant, campaigns) = seed().await;
        let paths = store.paths();
        let t0 = Utc::now();

        paths.append_if_absent(merchant, "r1@x.com", campaigns[0], t0).await.unwrap();
        paths.append_if_absent(merchant, "r1@x.com", campaigns[1], t0).await.unwrap();
        paths.append_if_absent(merchant, "r2@x.com", campaigns[1], t0).await.unwrap();

        let marked = paths
            .mark_new_users_for_root(merchant, campaigns[0])
            .await
            .unwrap();
        assert_eq!(marked, 2); // both of r1's rows

        // r1 already has a first root; marking campaign B must not steal it.
        let marked = paths
            .mark_new_users_for_root(merchant, campaigns[1])
            .await
            .unwrap();
        assert_eq!(marked, 1); // only r2

        let r1 = paths.path_for(merchant, "r1@x.com").await.unwrap();
        assert!(r1.iter().all(|p| p.first_root_campaign_id == Some(campaigns[0])));
        let r2 = paths.path_for(merchant, "r2@x.com").await.unwrap();
        assert!(r2.iter().all(|p| p.first_root_campaign_id == Some(campaigns[1])));
    }

    #[tokio::test]
    async fn worker_filter_restricts_by_email_presence() {
        let (store, merchant, campaigns) = seed().await;
        let paths = store.paths();
        let t0 = Utc::now();

        paths.append_if_absent(merchant, "r1@x.com", campaigns[0], t0).await.unwrap();
        paths.append_if_absent(merchant, "r2@x.com", campaigns[0], t0).await.unwrap();

        for (recipient, worker) in [("r1@x.com", "w1"), ("r2@x.com", "w2")] {
            store
                .campaigns()
                .record_email(&mailsieve_core::CampaignEmail {
                    id: uuid::Uuid::new_v4(),
                    campaign_id: campaigns[0],
                    recipient: recipient.to_owned(),
                    received_at: t0,
                    worker_name: worker.to_owned(),
                })
                .await
                .unwrap();
        }

        let w1 = vec!["w1".to_owned()];
        let filtered = paths.all_paths(merchant, Some(&w1)).await.unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].recipient, "r1@x.com");

        let unrestricted = paths.all_paths(merchant, None).await.unwrap();
        assert_eq!(unrestricted.len(), 2);
    }
}
