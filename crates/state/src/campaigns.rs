use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use mailsieve_core::{Campaign, CampaignEmail, CampaignId, MerchantId};

use crate::error::{is_unique_violation, StateError};

/// Repository for campaigns and their raw email rows.
#[derive(Debug, Clone)]
pub struct CampaignStore {
    pool: SqlitePool,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn campaign_from_row(row: &SqliteRow) -> Result<Campaign, StateError> {
    let id: String = row.try_get("id")?;
    let merchant_id: String = row.try_get("merchant_id")?;
    let tag: i64 = row.try_get("tag")?;
    Ok(Campaign {
        id: CampaignId::parse(&id).map_err(|e| StateError::Serialization(e.to_string()))?,
        merchant_id: MerchantId::parse(&merchant_id)
            .map_err(|e| StateError::Serialization(e.to_string()))?,
        subject: row.try_get("subject")?,
        subject_hash: row.try_get("subject_hash")?,
        tag: tag as u8,
        is_root: row.try_get("is_root")?,
        is_root_candidate: row.try_get("is_root_candidate")?,
        total_emails: row.try_get("total_emails")?,
        unique_recipients: row.try_get("unique_recipients")?,
        first_seen_at: row.try_get("first_seen_at")?,
        last_seen_at: row.try_get("last_seen_at")?,
    })
}

fn email_from_row(row: &SqliteRow) -> Result<CampaignEmail, StateError> {
    let id: String = row.try_get("id")?;
    let campaign_id: String = row.try_get("campaign_id")?;
    Ok(CampaignEmail {
        id: uuid::Uuid::parse_str(&id).map_err(|e| StateError::Serialization(e.to_string()))?,
        campaign_id: CampaignId::parse(&campaign_id)
            .map_err(|e| StateError::Serialization(e.to_string()))?,
        recipient: row.try_get("recipient")?,
        received_at: row.try_get("received_at")?,
        worker_name: row.try_get("worker_name")?,
    })
}

impl CampaignStore {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, id: CampaignId) -> Result<Option<Campaign>, StateError> {
        let row = sqlx::query("SELECT * FROM campaigns WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(campaign_from_row).transpose()
    }

    pub async fn get_by_hash(
        &self,
        merchant_id: MerchantId,
        subject_hash: &str,
    ) -> Result<Option<Campaign>, StateError> {
        let row = sqlx::query(
            "SELECT * FROM campaigns WHERE merchant_id = ?1 AND subject_hash = ?2",
        )
        .bind(merchant_id.to_string())
        .bind(subject_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(campaign_from_row).transpose()
    }

    /// Deduplicate a sighting into its campaign.
    ///
    /// On hit the email total is bumped and `last_seen_at` advanced (never
    /// rewound). On miss the campaign is created alongside the merchant's
    /// `total_campaigns` bump, in one transaction. Returns the campaign
    /// and whether it is new.
    pub async fn upsert(
        &self,
        merchant_id: MerchantId,
        subject: &str,
        subject_hash: &str,
        received_at: DateTime<Utc>,
    ) -> Result<(Campaign, bool), StateError> {
        if let Some(existing) = self.get_by_hash(merchant_id, subject_hash).await? {
            sqlx::query(
                "UPDATE campaigns
                 SET total_emails = total_emails + 1,
                     last_seen_at = MAX(last_seen_at, ?2)
                 WHERE id = ?1",
            )
            .bind(existing.id.to_string())
            .bind(received_at)
            .execute(&self.pool)
            .await?;
            let refreshed = self.get(existing.id).await?.unwrap_or(existing);
            return Ok((refreshed, false));
        }

        let campaign = Campaign::new(merchant_id, subject, subject_hash, received_at);
        let mut tx = self.pool.begin().await?;
        let insert = sqlx::query(
            "INSERT INTO campaigns
                (id, merchant_id, subject, subject_hash, tag, is_root, is_root_candidate,
                 total_emails, unique_recipients, first_seen_at, last_seen_at)
             VALUES (?1, ?2, ?3, ?4, 0, 0, 0, 1, 0, ?5, ?5)",
        )
        .bind(campaign.id.to_string())
        .bind(merchant_id.to_string())
        .bind(subject)
        .bind(subject_hash)
        .bind(received_at)
        .execute(&mut *tx)
        .await;

        match insert {
            Ok(_) => {
                sqlx::query(
                    "UPDATE merchants SET total_campaigns = total_campaigns + 1 WHERE id = ?1",
                )
                .bind(merchant_id.to_string())
                .execute(&mut *tx)
                .await?;
                tx.commit().await?;
                Ok((campaign, true))
            }
            Err(err) if is_unique_violation(&err) => {
                tx.rollback().await?;
                // Lost a race with a concurrent insert; fold into the hit path.
                let existing = self
                    .get_by_hash(merchant_id, subject_hash)
                    .await?
                    .ok_or_else(|| {
                        StateError::Backend("campaign vanished mid-upsert".to_owned())
                    })?;
                sqlx::query(
                    "UPDATE campaigns
                     SET total_emails = total_emails + 1,
                         last_seen_at = MAX(last_seen_at, ?2)
                     WHERE id = ?1",
                )
                .bind(existing.id.to_string())
                .bind(received_at)
                .execute(&self.pool)
                .await?;
                Ok((existing, false))
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn list_by_merchant(
        &self,
        merchant_id: MerchantId,
    ) -> Result<Vec<Campaign>, StateError> {
        let rows = sqlx::query(
            "SELECT * FROM campaigns WHERE merchant_id = ?1 ORDER BY first_seen_at ASC, id ASC",
        )
        .bind(merchant_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(campaign_from_row).collect()
    }

    pub async fn record_email(&self, email: &CampaignEmail) -> Result<(), StateError> {
        sqlx::query(
            "INSERT INTO campaign_emails (id, campaign_id, recipient, received_at, worker_name)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(email.id.to_string())
        .bind(email.campaign_id.to_string())
        .bind(&email.recipient)
        .bind(email.received_at)
        .bind(&email.worker_name)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_tag(&self, id: CampaignId, tag: u8) -> Result<bool, StateError> {
        let result = sqlx::query("UPDATE campaigns SET tag = ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(i64::from(tag))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_root(&self, id: CampaignId, is_root: bool) -> Result<bool, StateError> {
        let result = sqlx::query("UPDATE campaigns SET is_root = ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(is_root)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_root_candidate(
        &self,
        id: CampaignId,
        is_candidate: bool,
    ) -> Result<bool, StateError> {
        let result = sqlx::query("UPDATE campaigns SET is_root_candidate = ?2 WHERE id = ?1")
            .bind(id.to_string())
            .bind(is_candidate)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn increment_unique_recipients(
        &self,
        id: CampaignId,
        delta: i64,
    ) -> Result<(), StateError> {
        sqlx::query(
            "UPDATE campaigns SET unique_recipients = unique_recipients + ?2 WHERE id = ?1",
        )
        .bind(id.to_string())
        .bind(delta)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Ids of confirmed root campaigns at a merchant.
    pub async fn confirmed_roots(
        &self,
        merchant_id: MerchantId,
    ) -> Result<Vec<CampaignId>, StateError> {
        let rows = sqlx::query(
            "SELECT id FROM campaigns WHERE merchant_id = ?1 AND is_root = 1",
        )
        .bind(merchant_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                CampaignId::parse(&id).map_err(|e| StateError::Serialization(e.to_string()))
            })
            .collect()
    }

    /// Every raw email of a merchant, ordered for path replay.
    pub async fn emails_for_merchant(
        &self,
        merchant_id: MerchantId,
        workers: Option<&[String]>,
    ) -> Result<Vec<CampaignEmail>, StateError> {
        let base = "SELECT ce.* FROM campaign_emails ce
             JOIN campaigns c ON c.id = ce.campaign_id
             WHERE c.merchant_id = ?1";
        let rows = match workers {
            Some(workers) if !workers.is_empty() => {
                let placeholders = (0..workers.len())
                    .map(|i| format!("?{}", i + 2))
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "{base} AND ce.worker_name IN ({placeholders})
                     ORDER BY ce.recipient ASC, ce.received_at ASC"
                );
                let mut query = sqlx::query(&sql).bind(merchant_id.to_string());
                for worker in workers {
                    query = query.bind(worker);
                }
                query.fetch_all(&self.pool).await?
            }
            _ => {
                let sql = format!("{base} ORDER BY ce.recipient ASC, ce.received_at ASC");
                sqlx::query(&sql)
                    .bind(merchant_id.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(email_from_row).collect()
    }

    /// Reconcile the cached aggregates from the raw rows: per-campaign
    /// email totals and unique recipients, then the merchant totals.
    /// Returns the number of campaigns touched.
    pub async fn recompute_counters(&self, merchant_id: MerchantId) -> Result<u64, StateError> {
        let mut tx = self.pool.begin().await?;

        let touched = sqlx::query(
            "UPDATE campaigns SET
                total_emails = (SELECT COUNT(*) FROM campaign_emails ce WHERE ce.campaign_id = campaigns.id),
                unique_recipients = (SELECT COUNT(*) FROM recipient_paths rp WHERE rp.campaign_id = campaigns.id)
             WHERE merchant_id = ?1",
        )
        .bind(merchant_id.to_string())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            "UPDATE merchants SET
                total_campaigns = (SELECT COUNT(*) FROM campaigns c WHERE c.merchant_id = merchants.id),
                total_emails = (SELECT COUNT(*) FROM campaign_emails ce
                                JOIN campaigns c ON c.id = ce.campaign_id
                                WHERE c.merchant_id = merchants.id)
             WHERE id = ?1",
        )
        .bind(merchant_id.to_string())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(touched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use mailsieve_core::campaign_subject_hash;

    #[tokio::test]
    async fn upsert_dedups_by_subject_hash() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let (merchant, _) = store.merchants().upsert_by_domain("foo.com").await.unwrap();
        let campaigns = store.campaigns();

        let t0 = Utc::now();
        let hash = campaign_subject_hash("Welcome!");
        let (first, is_new) = campaigns
            .upsert(merchant.id, "Welcome!", &hash, t0)
            .await
            .unwrap();
        assert!(is_new);
        assert_eq!(first.total_emails, 1);

        let later = t0 + chrono::Duration::hours(1);
        let (second, is_new) = campaigns
            .upsert(merchant.id, "Welcome!", &hash, later)
            .await
            .unwrap();
        assert!(!is_new);
        assert_eq!(second.id, first.id);
        assert_eq!(second.total_emails, 2);
        assert_eq!(second.last_seen_at, later);

        // Out-of-order delivery never rewinds last_seen_at.
        let (third, _) = campaigns
            .upsert(merchant.id, "Welcome!", &hash, t0)
            .await
            .unwrap();
        assert_eq!(third.last_seen_at, later);

        let reloaded = store.merchants().get(merchant.id).await.unwrap().unwrap();
        assert_eq!(reloaded.total_campaigns, 1);
    }

    #[tokio::test]
    async fn recompute_counters_reconciles_from_raw_rows() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let (merchant, _) = store.merchants().upsert_by_domain("foo.com").await.unwrap();
        let campaigns = store.campaigns();

        let hash = campaign_subject_hash("Sale");
        let (campaign, _) = campaigns
            .upsert(merchant.id, "Sale", &hash, Utc::now())
            .await
            .unwrap();
        for recipient in ["r1@x.com", "r2@x.com"] {
            campaigns
                .record_email(&CampaignEmail {
                    id: uuid::Uuid::new_v4(),
                    campaign_id: campaign.id,
                    recipient: recipient.to_owned(),
                    received_at: Utc::now(),
                    worker_name: "global".to_owned(),
                })
                .await
                .unwrap();
        }

        // Skew the cached counter, then reconcile.
        campaigns.increment_unique_recipients(campaign.id, 7).await.unwrap();
        campaigns.recompute_counters(merchant.id).await.unwrap();

        let reloaded = campaigns.get(campaign.id).await.unwrap().unwrap();
        assert_eq!(reloaded.total_emails, 2);
        assert_eq!(reloaded.unique_recipients, 0); // no path rows yet

        let merchant = store.merchants().get(merchant.id).await.unwrap().unwrap();
        assert_eq!(merchant.total_emails, 2);
        assert_eq!(merchant.total_campaigns, 1);
    }
}
