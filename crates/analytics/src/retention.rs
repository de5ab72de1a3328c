use chrono::{Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::info;

use mailsieve_core::MerchantId;
use mailsieve_state::{
    CampaignStore, CleanupStore, CleanupSummary, LogStore, MerchantDataSummary, MerchantStore,
    TrackerStore,
};

use crate::error::AnalyticsError;

/// Knobs of the periodic retention pass.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Merchants left `pending` longer than this are reaped.
    pub pending_max_days: i64,
    /// Activity-log rows older than this are trimmed.
    pub log_retention_days: i64,
    /// Subject-tracker rows older than this are purged.
    pub tracker_retention_hours: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            pending_max_days: 30,
            log_retention_days: 30,
            tracker_retention_hours: 24,
        }
    }
}

/// Campaign-side retention: ignored/pending merchant reaping, stale path
/// removal, log and tracker trims, and the counter reconciliation pass.
///
/// Every operation is idempotent; a crashed pass simply repeats work on
/// the next tick.
pub struct RetentionManager {
    merchants: MerchantStore,
    campaigns: CampaignStore,
    cleanup: CleanupStore,
    logs: LogStore,
    tracker: TrackerStore,
    config: RetentionConfig,
}

impl RetentionManager {
    #[must_use]
    pub fn new(
        merchants: MerchantStore,
        campaigns: CampaignStore,
        cleanup: CleanupStore,
        logs: LogStore,
        tracker: TrackerStore,
        config: RetentionConfig,
    ) -> Self {
        Self {
            merchants,
            campaigns,
            cleanup,
            logs,
            tracker,
            config,
        }
    }

    /// Delete data of merchants marked ignored, scoped by worker
    /// (`"global"` cascades whole merchants).
    pub async fn cleanup_ignored_merchant_data(
        &self,
        worker: &str,
    ) -> Result<CleanupSummary, AnalyticsError> {
        let summary = self.cleanup.ignored_merchant_data(worker).await?;
        info!(
            worker,
            deleted = summary.items_deleted,
            affected = summary.items_affected,
            "ignored merchant data cleaned"
        );
        Ok(summary)
    }

    /// Delete data of merchants stuck in `pending` beyond `days`.
    pub async fn cleanup_old_pending_data(
        &self,
        days: i64,
        worker: &str,
    ) -> Result<CleanupSummary, AnalyticsError> {
        let cutoff = Utc::now() - Duration::days(days);
        let summary = self.cleanup.old_pending_data(cutoff, worker).await?;
        info!(
            worker,
            days,
            deleted = summary.items_deleted,
            "old pending merchant data cleaned"
        );
        Ok(summary)
    }

    /// Remove old-user path rows, keeping each recipient's first entry.
    pub async fn cleanup_old_user_paths(
        &self,
        merchant_id: MerchantId,
    ) -> Result<CleanupSummary, AnalyticsError> {
        Ok(self.cleanup.old_user_paths(merchant_id, true).await?)
    }

    /// Remove every old-user path row, first entries included.
    pub async fn cleanup_all_old_user_paths(
        &self,
        merchant_id: MerchantId,
    ) -> Result<CleanupSummary, AnalyticsError> {
        Ok(self.cleanup.old_user_paths(merchant_id, false).await?)
    }

    /// Remove paths of recipients never flagged as new users within the
    /// worker set. Campaign emails survive.
    pub async fn cleanup_old_customer_paths(
        &self,
        merchant_id: MerchantId,
        workers: Option<&[String]>,
    ) -> Result<CleanupSummary, AnalyticsError> {
        Ok(self.cleanup.old_customer_paths(merchant_id, workers).await?)
    }

    /// Remove one worker's footprint from a merchant; cascades the
    /// merchant away when its last email goes.
    pub async fn delete_merchant_data(
        &self,
        merchant_id: MerchantId,
        worker: &str,
    ) -> Result<MerchantDataSummary, AnalyticsError> {
        let summary = self.cleanup.delete_merchant_data(merchant_id, worker).await?;
        info!(
            merchant = %merchant_id,
            worker,
            emails = summary.emails_deleted,
            paths = summary.paths_deleted,
            merchant_deleted = summary.merchant_deleted,
            "merchant data deleted for worker"
        );
        Ok(summary)
    }

    /// The periodic pass run from the cleanup tick: pending-merchant
    /// reaping, log trim, tracker purge, and counter reconciliation. A
    /// cancelled token stops the reconciliation walk after the in-flight
    /// transaction.
    pub async fn run_periodic(&self, cancel: &CancellationToken) -> Result<(), AnalyticsError> {
        let pending = self
            .cleanup_old_pending_data(self.config.pending_max_days, "global")
            .await?;

        let logs_trimmed = self
            .logs
            .trim_before(Utc::now() - Duration::days(self.config.log_retention_days))
            .await?;

        let tracker_purged = self
            .tracker
            .purge_all_before(Utc::now() - Duration::hours(self.config.tracker_retention_hours))
            .await?;

        let mut campaigns_reconciled = 0u64;
        for merchant in self.merchants.list(None).await? {
            if cancel.is_cancelled() {
                info!("retention pass cancelled mid-reconciliation");
                break;
            }
            campaigns_reconciled += self.campaigns.recompute_counters(merchant.id).await?;
        }

        info!(
            pending_deleted = pending.items_deleted,
            logs_trimmed,
            tracker_purged,
            campaigns_reconciled,
            "retention pass complete"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailsieve_core::{campaign_subject_hash, AnalysisStatus, CampaignEmail, LogCategory, LogEntry};
    use mailsieve_state::SqliteStore;

    fn manager_for(store: &SqliteStore) -> RetentionManager {
        RetentionManager::new(
            store.merchants(),
            store.campaigns(),
            store.cleanup(),
            store.logs(),
            store.tracker(),
            RetentionConfig::default(),
        )
    }

    #[tokio::test]
    async fn periodic_pass_trims_and_reconciles() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let manager = manager_for(&store);

        let (merchant, _) = store.merchants().upsert_by_domain("m.com").await.unwrap();
        store
            .merchants()
            .set_status(merchant.id, AnalysisStatus::Active)
            .await
            .unwrap();
        let (campaign, _) = store
            .campaigns()
            .upsert(merchant.id, "A", &campaign_subject_hash("A"), Utc::now())
            .await
            .unwrap();
        store
            .campaigns()
            .record_email(&CampaignEmail {
                id: uuid::Uuid::new_v4(),
                campaign_id: campaign.id,
                recipient: "r@x.com".into(),
                received_at: Utc::now(),
                worker_name: "w1".into(),
            })
            .await
            .unwrap();

        let mut stale_log = LogEntry::new(LogCategory::System, "old");
        stale_log.created_at = Utc::now() - Duration::days(90);
        store.logs().insert_batch(&[stale_log]).await.unwrap();
        store
            .tracker()
            .append(None, "h", "s", Utc::now() - Duration::days(2))
            .await
            .unwrap();

        manager.run_periodic(&CancellationToken::new()).await.unwrap();

        assert!(store.logs().recent(None, 10).await.unwrap().is_empty());
        let merchant = store.merchants().get(merchant.id).await.unwrap().unwrap();
        assert_eq!(merchant.total_emails, 1);
    }

    #[tokio::test]
    async fn pending_reaper_only_hits_stale_merchants() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let manager = manager_for(&store);

        let (_fresh, _) = store.merchants().upsert_by_domain("fresh.com").await.unwrap();
        let (stale, _) = store.merchants().upsert_by_domain("stale.com").await.unwrap();
        // Backdate the stale merchant.
        sqlx::query("UPDATE merchants SET updated_at = ?2 WHERE id = ?1")
            .bind(stale.id.to_string())
            .bind(Utc::now() - Duration::days(60))
            .execute(store.pool())
            .await
            .unwrap();

        manager.cleanup_old_pending_data(30, "global").await.unwrap();

        assert!(store.merchants().get(stale.id).await.unwrap().is_none());
        assert!(store.merchants().get_by_domain("fresh.com").await.unwrap().is_some());
    }
}
