use std::collections::HashSet;

use tokio_util::sync::CancellationToken;
use tracing::info;

use mailsieve_core::{CampaignId, MerchantId};
use mailsieve_state::{CampaignStore, PathStore};

use crate::error::AnalyticsError;
use crate::roots::RootManager;

/// Outcome of a recipient-path rebuild.
#[derive(Debug, Clone, Copy, Default)]
pub struct RebuildSummary {
    pub paths_deleted: u64,
    pub paths_created: u64,
    pub recipients: u64,
    pub new_users_assigned: u64,
}

/// Rebuild a merchant's recipient paths from the raw email rows.
///
/// Drops every existing path row, replays campaign emails ordered by
/// `(recipient, received_at)` appending each campaign the first time a
/// recipient meets it, then re-derives the new-user flags from confirmed
/// roots. With a worker set, only emails from those workers are replayed.
pub struct PathRebuilder {
    campaigns: CampaignStore,
    paths: PathStore,
    roots: RootManager,
}

impl PathRebuilder {
    #[must_use]
    pub fn new(campaigns: CampaignStore, paths: PathStore, roots: RootManager) -> Self {
        Self {
            campaigns,
            paths,
            roots,
        }
    }

    /// A cancelled token stops the replay after the in-flight append;
    /// the operation is idempotent and a re-run completes it.
    pub async fn rebuild(
        &self,
        merchant_id: MerchantId,
        workers: Option<&[String]>,
        cancel: &CancellationToken,
    ) -> Result<RebuildSummary, AnalyticsError> {
        let mut summary = RebuildSummary {
            paths_deleted: self.paths.delete_all_for_merchant(merchant_id).await?,
            ..RebuildSummary::default()
        };

        let emails = self.campaigns.emails_for_merchant(merchant_id, workers).await?;

        let mut seen: HashSet<(String, CampaignId)> = HashSet::new();
        let mut recipients: HashSet<String> = HashSet::new();
        for email in &emails {
            if cancel.is_cancelled() {
                info!(merchant = %merchant_id, "path rebuild cancelled mid-replay");
                break;
            }
            recipients.insert(email.recipient.clone());
            if !seen.insert((email.recipient.clone(), email.campaign_id)) {
                continue;
            }
            let inserted = self
                .paths
                .append_if_absent(
                    merchant_id,
                    &email.recipient,
                    email.campaign_id,
                    email.received_at,
                )
                .await?;
            if inserted {
                summary.paths_created += 1;
            }
        }
        summary.recipients = recipients.len() as u64;

        // Recount unique recipients now that the path set changed.
        self.campaigns.recompute_counters(merchant_id).await?;

        summary.new_users_assigned = self.roots.recalculate_all_new_users(merchant_id).await?;

        info!(
            merchant = %merchant_id,
            deleted = summary.paths_deleted,
            created = summary.paths_created,
            recipients = summary.recipients,
            "recipient paths rebuilt"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use mailsieve_core::{campaign_subject_hash, CampaignEmail};
    use mailsieve_state::SqliteStore;

    #[tokio::test]
    async fn rebuild_replays_emails_in_received_order() {
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

        let t0 = Utc::now();
        // B arrives before A for this recipient, plus a duplicate of B.
        for (campaign, offset) in [(campaigns[1], 0), (campaigns[0], 10), (campaigns[1], 20)] {
            store
                .campaigns()
                .record_email(&CampaignEmail {
                    id: uuid::Uuid::new_v4(),
                    campaign_id: campaign,
                    recipient: "r@x.com".into(),
                    received_at: t0 + Duration::minutes(offset),
                    worker_name: "w1".into(),
                })
                .await
                .unwrap();
        }

        // A stale path in the wrong order gets thrown away.
        store
            .paths()
            .append_if_absent(merchant.id, "r@x.com", campaigns[0], t0)
            .await
            .unwrap();

        let rebuilder = PathRebuilder::new(
            store.campaigns(),
            store.paths(),
            RootManager::new(store.campaigns(), store.paths()),
        );
        let summary = rebuilder
            .rebuild(merchant.id, None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.paths_deleted, 1);
        assert_eq!(summary.paths_created, 2);
        assert_eq!(summary.recipients, 1);

        let path = store.paths().path_for(merchant.id, "r@x.com").await.unwrap();
        let ids: Vec<CampaignId> = path.iter().map(|p| p.campaign_id).collect();
        assert_eq!(ids, [campaigns[1], campaigns[0]]);

        let reloaded = store.campaigns().get(campaigns[1]).await.unwrap().unwrap();
        assert_eq!(reloaded.unique_recipients, 1);
    }

    #[tokio::test]
    async fn rebuild_respects_worker_filter() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let (merchant, _) = store.merchants().upsert_by_domain("m.com").await.unwrap();
        let (campaign, _) = store
            .campaigns()
            .upsert(merchant.id, "A", &campaign_subject_hash("A"), Utc::now())
            .await
            .unwrap();

        for (recipient, worker) in [("r1@x.com", "w1"), ("r2@x.com", "w2")] {
            store
                .campaigns()
                .record_email(&CampaignEmail {
                    id: uuid::Uuid::new_v4(),
                    campaign_id: campaign.id,
                    recipient: recipient.into(),
                    received_at: Utc::now(),
                    worker_name: worker.into(),
                })
                .await
                .unwrap();
        }

        let rebuilder = PathRebuilder::new(
            store.campaigns(),
            store.paths(),
            RootManager::new(store.campaigns(), store.paths()),
        );
        let w1 = vec!["w1".to_owned()];
        let summary = rebuilder
            .rebuild(merchant.id, Some(&w1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(summary.paths_created, 1);

        assert_eq!(
            store.paths().path_for(merchant.id, "r1@x.com").await.unwrap().len(),
            1
        );
        assert!(store.paths().path_for(merchant.id, "r2@x.com").await.unwrap().is_empty());
    }
}
