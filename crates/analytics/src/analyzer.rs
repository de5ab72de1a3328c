use std::collections::{HashMap, HashSet};

use mailsieve_core::{Campaign, CampaignId, MerchantId};
use mailsieve_state::{CampaignStore, PathStore};

use crate::error::AnalyticsError;
use crate::graph::{
    branch_analysis, group_paths, transitions, valuable_campaign_reports, BranchAnalysis,
    CampaignTransition, PathGraph, RecipientPathView, ValuableCampaignReport,
};

/// Default share (percent) above which a branch counts as a main path.
pub const DEFAULT_MAIN_PATH_THRESHOLD: f64 = 5.0;

/// Read-side campaign analytics over the stored path graph.
///
/// Every query accepts an optional worker set; when present, all counts
/// are restricted to recipients with at least one email from those
/// workers.
pub struct CampaignAnalyzer {
    campaigns: CampaignStore,
    paths: PathStore,
}

impl CampaignAnalyzer {
    #[must_use]
    pub fn new(campaigns: CampaignStore, paths: PathStore) -> Self {
        Self { campaigns, paths }
    }

    async fn load_views(
        &self,
        merchant_id: MerchantId,
        workers: Option<&[String]>,
    ) -> Result<Vec<RecipientPathView>, AnalyticsError> {
        let entries = self.paths.all_paths(merchant_id, workers).await?;
        Ok(group_paths(&entries))
    }

    /// Distinct-recipient transition counts, heaviest first.
    pub async fn campaign_transitions(
        &self,
        merchant_id: MerchantId,
        workers: Option<&[String]>,
    ) -> Result<Vec<CampaignTransition>, AnalyticsError> {
        let views = self.load_views(merchant_id, workers).await?;
        Ok(transitions(&views))
    }

    /// Tiered branch breakdown of the merchant's paths.
    pub async fn branch_analysis(
        &self,
        merchant_id: MerchantId,
        workers: Option<&[String]>,
        main_path_threshold: f64,
    ) -> Result<BranchAnalysis, AnalyticsError> {
        let views = self.load_views(merchant_id, workers).await?;
        let valuable: HashSet<CampaignId> = self
            .valuable_campaigns(merchant_id)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        Ok(branch_analysis(&views, &valuable, main_path_threshold))
    }

    /// DAG levels over the full transition graph, seeded by
    /// zero-in-degree campaigns.
    pub async fn dag_levels(
        &self,
        merchant_id: MerchantId,
        workers: Option<&[String]>,
    ) -> Result<HashMap<CampaignId, u32>, AnalyticsError> {
        let views = self.load_views(merchant_id, workers).await?;
        Ok(PathGraph::from_paths(&views).dag_levels(None))
    }

    /// DAG levels over new-user paths only, seeded by confirmed root
    /// campaigns (zero-in-degree fallback when none is confirmed).
    pub async fn new_user_dag_levels(
        &self,
        merchant_id: MerchantId,
    ) -> Result<HashMap<CampaignId, u32>, AnalyticsError> {
        let views: Vec<RecipientPathView> = self
            .load_views(merchant_id, None)
            .await?
            .into_iter()
            .filter(|view| view.is_new_user)
            .collect();
        let roots = self.campaigns.confirmed_roots(merchant_id).await?;
        Ok(PathGraph::from_paths(&views).dag_levels(Some(&roots)))
    }

    /// Valuable campaigns with their top-5 predecessors/successors and
    /// DAG level.
    pub async fn valuable_campaign_analysis(
        &self,
        merchant_id: MerchantId,
        workers: Option<&[String]>,
    ) -> Result<Vec<ValuableCampaignReport>, AnalyticsError> {
        let views = self.load_views(merchant_id, workers).await?;
        let valuable: Vec<CampaignId> = self
            .valuable_campaigns(merchant_id)
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        let levels = PathGraph::from_paths(&views).dag_levels(None);
        Ok(valuable_campaign_reports(&views, &valuable, &levels))
    }

    async fn valuable_campaigns(
        &self,
        merchant_id: MerchantId,
    ) -> Result<Vec<Campaign>, AnalyticsError> {
        Ok(self
            .campaigns
            .list_by_merchant(merchant_id)
            .await?
            .into_iter()
            .filter(Campaign::is_valuable)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mailsieve_core::campaign_subject_hash;
    use mailsieve_state::SqliteStore;

    async fn seed() -> (SqliteStore, MerchantId, Vec<CampaignId>) {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let (merchant, _) = store.merchants().upsert_by_domain("m.com").await.unwrap();
        let mut ids = Vec::new();
        for subject in ["Welcome", "Offer", "Checkout"] {
            let (campaign, _) = store
                .campaigns()
                .upsert(merchant.id, subject, &campaign_subject_hash(subject), Utc::now())
                .await
                .unwrap();
            ids.push(campaign.id);
        }
        for recipient in ["r1@x.com", "r2@x.com"] {
            for id in &ids {
                store
                    .paths()
                    .append_if_absent(merchant.id, recipient, *id, Utc::now())
                    .await
                    .unwrap();
            }
        }
        (store, merchant.id, ids)
    }

    #[tokio::test]
    async fn transitions_and_levels_from_store() {
        let (store, merchant, campaigns) = seed().await;
        let analyzer = CampaignAnalyzer::new(store.campaigns(), store.paths());

        let transitions = analyzer.campaign_transitions(merchant, None).await.unwrap();
        assert_eq!(transitions.len(), 2);
        assert!(transitions.iter().all(|t| t.recipient_count == 2));

        let levels = analyzer.dag_levels(merchant, None).await.unwrap();
        assert_eq!(levels[&campaigns[0]], 1);
        assert_eq!(levels[&campaigns[2]], 3);
    }

    #[tokio::test]
    async fn valuable_analysis_uses_tags() {
        let (store, merchant, campaigns) = seed().await;
        store.campaigns().set_tag(campaigns[1], 1).await.unwrap();
        let analyzer = CampaignAnalyzer::new(store.campaigns(), store.paths());

        let reports = analyzer
            .valuable_campaign_analysis(merchant, None)
            .await
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].campaign_id, campaigns[1]);
        assert_eq!(reports[0].dag_level, 2);
        assert_eq!(reports[0].predecessors.len(), 1);
        assert_eq!(reports[0].successors.len(), 1);
    }
}
