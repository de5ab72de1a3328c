use std::collections::HashMap;

use tracing::info;

use mailsieve_core::{CampaignId, MerchantId};
use mailsieve_state::{CampaignStore, PathStore};

use crate::error::AnalyticsError;

/// Root-campaign confirmation and new-user derivation.
///
/// A confirmed root campaign identifies recipients as new users: whoever
/// saw it gets flagged, with the root recorded as their first root unless
/// one is already assigned.
pub struct RootManager {
    campaigns: CampaignStore,
    paths: PathStore,
}

impl RootManager {
    #[must_use]
    pub fn new(campaigns: CampaignStore, paths: PathStore) -> Self {
        Self { campaigns, paths }
    }

    /// Confirm or revoke a campaign as root. Confirmation immediately
    /// marks its recipients.
    pub async fn set_root(
        &self,
        merchant_id: MerchantId,
        campaign_id: CampaignId,
        is_root: bool,
    ) -> Result<u64, AnalyticsError> {
        if !self.campaigns.set_root(campaign_id, is_root).await? {
            return Err(AnalyticsError::CampaignNotFound(campaign_id.to_string()));
        }
        if is_root {
            self.recalculate_new_users(merchant_id, campaign_id).await
        } else {
            self.recalculate_all_new_users(merchant_id).await
        }
    }

    /// Mark every recipient who saw `root` as a new user unless they
    /// already carry a first root. Returns rows touched.
    pub async fn recalculate_new_users(
        &self,
        merchant_id: MerchantId,
        root: CampaignId,
    ) -> Result<u64, AnalyticsError> {
        let marked = self.paths.mark_new_users_for_root(merchant_id, root).await?;
        info!(merchant = %merchant_id, root = %root, marked, "new users recalculated for root");
        Ok(marked)
    }

    /// Clear all flags, then assign each recipient the earliest-sequence
    /// confirmed root campaign on their path. Returns the number of
    /// recipients assigned.
    pub async fn recalculate_all_new_users(
        &self,
        merchant_id: MerchantId,
    ) -> Result<u64, AnalyticsError> {
        self.paths.clear_new_users(merchant_id).await?;

        let roots = self.campaigns.confirmed_roots(merchant_id).await?;
        if roots.is_empty() {
            return Ok(0);
        }

        let entries = self.paths.all_paths(merchant_id, None).await?;
        let mut first_root_per_recipient: HashMap<&str, CampaignId> = HashMap::new();
        // Entries arrive ordered by (recipient, sequence); the first root
        // hit per recipient wins.
        for entry in &entries {
            if roots.contains(&entry.campaign_id) {
                first_root_per_recipient
                    .entry(entry.recipient.as_str())
                    .or_insert(entry.campaign_id);
            }
        }

        let assignments: Vec<(String, CampaignId)> = first_root_per_recipient
            .into_iter()
            .map(|(recipient, root)| (recipient.to_owned(), root))
            .collect();
        self.paths
            .assign_first_roots(merchant_id, &assignments)
            .await?;

        info!(
            merchant = %merchant_id,
            recipients = assignments.len(),
            "all new users recalculated"
        );
        Ok(assignments.len() as u64)
    }
}
