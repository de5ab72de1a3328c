use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use mailsieve_core::{
    campaign_subject_hash, extract_domain, AnalysisStatus, Campaign, CampaignEmail, EmailEvent,
    Merchant, SecondLevelTlds,
};
use mailsieve_state::{CampaignStore, MerchantStore, PathStore, StatsStore};

use crate::error::AnalyticsError;

/// Subject keywords that mark a campaign as a root candidate when they
/// occur in its subject (case-insensitive substring).
const DEFAULT_ROOT_KEYWORDS: &[&str] = &[
    "welcome", "verify", "confirm", "activate", "registration", "sign up",
];

/// What happened to one tracked email.
#[derive(Debug, Clone)]
pub enum TrackOutcome {
    /// The full graph was updated.
    Tracked {
        merchant: Merchant,
        campaign: Campaign,
        /// Whether this email extended the recipient's path.
        path_extended: bool,
    },
    /// The merchant is ignored for this worker; only its email total was
    /// bumped.
    SkippedIgnored { merchant: Merchant },
    /// The sender address did not yield a usable merchant domain.
    SkippedInvalidSender,
}

/// Ingestion side of the campaign graph: merchant identification,
/// campaign dedup, raw email append, and recipient-path extension.
pub struct CampaignTracker {
    merchants: MerchantStore,
    campaigns: CampaignStore,
    paths: PathStore,
    stats: StatsStore,
    tlds: Arc<SecondLevelTlds>,
    root_keywords: Vec<String>,
}

impl CampaignTracker {
    #[must_use]
    pub fn new(
        merchants: MerchantStore,
        campaigns: CampaignStore,
        paths: PathStore,
        stats: StatsStore,
        tlds: Arc<SecondLevelTlds>,
    ) -> Self {
        Self {
            merchants,
            campaigns,
            paths,
            stats,
            tlds,
            root_keywords: DEFAULT_ROOT_KEYWORDS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
        }
    }

    /// Replace the root-candidate keyword set.
    #[must_use]
    pub fn with_root_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.root_keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Track an email through the full graph regardless of analysis
    /// status.
    pub async fn track_email(&self, event: &EmailEvent) -> Result<TrackOutcome, AnalyticsError> {
        self.track_inner(event, false).await
    }

    /// Track an email, skipping the graph for merchants marked ignored
    /// (globally or for the submitting worker) while still counting the
    /// email against the merchant total.
    pub async fn track_email_selective(
        &self,
        event: &EmailEvent,
    ) -> Result<TrackOutcome, AnalyticsError> {
        self.track_inner(event, true).await
    }

    async fn track_inner(
        &self,
        event: &EmailEvent,
        selective: bool,
    ) -> Result<TrackOutcome, AnalyticsError> {
        let Some(domain) = extract_domain(&event.from, &self.tlds) else {
            debug!(sender = %event.from, "sender yields no merchant domain, skipping");
            return Ok(TrackOutcome::SkippedInvalidSender);
        };

        let worker = event.worker();
        let subject_hash = campaign_subject_hash(&event.subject);
        let (merchant, _is_new) = self.merchants.upsert_by_domain(&domain).await?;

        // Subject statistics accumulate for every sighting, ignored or not.
        self.stats
            .bump(
                &event.subject,
                &subject_hash,
                &domain,
                worker,
                event.timestamp,
                1,
            )
            .await?;

        if selective {
            let status = self.merchants.status_for_worker(merchant.id, worker).await?;
            if status == Some(AnalysisStatus::Ignored) {
                self.merchants.increment_totals(merchant.id, 1, 0).await?;
                return Ok(TrackOutcome::SkippedIgnored { merchant });
            }
        }

        let (campaign, is_new_campaign) = self
            .campaigns
            .upsert(merchant.id, &event.subject, &subject_hash, event.timestamp)
            .await?;

        if is_new_campaign && self.is_root_candidate_subject(&event.subject) {
            self.campaigns.set_root_candidate(campaign.id, true).await?;
        }

        self.merchants.increment_totals(merchant.id, 1, 0).await?;

        self.campaigns
            .record_email(&CampaignEmail {
                id: Uuid::new_v4(),
                campaign_id: campaign.id,
                recipient: event.to.clone(),
                received_at: event.timestamp,
                worker_name: worker.to_owned(),
            })
            .await?;

        let path_extended = self
            .paths
            .append_if_absent(merchant.id, &event.to, campaign.id, event.timestamp)
            .await?;
        if path_extended {
            self.campaigns
                .increment_unique_recipients(campaign.id, 1)
                .await?;
        }

        Ok(TrackOutcome::Tracked {
            merchant,
            campaign,
            path_extended,
        })
    }

    fn is_root_candidate_subject(&self, subject: &str) -> bool {
        let subject = subject.to_lowercase();
        self.root_keywords
            .iter()
            .any(|keyword| subject.contains(keyword.as_str()))
    }
}
