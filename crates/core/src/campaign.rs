use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{CampaignId, MerchantId};

/// Analysis posture of a merchant (globally or per worker).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    /// Newly seen; awaiting an operator decision.
    Pending,
    /// Campaign graph is tracked.
    Active,
    /// Graph writes are skipped; cleanup may reap the merchant's data.
    Ignored,
}

impl AnalysisStatus {
    /// Stable string form used in storage.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Ignored => "ignored",
        }
    }

    /// Parse the stable string form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "active" => Some(Self::Active),
            "ignored" => Some(Self::Ignored),
            _ => None,
        }
    }
}

/// A distinct sender entity, identified by its root registrable domain.
///
/// `total_campaigns` and `total_emails` are eventually-consistent
/// denormalizations reconciled by the cleanup tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Merchant {
    pub id: MerchantId,
    /// Root domain, lowercased; unique.
    pub domain: String,
    pub display_name: Option<String>,
    pub note: Option<String>,
    pub analysis_status: AnalysisStatus,
    pub total_campaigns: i64,
    pub total_emails: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Merchant {
    /// A freshly discovered merchant with zeroed counters.
    #[must_use]
    pub fn new(domain: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: MerchantId::new(),
            domain: domain.into(),
            display_name: None,
            note: None,
            analysis_status: AnalysisStatus::Pending,
            total_campaigns: 0,
            total_emails: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-worker analysis override for a merchant. Unique on
/// `(merchant_id, worker_name)`; queries for the `global` worker fall
/// through to the merchant's own columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerchantWorkerStatus {
    pub merchant_id: MerchantId,
    pub worker_name: String,
    pub analysis_status: AnalysisStatus,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A (merchant, subject) pair; all emails with an identical subject from
/// one merchant share one campaign. Unique on `(merchant_id, subject_hash)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: CampaignId,
    pub merchant_id: MerchantId,
    pub subject: String,
    /// SHA-256 hex of the unnormalized subject.
    pub subject_hash: String,
    /// Operator-assigned tag, 0 through 4.
    pub tag: u8,
    /// Confirmed entry-point campaign.
    pub is_root: bool,
    /// Auto-detected entry-point candidate (keyword match).
    pub is_root_candidate: bool,
    pub total_emails: i64,
    pub unique_recipients: i64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

impl Campaign {
    /// A first-sighting campaign row.
    #[must_use]
    pub fn new(
        merchant_id: MerchantId,
        subject: impl Into<String>,
        subject_hash: impl Into<String>,
        seen_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CampaignId::new(),
            merchant_id,
            subject: subject.into(),
            subject_hash: subject_hash.into(),
            tag: 0,
            is_root: false,
            is_root_candidate: false,
            total_emails: 1,
            unique_recipients: 0,
            first_seen_at: seen_at,
            last_seen_at: seen_at,
        }
    }

    /// High-value or important-marketing campaigns drive the valuable-path
    /// analyses.
    #[must_use]
    pub fn is_valuable(&self) -> bool {
        self.tag == 1 || self.tag == 2
    }
}

/// One received email attributed to a campaign. Append-only from
/// ingestion; bulk-deleted by cleanup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignEmail {
    pub id: Uuid,
    pub campaign_id: CampaignId,
    pub recipient: String,
    pub received_at: DateTime<Utc>,
    /// Submitting worker, defaulted to `global`.
    pub worker_name: String,
}

/// One step of a recipient's ordered campaign path at a merchant.
///
/// Unique on `(merchant_id, recipient, campaign_id)`: a campaign appears
/// at most once per path. `sequence_order` is the 0-based insertion rank,
/// strictly increasing per `(merchant, recipient)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientPathEntry {
    pub merchant_id: MerchantId,
    pub recipient: String,
    pub campaign_id: CampaignId,
    pub sequence_order: i64,
    pub first_received_at: DateTime<Utc>,
    pub is_new_user: bool,
    pub first_root_campaign_id: Option<CampaignId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_status_roundtrip() {
        for status in [
            AnalysisStatus::Pending,
            AnalysisStatus::Active,
            AnalysisStatus::Ignored,
        ] {
            assert_eq!(AnalysisStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn valuable_is_derived_from_tag() {
        let mut campaign = Campaign::new(
            MerchantId::new(),
            "Welcome",
            "hash",
            Utc::now(),
        );
        assert!(!campaign.is_valuable());
        campaign.tag = 1;
        assert!(campaign.is_valuable());
        campaign.tag = 2;
        assert!(campaign.is_valuable());
        campaign.tag = 3;
        assert!(!campaign.is_valuable());
    }
}
