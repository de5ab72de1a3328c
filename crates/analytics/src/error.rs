use thiserror::Error;

use mailsieve_state::StateError;

/// Errors from the campaign analytics layer.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("merchant not found: {0}")]
    MerchantNotFound(String),

    #[error("campaign not found: {0}")]
    CampaignNotFound(String),
}
