use thiserror::Error;

use mailsieve_analytics::AnalyticsError;
use mailsieve_core::ValidationError;
use mailsieve_filter::FilterError;
use mailsieve_monitor::MonitorError;
use mailsieve_state::StateError;

/// Errors from the gateway surface.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Analytics(#[from] AnalyticsError),

    #[error(transparent)]
    Monitor(#[from] MonitorError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("rule not found: {0}")]
    RuleNotFound(String),
}
