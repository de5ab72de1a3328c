use thiserror::Error;

use mailsieve_core::ValidationError;
use mailsieve_state::StateError;

/// Errors from the monitoring layer.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("monitoring rule not found: {0}")]
    RuleNotFound(String),
}
