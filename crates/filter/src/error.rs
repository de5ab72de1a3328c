use thiserror::Error;

use mailsieve_state::StateError;

/// Errors from the filter engine and dynamic-rule detector.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error(transparent)]
    State(#[from] StateError),

    #[error("invalid rule: {0}")]
    InvalidRule(String),
}
