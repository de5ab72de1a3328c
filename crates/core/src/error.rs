use thiserror::Error;

/// A field-level validation failure at an interface boundary.
///
/// Carries the offending field name so callers can surface structured
/// errors without parsing the message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid {field}: {message}")]
pub struct ValidationError {
    /// Name of the field that failed validation.
    pub field: String,
    /// Human-readable description of the violation.
    pub message: String,
}

impl ValidationError {
    /// Create a validation error for the named field.
    #[must_use]
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors produced by the core domain layer.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed input at an interface boundary. The operation did not
    /// mutate anything.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A regex pattern failed to compile. Handled locally by the matcher;
    /// surfaced only from explicit `validate` calls.
    #[error("pattern does not compile: {0}")]
    InvalidPattern(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_names_field() {
        let err = ValidationError::new("timeWindowMinutes", "must be between 5 and 120");
        assert_eq!(err.field, "timeWindowMinutes");
        assert!(err.to_string().contains("timeWindowMinutes"));
    }
}
