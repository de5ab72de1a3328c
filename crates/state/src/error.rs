use thiserror::Error;

/// Errors from the storage layer.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("database path could not be resolved; set DB_PATH or DATABASE_PATH")]
    UnresolvedPath,
}

impl StateError {
    /// Whether retrying the containing transaction may succeed.
    ///
    /// SQLite surfaces contention as `SQLITE_BUSY`/`SQLITE_LOCKED`; those
    /// are worth a bounded retry with backoff. Constraint violations and
    /// malformed rows are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Backend(message) | Self::Connection(message) => {
                message.contains("database is locked") || message.contains("database table is locked")
            }
            _ => false,
        }
    }
}

impl From<sqlx::Error> for StateError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound("row not found".to_owned()),
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed => {
                Self::Connection(err.to_string())
            }
            other => Self::Backend(other.to_string()),
        }
    }
}

/// Whether a database error is a unique-constraint violation.
///
/// Duplicate inserts on idempotent paths (recipient-path triples,
/// merchant domains) are treated as no-ops, not failures.
#[must_use]
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locked_errors_are_transient() {
        assert!(StateError::Backend("database is locked".into()).is_transient());
        assert!(!StateError::Backend("no such table: x".into()).is_transient());
        assert!(!StateError::UnresolvedPath.is_transient());
    }
}
