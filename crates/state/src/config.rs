use std::path::{Path, PathBuf};

use crate::error::StateError;

/// Candidate store locations probed when no environment variable selects
/// one, in order.
const DEFAULT_CANDIDATES: &[&str] = &[
    "./mailsieve.db",
    "./data/mailsieve.db",
    "/var/lib/mailsieve/mailsieve.db",
];

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path of the SQLite database file. `:memory:` opens an in-memory
    /// store (used by tests).
    pub path: PathBuf,
    /// Connection pool size.
    pub pool_size: u32,
    /// How long a connection waits on a locked database before giving up,
    /// milliseconds.
    pub busy_timeout_ms: u64,
}

impl StoreConfig {
    /// Configuration for a store at an explicit path.
    #[must_use]
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pool_size: 5,
            busy_timeout_ms: 5_000,
        }
    }

    /// An in-memory store for tests.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::at(":memory:")
    }

    /// Whether this is an in-memory store.
    #[must_use]
    pub fn is_in_memory(&self) -> bool {
        self.path.as_os_str() == ":memory:"
    }
}

/// Resolve the database path from the environment contract.
///
/// `DB_PATH` wins, then `DATABASE_PATH`, then the first candidate whose
/// parent directory exists. Returns [`StateError::UnresolvedPath`] when
/// nothing resolves; the binary exits non-zero on that error.
pub fn resolve_database_path() -> Result<PathBuf, StateError> {
    for var in ["DB_PATH", "DATABASE_PATH"] {
        if let Ok(value) = std::env::var(var) {
            if !value.is_empty() {
                return Ok(PathBuf::from(value));
            }
        }
    }

    for candidate in DEFAULT_CANDIDATES {
        let path = Path::new(candidate);
        let parent_exists = path
            .parent()
            .map_or(false, |parent| parent.as_os_str().is_empty() || parent.exists());
        if path.exists() || parent_exists {
            return Ok(path.to_path_buf());
        }
    }

    Err(StateError::UnresolvedPath)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_path_config() {
        let config = StoreConfig::at("/tmp/x.db");
        assert_eq!(config.path, PathBuf::from("/tmp/x.db"));
        assert!(!config.is_in_memory());
        assert!(StoreConfig::in_memory().is_in_memory());
    }
}
