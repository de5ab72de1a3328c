use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::campaigns::CampaignStore;
use crate::cleanup::CleanupStore;
use crate::config::StoreConfig;
use crate::config_store::ConfigStore;
use crate::error::StateError;
use crate::logs::LogStore;
use crate::merchants::MerchantStore;
use crate::migrations;
use crate::monitor::MonitorStore;
use crate::paths::PathStore;
use crate::projects::ProjectStore;
use crate::rules::RuleStore;
use crate::stats::StatsStore;
use crate::tracker::TrackerStore;

/// SQLite-backed store for the whole control plane.
///
/// Owns the connection pool and hands out per-domain repositories that
/// clone it. Created with WAL journaling, foreign keys on, and a busy
/// timeout so writer contention surfaces as a retryable delay rather than
/// an immediate error.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the store at the configured path and run
    /// migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Connection`] if the pool cannot be created,
    /// or [`StateError::Backend`] if migrations fail.
    pub async fn open(config: &StoreConfig) -> Result<Self, StateError> {
        let options = if config.is_in_memory() {
            SqliteConnectOptions::from_str("sqlite::memory:")
                .map_err(|e| StateError::Connection(e.to_string()))?
        } else {
            SqliteConnectOptions::new()
                .filename(&config.path)
                .create_if_missing(true)
        }
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        // An in-memory database is per-connection; a pool larger than one
        // would hand out empty databases.
        let pool_size = if config.is_in_memory() { 1 } else { config.pool_size };

        let pool = SqlitePoolOptions::new()
            .max_connections(pool_size)
            .connect_with(options)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::run_migrations(&pool)
            .await
            .map_err(|e| StateError::Backend(e.to_string()))?;

        Ok(Self { pool })
    }

    /// An in-memory store for tests.
    pub async fn open_in_memory() -> Result<Self, StateError> {
        Self::open(&StoreConfig::in_memory()).await
    }

    /// The underlying pool.
    #[must_use]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Filter-rule repository (rules + side counters).
    #[must_use]
    pub fn rules(&self) -> RuleStore {
        RuleStore::new(self.pool.clone())
    }

    /// Subject-tracker repository feeding the dynamic detector.
    #[must_use]
    pub fn tracker(&self) -> TrackerStore {
        TrackerStore::new(self.pool.clone())
    }

    /// Dynamic-detector configuration repository.
    #[must_use]
    pub fn detector_config(&self) -> ConfigStore {
        ConfigStore::new(self.pool.clone())
    }

    /// Merchant repository (merchants + per-worker statuses).
    #[must_use]
    pub fn merchants(&self) -> MerchantStore {
        MerchantStore::new(self.pool.clone())
    }

    /// Campaign repository (campaigns + campaign emails).
    #[must_use]
    pub fn campaigns(&self) -> CampaignStore {
        CampaignStore::new(self.pool.clone())
    }

    /// Recipient-path repository.
    #[must_use]
    pub fn paths(&self) -> PathStore {
        PathStore::new(self.pool.clone())
    }

    /// Monitoring repository (rules, signal states, hit logs, alerts,
    /// ratio monitors).
    #[must_use]
    pub fn monitor(&self) -> MonitorStore {
        MonitorStore::new(self.pool.clone())
    }

    /// Subject-stats repository.
    #[must_use]
    pub fn stats(&self) -> StatsStore {
        StatsStore::new(self.pool.clone())
    }

    /// Activity-log repository.
    #[must_use]
    pub fn logs(&self) -> LogStore {
        LogStore::new(self.pool.clone())
    }

    /// Analysis-project repository.
    #[must_use]
    pub fn projects(&self) -> ProjectStore {
        ProjectStore::new(self.pool.clone())
    }

    /// Bulk retention/cleanup operations.
    #[must_use]
    pub fn cleanup(&self) -> CleanupStore {
        CleanupStore::new(self.pool.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_in_memory_runs_migrations() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        // Migrations are idempotent.
        migrations::run_migrations(store.pool()).await.unwrap();

        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM filter_rules")
                .fetch_one(store.pool())
                .await
                .unwrap();
        assert_eq!(count.0, 0);
    }

    #[tokio::test]
    async fn open_on_disk_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailsieve.db");
        let store = SqliteStore::open(&StoreConfig::at(&path)).await.unwrap();
        drop(store);
        assert!(path.exists());
    }
}
