//! SQLite storage layer for mailsieve.
//!
//! One [`SqliteStore`] owns the pool; per-domain repositories clone it.
//! The schema is created in place by [`migrations`] at open time. All
//! statements are prepared with runtime binding, and every multi-row
//! mutation runs inside a transaction.

pub mod campaigns;
pub mod cleanup;
pub mod config;
pub mod config_store;
pub mod error;
pub mod logs;
pub mod merchants;
pub mod migrations;
pub mod monitor;
pub mod paths;
pub mod projects;
pub mod retry;
pub mod rules;
pub mod stats;
pub mod store;
pub mod tracker;

pub use campaigns::CampaignStore;
pub use cleanup::{CleanupStore, CleanupSummary, MerchantDataSummary};
pub use config::{resolve_database_path, StoreConfig};
pub use config_store::ConfigStore;
pub use error::{is_unique_violation, StateError};
pub use logs::LogStore;
pub use merchants::MerchantStore;
pub use monitor::{HitMeta, MonitorStore};
pub use paths::PathStore;
pub use projects::ProjectStore;
pub use retry::{with_retry, DEFAULT_ATTEMPTS};
pub use rules::{RuleStatDelta, RuleStore};
pub use stats::{DomainSubjectSummary, StatsStore};
pub use store::SqliteStore;
pub use tracker::TrackerStore;
