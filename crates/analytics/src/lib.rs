//! Campaign analytics: merchant identification, campaign dedup, recipient
//! paths, DAG-level analyses, new-user derivation, subject statistics,
//! and retention over the whole graph.

pub mod analyzer;
pub mod error;
pub mod graph;
pub mod rebuild;
pub mod retention;
pub mod roots;
pub mod tracker;

pub use analyzer::{CampaignAnalyzer, DEFAULT_MAIN_PATH_THRESHOLD};
pub use error::AnalyticsError;
pub use graph::{
    BranchAnalysis, CampaignTransition, NeighborCount, PathBranch, PathGraph, RecipientPathView,
    ValuableCampaignReport,
};
pub use rebuild::{PathRebuilder, RebuildSummary};
pub use retention::{RetentionConfig, RetentionManager};
pub use roots::RootManager;
pub use tracker::{CampaignTracker, TrackOutcome};
