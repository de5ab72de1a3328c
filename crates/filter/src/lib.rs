//! The synchronous filter path: rule cache, decision engine, and the
//! dynamic-rule detector.

pub mod cache;
pub mod detector;
pub mod engine;
pub mod error;

pub use cache::RuleCache;
pub use detector::{DetectionMetrics, DetectionOutcome, DynamicRuleDetector};
pub use engine::FilterEngine;
pub use error::FilterError;
