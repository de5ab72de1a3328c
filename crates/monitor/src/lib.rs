//! Signal-liveness monitoring: hit processing against monitoring rules,
//! the heartbeat sweep over signal states, status queries, and ratio
//! monitors.

pub mod error;
pub mod hits;
pub mod ratio;
pub mod signal;
pub mod sweep;

pub use error::MonitorError;
pub use hits::{HitProcessor, ProcessOutcome, StateChange};
pub use ratio::RatioEvaluator;
pub use signal::SignalMonitor;
pub use sweep::HeartbeatSweeper;
