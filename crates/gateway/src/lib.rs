//! The mailsieve gateway: the synchronous filter-decision pipeline, the
//! asynchronous task fan-out behind it, and the background ticks that
//! keep signal states and retention current.

pub mod background;
pub mod builder;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod processors;

pub use background::{BackgroundConfig, BackgroundProcessor};
pub use builder::{BuiltGateway, GatewayBuilder};
pub use error::GatewayError;
pub use gateway::Gateway;
pub use metrics::{GatewayMetrics, MetricsSnapshot};
