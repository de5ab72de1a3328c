use chrono::{Duration, Utc};
use tracing::debug;

use crate::error::GatewayError;

use super::super::BackgroundProcessor;

impl BackgroundProcessor {
    /// The counter tick: recompute the 1h/12h/24h rolling counters from
    /// hit logs, then purge logs past retention.
    pub(crate) async fn run_counter_decay(&self) -> Result<(), GatewayError> {
        let now = Utc::now();
        let recomputed = self.sweeper.recompute_counters(now).await?;

        let cutoff = now - Duration::hours(self.hit_log_retention_hours());
        let purged = self.monitor_store.purge_hit_logs_before(cutoff).await?;

        debug!(recomputed, purged, "counter decay complete");
        Ok(())
    }
}
