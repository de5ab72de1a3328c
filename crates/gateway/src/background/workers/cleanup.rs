use chrono::{Duration, Utc};
use tracing::info;

use crate::error::GatewayError;

use super::super::BackgroundProcessor;

impl BackgroundProcessor {
    /// The cleanup tick: expire idle dynamic rules, then run the
    /// campaign-side retention pass.
    pub(crate) async fn run_cleanup(&self) -> Result<(), GatewayError> {
        let detector = self
            .detector_config
            .read()
            .expect("detector config lock poisoned")
            .clone();

        if detector.enabled {
            let cutoff = Utc::now() - Duration::hours(i64::from(detector.expiration_hours));
            let expired = self.rules.delete_expired_dynamic(cutoff).await?;
            if expired > 0 {
                // Deleted rules must leave the hot path too.
                self.cache.reload(&self.rules).await?;
                info!(expired, "expired dynamic rules removed");
            }
        }

        self.retention.run_periodic(&self.cancel).await?;
        Ok(())
    }
}
