use chrono::Utc;
use tracing::debug;

use crate::error::GatewayError;

use super::super::BackgroundProcessor;

impl BackgroundProcessor {
    /// Evaluate every enabled ratio monitor.
    pub(crate) async fn run_ratio_evaluation(&self) -> Result<(), GatewayError> {
        let changed = self.ratio.evaluate_all(Utc::now()).await?;
        if changed > 0 {
            for _ in 0..changed {
                self.metrics.record_alert();
            }
            debug!(changed, "ratio evaluation complete");
        }
        Ok(())
    }
}
