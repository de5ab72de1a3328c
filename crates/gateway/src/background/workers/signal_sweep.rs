use chrono::Utc;
use tracing::debug;

use crate::error::GatewayError;

use super::super::BackgroundProcessor;

impl BackgroundProcessor {
    /// The state tick: recompute every signal's liveness from its gap
    /// and intervals, emitting WEAKENED/DEAD alerts on transitions.
    pub(crate) async fn run_signal_sweep(&self) -> Result<(), GatewayError> {
        let alerts = self.sweeper.sweep_states(Utc::now()).await?;
        for _ in &alerts {
            self.metrics.record_alert();
        }
        if !alerts.is_empty() {
            debug!(alerts = alerts.len(), "signal sweep complete");
        }
        Ok(())
    }
}
