//! Background processor for the periodic ticks.
//!
//! Three independent cadences drive the monitoring and retention side of
//! the service: the state tick recomputes signal liveness, the counter
//! tick decays rolling counters from hit logs, and the cleanup tick runs
//! retention. A fourth tick evaluates ratio monitors. A failed tick
//! logs, skips, and waits for its next turn.

mod workers;

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use mailsieve_analytics::RetentionManager;
use mailsieve_core::DetectorConfig;
use mailsieve_filter::RuleCache;
use mailsieve_monitor::{HeartbeatSweeper, RatioEvaluator};
use mailsieve_state::{MonitorStore, RuleStore};

use crate::metrics::GatewayMetrics;

/// Configuration for the background processor.
#[derive(Debug, Clone)]
pub struct BackgroundConfig {
    /// How often signal states are recomputed (default: 60 seconds).
    pub state_tick_interval: Duration,
    /// How often rolling counters are recomputed (default: 300 seconds).
    pub counter_tick_interval: Duration,
    /// How often retention runs (default: 3600 seconds).
    pub cleanup_tick_interval: Duration,
    /// How often ratio monitors are evaluated (default: 300 seconds).
    pub ratio_tick_interval: Duration,
    /// Whether the state tick is enabled.
    pub enable_state_tick: bool,
    /// Whether the counter tick is enabled.
    pub enable_counter_tick: bool,
    /// Whether the cleanup tick is enabled.
    pub enable_cleanup_tick: bool,
    /// Whether the ratio tick is enabled.
    pub enable_ratio_tick: bool,
    /// Hit-log rows older than this are purged by the counter tick.
    pub hit_log_retention_hours: i64,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        Self {
            state_tick_interval: Duration::from_secs(60),
            counter_tick_interval: Duration::from_secs(300),
            cleanup_tick_interval: Duration::from_secs(3600),
            ratio_tick_interval: Duration::from_secs(300),
            enable_state_tick: true,
            enable_counter_tick: true,
            enable_cleanup_tick: true,
            enable_ratio_tick: true,
            hit_log_retention_hours: 48,
        }
    }
}

/// Owns the periodic ticks; one instance runs per process.
pub struct BackgroundProcessor {
    config: BackgroundConfig,
    pub(crate) sweeper: HeartbeatSweeper,
    pub(crate) ratio: RatioEvaluator,
    pub(crate) retention: RetentionManager,
    pub(crate) rules: RuleStore,
    pub(crate) cache: Arc<RuleCache>,
    pub(crate) detector_config: Arc<RwLock<DetectorConfig>>,
    pub(crate) monitor_store: MonitorStore,
    pub(crate) metrics: Arc<GatewayMetrics>,
    /// Cancelled alongside shutdown so a long retention walk ends after
    /// its in-flight transaction.
    pub(crate) cancel: CancellationToken,
    shutdown_rx: mpsc::Receiver<()>,
}

impl BackgroundProcessor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: BackgroundConfig,
        sweeper: HeartbeatSweeper,
        ratio: RatioEvaluator,
        retention: RetentionManager,
        rules: RuleStore,
        cache: Arc<RuleCache>,
        detector_config: Arc<RwLock<DetectorConfig>>,
        monitor_store: MonitorStore,
        metrics: Arc<GatewayMetrics>,
        cancel: CancellationToken,
        shutdown_rx: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            config,
            sweeper,
            ratio,
            retention,
            rules,
            cache,
            detector_config,
            monitor_store,
            metrics,
            cancel,
            shutdown_rx,
        }
    }

    /// Run until a shutdown signal arrives. Each tick takes its own
    /// timer; ticks never interleave because the loop is single-tasked.
    pub async fn run(mut self) {
        info!("background processor starting");

        let mut state_interval = interval(self.config.state_tick_interval);
        let mut counter_interval = interval(self.config.counter_tick_interval);
        let mut cleanup_interval = interval(self.config.cleanup_tick_interval);
        let mut ratio_interval = interval(self.config.ratio_tick_interval);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("background processor received shutdown signal");
                    break;
                }
                _ = state_interval.tick(), if self.config.enable_state_tick => {
                    if let Err(e) = self.run_signal_sweep().await {
                        error!(error = %e, "error sweeping signal states");
                    }
                }
                _ = counter_interval.tick(), if self.config.enable_counter_tick => {
                    if let Err(e) = self.run_counter_decay().await {
                        error!(error = %e, "error recomputing signal counters");
                    }
                }
                _ = ratio_interval.tick(), if self.config.enable_ratio_tick => {
                    if let Err(e) = self.run_ratio_evaluation().await {
                        error!(error = %e, "error evaluating ratio monitors");
                    }
                }
                _ = cleanup_interval.tick(), if self.config.enable_cleanup_tick => {
                    if let Err(e) = self.run_cleanup().await {
                        error!(error = %e, "error running cleanup");
                    }
                }
            }
        }

        info!("background processor stopped");
    }

    pub(crate) fn hit_log_retention_hours(&self) -> i64 {
        self.config.hit_log_retention_hours
    }
}
