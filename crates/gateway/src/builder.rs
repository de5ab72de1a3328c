use std::sync::{Arc, RwLock};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use mailsieve_analytics::{CampaignTracker, RetentionConfig, RetentionManager};
use mailsieve_core::{PatternMatcher, SecondLevelTlds};
use mailsieve_executor::{DeadLetterQueue, ProcessorConfig, TaskProcessor};
use mailsieve_filter::{DynamicRuleDetector, FilterEngine, RuleCache};
use mailsieve_monitor::{HeartbeatSweeper, HitProcessor, RatioEvaluator};
use mailsieve_state::SqliteStore;

use crate::background::{BackgroundConfig, BackgroundProcessor};
use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::metrics::GatewayMetrics;
use crate::processors::{
    CampaignTaskProcessor, DynamicTaskProcessor, LogTaskProcessor, MonitoringTaskProcessor,
    StatsTaskProcessor, WatchTaskProcessor,
};

/// Everything a running service needs, wired and ready.
///
/// The background processor is handed back unspawned so the host decides
/// the runtime it lives on; `shutdown` stops it.
pub struct BuiltGateway {
    pub gateway: Arc<Gateway>,
    pub tasks: TaskProcessor,
    pub background: BackgroundProcessor,
    pub shutdown: mpsc::Sender<()>,
    /// Cancels in-flight long operations (retention walk) so shutdown is
    /// not stuck behind them.
    pub cancel: CancellationToken,
}

/// Assembles the gateway from a store and the mandatory back-pressure
/// configuration.
pub struct GatewayBuilder {
    store: SqliteStore,
    processor_config: ProcessorConfig,
    background_config: BackgroundConfig,
    retention_config: RetentionConfig,
    tlds: SecondLevelTlds,
    sync_dynamic_tracking: bool,
}

impl GatewayBuilder {
    /// Start a builder. The task-processor configuration carries the
    /// queue bound, batch size, and overflow policy and is therefore
    /// required up front.
    #[must_use]
    pub fn new(store: SqliteStore, processor_config: ProcessorConfig) -> Self {
        Self {
            store,
            processor_config,
            background_config: BackgroundConfig::default(),
            retention_config: RetentionConfig::default(),
            tlds: SecondLevelTlds::default_set(),
            sync_dynamic_tracking: true,
        }
    }

    #[must_use]
    pub fn with_background_config(mut self, config: BackgroundConfig) -> Self {
        self.background_config = config;
        self
    }

    #[must_use]
    pub fn with_retention_config(mut self, config: RetentionConfig) -> Self {
        self.retention_config = config;
        self
    }

    #[must_use]
    pub fn with_second_level_tlds(mut self, tlds: SecondLevelTlds) -> Self {
        self.tlds = tlds;
        self
    }

    /// Defer subject tracking to the async `dynamic` task kind instead
    /// of learning on the decision path.
    #[must_use]
    pub fn with_deferred_dynamic_tracking(mut self) -> Self {
        self.sync_dynamic_tracking = false;
        self
    }

    /// Wire everything together.
    pub async fn build(self) -> Result<BuiltGateway, GatewayError> {
        let store = self.store;
        let matcher = Arc::new(PatternMatcher::new());
        let tlds = Arc::new(self.tlds);
        let metrics = Arc::new(GatewayMetrics::new());

        let cache = Arc::new(RuleCache::load(&store.rules()).await?);
        let engine = FilterEngine::new(Arc::clone(&cache), Arc::clone(&matcher), Arc::clone(&tlds));
        let detector = Arc::new(DynamicRuleDetector::new(
            store.tracker(),
            store.rules(),
            Arc::clone(&cache),
        ));
        let detector_config = Arc::new(RwLock::new(store.detector_config().load().await?));

        let campaign_tracker = Arc::new(CampaignTracker::new(
            store.merchants(),
            store.campaigns(),
            store.paths(),
            store.stats(),
            Arc::clone(&tlds),
        ));
        let hit_processor = Arc::new(HitProcessor::new(store.monitor(), Arc::clone(&matcher)));

        let dlq = Arc::new(DeadLetterQueue::new());
        let tasks = TaskProcessor::start(
            self.processor_config,
            vec![
                Arc::new(StatsTaskProcessor::new(store.rules())),
                Arc::new(LogTaskProcessor::new(store.logs())),
                Arc::new(WatchTaskProcessor::new(
                    Arc::clone(&cache),
                    Arc::clone(&matcher),
                    Arc::clone(&tlds),
                    store.rules(),
                )),
                Arc::new(DynamicTaskProcessor::new(
                    Arc::clone(&detector),
                    Arc::clone(&detector_config),
                )),
                Arc::new(CampaignTaskProcessor::new(Arc::clone(&campaign_tracker))),
                Arc::new(MonitoringTaskProcessor::new(Arc::clone(&hit_processor))),
            ],
            dlq,
        );

        let gateway = Arc::new(Gateway::new(
            engine,
            Arc::clone(&cache),
            detector,
            Arc::clone(&detector_config),
            store.detector_config(),
            store.rules(),
            tasks.queue(),
            Arc::clone(&metrics),
            self.sync_dynamic_tracking,
        ));

        let retention = RetentionManager::new(
            store.merchants(),
            store.campaigns(),
            store.cleanup(),
            store.logs(),
            store.tracker(),
            self.retention_config,
        );

        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let background = BackgroundProcessor::new(
            self.background_config,
            HeartbeatSweeper::new(store.monitor()),
            RatioEvaluator::new(store.monitor()),
            retention,
            store.rules(),
            cache,
            detector_config,
            store.monitor(),
            metrics,
            cancel.clone(),
            shutdown_rx,
        );

        Ok(BuiltGateway {
            gateway,
            tasks,
            background,
            shutdown: shutdown_tx,
            cancel,
        })
    }
}
