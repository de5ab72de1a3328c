use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use mailsieve_core::{
    DetectorConfig, EmailEvent, FilterAction, FilterDecision, FilterRule, LogCategory,
    MonitoringEvent, RuleId, TaskEnvelope, TaskPayload,
};
use mailsieve_executor::{EnqueueResult, TaskQueue};
use mailsieve_filter::{DynamicRuleDetector, FilterEngine, RuleCache};
use mailsieve_state::{ConfigStore, RuleStore};

use crate::error::GatewayError;
use crate::metrics::GatewayMetrics;

/// The ingestion facade workers talk to.
///
/// `handle_email` is the single synchronous pipeline a decision event
/// traverses: engine evaluation, optional synchronous dynamic-rule
/// learning, then the task fan-out. Everything else on the gateway is
/// the admin surface over rules and detector configuration.
pub struct Gateway {
    engine: FilterEngine,
    cache: Arc<RuleCache>,
    detector: Arc<DynamicRuleDetector>,
    detector_config: Arc<RwLock<DetectorConfig>>,
    config_store: ConfigStore,
    rules: RuleStore,
    queue: TaskQueue,
    metrics: Arc<GatewayMetrics>,
    /// When off, subject tracking defers to the `dynamic` task kind and
    /// the first burst message passes through.
    sync_dynamic_tracking: bool,
}

impl Gateway {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        engine: FilterEngine,
        cache: Arc<RuleCache>,
        detector: Arc<DynamicRuleDetector>,
        detector_config: Arc<RwLock<DetectorConfig>>,
        config_store: ConfigStore,
        rules: RuleStore,
        queue: TaskQueue,
        metrics: Arc<GatewayMetrics>,
        sync_dynamic_tracking: bool,
    ) -> Self {
        Self {
            engine,
            cache,
            detector,
            detector_config,
            config_store,
            rules,
            queue,
            metrics,
            sync_dynamic_tracking,
        }
    }

    /// Decide what to do with a message and fan out the follow-up work.
    ///
    /// The decision path never fails toward the worker: storage trouble
    /// during learning degrades to the engine's verdict, and the task
    /// fan-out is bounded by the queue's overflow policy.
    pub async fn handle_email(&self, event: EmailEvent) -> FilterDecision {
        self.metrics.record_processed();
        let mut decision = self.engine.evaluate(&event);

        if decision.should_track() && self.sync_dynamic_tracking {
            let config = self.detector_config();
            match self
                .detector
                .track_subject(
                    &event.subject,
                    event.worker_name.as_deref(),
                    event.timestamp,
                    &config,
                )
                .await
            {
                Ok(Some(outcome)) => {
                    if outcome.created {
                        self.metrics.record_dynamic_rule_created();
                    }
                    // The rule is already in the cache; this message is
                    // the first one it blocks.
                    decision = FilterDecision::dropped(outcome.rule);
                }
                Ok(None) => {}
                Err(err) => {
                    // Safe default: the message keeps its forward verdict.
                    warn!(error = %err, "subject tracking failed on the decision path");
                }
            }
        }

        match decision.action {
            FilterAction::Forward => self.metrics.record_forwarded(),
            FilterAction::Drop => self.metrics.record_dropped(),
        }

        self.fan_out(&event, &decision).await;
        decision
    }

    /// Enqueue the follow-up envelopes for a decided message.
    async fn fan_out(&self, event: &EmailEvent, decision: &FilterDecision) {
        let worker = event.worker().to_owned();

        let stats = TaskPayload::Stats(mailsieve_core::StatsTask {
            rule_id: decision.matched_rule.as_ref().map(|rule| rule.id),
            category: decision.matched_category,
            action: decision.action,
            worker_name: worker.clone(),
        });

        let log_category = match decision.action {
            FilterAction::Forward => LogCategory::EmailForward,
            FilterAction::Drop => LogCategory::EmailDrop,
        };
        let log = TaskPayload::Log(mailsieve_core::LogTask {
            category: log_category,
            message: format!(
                "{} from={} subject={} ({})",
                match decision.action {
                    FilterAction::Forward => "forwarded",
                    FilterAction::Drop => "dropped",
                },
                event.from,
                event.subject,
                decision.reason
            ),
            worker_name: worker,
        });

        let monitoring = TaskPayload::Monitoring(MonitoringEvent {
            sender: event.from.clone(),
            subject: event.subject.clone(),
            recipient: event.to.clone(),
            received_at: event.timestamp,
            worker_name: event.worker_name.clone(),
        });

        let mut payloads = vec![
            stats,
            log,
            TaskPayload::Watch(event.clone()),
            TaskPayload::Campaign(event.clone()),
            monitoring,
        ];
        if decision.should_track() && !self.sync_dynamic_tracking {
            payloads.push(TaskPayload::Dynamic(event.clone()));
        }

        for payload in payloads {
            match self.queue.enqueue(TaskEnvelope::new(payload)).await {
                EnqueueResult::Accepted => self.metrics.record_task_enqueued(),
                EnqueueResult::Dropped => self.metrics.record_task_dropped(),
                EnqueueResult::Closed => {
                    debug!("task queue closed, follow-up work discarded");
                    self.metrics.record_task_dropped();
                }
            }
        }
    }

    /// Create a filter rule and publish it to the live cache.
    pub async fn create_rule(&self, rule: FilterRule) -> Result<FilterRule, GatewayError> {
        if rule.pattern.is_empty() {
            return Err(mailsieve_core::ValidationError::new(
                "pattern",
                "must be a non-empty string",
            )
            .into());
        }
        self.rules.insert(&rule).await?;
        self.cache.insert(rule.clone());
        Ok(rule)
    }

    /// Delete a rule from the store and the live cache.
    pub async fn delete_rule(&self, id: RuleId) -> Result<(), GatewayError> {
        if !self.rules.delete(id).await? {
            return Err(GatewayError::RuleNotFound(id.to_string()));
        }
        self.cache.remove(id);
        Ok(())
    }

    /// Enable or disable a rule; the cache is reloaded to reflect it.
    pub async fn set_rule_enabled(&self, id: RuleId, enabled: bool) -> Result<(), GatewayError> {
        if !self.rules.set_enabled(id, enabled).await? {
            return Err(GatewayError::RuleNotFound(id.to_string()));
        }
        self.cache.reload(&self.rules).await?;
        Ok(())
    }

    /// Every stored rule.
    pub async fn list_rules(&self) -> Result<Vec<FilterRule>, GatewayError> {
        Ok(self.rules.list().await?)
    }

    /// The live detector configuration.
    #[must_use]
    pub fn detector_config(&self) -> DetectorConfig {
        self.detector_config
            .read()
            .expect("detector config lock poisoned")
            .clone()
    }

    /// Validate, persist, and activate a new detector configuration.
    pub async fn update_detector_config(
        &self,
        config: DetectorConfig,
    ) -> Result<(), GatewayError> {
        config.validate()?;
        self.config_store.save(&config).await?;
        *self
            .detector_config
            .write()
            .expect("detector config lock poisoned") = config;
        Ok(())
    }

    /// Counter snapshot for operators.
    #[must_use]
    pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
        self.metrics.snapshot()
    }
}
