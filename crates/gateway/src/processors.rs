use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use tracing::warn;

use mailsieve_analytics::CampaignTracker;
use mailsieve_core::{
    extract_domain, DetectorConfig, EmailEvent, FilterAction, LogEntry, MatchField, PatternMatcher,
    RuleCategory, SecondLevelTlds, TaskEnvelope, TaskKind, TaskPayload,
};
use mailsieve_executor::{BatchProcessor, BatchResult};
use mailsieve_filter::{DynamicRuleDetector, RuleCache};
use mailsieve_monitor::HitProcessor;
use mailsieve_state::{with_retry, LogStore, RuleStatDelta, RuleStore, DEFAULT_ATTEMPTS};

/// Batched rule/global counter accumulation.
///
/// Per batch: one increment row per touched rule, one forwarded and one
/// dropped global increment, `last_hit_at` touched once per rule.
pub struct StatsTaskProcessor {
    rules: RuleStore,
}

impl StatsTaskProcessor {
    #[must_use]
    pub fn new(rules: RuleStore) -> Self {
        Self { rules }
    }
}

#[async_trait]
impl BatchProcessor for StatsTaskProcessor {
    fn kind(&self) -> TaskKind {
        TaskKind::Stats
    }

    async fn process(&self, batch: Vec<TaskEnvelope>) -> BatchResult {
        let size = batch.len();
        let mut per_rule: HashMap<mailsieve_core::RuleId, RuleStatDelta> = HashMap::new();
        let mut forwarded = 0i64;
        let mut deleted = 0i64;

        for envelope in &batch {
            let TaskPayload::Stats(ref task) = envelope.payload else {
                continue;
            };
            match task.action {
                FilterAction::Forward => forwarded += 1,
                FilterAction::Drop => deleted += 1,
            }
            if let Some(rule_id) = task.rule_id {
                let delta = per_rule.entry(rule_id).or_insert(RuleStatDelta {
                    rule_id,
                    processed: 0,
                    deleted: 0,
                    errors: 0,
                });
                delta.processed += 1;
                if task.action == FilterAction::Drop {
                    delta.deleted += 1;
                }
            }
        }

        let deltas: Vec<RuleStatDelta> = per_rule.into_values().collect();
        let now = Utc::now();
        let outcome = with_retry("stats batch", DEFAULT_ATTEMPTS, || {
            self.rules
                .apply_stats_batch(&deltas, forwarded, deleted, now)
        })
        .await;

        match outcome {
            Ok(()) => BatchResult::all_ok(size),
            Err(err) => BatchResult::all_failed(batch, &err.to_string()),
        }
    }
}

/// Bulk-inserts activity-log rows.
pub struct LogTaskProcessor {
    logs: LogStore,
}

impl LogTaskProcessor {
    #[must_use]
    pub fn new(logs: LogStore) -> Self {
        Self { logs }
    }
}

#[async_trait]
impl BatchProcessor for LogTaskProcessor {
    fn kind(&self) -> TaskKind {
        TaskKind::Log
    }

    async fn process(&self, batch: Vec<TaskEnvelope>) -> BatchResult {
        let size = batch.len();
        let entries: Vec<LogEntry> = batch
            .iter()
            .filter_map(|envelope| match envelope.payload {
                TaskPayload::Log(ref task) => Some(
                    LogEntry::new(task.category, task.message.clone())
                        .from_worker(task.worker_name.clone()),
                ),
                _ => None,
            })
            .collect();

        let outcome =
            with_retry("log batch", DEFAULT_ATTEMPTS, || self.logs.insert_batch(&entries)).await;
        match outcome {
            Ok(()) => BatchResult::all_ok(size),
            Err(err) => BatchResult::all_failed(batch, &err.to_string()),
        }
    }
}

/// Re-matches envelopes against enabled watch rules and bulk-increments
/// per-rule hit counters.
pub struct WatchTaskProcessor {
    cache: Arc<RuleCache>,
    matcher: Arc<PatternMatcher>,
    tlds: Arc<SecondLevelTlds>,
    rules: RuleStore,
}

impl WatchTaskProcessor {
    #[must_use]
    pub fn new(
        cache: Arc<RuleCache>,
        matcher: Arc<PatternMatcher>,
        tlds: Arc<SecondLevelTlds>,
        rules: RuleStore,
    ) -> Self {
        Self {
            cache,
            matcher,
            tlds,
            rules,
        }
    }
}

#[async_trait]
impl BatchProcessor for WatchTaskProcessor {
    fn kind(&self) -> TaskKind {
        TaskKind::Watch
    }

    async fn process(&self, batch: Vec<TaskEnvelope>) -> BatchResult {
        let size = batch.len();
        let watch_rules = self.cache.snapshot(RuleCategory::Watch);
        let mut hits: HashMap<mailsieve_core::RuleId, i64> = HashMap::new();

        for envelope in &batch {
            let TaskPayload::Watch(ref event) = envelope.payload else {
                continue;
            };
            for rule in &watch_rules {
                if !rule.worker.applies_to(event.worker()) {
                    continue;
                }
                let Some(value) = value_for(rule.match_field, event, &self.tlds) else {
                    continue;
                };
                let outcome =
                    self.matcher
                        .matches_for_rule(rule.id, &rule.pattern, &value, rule.match_mode);
                if outcome.matched {
                    *hits.entry(rule.id).or_insert(0) += 1;
                }
            }
        }

        if hits.is_empty() {
            return BatchResult::all_ok(size);
        }

        let aggregated: Vec<(mailsieve_core::RuleId, i64)> = hits.into_iter().collect();
        let now = Utc::now();
        let outcome = with_retry("watch batch", DEFAULT_ATTEMPTS, || {
            self.rules.apply_watch_hits(&aggregated, now)
        })
        .await;
        match outcome {
            Ok(()) => BatchResult::all_ok(size),
            Err(err) => BatchResult::all_failed(batch, &err.to_string()),
        }
    }
}

/// Replays deferred subject tracking through the dynamic-rule detector,
/// in enqueue order.
pub struct DynamicTaskProcessor {
    detector: Arc<DynamicRuleDetector>,
    config: Arc<RwLock<DetectorConfig>>,
}

impl DynamicTaskProcessor {
    #[must_use]
    pub fn new(detector: Arc<DynamicRuleDetector>, config: Arc<RwLock<DetectorConfig>>) -> Self {
        Self { detector, config }
    }
}

#[async_trait]
impl BatchProcessor for DynamicTaskProcessor {
    fn kind(&self) -> TaskKind {
        TaskKind::Dynamic
    }

    async fn process(&self, batch: Vec<TaskEnvelope>) -> BatchResult {
        let config = self
            .config
            .read()
            .expect("detector config lock poisoned")
            .clone();

        let mut result = BatchResult::default();
        for envelope in batch {
            let TaskPayload::Dynamic(ref event) = envelope.payload else {
                result.succeeded += 1;
                continue;
            };
            let tracked = self
                .detector
                .track_subject(
                    &event.subject,
                    event.worker_name.as_deref(),
                    event.timestamp,
                    &config,
                )
                .await;
            match tracked {
                Ok(_) => result.succeeded += 1,
                Err(err) => {
                    warn!(error = %err, "deferred subject tracking failed");
                    result.failed.push((envelope, err.to_string()));
                }
            }
        }
        result
    }
}

/// Feeds tracked emails into the campaign graph, skipping ignored
/// merchants.
pub struct CampaignTaskProcessor {
    tracker: Arc<CampaignTracker>,
}

impl CampaignTaskProcessor {
    #[must_use]
    pub fn new(tracker: Arc<CampaignTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl BatchProcessor for CampaignTaskProcessor {
    fn kind(&self) -> TaskKind {
        TaskKind::Campaign
    }

    async fn process(&self, batch: Vec<TaskEnvelope>) -> BatchResult {
        let mut result = BatchResult::default();
        for envelope in batch {
            let TaskPayload::Campaign(ref event) = envelope.payload else {
                result.succeeded += 1;
                continue;
            };
            match self.tracker.track_email_selective(event).await {
                Ok(_) => result.succeeded += 1,
                Err(err) => {
                    warn!(error = %err, "campaign tracking failed");
                    result.failed.push((envelope, err.to_string()));
                }
            }
        }
        result
    }
}

/// Runs monitoring hit processing for each envelope.
pub struct MonitoringTaskProcessor {
    hits: Arc<HitProcessor>,
}

impl MonitoringTaskProcessor {
    #[must_use]
    pub fn new(hits: Arc<HitProcessor>) -> Self {
        Self { hits }
    }
}

#[async_trait]
impl BatchProcessor for MonitoringTaskProcessor {
    fn kind(&self) -> TaskKind {
        TaskKind::Monitoring
    }

    async fn process(&self, batch: Vec<TaskEnvelope>) -> BatchResult {
        let mut result = BatchResult::default();
        for envelope in batch {
            let TaskPayload::Monitoring(ref event) = envelope.payload else {
                result.succeeded += 1;
                continue;
            };
            match self.hits.process_email(event).await {
                Ok(_) => result.succeeded += 1,
                Err(err) => {
                    warn!(error = %err, "monitoring hit processing failed");
                    result.failed.push((envelope, err.to_string()));
                }
            }
        }
        result
    }
}

/// Derive the compared value for a watch rule from the event.
fn value_for(field: MatchField, event: &EmailEvent, tlds: &SecondLevelTlds) -> Option<String> {
    match field {
        MatchField::Sender => Some(event.from.clone()),
        MatchField::Subject => Some(event.subject.clone()),
        MatchField::Domain => extract_domain(&event.from, tlds),
    }
}
