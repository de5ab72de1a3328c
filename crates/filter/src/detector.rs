use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::info;

use mailsieve_core::{tracker_subject_hash, DetectorConfig, FilterRule};
use mailsieve_state::{RuleStore, TrackerStore};

use crate::cache::RuleCache;
use crate::error::FilterError;

/// Creation metrics returned alongside a freshly learned rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DetectionMetrics {
    /// Milliseconds between the first sighting in the window and the
    /// sighting that triggered creation.
    pub detection_latency_ms: i64,
    /// Messages that were forwarded before the subject got blocked.
    pub emails_forwarded_before_block: i64,
}

/// Result of tracking one subject sighting.
#[derive(Debug, Clone)]
pub struct DetectionOutcome {
    /// The dynamic rule covering this subject.
    pub rule: FilterRule,
    /// Whether this call created the rule (as opposed to refreshing an
    /// existing one).
    pub created: bool,
    /// Zeroed when the rule already existed.
    pub metrics: DetectionMetrics,
}

/// The "count-first, then time-span" subject learner.
///
/// Invoked only for default-forward decisions: messages matched by a
/// whitelist, blacklist, or dynamic rule are never tracked. When a
/// subject crosses both gates, the detector creates a dynamic rule and
/// publishes it to the rule cache before returning, so the triggering
/// message is itself blocked upstream.
pub struct DynamicRuleDetector {
    tracker: TrackerStore,
    rules: RuleStore,
    cache: Arc<RuleCache>,
}

impl DynamicRuleDetector {
    #[must_use]
    pub fn new(tracker: TrackerStore, rules: RuleStore, cache: Arc<RuleCache>) -> Self {
        Self {
            tracker,
            rules,
            cache,
        }
    }

    /// Track one sighting of `subject` at `received_at`.
    ///
    /// Returns the covering dynamic rule when the sighting crossed the
    /// detection gates or an enabled rule for the subject already exists,
    /// `None` otherwise. A disabled detector tracks nothing.
    pub async fn track_subject(
        &self,
        subject: &str,
        worker: Option<&str>,
        received_at: DateTime<Utc>,
        config: &DetectorConfig,
    ) -> Result<Option<DetectionOutcome>, FilterError> {
        if !config.enabled {
            return Ok(None);
        }
        // An empty subject would promote into an empty contains-pattern
        // that matches every message.
        if subject.trim().is_empty() {
            return Ok(None);
        }

        let hash = tracker_subject_hash(subject);
        self.tracker
            .append(worker, &hash, subject, received_at)
            .await?;

        let window_start = received_at - Duration::minutes(i64::from(config.time_window_minutes));
        let count = self
            .tracker
            .count_in_window(&hash, window_start, received_at)
            .await?;
        if count < i64::from(config.threshold_count) {
            return Ok(None);
        }

        let first = self
            .tracker
            .first_in_window(
                &hash,
                window_start,
                received_at,
                i64::from(config.threshold_count),
            )
            .await?;
        let (Some(first_ts), Some(last_ts)) = (first.first(), first.last()) else {
            return Ok(None);
        };

        let span_minutes = (*last_ts - *first_ts).num_milliseconds() as f64 / 60_000.0;
        if span_minutes > config.time_span_threshold_minutes {
            // Too slow to be a burst; keep tracking without purging.
            return Ok(None);
        }

        // Idempotent creation: an existing rule for this subject is
        // refreshed, never duplicated.
        if let Some(existing) = self.rules.find_dynamic_by_pattern(subject).await? {
            self.rules.touch_last_hit(existing.id, received_at).await?;
            if self.cache.find_dynamic_by_pattern(subject).is_none() {
                self.cache.insert(existing.clone());
            }
            return Ok(Some(DetectionOutcome {
                rule: existing,
                created: false,
                metrics: DetectionMetrics::default(),
            }));
        }

        let rule = FilterRule::dynamic_for_subject(subject);
        self.rules.insert(&rule).await?;
        // Publish before returning: the evaluation that triggered this
        // call re-checks the cache and drops the current message.
        self.cache.insert(rule.clone());

        self.tracker.purge_hash_before(&hash, window_start).await?;

        let metrics = DetectionMetrics {
            detection_latency_ms: (received_at - *first_ts).num_milliseconds(),
            emails_forwarded_before_block: count - 1,
        };
        info!(
            subject,
            count,
            span_minutes,
            latency_ms = metrics.detection_latency_ms,
            "dynamic rule created from subject burst"
        );

        Ok(Some(DetectionOutcome {
            rule,
            created: true,
            metrics,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailsieve_state::SqliteStore;

    async fn detector() -> (SqliteStore, DynamicRuleDetector, Arc<RuleCache>) {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let cache = Arc::new(RuleCache::new());
        let detector =
            DynamicRuleDetector::new(store.tracker(), store.rules(), Arc::clone(&cache));
        (store, detector, cache)
    }

    fn config(window: u32, threshold: u32, span: f64) -> DetectorConfig {
        DetectorConfig {
            enabled: true,
            time_window_minutes: window,
            threshold_count: threshold,
            time_span_threshold_minutes: span,
            ..DetectorConfig::default()
        }
    }

    #[tokio::test]
    async fn burst_creates_rule_with_metrics() {
        let (_store, detector, cache) = detector().await;
        let config = config(60, 3, 10.0);
        let t0 = Utc::now();

        for minutes in [0, 2] {
            let outcome = detector
                .track_subject(
                    "FLASH SALE",
                    None,
                    t0 + Duration::minutes(minutes),
                    &config,
                )
                .await
                .unwrap();
            assert!(outcome.is_none());
        }

        let outcome = detector
            .track_subject("FLASH SALE", None, t0 + Duration::minutes(4), &config)
            .await
            .unwrap()
            .expect("third sighting crosses the threshold");

        assert!(outcome.created);
        assert_eq!(outcome.rule.pattern, "FLASH SALE");
        assert_eq!(outcome.metrics.detection_latency_ms, 240_000);
        assert_eq!(outcome.metrics.emails_forwarded_before_block, 2);
        // Visible to the engine immediately.
        assert!(cache.find_dynamic_by_pattern("FLASH SALE").is_some());
    }

    #[tokio::test]
    async fn slow_drip_never_creates_a_rule() {
        let (_store, detector, _cache) = detector().await;
        let config = config(60, 3, 10.0);
        let t0 = Utc::now();

        for minutes in [0, 6, 12] {
            let outcome = detector
                .track_subject("DRIP", None, t0 + Duration::minutes(minutes), &config)
                .await
                .unwrap();
            assert!(outcome.is_none(), "span 12min > 10min threshold");
        }
    }

    #[tokio::test]
    async fn identical_timestamps_fire_on_the_kth_call() {
        let (_store, detector, _cache) = detector().await;
        let config = config(30, 5, 1.0);
        let t0 = Utc::now();

        for i in 0..4 {
            let outcome = detector
                .track_subject("SAME", None, t0, &config)
                .await
                .unwrap();
            assert!(outcome.is_none(), "call {i} is below the threshold");
        }
        let outcome = detector
            .track_subject("SAME", None, t0, &config)
            .await
            .unwrap()
            .expect("fifth identical sighting fires");
        assert!(outcome.created);
        assert_eq!(outcome.metrics.emails_forwarded_before_block, 4);
    }

    #[tokio::test]
    async fn existing_rule_is_returned_not_duplicated() {
        let (store, detector, _cache) = detector().await;
        let config = config(60, 2, 10.0);
        let t0 = Utc::now();

        detector.track_subject("REPEAT", None, t0, &config).await.unwrap();
        let created = detector
            .track_subject("REPEAT", None, t0, &config)
            .await
            .unwrap()
            .unwrap();
        assert!(created.created);

        detector.track_subject("REPEAT", None, t0, &config).await.unwrap();
        let again = detector
            .track_subject("REPEAT", None, t0, &config)
            .await
            .unwrap()
            .unwrap();
        assert!(!again.created);
        assert_eq!(again.rule.id, created.rule.id);
        assert_eq!(again.metrics, DetectionMetrics::default());

        let dynamics = store
            .rules()
            .list_enabled(mailsieve_core::RuleCategory::Dynamic)
            .await
            .unwrap();
        assert_eq!(dynamics.len(), 1);
        assert!(dynamics[0].last_hit_at.is_some());
    }

    #[tokio::test]
    async fn empty_subjects_are_never_learned() {
        let (_store, detector, cache) = detector().await;
        let config = config(30, 5, 5.0);
        let t0 = Utc::now();

        for _ in 0..10 {
            assert!(detector
                .track_subject("   ", None, t0, &config)
                .await
                .unwrap()
                .is_none());
        }
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn disabled_detector_is_a_noop() {
        let (store, detector, _cache) = detector().await;
        let config = DetectorConfig {
            enabled: false,
            ..config(60, 2, 10.0)
        };
        let t0 = Utc::now();

        for _ in 0..5 {
            assert!(detector
                .track_subject("OFF", None, t0, &config)
                .await
                .unwrap()
                .is_none());
        }
        // Nothing was even recorded.
        let count = store
            .tracker()
            .count_in_window(
                &tracker_subject_hash("OFF"),
                t0 - Duration::minutes(1),
                t0 + Duration::minutes(1),
            )
            .await
            .unwrap();
        assert_eq!(count, 0);
    }
}
