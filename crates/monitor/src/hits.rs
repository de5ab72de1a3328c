use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::debug;

use mailsieve_core::{
    Alert, AlertId, AlertKind, MonitorRuleId, MonitoringEvent, PatternMatcher, SignalHealth,
};
use mailsieve_state::{HitMeta, MonitorStore};

use crate::error::MonitorError;

/// One signal transition caused by a processed email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateChange {
    pub rule_id: MonitorRuleId,
    pub previous: SignalHealth,
    pub current: SignalHealth,
}

/// Result of matching one email against the monitoring rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub matched: bool,
    pub matched_rules: Vec<MonitorRuleId>,
    pub state_changes: Vec<StateChange>,
}

/// Matches inbound mail against monitoring rules and records hits.
pub struct HitProcessor {
    store: MonitorStore,
    matcher: Arc<PatternMatcher>,
}

impl HitProcessor {
    #[must_use]
    pub fn new(store: MonitorStore, matcher: Arc<PatternMatcher>) -> Self {
        Self { store, matcher }
    }

    /// Process one monitoring event.
    ///
    /// The event is validated first; empty fields fail fast without any
    /// mutation. Each enabled rule whose worker scope covers the event and
    /// whose pattern matches the subject records a hit; a signal leaving
    /// WEAK or DEAD raises a `SIGNAL_RECOVERED` alert. Rules whose regex
    /// pattern fails to compile are skipped.
    pub async fn process_email(
        &self,
        event: &MonitoringEvent,
    ) -> Result<ProcessOutcome, MonitorError> {
        event.validate()?;
        let worker = event.worker();

        let mut outcome = ProcessOutcome::default();
        for rule in self.store.list_rules(true).await? {
            if !rule.worker_scope.applies_to(worker) {
                continue;
            }
            let matched =
                self.matcher
                    .matches(&rule.subject_pattern, &event.subject, rule.match_mode);
            if let Some(error) = matched.error {
                debug!(rule_id = %rule.id, error = %error, "monitoring rule pattern does not compile");
                continue;
            }
            if !matched.matched {
                continue;
            }

            let meta = HitMeta {
                sender: event.sender.clone(),
                subject: event.subject.clone(),
                recipient: event.recipient.clone(),
            };
            let (previous, current) = self
                .store
                .record_hit(rule.id, event.received_at, Some(&meta))
                .await?;

            outcome.matched = true;
            outcome.matched_rules.push(rule.id);

            if previous != SignalHealth::Active {
                outcome.state_changes.push(StateChange {
                    rule_id: rule.id,
                    previous,
                    current,
                });
                self.emit_recovery_alert(rule.id, &rule.name, previous).await?;
            }
        }

        debug!(
            matched = outcome.matched,
            rules = outcome.matched_rules.len(),
            "monitoring event processed"
        );
        Ok(outcome)
    }

    async fn emit_recovery_alert(
        &self,
        rule_id: MonitorRuleId,
        rule_name: &str,
        previous: SignalHealth,
    ) -> Result<(), MonitorError> {
        let state = self
            .store
            .get_state(rule_id)
            .await?
            .ok_or_else(|| MonitorError::RuleNotFound(rule_id.to_string()))?;

        self.store
            .insert_alert(&Alert {
                id: AlertId::new(),
                rule_id,
                kind: AlertKind::SignalRecovered,
                previous_state: previous,
                current_state: SignalHealth::Active,
                gap_minutes: 0,
                count_1h: state.count_1h,
                count_12h: state.count_12h,
                count_24h: state.count_24h,
                message: format!("signal {rule_name} recovered from {}", previous.as_str()),
                sent_at: None,
                created_at: Utc::now(),
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailsieve_core::MonitoringRule;
    use mailsieve_state::SqliteStore;

    fn event(subject: &str, worker: Option<&str>) -> MonitoringEvent {
        MonitoringEvent {
            sender: "noreply@acme.com".into(),
            subject: subject.into(),
            recipient: "user@x.com".into(),
            received_at: Utc::now(),
            worker_name: worker.map(ToOwned::to_owned),
        }
    }

    async fn processor(store: &SqliteStore) -> HitProcessor {
        HitProcessor::new(store.monitor(), Arc::new(PatternMatcher::new()))
    }

    #[tokio::test]
    async fn recovery_alert_only_on_non_active_transition() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let rule = MonitoringRule::new("acme", "orders", "Order shipped", 10, 60);
        store.monitor().create_rule(&rule).await.unwrap();
        let processor = processor(&store).await;

        let first = processor
            .process_email(&event("Order shipped #42", None))
            .await
            .unwrap();
        assert!(first.matched);
        assert_eq!(first.state_changes.len(), 1);
        assert_eq!(first.state_changes[0].previous, SignalHealth::Dead);

        let alerts = store.monitor().recent_alerts(10).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::SignalRecovered);
        assert_eq!(alerts[0].gap_minutes, 0);

        // Already ACTIVE: a further hit raises nothing.
        let second = processor
            .process_email(&event("Order shipped #43", None))
            .await
            .unwrap();
        assert!(second.matched);
        assert!(second.state_changes.is_empty());
        assert_eq!(store.monitor().recent_alerts(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn worker_scope_gates_matching() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let rule = MonitoringRule::new("acme", "orders", "Order shipped", 10, 60)
            .with_worker_scope("w1");
        store.monitor().create_rule(&rule).await.unwrap();
        let processor = processor(&store).await;

        // Wrong worker: no hit, no state change.
        let wrong = processor
            .process_email(&event("Order shipped", Some("w2")))
            .await
            .unwrap();
        assert!(!wrong.matched);
        let state = store.monitor().get_state(rule.id).await.unwrap().unwrap();
        assert_eq!(state.state, SignalHealth::Dead);

        // Right worker records the hit.
        let right = processor
            .process_email(&event("Order shipped", Some("w1")))
            .await
            .unwrap();
        assert!(right.matched);
        let state = store.monitor().get_state(rule.id).await.unwrap().unwrap();
        assert_eq!(state.state, SignalHealth::Active);
    }

    #[tokio::test]
    async fn global_scope_matches_any_worker() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let rule = MonitoringRule::new("acme", "orders", "Order shipped", 10, 60);
        store.monitor().create_rule(&rule).await.unwrap();
        let processor = processor(&store).await;

        let outcome = processor
            .process_email(&event("Order shipped", Some("w2")))
            .await
            .unwrap();
        assert!(outcome.matched);
    }

    #[tokio::test]
    async fn invalid_event_fails_fast_without_mutation() {
        let store = SqliteStore::open_in_memory().await.unwrap();
        let rule = MonitoringRule::new("acme", "orders", "Order", 10, 60);
        store.monitor().create_rule(&rule).await.unwrap();
        let processor = processor(&store).await;

        let mut bad = event("Order shipped", None);
        bad.recipient = String::new();
        let err = processor.process_email(&bad).await.unwrap_err();
        assert!(matches!(err, MonitorError::Validation(v) if v.field == "recipient"));

        let state = store.monitor().get_state(rule.id).await.unwrap().unwrap();
        assert_eq!(state.state, SignalHealth::Dead);
        assert_eq!(state.count_24h, 0);
    }
}
