use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Process-wide counters over the pipeline. Cheap to bump from the hot
/// path; read as a consistent-enough snapshot for operators.
#[derive(Debug, Default)]
pub struct GatewayMetrics {
    emails_processed: AtomicU64,
    emails_forwarded: AtomicU64,
    emails_dropped: AtomicU64,
    dynamic_rules_created: AtomicU64,
    tasks_enqueued: AtomicU64,
    tasks_dropped: AtomicU64,
    alerts_emitted: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub emails_processed: u64,
    pub emails_forwarded: u64,
    pub emails_dropped: u64,
    pub dynamic_rules_created: u64,
    pub tasks_enqueued: u64,
    pub tasks_dropped: u64,
    pub alerts_emitted: u64,
}

impl GatewayMetrics {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_processed(&self) {
        self.emails_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.emails_forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.emails_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dynamic_rule_created(&self) {
        self.dynamic_rules_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_enqueued(&self) {
        self.tasks_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_dropped(&self) {
        self.tasks_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_alert(&self) {
        self.alerts_emitted.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            emails_processed: self.emails_processed.load(Ordering::Relaxed),
            emails_forwarded: self.emails_forwarded.load(Ordering::Relaxed),
            emails_dropped: self.emails_dropped.load(Ordering::Relaxed),
            dynamic_rules_created: self.dynamic_rules_created.load(Ordering::Relaxed),
            tasks_enqueued: self.tasks_enqueued.load(Ordering::Relaxed),
            tasks_dropped: self.tasks_dropped.load(Ordering::Relaxed),
            alerts_emitted: self.alerts_emitted.load(Ordering::Relaxed),
        }
    }
}
