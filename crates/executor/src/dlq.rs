use std::sync::Mutex;
use std::time::SystemTime;

use mailsieve_core::TaskEnvelope;

/// An envelope whose batch processing failed past recovery.
#[derive(Debug)]
pub struct DeadLetterEntry {
    pub envelope: TaskEnvelope,
    /// Human-readable description of the final error.
    pub error: String,
    /// Wall-clock time at which the entry was created.
    pub failed_at: SystemTime,
}

/// In-memory dead-letter queue for task envelopes.
///
/// An append-only buffer guarded by a standard [`Mutex`]; the guard is
/// never held across an await point and never escapes the API.
#[derive(Debug, Default)]
pub struct DeadLetterQueue {
    entries: Mutex<Vec<DeadLetterEntry>>,
}

impl DeadLetterQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a failed envelope, timestamped now.
    pub fn push(&self, envelope: TaskEnvelope, error: impl Into<String>) {
        self.entries
            .lock()
            .expect("dead-letter lock poisoned")
            .push(DeadLetterEntry {
                envelope,
                error: error.into(),
                failed_at: SystemTime::now(),
            });
    }

    /// Remove and return every entry.
    #[must_use]
    pub fn drain(&self) -> Vec<DeadLetterEntry> {
        std::mem::take(&mut *self.entries.lock().expect("dead-letter lock poisoned"))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().expect("dead-letter lock poisoned").len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailsieve_core::{LogCategory, LogTask, TaskPayload};

    fn envelope() -> TaskEnvelope {
        TaskEnvelope::new(TaskPayload::Log(LogTask {
            category: LogCategory::System,
            message: "x".into(),
            worker_name: "global".into(),
        }))
    }

    #[test]
    fn push_drain_roundtrip() {
        let dlq = DeadLetterQueue::new();
        assert!(dlq.is_empty());

        dlq.push(envelope(), "boom");
        dlq.push(envelope(), "bang");
        assert_eq!(dlq.len(), 2);

        let drained = dlq.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].error, "boom");
        assert!(dlq.is_empty());
    }
}
