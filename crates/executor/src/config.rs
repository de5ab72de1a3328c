use std::time::Duration;

/// What happens when a producer hits a full queue.
///
/// Exactly one policy is in force; the processor never silently mixes
/// the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// The producer waits for a slot. Decision latency absorbs the
    /// back-pressure.
    Block,
    /// The newest envelope is dropped with a warning. Decisions stay
    /// non-blocking.
    DropNewest,
}

/// Task-processor configuration.
///
/// The queue bound, batch size, and overflow policy are deliberate
/// deployment decisions; the constructor requires all three.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// Maximum queued envelopes.
    pub queue_capacity: usize,
    /// Maximum envelopes drained into one batch.
    pub batch_size: usize,
    /// Behavior on queue overflow.
    pub overflow: OverflowPolicy,
    /// Per-batch processing deadline; an expired batch is abandoned to
    /// the dead-letter sink, never the process.
    pub batch_timeout: Duration,
}

impl ProcessorConfig {
    /// Build a configuration from the three mandatory back-pressure
    /// knobs. The batch timeout defaults to 30 seconds.
    #[must_use]
    pub fn new(queue_capacity: usize, batch_size: usize, overflow: OverflowPolicy) -> Self {
        Self {
            queue_capacity: queue_capacity.max(1),
            batch_size: batch_size.max(1),
            overflow,
            batch_timeout: Duration::from_secs(30),
        }
    }

    /// Override the per-batch deadline.
    #[must_use]
    pub fn with_batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }
}
