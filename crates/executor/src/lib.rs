//! The asynchronous task processor: a bounded envelope queue with an
//! explicit overflow policy, drained in batches grouped by task kind,
//! with a dead-letter sink for envelopes that could not be applied.

pub mod config;
pub mod dlq;
pub mod drainer;
pub mod queue;

pub use config::{OverflowPolicy, ProcessorConfig};
pub use dlq::{DeadLetterEntry, DeadLetterQueue};
pub use drainer::{BatchProcessor, BatchResult, TaskProcessor};
pub use queue::{EnqueueResult, TaskQueue};
