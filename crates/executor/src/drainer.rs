use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use mailsieve_core::{TaskEnvelope, TaskKind};

use crate::config::ProcessorConfig;
use crate::dlq::DeadLetterQueue;
use crate::queue::TaskQueue;

/// Outcome of one per-kind batch invocation.
#[derive(Debug, Default)]
pub struct BatchResult {
    /// Envelopes fully applied.
    pub succeeded: usize,
    /// Envelopes that failed, with their error. A failed item never
    /// aborts the rest of its batch.
    pub failed: Vec<(TaskEnvelope, String)>,
}

impl BatchResult {
    /// Everything in the batch succeeded.
    #[must_use]
    pub fn all_ok(count: usize) -> Self {
        Self {
            succeeded: count,
            failed: Vec::new(),
        }
    }

    /// The whole batch failed for one reason.
    #[must_use]
    pub fn all_failed(batch: Vec<TaskEnvelope>, error: &str) -> Self {
        Self {
            succeeded: 0,
            failed: batch
                .into_iter()
                .map(|envelope| (envelope, error.to_owned()))
                .collect(),
        }
    }
}

/// A per-kind batch processor registered with the drainer.
#[async_trait]
pub trait BatchProcessor: Send + Sync {
    /// The task kind this processor consumes.
    fn kind(&self) -> TaskKind;

    /// Apply one batch. Implementations isolate item failures and report
    /// them in the result instead of propagating.
    async fn process(&self, batch: Vec<TaskEnvelope>) -> BatchResult;
}

/// The asynchronous task processor: a bounded FIFO drained by a single
/// background task that groups envelopes by kind and hands each group to
/// its registered processor.
pub struct TaskProcessor {
    queue: TaskQueue,
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
    dlq: Arc<DeadLetterQueue>,
}

impl TaskProcessor {
    /// Start the drainer with the given per-kind processors.
    #[must_use]
    pub fn start(
        config: ProcessorConfig,
        processors: Vec<Arc<dyn BatchProcessor>>,
        dlq: Arc<DeadLetterQueue>,
    ) -> Self {
        let (queue, rx) = TaskQueue::bounded(config.queue_capacity, config.overflow);
        let registry: HashMap<TaskKind, Arc<dyn BatchProcessor>> = processors
            .into_iter()
            .map(|processor| (processor.kind(), processor))
            .collect();

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(drain_loop(
            rx,
            registry,
            config,
            Arc::clone(&dlq),
            shutdown.clone(),
        ));

        Self {
            queue,
            shutdown,
            handle,
            dlq,
        }
    }

    /// A producer handle onto the queue.
    #[must_use]
    pub fn queue(&self) -> TaskQueue {
        self.queue.clone()
    }

    /// The shared dead-letter sink.
    #[must_use]
    pub fn dead_letters(&self) -> Arc<DeadLetterQueue> {
        Arc::clone(&self.dlq)
    }

    /// Drain outstanding envelopes, then stop. The drainer keeps working
    /// until the queue is dry or the deadline elapses; producers still
    /// holding queue handles get `Closed` afterwards.
    pub async fn drain_and_stop(self, deadline: Duration) {
        self.shutdown.cancel();
        match tokio::time::timeout(deadline, self.handle).await {
            Ok(Ok(())) => debug!("task processor drained and stopped"),
            Ok(Err(join_error)) => error!(error = %join_error, "task drainer panicked"),
            Err(_) => warn!(?deadline, "shutdown deadline elapsed with tasks still queued"),
        }
        let abandoned = self.dlq.len();
        if abandoned > 0 {
            warn!(abandoned, "dead-letter queue non-empty at shutdown");
        }
    }
}

async fn drain_loop(
    mut rx: mpsc::Receiver<TaskEnvelope>,
    registry: HashMap<TaskKind, Arc<dyn BatchProcessor>>,
    config: ProcessorConfig,
    dlq: Arc<DeadLetterQueue>,
    shutdown: CancellationToken,
) {
    loop {
        let mut batch: Vec<TaskEnvelope> = Vec::with_capacity(config.batch_size);

        let first = tokio::select! {
            envelope = rx.recv() => match envelope {
                Some(envelope) => Some(envelope),
                // Every producer dropped its handle.
                None => break,
            },
            () = shutdown.cancelled() => None,
        };
        if let Some(envelope) = first {
            batch.push(envelope);
        }

        while batch.len() < config.batch_size {
            match rx.try_recv() {
                Ok(envelope) => batch.push(envelope),
                Err(_) => break,
            }
        }

        if batch.is_empty() {
            // Only reachable after shutdown with a dry queue.
            break;
        }

        process_batch(batch, &registry, &config, &dlq).await;
    }
    debug!("task drainer exited");
}

async fn process_batch(
    batch: Vec<TaskEnvelope>,
    registry: &HashMap<TaskKind, Arc<dyn BatchProcessor>>,
    config: &ProcessorConfig,
    dlq: &DeadLetterQueue,
) {
    let mut grouped: HashMap<TaskKind, Vec<TaskEnvelope>> = HashMap::new();
    for envelope in batch {
        grouped.entry(envelope.kind()).or_default().push(envelope);
    }

    for (kind, mut group) in grouped {
        // Delivery order within a kind follows enqueue time.
        group.sort_by_key(|envelope| envelope.enqueued_at);
        let size = group.len();

        let Some(processor) = registry.get(&kind) else {
            error!(kind = kind.as_str(), size, "no processor registered for task kind");
            for envelope in group {
                dlq.push(envelope, "no processor registered");
            }
            continue;
        };

        match tokio::time::timeout(config.batch_timeout, processor.process(group)).await {
            Ok(result) => {
                if !result.failed.is_empty() {
                    warn!(
                        kind = kind.as_str(),
                        failed = result.failed.len(),
                        succeeded = result.succeeded,
                        "batch completed with item failures"
                    );
                }
                for (envelope, error) in result.failed {
                    dlq.push(envelope, error);
                }
            }
            Err(_) => {
                // The batch future is dropped; its transaction rolls back.
                error!(
                    kind = kind.as_str(),
                    size,
                    timeout = ?config.batch_timeout,
                    "batch timed out and was abandoned"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use crate::config::OverflowPolicy;
    use mailsieve_core::{LogCategory, LogTask, StatsTask, TaskPayload};

    struct RecordingProcessor {
        kind: TaskKind,
        batches: Mutex<Vec<usize>>,
        processed: AtomicUsize,
        fail_every_other: bool,
    }

    impl RecordingProcessor {
        fn new(kind: TaskKind) -> Arc<Self> {
            Arc::new(Self {
                kind,
                batches: Mutex::new(Vec::new()),
                processed: AtomicUsize::new(0),
                fail_every_other: false,
            })
        }
    }

    #[async_trait]
    impl BatchProcessor for RecordingProcessor {
        fn kind(&self) -> TaskKind {
            self.kind
        }

        async fn process(&self, batch: Vec<TaskEnvelope>) -> BatchResult {
            self.batches.lock().unwrap().push(batch.len());
            let mut result = BatchResult::default();
            for (i, envelope) in batch.into_iter().enumerate() {
                if self.fail_every_other && i % 2 == 1 {
                    result.failed.push((envelope, "simulated failure".into()));
                } else {
                    self.processed.fetch_add(1, Ordering::SeqCst);
                    result.succeeded += 1;
                }
            }
            result
        }
    }

    fn log_envelope(message: &str) -> TaskEnvelope {
        TaskEnvelope::new(TaskPayload::Log(LogTask {
            category: LogCategory::System,
            message: message.into(),
            worker_name: "global".into(),
        }))
    }

    fn stats_envelope() -> TaskEnvelope {
        TaskEnvelope::new(TaskPayload::Stats(StatsTask {
            rule_id: None,
            category: None,
            action: mailsieve_core::FilterAction::Forward,
            worker_name: "w1".into(),
        }))
    }

    #[tokio::test]
    async fn drains_and_groups_by_kind() {
        let logs = RecordingProcessor::new(TaskKind::Log);
        let stats = RecordingProcessor::new(TaskKind::Stats);
        let processor = TaskProcessor::start(
            ProcessorConfig::new(64, 16, OverflowPolicy::Block),
            vec![logs.clone(), stats.clone()],
            Arc::new(DeadLetterQueue::new()),
        );

        let queue = processor.queue();
        for i in 0..6 {
            queue.enqueue(log_envelope(&format!("m{i}"))).await;
            queue.enqueue(stats_envelope()).await;
        }

        processor.drain_and_stop(Duration::from_secs(5)).await;
        assert_eq!(logs.processed.load(Ordering::SeqCst), 6);
        assert_eq!(stats.processed.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn item_failures_go_to_dead_letters_without_aborting() {
        let failing = Arc::new(RecordingProcessor {
            kind: TaskKind::Log,
            batches: Mutex::new(Vec::new()),
            processed: AtomicUsize::new(0),
            fail_every_other: true,
        });
        let dlq = Arc::new(DeadLetterQueue::new());
        let processor = TaskProcessor::start(
            ProcessorConfig::new(64, 64, OverflowPolicy::Block),
            vec![failing.clone()],
            Arc::clone(&dlq),
        );

        let queue = processor.queue();
        for i in 0..4 {
            queue.enqueue(log_envelope(&format!("m{i}"))).await;
        }
        processor.drain_and_stop(Duration::from_secs(5)).await;

        assert_eq!(failing.processed.load(Ordering::SeqCst), 2);
        assert_eq!(dlq.len(), 2);
    }

    #[tokio::test]
    async fn unregistered_kind_is_dead_lettered() {
        let dlq = Arc::new(DeadLetterQueue::new());
        let processor = TaskProcessor::start(
            ProcessorConfig::new(8, 8, OverflowPolicy::Block),
            vec![],
            Arc::clone(&dlq),
        );
        processor.queue().enqueue(log_envelope("orphan")).await;
        processor.drain_and_stop(Duration::from_secs(5)).await;
        assert_eq!(dlq.len(), 1);
    }

    #[tokio::test]
    async fn batch_size_caps_each_drain() {
        let logs = RecordingProcessor::new(TaskKind::Log);
        let processor = TaskProcessor::start(
            ProcessorConfig::new(64, 2, OverflowPolicy::Block),
            vec![logs.clone()],
            Arc::new(DeadLetterQueue::new()),
        );
        let queue = processor.queue();
        for i in 0..5 {
            queue.enqueue(log_envelope(&format!("m{i}"))).await;
        }
        processor.drain_and_stop(Duration::from_secs(5)).await;

        assert_eq!(logs.processed.load(Ordering::SeqCst), 5);
        let batches = logs.batches.lock().unwrap().clone();
        assert!(batches.iter().all(|&size| size <= 2), "{batches:?}");
    }
}
