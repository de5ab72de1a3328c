use tokio::sync::mpsc;
use tracing::warn;

use mailsieve_core::TaskEnvelope;

use crate::config::OverflowPolicy;

/// Whether an envelope made it into the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueResult {
    Accepted,
    /// The queue was full and the policy is drop-newest.
    Dropped,
    /// The drainer is gone; the processor is shutting down.
    Closed,
}

/// Producer side of the bounded task FIFO.
///
/// Cheap to clone; every clone shares the same bounded channel. The
/// synchronous filter path holds one of these and never waits beyond the
/// configured overflow behavior.
#[derive(Debug, Clone)]
pub struct TaskQueue {
    tx: mpsc::Sender<TaskEnvelope>,
    policy: OverflowPolicy,
}

impl TaskQueue {
    /// Create the queue and its single consumer end.
    #[must_use]
    pub fn bounded(
        capacity: usize,
        policy: OverflowPolicy,
    ) -> (Self, mpsc::Receiver<TaskEnvelope>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx, policy }, rx)
    }

    /// Enqueue one envelope under the configured overflow policy.
    pub async fn enqueue(&self, envelope: TaskEnvelope) -> EnqueueResult {
        match self.policy {
            OverflowPolicy::Block => match self.tx.send(envelope).await {
                Ok(()) => EnqueueResult::Accepted,
                Err(_) => EnqueueResult::Closed,
            },
            OverflowPolicy::DropNewest => match self.tx.try_send(envelope) {
                Ok(()) => EnqueueResult::Accepted,
                Err(mpsc::error::TrySendError::Full(envelope)) => {
                    warn!(
                        kind = envelope.kind().as_str(),
                        "task queue full, dropping envelope"
                    );
                    EnqueueResult::Dropped
                }
                Err(mpsc::error::TrySendError::Closed(_)) => EnqueueResult::Closed,
            },
        }
    }

    /// The configured overflow policy.
    #[must_use]
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
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

    #[tokio::test]
    async fn drop_newest_sheds_on_full() {
        let (queue, _rx) = TaskQueue::bounded(1, OverflowPolicy::DropNewest);
        assert_eq!(queue.enqueue(envelope()).await, EnqueueResult::Accepted);
        assert_eq!(queue.enqueue(envelope()).await, EnqueueResult::Dropped);
    }

    #[tokio::test]
    async fn blocking_producer_waits_for_consumer() {
        let (queue, mut rx) = TaskQueue::bounded(1, OverflowPolicy::Block);
        queue.enqueue(envelope()).await;

        let producer = tokio::spawn({
            let queue = queue.clone();
            async move { queue.enqueue(envelope()).await }
        });

        // The second enqueue is parked until we pop.
        tokio::task::yield_now().await;
        assert!(!producer.is_finished());
        rx.recv().await.unwrap();
        assert_eq!(producer.await.unwrap(), EnqueueResult::Accepted);
    }

    #[tokio::test]
    async fn closed_queue_reports_shutdown() {
        let (queue, rx) = TaskQueue::bounded(1, OverflowPolicy::DropNewest);
        drop(rx);
        assert_eq!(queue.enqueue(envelope()).await, EnqueueResult::Closed);
    }
}
