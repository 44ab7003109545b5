use std::collections::VecDeque;

use tokio::sync::broadcast;
use tracing::trace;

use super::{Execution, QueueUpdate};

/// FIFO queue of attempts waiting for a worker slot.
///
/// A batch re-enters the queue at the back for each retry, every change
/// broadcasts the position of all waiting attempts.
pub struct ExecutionQueue {
    waiting: VecDeque<Execution>,
    updates: broadcast::Sender<QueueUpdate>,
}

impl ExecutionQueue {
    /// `capacity` bounds the buffered position updates per receiver
    pub fn new(capacity: usize) -> Self {
        let (updates, _) = broadcast::channel(capacity);
        Self {
            waiting: VecDeque::new(),
            updates,
        }
    }

    /// Queue an attempt and subscribe to position updates
    pub fn enqueue(&mut self, execution: Execution) -> broadcast::Receiver<QueueUpdate> {
        let rx = self.updates.subscribe();
        trace!(
            batch_id = %execution.job.batch_id,
            attempt = execution.attempt,
            waiting = self.waiting.len(),
            "Attempt queued"
        );
        self.waiting.push_back(execution);
        self.broadcast_positions();
        rx
    }

    /// Next attempt to run
    pub fn dequeue(&mut self) -> Option<Execution> {
        let execution = self.waiting.pop_front()?;
        self.broadcast_positions();
        Some(execution)
    }

    pub fn len(&self) -> usize {
        self.waiting.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty()
    }

    fn broadcast_positions(&self) {
        for (position, execution) in self.waiting.iter().enumerate() {
            // fails only without receivers
            let _ = self.updates.send(QueueUpdate {
                job_id: execution.id,
                batch_id: execution.job.batch_id.clone(),
                attempt: execution.attempt,
                position,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::BatchJob;
    use std::sync::Arc;
    use uuid::Uuid;

    fn execution(id: Uuid, batch_id: &str, attempt: u32) -> Execution {
        Execution {
            id,
            job: BatchJob {
                batch_id: batch_id.to_string(),
                pipeline: "orders".to_string(),
                config: Arc::default(),
            },
            attempt,
        }
    }

    #[tokio::test]
    async fn enqueue_broadcasts_position() {
        let mut queue = ExecutionQueue::new(10);
        let id = Uuid::new_v4();

        let mut rx = queue.enqueue(execution(id, "b-1", 1));
        let update = rx.recv().await.unwrap();

        assert_eq!(
            update,
            QueueUpdate {
                job_id: id,
                batch_id: "b-1".to_string(),
                attempt: 1,
                position: 0,
            }
        );
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn dequeue_is_fifo_and_broadcasts_positions() {
        let mut queue = ExecutionQueue::new(10);
        let (id_1, id_2) = (Uuid::new_v4(), Uuid::new_v4());
        let mut rx = queue.enqueue(execution(id_1, "b-1", 1));
        let _ = rx.recv().await.unwrap();
        let _ = queue.enqueue(execution(id_2, "b-2", 1));

        // positions of both after the second enqueue
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!((first.job_id, first.position), (id_1, 0));
        assert_eq!((second.batch_id.as_str(), second.position), ("b-2", 1));

        let removed = queue.dequeue().unwrap();
        assert_eq!(removed.id, id_1);
        assert_eq!(removed.job.batch_id, "b-1");

        let update = rx.recv().await.unwrap();
        assert_eq!((update.job_id, update.position), (id_2, 0));

        assert_eq!(queue.dequeue().unwrap().id, id_2);
        assert!(queue.dequeue().is_none());
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn requeued_retry_reports_its_attempt() {
        let mut queue = ExecutionQueue::new(10);
        let (id_1, id_2) = (Uuid::new_v4(), Uuid::new_v4());
        let mut rx = queue.enqueue(execution(id_1, "b-1", 1));
        let _ = queue.enqueue(execution(id_2, "b-2", 1));

        let running = queue.dequeue().unwrap();
        let _ = queue.enqueue(execution(running.id, &running.job.batch_id, running.attempt + 1));

        let mut updates = Vec::new();
        while let Ok(update) = rx.try_recv() {
            updates.push(update);
        }
        let last = &updates[updates.len() - 2..];
        assert_eq!(
            last.iter()
                .map(|u| (u.batch_id.as_str(), u.attempt, u.position))
                .collect::<Vec<_>>(),
            vec![("b-2", 1, 0), ("b-1", 2, 1)]
        );
    }
}
