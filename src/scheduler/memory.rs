//! In-process task queue for local runs and tests.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};

use super::job::QueuedJob;
use super::queue::{QueueError, Recovery, TaskQueue, RECOVERY_EXHAUSTED};

#[derive(Default)]
struct State {
    pending: VecDeque<QueuedJob>,
    processing: Vec<QueuedJob>,
    dead_letter: Vec<(QueuedJob, String)>,
    enqueued: Vec<QueuedJob>,
}

/// Queue held in memory. Records every message ever enqueued.
pub struct InMemoryQueue {
    name: String,
    state: Mutex<State>,
    notify: Notify,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(State::default()),
            notify: Notify::new(),
        }
    }

    /// Every message passed to `enqueue`, in order. Requeues are not
    /// included.
    pub async fn enqueued(&self) -> Vec<QueuedJob> {
        self.state.lock().await.enqueued.clone()
    }

    pub async fn processing(&self) -> Vec<QueuedJob> {
        self.state.lock().await.processing.clone()
    }

    pub async fn dead_letters(&self) -> Vec<(QueuedJob, String)> {
        self.state.lock().await.dead_letter.clone()
    }

    fn take_processing(state: &mut State, id: uuid::Uuid) {
        state.processing.retain(|j| j.id != id);
    }
}

#[async_trait]
impl TaskQueue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        state.pending.push_back(job.clone());
        state.enqueued.push(job.clone());
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<QueuedJob>, QueueError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(job) = state.pending.pop_front() {
                    state.processing.push(job.clone());
                    return Ok(Some(job));
                }
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    async fn complete(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        Self::take_processing(&mut state, job.id);
        Ok(())
    }

    async fn requeue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        Self::take_processing(&mut state, job.id);
        state.pending.push_front(job.clone());
        drop(state);
        self.notify.notify_one();
        Ok(())
    }

    async fn dead_letter(&self, job: &QueuedJob, error: &str) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        Self::take_processing(&mut state, job.id);
        state.dead_letter.push((job.clone(), error.to_string()));
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.state.lock().await.pending.len())
    }

    async fn recover_processing_jobs(&self) -> Result<Recovery, QueueError> {
        let mut state = self.state.lock().await;
        let mut recovery = Recovery::default();

        for mut job in std::mem::take(&mut state.processing) {
            job.increment_attempts();
            if job.should_retry() {
                state.pending.push_back(job.clone());
                recovery.requeued.push(job);
            } else {
                state
                    .dead_letter
                    .push((job.clone(), RECOVERY_EXHAUSTED.to_string()));
                recovery.dead_lettered.push(job);
            }
        }

        drop(state);
        if !recovery.requeued.is_empty() {
            self.notify.notify_one();
        }
        Ok(recovery)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algorithm::Pipeline;
    use std::sync::Arc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_fifo_and_processing() {
        let queue = InMemoryQueue::new("local");
        let first = QueuedJob::new(Pipeline::Extraction, Uuid::new_v4());
        let second = QueuedJob::new(Pipeline::Reconstruction, Uuid::new_v4());
        queue.enqueue(&first).await.expect("enqueue");
        queue.enqueue(&second).await.expect("enqueue");

        let got = queue
            .dequeue(Duration::from_millis(10))
            .await
            .expect("dequeue")
            .expect("message");
        assert_eq!(got.id, first.id);
        assert_eq!(queue.processing().await.len(), 1);
        assert_eq!(queue.len().await.expect("len"), 1);

        queue.complete(&got).await.expect("complete");
        assert!(queue.processing().await.is_empty());
    }

    #[tokio::test]
    async fn test_dequeue_times_out_when_empty() {
        let queue = InMemoryQueue::new("local");
        let got = queue
            .dequeue(Duration::from_millis(20))
            .await
            .expect("dequeue");
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_dequeue_wakes_on_enqueue() {
        let queue = Arc::new(InMemoryQueue::new("local"));
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue(Duration::from_secs(5)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        let message = QueuedJob::new(Pipeline::Extraction, Uuid::new_v4());
        queue.enqueue(&message).await.expect("enqueue");

        let got = waiter.await.expect("join").expect("dequeue");
        assert_eq!(got.map(|m| m.id), Some(message.id));
    }

    #[tokio::test]
    async fn test_requeue_and_dead_letter() {
        let queue = InMemoryQueue::new("local");
        let message = QueuedJob::new(Pipeline::Extraction, Uuid::new_v4());
        queue.enqueue(&message).await.expect("enqueue");

        let got = queue
            .dequeue(Duration::from_millis(10))
            .await
            .expect("dequeue")
            .expect("message");
        queue.requeue(&got).await.expect("requeue");
        assert_eq!(queue.len().await.expect("len"), 1);

        let got = queue
            .dequeue(Duration::from_millis(10))
            .await
            .expect("dequeue")
            .expect("message");
        queue.dead_letter(&got, "gave up").await.expect("dead letter");

        assert!(queue.is_empty().await.expect("empty"));
        assert_eq!(queue.dead_letters().await[0].1, "gave up");
        assert_eq!(queue.enqueued().await.len(), 1);
    }

    #[tokio::test]
    async fn test_recover_processing_jobs() {
        let queue = InMemoryQueue::new("local");
        let retried = QueuedJob::new(Pipeline::Extraction, Uuid::new_v4()).with_max_attempts(2);
        let exhausted = QueuedJob::new(Pipeline::Reconstruction, Uuid::new_v4());
        queue.enqueue(&retried).await.expect("enqueue");
        queue.enqueue(&exhausted).await.expect("enqueue");
        for _ in 0..2 {
            queue
                .dequeue(Duration::from_millis(10))
                .await
                .expect("dequeue")
                .expect("message");
        }

        let recovery = queue.recover_processing_jobs().await.expect("recover");

        assert_eq!(recovery.requeued.len(), 1);
        assert_eq!(recovery.requeued[0].id, retried.id);
        assert_eq!(recovery.requeued[0].attempts, 1);
        assert_eq!(recovery.dead_lettered.len(), 1);
        assert_eq!(recovery.dead_lettered[0].id, exhausted.id);
        assert!(queue.processing().await.is_empty());
        assert_eq!(queue.len().await.expect("len"), 1);
        assert_eq!(queue.dead_letters().await[0].1, RECOVERY_EXHAUSTED);
    }
}
