//! Task queues with reliable dequeue.
//!
//! [`TaskQueue`] is the contract workers and triggers use. [`RedisQueue`]
//! implements it on three Redis lists:
//!
//! - `{queue_name}`: main queue where jobs are enqueued
//! - `{queue_name}:processing`: jobs being processed (for crash recovery)
//! - `{queue_name}:dead_letter`: jobs that failed after max attempts
//!
//! Jobs are atomically moved from the main queue to the processing queue
//! with BRPOPLPUSH. If a worker crashes, jobs in the processing queue are
//! recovered and requeued on the next start.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;
use uuid::Uuid;

use super::job::QueuedJob;
use crate::algorithm::Pipeline;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Failed to connect to Redis.
    #[error("Redis connection failed: {0}")]
    ConnectionFailed(String),

    /// Redis operation failed.
    #[error("Redis operation failed: {0}")]
    RedisError(#[from] redis::RedisError),

    /// Failed to serialize job data.
    #[error("Serialization failed: {0}")]
    SerializationFailed(#[from] serde_json::Error),
}

/// A named FIFO queue of [`QueuedJob`] messages.
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Queue name.
    fn name(&self) -> &str;

    /// Appends a message.
    async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError>;

    /// Takes the next message, waiting up to `timeout`.
    ///
    /// The message stays in a processing area until it is completed,
    /// requeued or dead-lettered.
    async fn dequeue(&self, timeout: Duration) -> Result<Option<QueuedJob>, QueueError>;

    /// Acknowledges a processed message.
    async fn complete(&self, job: &QueuedJob) -> Result<(), QueueError>;

    /// Returns a message to the queue for another attempt.
    async fn requeue(&self, job: &QueuedJob) -> Result<(), QueueError>;

    /// Parks a message that exhausted its attempts.
    async fn dead_letter(&self, job: &QueuedJob, error: &str) -> Result<(), QueueError>;

    /// Number of messages waiting.
    async fn len(&self) -> Result<usize, QueueError>;

    async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }

    /// Moves messages left in processing by a crashed worker back to the
    /// queue, or to the dead letter list once their attempts are spent.
    async fn recover_processing_jobs(&self) -> Result<Recovery, QueueError> {
        Ok(Recovery::default())
    }
}

/// Dead letter reason for messages a crash recovery gives up on.
pub(crate) const RECOVERY_EXHAUSTED: &str = "Recovered from processing queue after max attempts";

/// Messages found in a processing list when a pool starts.
#[derive(Debug, Clone, Default)]
pub struct Recovery {
    pub requeued: Vec<QueuedJob>,
    pub dead_lettered: Vec<QueuedJob>,
}

impl Recovery {
    pub fn is_empty(&self) -> bool {
        self.requeued.is_empty() && self.dead_lettered.is_empty()
    }
}

/// Routes each pipeline to its queue.
#[derive(Clone)]
pub struct QueueRouter {
    extraction: Arc<dyn TaskQueue>,
    reconstruction: Arc<dyn TaskQueue>,
}

impl QueueRouter {
    pub fn new(extraction: Arc<dyn TaskQueue>, reconstruction: Arc<dyn TaskQueue>) -> Self {
        Self {
            extraction,
            reconstruction,
        }
    }

    /// Routes both pipelines through one queue; workers dispatch by task name.
    pub fn single(queue: Arc<dyn TaskQueue>) -> Self {
        Self {
            extraction: queue.clone(),
            reconstruction: queue,
        }
    }

    /// Connects one Redis queue per pipeline, named after the pipeline.
    pub async fn connect_redis(redis_url: &str) -> Result<Self, QueueError> {
        let extraction =
            RedisQueue::connect(redis_url, Pipeline::Extraction.queue_name()).await?;
        let reconstruction = RedisQueue::connect(redis_url, Pipeline::Reconstruction.queue_name())
            .await?;
        Ok(Self::new(Arc::new(extraction), Arc::new(reconstruction)))
    }

    pub fn get(&self, pipeline: Pipeline) -> &Arc<dyn TaskQueue> {
        match pipeline {
            Pipeline::Extraction => &self.extraction,
            Pipeline::Reconstruction => &self.reconstruction,
        }
    }

    /// Distinct queues behind the router.
    pub fn queues(&self) -> Vec<Arc<dyn TaskQueue>> {
        if Arc::ptr_eq(&self.extraction, &self.reconstruction) {
            vec![self.extraction.clone()]
        } else {
            vec![self.extraction.clone(), self.reconstruction.clone()]
        }
    }
}

/// Redis-based task queue with reliable dequeue.
pub struct RedisQueue {
    /// Redis connection manager (handles reconnection automatically).
    redis: ConnectionManager,
    /// Name of the main queue.
    queue_name: String,
    /// Name of the processing queue.
    processing_queue: String,
    /// Name of the dead letter queue.
    dead_letter_queue: String,
}

impl RedisQueue {
    /// Connects to Redis and creates a new queue.
    ///
    /// # Errors
    ///
    /// Returns `QueueError::ConnectionFailed` if the connection fails.
    pub async fn connect(redis_url: &str, queue_name: &str) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        let redis = ConnectionManager::new(client)
            .await
            .map_err(|e| QueueError::ConnectionFailed(e.to_string()))?;

        Ok(Self::from_connection(redis, queue_name))
    }

    /// Creates a queue from an existing ConnectionManager.
    pub fn from_connection(redis: ConnectionManager, queue_name: &str) -> Self {
        let (processing_queue, dead_letter_queue) = Self::key_names(queue_name);
        Self {
            redis,
            queue_name: queue_name.to_string(),
            processing_queue,
            dead_letter_queue,
        }
    }

    fn key_names(queue_name: &str) -> (String, String) {
        (
            format!("{}:processing", queue_name),
            format!("{}:dead_letter", queue_name),
        )
    }

    /// Removes a message from the processing queue by message id.
    async fn remove_from_processing(&self, message_id: Uuid) -> Result<(), QueueError> {
        let mut conn = self.redis.clone();
        let entries: Vec<String> = conn.lrange(&self.processing_queue, 0, -1).await?;

        for data in entries {
            if let Ok(job) = serde_json::from_str::<QueuedJob>(&data) {
                if job.id == message_id {
                    conn.lrem::<_, _, ()>(&self.processing_queue, 1, &data)
                        .await?;
                    return Ok(());
                }
            }
        }

        // Already gone, e.g. recovered by another worker.
        Ok(())
    }
}

#[async_trait]
impl TaskQueue for RedisQueue {
    fn name(&self) -> &str {
        &self.queue_name
    }

    /// Jobs are pushed on the left and popped from the right, FIFO.
    async fn enqueue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        let serialized = serde_json::to_string(job)?;
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.queue_name, serialized).await?;
        Ok(())
    }

    async fn dequeue(&self, timeout: Duration) -> Result<Option<QueuedJob>, QueueError> {
        let mut conn = self.redis.clone();
        let timeout_secs = timeout.as_secs().max(1) as usize;

        let result: Option<String> = redis::cmd("BRPOPLPUSH")
            .arg(&self.queue_name)
            .arg(&self.processing_queue)
            .arg(timeout_secs)
            .query_async(&mut conn)
            .await?;

        match result {
            Some(data) => Ok(Some(serde_json::from_str(&data)?)),
            None => Ok(None),
        }
    }

    async fn complete(&self, job: &QueuedJob) -> Result<(), QueueError> {
        self.remove_from_processing(job.id).await
    }

    /// Re-adds on the right so the retry is picked up next.
    async fn requeue(&self, job: &QueuedJob) -> Result<(), QueueError> {
        self.remove_from_processing(job.id).await?;

        let serialized = serde_json::to_string(job)?;
        let mut conn = self.redis.clone();
        conn.rpush::<_, _, ()>(&self.queue_name, serialized).await?;
        Ok(())
    }

    async fn dead_letter(&self, job: &QueuedJob, error: &str) -> Result<(), QueueError> {
        self.remove_from_processing(job.id).await?;

        let entry = dead_letter_entry(job, error);
        let serialized = serde_json::to_string(&entry)?;
        let mut conn = self.redis.clone();
        conn.lpush::<_, _, ()>(&self.dead_letter_queue, serialized)
            .await?;
        Ok(())
    }

    async fn len(&self) -> Result<usize, QueueError> {
        let mut conn = self.redis.clone();
        let len: usize = conn.llen(&self.queue_name).await?;
        Ok(len)
    }

    async fn recover_processing_jobs(&self) -> Result<Recovery, QueueError> {
        let mut conn = self.redis.clone();
        let mut recovery = Recovery::default();

        let entries: Vec<String> = conn.lrange(&self.processing_queue, 0, -1).await?;

        for data in entries {
            let Ok(mut job) = serde_json::from_str::<QueuedJob>(&data) else {
                continue;
            };
            // Counts as an attempt: the crashed worker already started it.
            job.increment_attempts();

            if job.should_retry() {
                let serialized = serde_json::to_string(&job)?;
                let mut pipe = redis::pipe();
                pipe.atomic()
                    .lrem(&self.processing_queue, 1, &data)
                    .rpush(&self.queue_name, &serialized);
                pipe.query_async::<_, ()>(&mut conn).await?;
                recovery.requeued.push(job);
            } else {
                self.dead_letter(&job, RECOVERY_EXHAUSTED).await?;
                recovery.dead_lettered.push(job);
            }
        }

        Ok(recovery)
    }
}

/// JSON entry stored in a dead letter list.
pub fn dead_letter_entry(job: &QueuedJob, error: &str) -> serde_json::Value {
    serde_json::json!({
        "job": job,
        "error": error,
        "moved_at": chrono::Utc::now().to_rfc3339(),
    })
}
