//! Queue message definitions.
//!
//! A [`QueuedJob`] is what travels through the task queues: it names the
//! task to dispatch and the job record to run. The job record itself lives
//! in the [`crate::jobs::JobStore`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::algorithm::Pipeline;

/// Default number of delivery attempts. One attempt means no retry.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 1;

/// A message asking a worker to run one job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedJob {
    /// Unique identifier of this message.
    pub id: Uuid,
    /// Task name workers dispatch on.
    pub task_name: String,
    /// Job record to run.
    pub job_id: Uuid,
    /// When this message was created.
    pub created_at: DateTime<Utc>,
    /// Number of times delivery has been attempted.
    pub attempts: u32,
    /// Maximum number of attempts before moving to dead letter queue.
    pub max_attempts: u32,
}

impl QueuedJob {
    pub fn new(pipeline: Pipeline, job_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_name: pipeline.task_name().to_string(),
            job_id,
            created_at: Utc::now(),
            attempts: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets the maximum number of delivery attempts.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Pipeline named by the task, if the task name is known.
    pub fn pipeline(&self) -> Option<Pipeline> {
        Pipeline::from_task_name(&self.task_name)
    }

    /// Increments the attempt counter.
    ///
    /// This should be called before each execution attempt.
    pub fn increment_attempts(&mut self) {
        self.attempts += 1;
    }

    /// Returns whether the message should be redelivered after an
    /// infrastructure failure.
    pub fn should_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempts)
    }
}
