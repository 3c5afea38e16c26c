//! Job records and the store they live in.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::algorithm::Pipeline;
use crate::error::JobStoreError;

/// Lifecycle state of a job.
///
/// ```text
/// pending -> running -> succeeded
///    |          |
///    +----------+-----> failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "running" => Some(JobStatus::Running),
            "succeeded" => Some(JobStatus::Succeeded),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    /// Status only ever moves forward.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Succeeded)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A requested status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusUpdate {
    Running,
    Succeeded { output_dataset_id: Uuid },
    Failed { error: String },
}

impl StatusUpdate {
    pub fn status(&self) -> JobStatus {
        match self {
            StatusUpdate::Running => JobStatus::Running,
            StatusUpdate::Succeeded { .. } => JobStatus::Succeeded,
            StatusUpdate::Failed { .. } => JobStatus::Failed,
        }
    }
}

/// One containerized algorithm execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmTask {
    pub id: Uuid,
    pub pipeline: Pipeline,
    pub input_dataset_id: Uuid,
    pub output_dataset_id: Option<Uuid>,
    pub status: JobStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AlgorithmTask {
    /// A new pending job.
    pub fn new(pipeline: Pipeline, input_dataset_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            pipeline,
            input_dataset_id,
            output_dataset_id: None,
            status: JobStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies `update`, rejecting backward or sideways moves.
    pub fn apply(&mut self, update: StatusUpdate) -> Result<(), JobStoreError> {
        let next = update.status();
        if !self.status.can_transition_to(next) {
            return Err(JobStoreError::InvalidTransition {
                job: self.id,
                from: self.status,
                to: next,
            });
        }

        match update {
            StatusUpdate::Running => {}
            StatusUpdate::Succeeded { output_dataset_id } => {
                self.output_dataset_id = Some(output_dataset_id);
            }
            StatusUpdate::Failed { error } => {
                self.error = Some(error);
            }
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// Persistent job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Creates a pending job.
    async fn create(
        &self,
        pipeline: Pipeline,
        input_dataset_id: Uuid,
    ) -> Result<AlgorithmTask, JobStoreError>;

    async fn get(&self, id: Uuid) -> Result<AlgorithmTask, JobStoreError>;

    /// Applies a status change atomically and returns the updated record.
    async fn update(&self, id: Uuid, update: StatusUpdate) -> Result<AlgorithmTask, JobStoreError>;

    /// All jobs, oldest first.
    async fn list(&self) -> Result<Vec<AlgorithmTask>, JobStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_only() {
        use JobStatus::*;
        assert!(Pending.can_transition_to(Running));
        assert!(Pending.can_transition_to(Failed));
        assert!(Running.can_transition_to(Succeeded));
        assert!(Running.can_transition_to(Failed));

        assert!(!Running.can_transition_to(Pending));
        assert!(!Succeeded.can_transition_to(Running));
        assert!(!Failed.can_transition_to(Succeeded));
        assert!(!Pending.can_transition_to(Succeeded));
        assert!(!Running.can_transition_to(Running));
    }

    #[test]
    fn test_apply_records_output_and_error() {
        let mut job = AlgorithmTask::new(Pipeline::Extraction, Uuid::new_v4());
        let output = Uuid::new_v4();

        job.apply(StatusUpdate::Running).expect("running");
        job.apply(StatusUpdate::Succeeded {
            output_dataset_id: output,
        })
        .expect("succeeded");
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.output_dataset_id, Some(output));

        let err = job
            .apply(StatusUpdate::Failed {
                error: "late".to_string(),
            })
            .unwrap_err();
        assert!(matches!(
            err,
            JobStoreError::InvalidTransition {
                from: JobStatus::Succeeded,
                to: JobStatus::Failed,
                ..
            }
        ));
        assert!(job.error.is_none());
    }

    #[test]
    fn test_status_names() {
        for status in [
            JobStatus::Pending,
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::Failed,
        ] {
            assert_eq!(JobStatus::parse(&status.to_string()), Some(status));
        }
        assert!(JobStatus::Failed.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
    }
}
