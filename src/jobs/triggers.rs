//! Pipeline trigger functions.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::record::{AlgorithmTask, JobStore, StatusUpdate};
use crate::algorithm::Pipeline;
use crate::catalog::Catalog;
use crate::error::TriggerError;
use crate::scheduler::{QueueRouter, QueuedJob, DEFAULT_MAX_ATTEMPTS};

/// Creates jobs and puts them on their pipeline's queue.
#[derive(Clone)]
pub struct Triggers {
    catalog: Arc<dyn Catalog>,
    jobs: Arc<dyn JobStore>,
    queues: QueueRouter,
    max_attempts: u32,
}

impl Triggers {
    pub fn new(catalog: Arc<dyn Catalog>, jobs: Arc<dyn JobStore>, queues: QueueRouter) -> Self {
        Self {
            catalog,
            jobs,
            queues,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Delivery attempts per queued message.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub async fn run_extraction(&self, dataset_id: Uuid) -> Result<AlgorithmTask, TriggerError> {
        self.run(Pipeline::Extraction, dataset_id).await
    }

    pub async fn run_reconstruction(
        &self,
        dataset_id: Uuid,
    ) -> Result<AlgorithmTask, TriggerError> {
        self.run(Pipeline::Reconstruction, dataset_id).await
    }

    /// Creates a pending job for `dataset_id` and enqueues exactly one
    /// message for it. Returns without waiting for execution.
    pub async fn run(
        &self,
        pipeline: Pipeline,
        dataset_id: Uuid,
    ) -> Result<AlgorithmTask, TriggerError> {
        self.catalog.get_dataset(dataset_id).await?;
        let job = self.jobs.create(pipeline, dataset_id).await?;

        let message = QueuedJob::new(pipeline, job.id).with_max_attempts(self.max_attempts);
        let queue = self.queues.get(pipeline);
        if let Err(e) = queue.enqueue(&message).await {
            warn!(job_id = %job.id, error = %e, "Enqueue failed, marking job failed");
            let update = StatusUpdate::Failed {
                error: format!("enqueue failed: {}", e),
            };
            if let Err(store_err) = self.jobs.update(job.id, update).await {
                warn!(job_id = %job.id, error = %store_err, "Failed to mark job failed");
            }
            return Err(e.into());
        }

        info!(
            job_id = %job.id,
            pipeline = %pipeline,
            dataset_id = %dataset_id,
            queue = queue.name(),
            "Job enqueued"
        );
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::error::CatalogError;
    use crate::jobs::{InMemoryJobStore, JobStatus};
    use crate::scheduler::InMemoryQueue;

    fn triggers() -> (Triggers, Arc<InMemoryCatalog>, Arc<InMemoryQueue>) {
        let catalog = Arc::new(InMemoryCatalog::new());
        let queue = Arc::new(InMemoryQueue::new("local"));
        let triggers = Triggers::new(
            catalog.clone(),
            Arc::new(InMemoryJobStore::new()),
            QueueRouter::single(queue.clone()),
        );
        (triggers, catalog, queue)
    }

    #[tokio::test]
    async fn test_trigger_creates_pending_job_and_one_message() {
        let (triggers, catalog, queue) = triggers();
        let dataset = catalog.create_dataset("X").await.expect("dataset");

        let job = triggers
            .run_reconstruction(dataset.id)
            .await
            .expect("trigger");

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.input_dataset_id, dataset.id);

        let enqueued = queue.enqueued().await;
        assert_eq!(enqueued.len(), 1);
        assert_eq!(enqueued[0].job_id, job.id);
        assert_eq!(enqueued[0].task_name, "run_reconstruction_task");
        assert_eq!(enqueued[0].max_attempts, 1);
    }

    #[tokio::test]
    async fn test_unknown_dataset_enqueues_nothing() {
        let (triggers, _catalog, queue) = triggers();

        let err = triggers
            .run_extraction(Uuid::new_v4())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TriggerError::Catalog(CatalogError::DatasetNotFound(_))
        ));
        assert!(queue.enqueued().await.is_empty());
    }
}
