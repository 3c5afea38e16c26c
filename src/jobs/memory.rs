use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::record::{AlgorithmTask, JobStore, StatusUpdate};
use crate::algorithm::Pipeline;
use crate::error::JobStoreError;

/// Job store held in process memory.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: RwLock<Vec<AlgorithmTask>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(
        &self,
        pipeline: Pipeline,
        input_dataset_id: Uuid,
    ) -> Result<AlgorithmTask, JobStoreError> {
        let job = AlgorithmTask::new(pipeline, input_dataset_id);
        self.jobs.write().await.push(job.clone());
        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<AlgorithmTask, JobStoreError> {
        self.jobs
            .read()
            .await
            .iter()
            .find(|j| j.id == id)
            .cloned()
            .ok_or(JobStoreError::NotFound(id))
    }

    async fn update(&self, id: Uuid, update: StatusUpdate) -> Result<AlgorithmTask, JobStoreError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or(JobStoreError::NotFound(id))?;
        job.apply(update)?;
        Ok(job.clone())
    }

    async fn list(&self) -> Result<Vec<AlgorithmTask>, JobStoreError> {
        Ok(self.jobs.read().await.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobStatus;

    #[tokio::test]
    async fn test_create_get_update() {
        let store = InMemoryJobStore::new();
        let dataset = Uuid::new_v4();
        let job = store
            .create(Pipeline::Reconstruction, dataset)
            .await
            .expect("create");
        assert_eq!(job.status, JobStatus::Pending);

        let running = store
            .update(job.id, StatusUpdate::Running)
            .await
            .expect("running");
        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(store.get(job.id).await.expect("get"), running);

        let err = store
            .update(job.id, StatusUpdate::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, JobStoreError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_missing_job() {
        let store = InMemoryJobStore::new();
        let id = Uuid::new_v4();
        assert!(matches!(
            store.get(id).await,
            Err(JobStoreError::NotFound(missing)) if missing == id
        ));
        assert!(store.list().await.expect("list").is_empty());
    }
}
