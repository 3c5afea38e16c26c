//! PostgreSQL-backed job records.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Database, StorageError};
use crate::algorithm::Pipeline;
use crate::error::JobStoreError;
use crate::jobs::{AlgorithmTask, JobStatus, JobStore, StatusUpdate};

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    pipeline: String,
    input_dataset_id: Uuid,
    output_dataset_id: Option<Uuid>,
    status: String,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for AlgorithmTask {
    type Error = StorageError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let pipeline: Pipeline = row
            .pipeline
            .parse()
            .map_err(|_| StorageError::InvalidValue(format!("pipeline '{}'", row.pipeline)))?;
        let status = JobStatus::parse(&row.status)
            .ok_or_else(|| StorageError::InvalidValue(format!("status '{}'", row.status)))?;

        Ok(AlgorithmTask {
            id: row.id,
            pipeline,
            input_dataset_id: row.input_dataset_id,
            output_dataset_id: row.output_dataset_id,
            status,
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn sql(err: sqlx::Error) -> JobStoreError {
    StorageError::from(err).into()
}

const SELECT_JOB: &str = r#"
    SELECT id, pipeline, input_dataset_id, output_dataset_id, status, error, created_at, updated_at
    FROM algorithm_jobs
"#;

/// Job store on the `algorithm_jobs` table.
///
/// Status updates lock the row, so concurrent updates to one job serialize
/// and the forward-only transition check sees the latest status.
pub struct PgJobStore {
    db: Database,
}

impl PgJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(
        &self,
        pipeline: Pipeline,
        input_dataset_id: Uuid,
    ) -> Result<AlgorithmTask, JobStoreError> {
        let job = AlgorithmTask::new(pipeline, input_dataset_id);

        sqlx::query(
            r#"
            INSERT INTO algorithm_jobs (id, pipeline, input_dataset_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(job.id)
        .bind(job.pipeline.as_str())
        .bind(job.input_dataset_id)
        .bind(job.status.as_str())
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(self.db.pool())
        .await
        .map_err(sql)?;

        Ok(job)
    }

    async fn get(&self, id: Uuid) -> Result<AlgorithmTask, JobStoreError> {
        let row: Option<JobRow> = sqlx::query_as(&format!("{SELECT_JOB} WHERE id = $1"))
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(sql)?;

        let row = row.ok_or(JobStoreError::NotFound(id))?;
        Ok(AlgorithmTask::try_from(row)?)
    }

    async fn update(&self, id: Uuid, update: StatusUpdate) -> Result<AlgorithmTask, JobStoreError> {
        let mut tx = self.db.pool().begin().await.map_err(sql)?;

        let row: Option<JobRow> =
            sqlx::query_as(&format!("{SELECT_JOB} WHERE id = $1 FOR UPDATE"))
                .bind(id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(sql)?;

        let mut job = AlgorithmTask::try_from(row.ok_or(JobStoreError::NotFound(id))?)?;
        job.apply(update)?;

        sqlx::query(
            r#"
            UPDATE algorithm_jobs
            SET status = $2, output_dataset_id = $3, error = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(job.output_dataset_id)
        .bind(&job.error)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(sql)?;

        tx.commit().await.map_err(sql)?;
        Ok(job)
    }

    async fn list(&self) -> Result<Vec<AlgorithmTask>, JobStoreError> {
        let rows: Vec<JobRow> = sqlx::query_as(&format!("{SELECT_JOB} ORDER BY created_at, id"))
            .fetch_all(self.db.pool())
            .await
            .map_err(sql)?;

        rows.into_iter()
            .map(|row| AlgorithmTask::try_from(row).map_err(JobStoreError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pipeline: &str, status: &str) -> JobRow {
        JobRow {
            id: Uuid::new_v4(),
            pipeline: pipeline.to_string(),
            input_dataset_id: Uuid::new_v4(),
            output_dataset_id: None,
            status: status.to_string(),
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_row_decoding() {
        let job = AlgorithmTask::try_from(row("reconstruction", "running")).expect("decode");
        assert_eq!(job.pipeline, Pipeline::Reconstruction);
        assert_eq!(job.status, JobStatus::Running);
    }

    #[test]
    fn test_row_with_unknown_values_rejected() {
        assert!(matches!(
            AlgorithmTask::try_from(row("segmentation", "pending")),
            Err(StorageError::InvalidValue(_))
        ));
        assert!(matches!(
            AlgorithmTask::try_from(row("extraction", "queued")),
            Err(StorageError::InvalidValue(_))
        ));
    }
}
