//! Generic job runner composing the managed task steps.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use super::events::JobFinished;
use super::record::{AlgorithmTask, JobStatus, JobStore, StatusUpdate};
use super::task::ManagedTask;
use crate::algorithm::AlgorithmSet;
use crate::catalog::{Catalog, Dataset};
use crate::classifier::{FileClassifier, IngestReport};
use crate::environment::config_file::DEFAULT_GSD;
use crate::environment::{ExecutionEnvironment, ModelAssetCache};
use crate::error::{EnvironmentError, RunnerError, TaskError};
use crate::execution::ContainerRunner;
use crate::metrics::MetricsCollector;

/// Filesystem and tuning knobs for job execution.
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    /// Parent directory of per-job execution environments.
    pub work_root: PathBuf,
    /// Directory holding `reconstruction/reconstruct.sh` and friends.
    pub support_dir: PathBuf,
    /// Leave execution environments on disk after the job.
    pub keep_workdirs: bool,
    /// Ground sample distance written to `config.ini`.
    pub gsd: f64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self {
            work_root: std::env::temp_dir().join("recon-forge"),
            support_dir: PathBuf::from("support"),
            keep_workdirs: false,
            gsd: DEFAULT_GSD,
        }
    }
}

/// Everything a task step needs.
#[derive(Clone)]
pub struct TaskContext {
    pub catalog: Arc<dyn Catalog>,
    pub jobs: Arc<dyn JobStore>,
    pub runner: Arc<dyn ContainerRunner>,
    pub assets: Arc<ModelAssetCache>,
    pub classifier: FileClassifier,
    pub algorithms: AlgorithmSet,
    pub settings: RunnerSettings,
}

/// Executes queued jobs end to end.
#[derive(Clone)]
pub struct JobRunner {
    ctx: TaskContext,
    events: Option<mpsc::UnboundedSender<JobFinished>>,
    metrics: MetricsCollector,
}

impl JobRunner {
    pub fn new(ctx: TaskContext) -> Self {
        Self {
            ctx,
            events: None,
            metrics: MetricsCollector::new(),
        }
    }

    /// Publishes a [`JobFinished`] event per finished job on `tx`.
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<JobFinished>) -> Self {
        self.events = Some(tx);
        self
    }

    pub fn context(&self) -> &TaskContext {
        &self.ctx
    }

    /// Runs one job.
    ///
    /// Returns `Ok(None)` when the job is no longer pending. Task failures
    /// are not errors: the job is marked failed and the event says so.
    /// `Err` means the job record itself could not be read or written.
    pub async fn run(&self, job_id: Uuid) -> Result<Option<JobFinished>, RunnerError> {
        let job = self.ctx.jobs.get(job_id).await?;
        if job.status != JobStatus::Pending {
            info!(job_id = %job_id, status = %job.status, "Skipping job that is not pending");
            return Ok(None);
        }

        let task = ManagedTask::for_pipeline(job.pipeline);
        let job = self.ctx.jobs.update(job_id, StatusUpdate::Running).await?;
        info!(
            job_id = %job.id,
            pipeline = %job.pipeline,
            dataset_id = %job.input_dataset_id,
            "Running job"
        );

        self.metrics.job_started();
        let started = Instant::now();

        let event = match self.execute(&task, &job).await {
            Ok((output, report)) => task.on_success(&self.ctx, &job, &output, report).await,
            Err(e) => task.on_failure(&self.ctx, &job, &e).await,
        };

        let status = match &event {
            Ok(event) if event.is_success() => JobStatus::Succeeded.as_str(),
            _ => JobStatus::Failed.as_str(),
        };
        self.metrics.job_finished(
            job.pipeline.as_str(),
            status,
            started.elapsed().as_secs_f64(),
        );

        let event = event?;
        if let Some(tx) = &self.events {
            if tx.send(event.clone()).is_err() {
                warn!(job_id = %job.id, "No coordinator listening for job events");
            }
        }
        Ok(Some(event))
    }

    /// Marks a job that never reached a terminal status as failed.
    ///
    /// Returns false when the job had already succeeded or failed.
    pub async fn fail_unfinished(&self, job_id: Uuid, reason: &str) -> Result<bool, RunnerError> {
        let job = self.ctx.jobs.get(job_id).await?;
        if job.status.is_terminal() {
            return Ok(false);
        }

        let update = StatusUpdate::Failed {
            error: reason.to_string(),
        };
        self.ctx.jobs.update(job_id, update).await?;
        warn!(job_id = %job_id, previous = %job.status, reason, "Marked unfinished job failed");
        Ok(true)
    }

    async fn execute(
        &self,
        task: &ManagedTask,
        job: &AlgorithmTask,
    ) -> Result<(Dataset, IngestReport), TaskError> {
        let input = self
            .ctx
            .catalog
            .get_dataset(job.input_dataset_id)
            .await
            .map_err(EnvironmentError::from)?;

        let env = ExecutionEnvironment::create(
            &self.ctx.settings.work_root,
            job.pipeline,
            job.id,
            self.ctx.settings.keep_workdirs,
        )
        .await?;

        let result = self.execute_in(task, job, &input, &env).await;
        env.finish();
        result
    }

    async fn execute_in(
        &self,
        task: &ManagedTask,
        job: &AlgorithmTask,
        input: &Dataset,
        env: &ExecutionEnvironment,
    ) -> Result<(Dataset, IngestReport), TaskError> {
        let staged = task.setup(&self.ctx, input, env).await?;
        let invoked = task.invoke(&self.ctx, job, env).await;
        drop(staged);
        invoked?;

        task.collect_outputs(&self.ctx, input, env).await
    }
}
