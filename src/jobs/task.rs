//! The two managed task variants and their lifecycle steps.
//!
//! [`ManagedTask`] is dispatched by variant; [`super::JobRunner`] composes
//! the steps in a fixed order:
//!
//! ```text
//! setup -> invoke -> (drop staged inputs) -> collect_outputs -> on_success
//!                                                 any error -> on_failure
//! ```

use std::path::{Component, Path, PathBuf};

use tracing::{error, info};
use walkdir::WalkDir;

use super::events::{JobFinished, JobOutcome};
use super::record::{AlgorithmTask, StatusUpdate};
use super::runner::TaskContext;
use crate::algorithm::Pipeline;
use crate::catalog::Dataset;
use crate::classifier::IngestReport;
use crate::environment::{stage_support_files, ExecutionEnvironment, ExtractionConfig, StagedInputs};
use crate::error::{EnvironmentError, RunnerError, TaskError};
use crate::execution::ContainerInvocation;

/// A containerized algorithm task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagedTask {
    /// Building-model extraction from a point cloud.
    Extraction,
    /// Photogrammetric reconstruction from video.
    Reconstruction,
}

impl ManagedTask {
    pub fn for_pipeline(pipeline: Pipeline) -> Self {
        match pipeline {
            Pipeline::Extraction => ManagedTask::Extraction,
            Pipeline::Reconstruction => ManagedTask::Reconstruction,
        }
    }

    pub fn pipeline(&self) -> Pipeline {
        match self {
            ManagedTask::Extraction => Pipeline::Extraction,
            ManagedTask::Reconstruction => Pipeline::Reconstruction,
        }
    }

    /// Prepares the input directory.
    ///
    /// The returned guard owns the staged dataset files; dropping it removes
    /// them.
    pub async fn setup(
        &self,
        ctx: &TaskContext,
        input: &Dataset,
        env: &ExecutionEnvironment,
    ) -> Result<StagedInputs, TaskError> {
        match self {
            ManagedTask::Extraction => {
                let staged =
                    StagedInputs::stage(ctx.catalog.as_ref(), input.id, env.input_dir()).await?;

                ctx.assets
                    .ensure()
                    .await
                    .map_err(EnvironmentError::from)?;
                let copied = ctx
                    .assets
                    .copy_into(env.input_dir())
                    .await
                    .map_err(EnvironmentError::from)?;

                let config = ExtractionConfig::new(
                    staged.paths(),
                    env.input_dir(),
                    env.output_dir(),
                    env.rpc_dir(),
                    &input.name,
                )?
                .with_gsd(ctx.settings.gsd);
                let config_path = config.write(env.input_dir()).await?;

                info!(
                    dataset_id = %input.id,
                    staged = staged.len(),
                    model_files = copied,
                    config = %config_path.display(),
                    "Extraction inputs ready"
                );
                Ok(staged)
            }
            ManagedTask::Reconstruction => {
                let support = stage_support_files(&ctx.settings.support_dir, env.input_dir()).await?;
                let staged =
                    StagedInputs::stage(ctx.catalog.as_ref(), input.id, env.input_dir()).await?;

                info!(
                    dataset_id = %input.id,
                    staged = staged.len(),
                    support_files = support.len(),
                    "Reconstruction inputs ready"
                );
                Ok(staged)
            }
        }
    }

    /// Runs the algorithm container and waits for it to exit.
    pub async fn invoke(
        &self,
        ctx: &TaskContext,
        job: &AlgorithmTask,
        env: &ExecutionEnvironment,
    ) -> Result<(), TaskError> {
        let invocation = ContainerInvocation {
            job_id: job.id,
            algorithm: ctx.algorithms.get(self.pipeline()).clone(),
            input_dir: env.input_dir().to_path_buf(),
            output_dir: env.output_dir().to_path_buf(),
            mount_root: env.root().to_path_buf(),
        };

        let code = ctx.runner.run(&invocation).await?;
        if code != 0 {
            return Err(TaskError::ContainerFailed { code });
        }
        Ok(())
    }

    /// Uploads everything under the output directory into a new dataset and
    /// classifies it.
    pub async fn collect_outputs(
        &self,
        ctx: &TaskContext,
        input: &Dataset,
        env: &ExecutionEnvironment,
    ) -> Result<(Dataset, IngestReport), TaskError> {
        let algorithm = ctx.algorithms.get(self.pipeline());
        let output_name = format!("{} ({})", input.name, algorithm.name);
        let output = ctx.catalog.create_dataset(&output_name).await?;

        let output_dir = env.output_dir().to_path_buf();
        let files = tokio::task::spawn_blocking(move || list_output_files(&output_dir))
            .await
            .map_err(std::io::Error::other)??;

        for (name, path) in &files {
            let data = tokio::fs::read(path).await?;
            ctx.catalog.add_file(output.id, name, &data).await?;
        }

        info!(
            dataset_id = %output.id,
            name = %output.name,
            files = files.len(),
            "Uploaded job outputs"
        );

        let report = ctx.classifier.ingest(ctx.catalog.as_ref(), output.id).await?;
        Ok((output, report))
    }

    /// Marks the job succeeded.
    pub async fn on_success(
        &self,
        ctx: &TaskContext,
        job: &AlgorithmTask,
        output: &Dataset,
        report: IngestReport,
    ) -> Result<JobFinished, RunnerError> {
        ctx.jobs
            .update(
                job.id,
                StatusUpdate::Succeeded {
                    output_dataset_id: output.id,
                },
            )
            .await?;

        info!(
            job_id = %job.id,
            pipeline = %self.pipeline(),
            output_dataset_id = %output.id,
            "Job succeeded"
        );

        Ok(JobFinished {
            job_id: job.id,
            pipeline: self.pipeline(),
            input_dataset_id: job.input_dataset_id,
            outcome: JobOutcome::Succeeded {
                output_dataset_id: output.id,
                report,
            },
        })
    }

    /// Marks the job failed with the error text.
    pub async fn on_failure(
        &self,
        ctx: &TaskContext,
        job: &AlgorithmTask,
        err: &TaskError,
    ) -> Result<JobFinished, RunnerError> {
        error!(
            job_id = %job.id,
            pipeline = %self.pipeline(),
            error = %err,
            "Job failed"
        );

        let message = err.to_string();
        ctx.jobs
            .update(
                job.id,
                StatusUpdate::Failed {
                    error: message.clone(),
                },
            )
            .await?;

        Ok(JobFinished {
            job_id: job.id,
            pipeline: self.pipeline(),
            input_dataset_id: job.input_dataset_id,
            outcome: JobOutcome::Failed { error: message },
        })
    }
}

/// Regular files under `dir` as `(relative name, path)`, sorted by name.
fn list_output_files(dir: &Path) -> std::io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(dir) else {
            continue;
        };
        let name = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/");
        files.push((name, entry.into_path()));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_list_output_files_relative_names() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("tiles/0")).expect("mkdir");
        std::fs::write(dir.path().join("mesh.ply"), b"ply").expect("write");
        std::fs::write(dir.path().join("tiles/tileset.json"), b"{}").expect("write");
        std::fs::write(dir.path().join("tiles/0/0.b3dm"), b"b3dm").expect("write");

        let files = list_output_files(dir.path()).expect("list");
        let names: Vec<&str> = files.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["mesh.ply", "tiles/0/0.b3dm", "tiles/tileset.json"]);
    }

    #[test]
    fn test_pipeline_mapping() {
        for pipeline in [Pipeline::Extraction, Pipeline::Reconstruction] {
            assert_eq!(ManagedTask::for_pipeline(pipeline).pipeline(), pipeline);
        }
    }
}
