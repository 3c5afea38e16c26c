//! Follow-on decisions for the extraction / reconstruction chain.

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::events::{JobFinished, JobOutcome};
use super::record::AlgorithmTask;
use super::triggers::Triggers;
use crate::algorithm::Pipeline;
use crate::error::TriggerError;

/// Consumes [`JobFinished`] events and enqueues the next leg of the chain.
///
/// - extraction succeeded with a new video: reconstruction on its output
/// - reconstruction succeeded: extraction on its output
/// - any failure: nothing
#[derive(Clone)]
pub struct PipelineCoordinator {
    triggers: Triggers,
}

impl PipelineCoordinator {
    pub fn new(triggers: Triggers) -> Self {
        Self { triggers }
    }

    /// The pipeline and dataset the event's follow-on should run on.
    pub fn follow_on(event: &JobFinished) -> Option<(Pipeline, uuid::Uuid)> {
        let JobOutcome::Succeeded {
            output_dataset_id,
            report,
        } = &event.outcome
        else {
            return None;
        };

        match event.pipeline {
            Pipeline::Extraction if report.should_trigger_reconstruction() => {
                Some((Pipeline::Reconstruction, *output_dataset_id))
            }
            Pipeline::Extraction => None,
            Pipeline::Reconstruction => Some((Pipeline::Extraction, *output_dataset_id)),
        }
    }

    /// Triggers the follow-on job for `event`, if any.
    pub async fn handle(&self, event: &JobFinished) -> Result<Option<AlgorithmTask>, TriggerError> {
        let Some((pipeline, dataset_id)) = Self::follow_on(event) else {
            debug!(
                job_id = %event.job_id,
                pipeline = %event.pipeline,
                success = event.is_success(),
                "No follow-on job"
            );
            return Ok(None);
        };

        let job = self.triggers.run(pipeline, dataset_id).await?;
        info!(
            job_id = %event.job_id,
            follow_on_job_id = %job.id,
            pipeline = %pipeline,
            dataset_id = %dataset_id,
            "Triggered follow-on job"
        );
        Ok(Some(job))
    }

    /// Handles events until every sender is dropped.
    pub async fn run(self, mut rx: mpsc::UnboundedReceiver<JobFinished>) {
        while let Some(event) = rx.recv().await {
            if let Err(e) = self.handle(&event).await {
                error!(job_id = %event.job_id, error = %e, "Failed to trigger follow-on job");
            }
        }
        debug!("Job event channel closed");
    }
}
