//! Job completion events.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::algorithm::Pipeline;
use crate::classifier::IngestReport;

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobOutcome {
    Succeeded {
        output_dataset_id: Uuid,
        report: IngestReport,
    },
    Failed {
        error: String,
    },
}

/// Published once per finished job, consumed by the pipeline coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobFinished {
    pub job_id: Uuid,
    pub pipeline: Pipeline,
    pub input_dataset_id: Uuid,
    pub outcome: JobOutcome,
}

impl JobFinished {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, JobOutcome::Succeeded { .. })
    }

    pub fn output_dataset_id(&self) -> Option<Uuid> {
        match &self.outcome {
            JobOutcome::Succeeded {
                output_dataset_id, ..
            } => Some(*output_dataset_id),
            JobOutcome::Failed { .. } => None,
        }
    }
}
