//! Algorithm definitions for the two containerized pipelines.
//!
//! Each pipeline is bound to exactly one queue and one task name. The
//! container image and command are configurable; the command may reference
//! `{input_dir}` and `{output_dir}`, which are substituted per job.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::execution::ExecutionLimits;

/// The two pipelines the orchestrator chains together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pipeline {
    /// Building-model extraction from a point cloud.
    Extraction,
    /// Photogrammetric reconstruction from full-motion video.
    Reconstruction,
}

impl Pipeline {
    /// Name of the queue this pipeline's jobs are routed to.
    pub fn queue_name(&self) -> &'static str {
        match self {
            Pipeline::Extraction => "extraction",
            Pipeline::Reconstruction => "reconstruction",
        }
    }

    /// Task name workers dispatch on.
    pub fn task_name(&self) -> &'static str {
        match self {
            Pipeline::Extraction => "run_extraction_task",
            Pipeline::Reconstruction => "run_reconstruction_task",
        }
    }

    /// Resolves a task name back to its pipeline.
    pub fn from_task_name(name: &str) -> Option<Self> {
        match name {
            "run_extraction_task" => Some(Pipeline::Extraction),
            "run_reconstruction_task" => Some(Pipeline::Reconstruction),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.queue_name()
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Pipeline {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "extraction" => Ok(Pipeline::Extraction),
            "reconstruction" => Ok(Pipeline::Reconstruction),
            other => Err(format!("unknown pipeline '{}'", other)),
        }
    }
}

/// Everything needed to launch one pipeline's container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlgorithmDefinition {
    /// Pipeline this algorithm implements.
    pub pipeline: Pipeline,
    /// Human-readable name, used when naming output datasets.
    pub name: String,
    /// Docker image to run.
    pub image: String,
    /// Command template with `{input_dir}` / `{output_dir}` placeholders.
    pub command: Vec<String>,
    /// Resource limits for the container.
    pub limits: ExecutionLimits,
}

impl AlgorithmDefinition {
    /// Default definition for the extraction pipeline.
    pub fn extraction(image: impl Into<String>) -> Self {
        Self {
            pipeline: Pipeline::Extraction,
            name: "building extraction".to_string(),
            image: image.into(),
            command: vec![
                "python".to_string(),
                "run_extraction.py".to_string(),
                "{input_dir}/config.ini".to_string(),
            ],
            limits: ExecutionLimits::new(16 * 1024, 4.0, 2048),
        }
    }

    /// Default definition for the reconstruction pipeline.
    pub fn reconstruction(image: impl Into<String>) -> Self {
        Self {
            pipeline: Pipeline::Reconstruction,
            name: "photogrammetry".to_string(),
            image: image.into(),
            command: vec![
                "bash".to_string(),
                "{input_dir}/reconstruct.sh".to_string(),
                "{input_dir}".to_string(),
                "{output_dir}".to_string(),
            ],
            limits: ExecutionLimits::new(16 * 1024, 4.0, 2048),
        }
    }

    /// Overrides the command template.
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    /// Overrides the resource limits.
    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Renders the command for a concrete job.
    pub fn render_command(&self, input_dir: &Path, output_dir: &Path) -> Vec<String> {
        let input = input_dir.to_string_lossy();
        let output = output_dir.to_string_lossy();
        self.command
            .iter()
            .map(|arg| {
                arg.replace("{input_dir}", &input)
                    .replace("{output_dir}", &output)
            })
            .collect()
    }
}

/// The pair of algorithm definitions a deployment runs with.
#[derive(Debug, Clone)]
pub struct AlgorithmSet {
    pub extraction: AlgorithmDefinition,
    pub reconstruction: AlgorithmDefinition,
}

impl AlgorithmSet {
    pub fn get(&self, pipeline: Pipeline) -> &AlgorithmDefinition {
        match pipeline {
            Pipeline::Extraction => &self.extraction,
            Pipeline::Reconstruction => &self.reconstruction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_queue_and_task_names() {
        assert_eq!(Pipeline::Extraction.queue_name(), "extraction");
        assert_eq!(Pipeline::Reconstruction.queue_name(), "reconstruction");
        assert_eq!(
            Pipeline::from_task_name(Pipeline::Reconstruction.task_name()),
            Some(Pipeline::Reconstruction)
        );
        assert_eq!(Pipeline::from_task_name("unknown"), None);
    }

    #[test]
    fn test_pipeline_from_str() {
        assert_eq!("Extraction".parse::<Pipeline>(), Ok(Pipeline::Extraction));
        assert!("meshing".parse::<Pipeline>().is_err());
    }

    #[test]
    fn test_render_command_substitutes_dirs() {
        let def = AlgorithmDefinition::reconstruction("photogrammetry:latest");
        let cmd = def.render_command(&PathBuf::from("/work/in"), &PathBuf::from("/work/out"));

        assert_eq!(
            cmd,
            vec!["bash", "/work/in/reconstruct.sh", "/work/in", "/work/out"]
        );
    }

    #[test]
    fn test_algorithm_set_lookup() {
        let set = AlgorithmSet {
            extraction: AlgorithmDefinition::extraction("a"),
            reconstruction: AlgorithmDefinition::reconstruction("b"),
        };
        assert_eq!(set.get(Pipeline::Extraction).image, "a");
        assert_eq!(set.get(Pipeline::Reconstruction).image, "b");
    }
}
