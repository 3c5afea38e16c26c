//! The `config.ini` handed to the extraction container.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::EnvironmentError;

pub const CONFIG_FILE_NAME: &str = "config.ini";
pub const POINT_CLOUD_EXTENSION: &str = "las";
pub const MODEL_DIR_NAME: &str = "Columbia Geon Segmentation Model";
pub const MODEL_PREFIX: &str = "dayton_geon";
pub const DEFAULT_GSD: f64 = 0.25;

/// Picks the point cloud among staged input paths.
///
/// When several `.las` files exist the lexicographically first one wins.
pub fn find_point_cloud(paths: &[PathBuf]) -> Result<PathBuf, EnvironmentError> {
    let mut candidates: Vec<&PathBuf> = paths
        .iter()
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(POINT_CLOUD_EXTENSION))
        .collect();
    candidates.sort();

    match candidates.as_slice() {
        [] => Err(EnvironmentError::MissingRequiredInput {
            extension: format!(".{}", POINT_CLOUD_EXTENSION),
        }),
        [only] => Ok((*only).clone()),
        [first, rest @ ..] => {
            warn!(
                chosen = %first.display(),
                ignored = rest.len(),
                "Multiple point clouds staged; using the first"
            );
            Ok((*first).clone())
        }
    }
}

/// Settings rendered into `config.ini`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub point_cloud: PathBuf,
    pub work_dir: PathBuf,
    pub rpc_dir: PathBuf,
    pub aoi_name: String,
    pub gsd: f64,
    pub model_dir: PathBuf,
    pub model_prefix: String,
}

impl ExtractionConfig {
    /// Builds the config for a job from its staged inputs.
    pub fn new(
        staged: &[PathBuf],
        input_dir: &Path,
        output_dir: &Path,
        rpc_dir: &Path,
        dataset_name: &str,
    ) -> Result<Self, EnvironmentError> {
        Ok(Self {
            point_cloud: find_point_cloud(staged)?,
            work_dir: output_dir.to_path_buf(),
            rpc_dir: rpc_dir.to_path_buf(),
            aoi_name: dataset_name.replace(' ', "_"),
            gsd: DEFAULT_GSD,
            model_dir: input_dir.join(MODEL_DIR_NAME),
            model_prefix: MODEL_PREFIX.to_string(),
        })
    }

    pub fn with_gsd(mut self, gsd: f64) -> Self {
        self.gsd = gsd;
        self
    }

    /// INI text with the `paths`, `aoi`, `params` and `roof` sections.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let sections: [(&str, Vec<(&str, String)>); 4] = [
            (
                "paths",
                vec![
                    ("p3d_fpath", self.point_cloud.display().to_string()),
                    ("work_dir", self.work_dir.display().to_string()),
                    ("rpc_dir", self.rpc_dir.display().to_string()),
                ],
            ),
            ("aoi", vec![("name", self.aoi_name.clone())]),
            ("params", vec![("gsd", self.gsd.to_string())]),
            (
                "roof",
                vec![
                    ("model_dir", self.model_dir.display().to_string()),
                    ("model_prefix", self.model_prefix.clone()),
                ],
            ),
        ];

        for (section, entries) in sections {
            out.push_str(&format!("[{section}]\n"));
            for (key, value) in entries {
                out.push_str(&format!("{key} = {value}\n"));
            }
            out.push('\n');
        }
        out
    }

    /// Writes `config.ini` into `dir` and returns its path.
    pub async fn write(&self, dir: &Path) -> Result<PathBuf, EnvironmentError> {
        let path = dir.join(CONFIG_FILE_NAME);
        tokio::fs::write(&path, self.render()).await?;
        Ok(path)
    }
}
