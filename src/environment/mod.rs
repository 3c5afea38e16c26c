//! Per-job execution environments.
//!
//! Every job gets a private directory tree under the configured work root:
//!
//! ```text
//! <work_root>/<pipeline>-<job id>-XXXXXX/
//!     input/    staged dataset files, model assets, config.ini
//!     output/   everything the container writes
//!     rpc/      scratch directory referenced from config.ini
//! ```
//!
//! The tree is removed when the job finishes unless workdirs are kept for
//! debugging.

pub mod assets;
pub mod config_file;
pub mod staging;

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::algorithm::Pipeline;

pub use assets::{AssetSource, HttpAssetSource, ModelAssetCache};
pub use config_file::{find_point_cloud, ExtractionConfig};
pub use staging::{stage_support_files, StagedInputs, SUPPORT_FILES};

/// Isolated working directory for one job.
#[derive(Debug)]
pub struct ExecutionEnvironment {
    dir: TempDir,
    input_dir: PathBuf,
    output_dir: PathBuf,
    rpc_dir: PathBuf,
    keep: bool,
}

impl ExecutionEnvironment {
    /// Creates a fresh environment under `work_root`.
    pub async fn create(
        work_root: &Path,
        pipeline: Pipeline,
        job_id: Uuid,
        keep: bool,
    ) -> std::io::Result<Self> {
        tokio::fs::create_dir_all(work_root).await?;

        let dir = tempfile::Builder::new()
            .prefix(&format!("{}-{}-", pipeline, job_id))
            .tempdir_in(work_root)?;

        let input_dir = dir.path().join("input");
        let output_dir = dir.path().join("output");
        let rpc_dir = dir.path().join("rpc");
        for sub in [&input_dir, &output_dir, &rpc_dir] {
            tokio::fs::create_dir(sub).await?;
        }

        debug!(job_id = %job_id, root = %dir.path().display(), "Created execution environment");

        Ok(Self {
            dir,
            input_dir,
            output_dir,
            rpc_dir,
            keep,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn rpc_dir(&self) -> &Path {
        &self.rpc_dir
    }

    /// Tears the environment down, or leaves it on disk when kept.
    ///
    /// Returns the path of a kept directory.
    pub fn finish(self) -> Option<PathBuf> {
        if self.keep {
            let path = self.dir.keep();
            info!(path = %path.display(), "Keeping execution environment");
            return Some(path);
        }

        let path = self.dir.path().to_path_buf();
        if let Err(e) = self.dir.close() {
            warn!(path = %path.display(), error = %e, "Failed to remove execution environment");
        }
        None
    }
}
