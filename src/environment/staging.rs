//! Staging dataset files and support files into a job's input directory.

use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::catalog::Catalog;
use crate::error::EnvironmentError;

/// Driver files the reconstruction container expects next to its inputs.
pub const SUPPORT_FILES: &[&str] = &["reconstruct.sh", "color-mesh.conf"];

/// Dataset files written into an input directory.
///
/// Dropping the guard removes every staged copy, so the input directory is
/// cleaned on success and failure alike.
#[derive(Debug)]
pub struct StagedInputs {
    paths: Vec<PathBuf>,
}

impl StagedInputs {
    /// Writes every file of `dataset_id` into `input_dir` under its name.
    pub async fn stage(
        catalog: &dyn Catalog,
        dataset_id: Uuid,
        input_dir: &Path,
    ) -> Result<Self, EnvironmentError> {
        let files = catalog.list_files(dataset_id).await?;
        let mut staged = Self {
            paths: Vec::with_capacity(files.len()),
        };

        for file in &files {
            let relative = safe_relative_path(&file.name)?;
            let target = input_dir.join(relative);
            if let Some(parent) = target.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }

            let data = catalog.read_file(file).await?;
            tokio::fs::write(&target, &data).await?;
            staged.paths.push(target);
        }

        debug!(
            dataset_id = %dataset_id,
            files = staged.paths.len(),
            "Staged input dataset"
        );
        Ok(staged)
    }

    /// Absolute paths of the staged copies.
    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl Drop for StagedInputs {
    fn drop(&mut self) {
        for path in &self.paths {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to remove staged input");
                }
            }
        }
    }
}

/// Rejects names that are absolute or climb out of the input directory.
fn safe_relative_path(name: &str) -> Result<&Path, EnvironmentError> {
    let path = Path::new(name);
    let escapes = path.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if name.is_empty() || escapes {
        return Err(EnvironmentError::UnsafePath(name.to_string()));
    }
    Ok(path)
}

/// Copies the reconstruction driver files into `input_dir`.
pub async fn stage_support_files(
    support_dir: &Path,
    input_dir: &Path,
) -> Result<Vec<PathBuf>, EnvironmentError> {
    let source_dir = support_dir.join("reconstruction");
    let mut copied = Vec::with_capacity(SUPPORT_FILES.len());

    for name in SUPPORT_FILES {
        let source = source_dir.join(name);
        if !tokio::fs::try_exists(&source).await? {
            return Err(EnvironmentError::MissingSupportFile(source));
        }
        let target = input_dir.join(name);
        tokio::fs::copy(&source, &target).await?;
        copied.push(target);
    }

    Ok(copied)
}
