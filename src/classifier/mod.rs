//! File classification and bulk ingestion of job outputs.
//!
//! The classifier walks every file of a dataset, routes it to a typed
//! collection by name (see [`rules`]), and registers each non-empty group
//! with one bulk insert. Post-insert hooks run explicitly for every record
//! the insert created. `tileset.json` manifests become a file group plus a
//! tiled dataset.
//!
//! Classification is idempotent: records that already exist are not created
//! again, and a manifest that already has a tiled dataset is skipped. A pass
//! that fails partway leaves work the next pass finishes.

pub mod hooks;
pub mod rules;

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::{Catalog, ContentFile, RecordKind};
use crate::error::CatalogError;
use crate::metrics::MetricsCollector;

pub use hooks::{ImageRegistration, RecordHook};
pub use rules::{classify_name, FileClass};

/// What one classification pass created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    pub dataset_id: Uuid,
    pub images: usize,
    pub meshes: usize,
    pub videos: usize,
    pub tiled_datasets: usize,
    /// Files matching no rule.
    pub skipped: usize,
}

impl IngestReport {
    fn new(dataset_id: Uuid) -> Self {
        Self {
            dataset_id,
            ..Default::default()
        }
    }

    /// True when at least one video record was created, which is what
    /// starts the reconstruction follow-on.
    pub fn should_trigger_reconstruction(&self) -> bool {
        self.videos > 0
    }

    pub fn total_records(&self) -> usize {
        self.images + self.meshes + self.videos
    }

    fn add(&mut self, kind: RecordKind, count: usize) {
        match kind {
            RecordKind::Image => self.images += count,
            RecordKind::Mesh => self.meshes += count,
            RecordKind::Video => self.videos += count,
        }
    }
}

/// Routes dataset files into typed catalog collections.
#[derive(Clone)]
pub struct FileClassifier {
    hooks: Vec<Arc<dyn RecordHook>>,
    metrics: MetricsCollector,
}

impl Default for FileClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl FileClassifier {
    /// Classifier with the built-in image registration hook.
    pub fn new() -> Self {
        Self::without_hooks().with_hook(Arc::new(ImageRegistration))
    }

    pub fn without_hooks() -> Self {
        Self {
            hooks: Vec::new(),
            metrics: MetricsCollector::new(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn RecordHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Classifies and registers every file of `dataset_id`.
    pub async fn ingest(
        &self,
        catalog: &dyn Catalog,
        dataset_id: Uuid,
    ) -> Result<IngestReport, CatalogError> {
        let files = catalog.list_files(dataset_id).await?;
        let mut report = IngestReport::new(dataset_id);

        let mut images = Vec::new();
        let mut meshes = Vec::new();
        let mut videos = Vec::new();
        let mut manifests = Vec::new();

        for file in &files {
            match classify_name(&file.name) {
                Some(FileClass::Image) => images.push(file.clone()),
                Some(FileClass::Mesh) => meshes.push(file.clone()),
                Some(FileClass::Video) => videos.push(file.clone()),
                Some(FileClass::TileManifest) => manifests.push(file.clone()),
                None => {
                    debug!(file = %file.name, "Skipping unclassified file");
                    report.skipped += 1;
                }
            }
        }

        for (kind, group) in [
            (RecordKind::Image, images),
            (RecordKind::Mesh, meshes),
            (RecordKind::Video, videos),
        ] {
            let created = self.register(catalog, kind, &group).await?;
            report.add(kind, created);
        }

        for manifest in &manifests {
            if self.register_tileset(catalog, manifest, &files).await? {
                report.tiled_datasets += 1;
            }
        }

        info!(
            dataset_id = %dataset_id,
            images = report.images,
            meshes = report.meshes,
            videos = report.videos,
            tiled_datasets = report.tiled_datasets,
            skipped = report.skipped,
            "Classified dataset files"
        );

        Ok(report)
    }

    /// Bulk-inserts one group and runs hooks for its records.
    ///
    /// Hooks also run for records an earlier pass created, so a pass that
    /// failed halfway through a hook is completed by the next one.
    async fn register(
        &self,
        catalog: &dyn Catalog,
        kind: RecordKind,
        group: &[ContentFile],
    ) -> Result<usize, CatalogError> {
        if group.is_empty() {
            return Ok(0);
        }

        let created = catalog.bulk_create_records(kind, group).await?;
        let hooks: Vec<&Arc<dyn RecordHook>> =
            self.hooks.iter().filter(|h| h.applies_to(kind)).collect();

        let mut records = created.clone();
        if created.len() < group.len() {
            debug!(
                kind = %kind,
                existing = group.len() - created.len(),
                "Some files were already registered"
            );
            if !hooks.is_empty() {
                let existing: Vec<ContentFile> = group
                    .iter()
                    .filter(|f| !created.iter().any(|r| r.file.id == f.id))
                    .cloned()
                    .collect();
                records.extend(catalog.find_records(kind, &existing).await?);
            }
        }

        for record in &records {
            for hook in &hooks {
                if let Err(e) = hook.on_created(catalog, record).await {
                    warn!(hook = hook.name(), record_id = %record.id, error = %e, "Post-insert hook failed");
                    return Err(e);
                }
            }
        }

        self.metrics.record_ingested(kind.as_str(), created.len() as u64);
        Ok(created.len())
    }

    /// Creates the file group and tiled dataset for one manifest.
    ///
    /// Returns false when the manifest was already registered.
    async fn register_tileset(
        &self,
        catalog: &dyn Catalog,
        manifest: &ContentFile,
        files: &[ContentFile],
    ) -> Result<bool, CatalogError> {
        if catalog.find_tiled_dataset(manifest.id).await?.is_some() {
            debug!(manifest = %manifest.name, "Tileset already registered");
            return Ok(false);
        }

        let root = Path::new(&manifest.name)
            .parent()
            .unwrap_or_else(|| Path::new(""));
        let name = if root.as_os_str().is_empty() {
            ".".to_string()
        } else {
            root.to_string_lossy().to_string()
        };

        let members: Vec<Uuid> = files
            .iter()
            .filter(|f| Path::new(&f.name).starts_with(root))
            .map(|f| f.id)
            .collect();

        let group = match catalog.find_file_group(&name, manifest.id).await? {
            Some(existing) => existing,
            None => catalog.create_file_group(&name, &members).await?,
        };
        let tiled = catalog.create_tiled_dataset(&name, manifest.id).await?;
        info!(
            tileset = %name,
            members = group.file_ids.len(),
            tiled_dataset_id = %tiled.id,
            "Registered 3D tileset"
        );
        Ok(true)
    }
}
