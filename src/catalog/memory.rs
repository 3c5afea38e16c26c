//! In-memory catalog used for local runs and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::types::{
    ContentFile, ContentRecord, Dataset, FileGroup, ImageSet, Raster, RecordKind, TiledDataset,
    ViewerTarget,
};
use super::{compute_checksum, Catalog};
use crate::error::CatalogError;

#[derive(Default)]
struct State {
    datasets: HashMap<Uuid, Dataset>,
    dataset_files: HashMap<Uuid, Vec<Uuid>>,
    files: HashMap<Uuid, ContentFile>,
    blobs: HashMap<String, Vec<u8>>,
    records: Vec<ContentRecord>,
    image_sets: Vec<ImageSet>,
    rasters: Vec<Raster>,
    file_groups: Vec<FileGroup>,
    tiled_datasets: Vec<TiledDataset>,
    bulk_inserts: Vec<(RecordKind, usize)>,
}

/// Catalog that keeps everything in process memory.
#[derive(Default)]
pub struct InMemoryCatalog {
    state: RwLock<State>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every bulk insert issued so far, as `(kind, batch size)`.
    pub async fn bulk_inserts(&self) -> Vec<(RecordKind, usize)> {
        self.state.read().await.bulk_inserts.clone()
    }

    /// All typed records of one kind.
    pub async fn records(&self, kind: RecordKind) -> Vec<ContentRecord> {
        self.state
            .read()
            .await
            .records
            .iter()
            .filter(|r| r.kind == kind)
            .cloned()
            .collect()
    }

    pub async fn image_sets(&self) -> Vec<ImageSet> {
        self.state.read().await.image_sets.clone()
    }

    pub async fn rasters(&self) -> Vec<Raster> {
        self.state.read().await.rasters.clone()
    }

    pub async fn file_groups(&self) -> Vec<FileGroup> {
        self.state.read().await.file_groups.clone()
    }

    pub async fn tiled_datasets(&self) -> Vec<TiledDataset> {
        self.state.read().await.tiled_datasets.clone()
    }

    pub async fn datasets(&self) -> Vec<Dataset> {
        self.state.read().await.datasets.values().cloned().collect()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn create_dataset(&self, name: &str) -> Result<Dataset, CatalogError> {
        let dataset = Dataset {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        let mut state = self.state.write().await;
        state.datasets.insert(dataset.id, dataset.clone());
        state.dataset_files.insert(dataset.id, Vec::new());
        Ok(dataset)
    }

    async fn get_dataset(&self, id: Uuid) -> Result<Dataset, CatalogError> {
        self.state
            .read()
            .await
            .datasets
            .get(&id)
            .cloned()
            .ok_or(CatalogError::DatasetNotFound(id))
    }

    async fn add_file(
        &self,
        dataset_id: Uuid,
        name: &str,
        data: &[u8],
    ) -> Result<ContentFile, CatalogError> {
        let mut state = self.state.write().await;
        if !state.datasets.contains_key(&dataset_id) {
            return Err(CatalogError::DatasetNotFound(dataset_id));
        }

        let checksum = compute_checksum(data);
        let file = ContentFile {
            id: Uuid::new_v4(),
            name: name.to_string(),
            checksum: checksum.clone(),
            size_bytes: data.len() as i64,
            created_at: Utc::now(),
        };

        state.blobs.entry(checksum).or_insert_with(|| data.to_vec());
        state.files.insert(file.id, file.clone());
        state
            .dataset_files
            .entry(dataset_id)
            .or_default()
            .push(file.id);

        Ok(file)
    }

    async fn list_files(&self, dataset_id: Uuid) -> Result<Vec<ContentFile>, CatalogError> {
        let state = self.state.read().await;
        let ids = state
            .dataset_files
            .get(&dataset_id)
            .ok_or(CatalogError::DatasetNotFound(dataset_id))?;

        let mut files: Vec<ContentFile> = ids
            .iter()
            .filter_map(|id| state.files.get(id).cloned())
            .collect();
        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    async fn read_file(&self, file: &ContentFile) -> Result<Vec<u8>, CatalogError> {
        self.state
            .read()
            .await
            .blobs
            .get(&file.checksum)
            .cloned()
            .ok_or(CatalogError::FileNotFound(file.id))
    }

    async fn bulk_create_records(
        &self,
        kind: RecordKind,
        files: &[ContentFile],
    ) -> Result<Vec<ContentRecord>, CatalogError> {
        let mut state = self.state.write().await;
        state.bulk_inserts.push((kind, files.len()));

        let mut created = Vec::new();
        for file in files {
            let exists = state
                .records
                .iter()
                .any(|r| r.kind == kind && r.file.id == file.id);
            if exists {
                continue;
            }
            let record = ContentRecord {
                id: Uuid::new_v4(),
                kind,
                file: file.clone(),
            };
            state.records.push(record.clone());
            created.push(record);
        }

        Ok(created)
    }

    async fn find_records(
        &self,
        kind: RecordKind,
        files: &[ContentFile],
    ) -> Result<Vec<ContentRecord>, CatalogError> {
        let state = self.state.read().await;
        Ok(files
            .iter()
            .filter_map(|file| {
                state
                    .records
                    .iter()
                    .find(|r| r.kind == kind && r.file.id == file.id)
                    .cloned()
            })
            .collect())
    }

    async fn find_image_set(&self, image_id: Uuid) -> Result<Option<ImageSet>, CatalogError> {
        Ok(self
            .state
            .read()
            .await
            .image_sets
            .iter()
            .find(|s| s.image_ids.contains(&image_id))
            .cloned())
    }

    async fn find_raster(&self, image_set_id: Uuid) -> Result<Option<Raster>, CatalogError> {
        Ok(self
            .state
            .read()
            .await
            .rasters
            .iter()
            .find(|r| r.image_set_id == image_set_id)
            .cloned())
    }

    async fn create_image_set(
        &self,
        name: &str,
        image_ids: &[Uuid],
    ) -> Result<ImageSet, CatalogError> {
        let image_set = ImageSet {
            id: Uuid::new_v4(),
            name: name.to_string(),
            image_ids: image_ids.to_vec(),
        };
        self.state.write().await.image_sets.push(image_set.clone());
        Ok(image_set)
    }

    async fn create_raster(&self, name: &str, image_set_id: Uuid) -> Result<Raster, CatalogError> {
        let mut state = self.state.write().await;
        if !state.image_sets.iter().any(|s| s.id == image_set_id) {
            return Err(CatalogError::ImageSetNotFound(image_set_id));
        }
        let raster = Raster {
            id: Uuid::new_v4(),
            name: name.to_string(),
            image_set_id,
        };
        state.rasters.push(raster.clone());
        Ok(raster)
    }

    async fn create_file_group(
        &self,
        name: &str,
        file_ids: &[Uuid],
    ) -> Result<FileGroup, CatalogError> {
        let group = FileGroup {
            id: Uuid::new_v4(),
            name: name.to_string(),
            file_ids: file_ids.to_vec(),
        };
        self.state.write().await.file_groups.push(group.clone());
        Ok(group)
    }

    async fn find_file_group(
        &self,
        name: &str,
        file_id: Uuid,
    ) -> Result<Option<FileGroup>, CatalogError> {
        Ok(self
            .state
            .read()
            .await
            .file_groups
            .iter()
            .find(|g| g.name == name && g.file_ids.contains(&file_id))
            .cloned())
    }

    async fn create_tiled_dataset(
        &self,
        name: &str,
        manifest_file_id: Uuid,
    ) -> Result<TiledDataset, CatalogError> {
        let tiled = TiledDataset {
            id: Uuid::new_v4(),
            name: name.to_string(),
            manifest_file_id,
        };
        self.state.write().await.tiled_datasets.push(tiled.clone());
        Ok(tiled)
    }

    async fn find_tiled_dataset(
        &self,
        manifest_file_id: Uuid,
    ) -> Result<Option<TiledDataset>, CatalogError> {
        Ok(self
            .state
            .read()
            .await
            .tiled_datasets
            .iter()
            .find(|t| t.manifest_file_id == manifest_file_id)
            .cloned())
    }

    async fn viewer_target(
        &self,
        dataset_id: Uuid,
        path: &str,
    ) -> Result<Option<ViewerTarget>, CatalogError> {
        let state = self.state.read().await;
        let ids = state
            .dataset_files
            .get(&dataset_id)
            .ok_or(CatalogError::DatasetNotFound(dataset_id))?;

        let Some(file_id) = ids
            .iter()
            .find(|id| state.files.get(id).is_some_and(|f| f.name == path))
        else {
            return Ok(None);
        };

        let record_for = |kind: RecordKind| {
            state
                .records
                .iter()
                .find(|r| r.kind == kind && r.file.id == *file_id)
        };

        if let Some(image) = record_for(RecordKind::Image) {
            let raster = state
                .image_sets
                .iter()
                .filter(|s| s.image_ids.contains(&image.id))
                .find_map(|s| state.rasters.iter().find(|r| r.image_set_id == s.id));
            if let Some(raster) = raster {
                return Ok(Some(ViewerTarget::Raster {
                    raster_id: raster.id,
                }));
            }
        }

        if let Some(mesh) = record_for(RecordKind::Mesh) {
            return Ok(Some(ViewerTarget::Mesh { record_id: mesh.id }));
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_add_and_list_files_sorted() {
        let catalog = InMemoryCatalog::new();
        let dataset = catalog.create_dataset("Dayton AOI").await.expect("dataset");

        catalog
            .add_file(dataset.id, "b.las", b"points")
            .await
            .expect("add b");
        catalog
            .add_file(dataset.id, "a.mp4", b"video")
            .await
            .expect("add a");

        let files = catalog.list_files(dataset.id).await.expect("list");
        let names: Vec<&str> = files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.mp4", "b.las"]);

        let data = catalog.read_file(&files[1]).await.expect("read");
        assert_eq!(data, b"points");
        assert_eq!(files[1].checksum, compute_checksum(b"points"));
    }

    #[tokio::test]
    async fn test_add_file_to_missing_dataset_fails() {
        let catalog = InMemoryCatalog::new();
        let err = catalog
            .add_file(Uuid::new_v4(), "x.tif", b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::DatasetNotFound(_)));
    }

    #[tokio::test]
    async fn test_bulk_create_skips_existing_records() {
        let catalog = InMemoryCatalog::new();
        let dataset = catalog.create_dataset("d").await.expect("dataset");
        let file = catalog
            .add_file(dataset.id, "mesh.ply", b"ply")
            .await
            .expect("add");

        let first = catalog
            .bulk_create_records(RecordKind::Mesh, std::slice::from_ref(&file))
            .await
            .expect("first");
        let second = catalog
            .bulk_create_records(RecordKind::Mesh, std::slice::from_ref(&file))
            .await
            .expect("second");

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(catalog.records(RecordKind::Mesh).await.len(), 1);
    }

    #[tokio::test]
    async fn test_viewer_target_for_image_and_mesh() {
        let catalog = InMemoryCatalog::new();
        let dataset = catalog.create_dataset("d").await.expect("dataset");
        let image = catalog
            .add_file(dataset.id, "ortho.tif", b"tif")
            .await
            .expect("add image");
        let mesh = catalog
            .add_file(dataset.id, "model.obj", b"obj")
            .await
            .expect("add mesh");

        let images = catalog
            .bulk_create_records(RecordKind::Image, &[image])
            .await
            .expect("images");
        let meshes = catalog
            .bulk_create_records(RecordKind::Mesh, &[mesh])
            .await
            .expect("meshes");
        let set = catalog
            .create_image_set("ortho.tif", &[images[0].id])
            .await
            .expect("set");
        let raster = catalog
            .create_raster("ortho.tif", set.id)
            .await
            .expect("raster");

        assert_eq!(
            catalog
                .viewer_target(dataset.id, "ortho.tif")
                .await
                .expect("lookup"),
            Some(ViewerTarget::Raster {
                raster_id: raster.id
            })
        );
        assert_eq!(
            catalog
                .viewer_target(dataset.id, "model.obj")
                .await
                .expect("lookup"),
            Some(ViewerTarget::Mesh {
                record_id: meshes[0].id
            })
        );
        assert_eq!(
            catalog
                .viewer_target(dataset.id, "missing.tif")
                .await
                .expect("lookup"),
            None
        );
    }
}
