//! Data catalog boundary.
//!
//! The catalog owns datasets, content files and the typed records the
//! classifier creates. The orchestration core only needs the contract in
//! [`Catalog`]; two implementations exist:
//!
//! - [`InMemoryCatalog`] for local runs and tests
//! - [`crate::storage::PgCatalog`] backed by PostgreSQL and a blob store
//!
//! # Bulk inserts
//!
//! [`Catalog::bulk_create_records`] creates records without any implicit
//! notification. Callers that need follow-up registration (image sets,
//! rasters) invoke their hooks explicitly for every record returned. The
//! `find_*` lookups let them finish a registration an earlier pass left
//! incomplete.

pub mod memory;
pub mod types;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::CatalogError;

pub use memory::InMemoryCatalog;
pub use types::{
    ContentFile, ContentRecord, Dataset, FileGroup, ImageSet, Raster, RecordKind, TiledDataset,
    ViewerTarget,
};

/// Storage contract required by the orchestration core.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Creates an empty dataset.
    async fn create_dataset(&self, name: &str) -> Result<Dataset, CatalogError>;

    /// Fetches a dataset by id.
    async fn get_dataset(&self, id: Uuid) -> Result<Dataset, CatalogError>;

    /// Stores `data` and attaches it to the dataset under `name`.
    async fn add_file(
        &self,
        dataset_id: Uuid,
        name: &str,
        data: &[u8],
    ) -> Result<ContentFile, CatalogError>;

    /// Lists a dataset's member files ordered by name.
    async fn list_files(&self, dataset_id: Uuid) -> Result<Vec<ContentFile>, CatalogError>;

    /// Reads a file's content.
    async fn read_file(&self, file: &ContentFile) -> Result<Vec<u8>, CatalogError>;

    /// Creates one record of `kind` per file in a single batch.
    ///
    /// Files that already have a record of this kind are skipped; only newly
    /// created records are returned.
    async fn bulk_create_records(
        &self,
        kind: RecordKind,
        files: &[ContentFile],
    ) -> Result<Vec<ContentRecord>, CatalogError>;

    /// Returns the existing records of `kind` for `files`.
    async fn find_records(
        &self,
        kind: RecordKind,
        files: &[ContentFile],
    ) -> Result<Vec<ContentRecord>, CatalogError>;

    /// Returns an image set containing the image record, if any.
    async fn find_image_set(&self, image_id: Uuid) -> Result<Option<ImageSet>, CatalogError>;

    /// Returns the raster wrapping an image set, if any.
    async fn find_raster(&self, image_set_id: Uuid) -> Result<Option<Raster>, CatalogError>;

    /// Creates an image set holding the given image records.
    async fn create_image_set(
        &self,
        name: &str,
        image_ids: &[Uuid],
    ) -> Result<ImageSet, CatalogError>;

    /// Creates a raster wrapping an image set.
    async fn create_raster(&self, name: &str, image_set_id: Uuid) -> Result<Raster, CatalogError>;

    /// Creates a named group of files.
    async fn create_file_group(
        &self,
        name: &str,
        file_ids: &[Uuid],
    ) -> Result<FileGroup, CatalogError>;

    /// Returns the file group named `name` that contains `file_id`, if any.
    async fn find_file_group(
        &self,
        name: &str,
        file_id: Uuid,
    ) -> Result<Option<FileGroup>, CatalogError>;

    /// Creates a tiled dataset referencing its manifest file.
    async fn create_tiled_dataset(
        &self,
        name: &str,
        manifest_file_id: Uuid,
    ) -> Result<TiledDataset, CatalogError>;

    /// Returns the tiled dataset already registered for a manifest, if any.
    async fn find_tiled_dataset(
        &self,
        manifest_file_id: Uuid,
    ) -> Result<Option<TiledDataset>, CatalogError>;

    /// Resolves what a viewer should open for the dataset file at `path`.
    async fn viewer_target(
        &self,
        dataset_id: Uuid,
        path: &str,
    ) -> Result<Option<ViewerTarget>, CatalogError>;
}

/// Hex-encoded SHA-256 of `data`.
pub fn compute_checksum(data: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    hex::encode(Sha256::digest(data))
}
