//! PostgreSQL-backed data catalog.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{BlobStore, Database, StorageError};
use crate::catalog::{
    Catalog, ContentFile, ContentRecord, Dataset, FileGroup, ImageSet, Raster, RecordKind,
    TiledDataset, ViewerTarget,
};
use crate::error::CatalogError;

#[derive(sqlx::FromRow)]
struct FileRow {
    id: Uuid,
    name: String,
    checksum: String,
    size_bytes: i64,
    created_at: DateTime<Utc>,
}

impl From<FileRow> for ContentFile {
    fn from(row: FileRow) -> Self {
        ContentFile {
            id: row.id,
            name: row.name,
            checksum: row.checksum,
            size_bytes: row.size_bytes,
            created_at: row.created_at,
        }
    }
}

fn sql(err: sqlx::Error) -> CatalogError {
    StorageError::from(err).into()
}

/// Catalog storing metadata in PostgreSQL and bytes in a [`BlobStore`].
pub struct PgCatalog {
    db: Database,
    blobs: BlobStore,
}

impl PgCatalog {
    pub fn new(db: Database, blobs: BlobStore) -> Self {
        Self { db, blobs }
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    async fn ensure_dataset(&self, id: Uuid) -> Result<(), CatalogError> {
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM datasets WHERE id = $1")
            .bind(id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(sql)?;
        exists
            .map(|_| ())
            .ok_or(CatalogError::DatasetNotFound(id))
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn create_dataset(&self, name: &str) -> Result<Dataset, CatalogError> {
        let dataset = Dataset {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO datasets (id, name, created_at) VALUES ($1, $2, $3)")
            .bind(dataset.id)
            .bind(&dataset.name)
            .bind(dataset.created_at)
            .execute(self.db.pool())
            .await
            .map_err(sql)?;

        Ok(dataset)
    }

    async fn get_dataset(&self, id: Uuid) -> Result<Dataset, CatalogError> {
        let row: Option<(Uuid, String, DateTime<Utc>)> =
            sqlx::query_as("SELECT id, name, created_at FROM datasets WHERE id = $1")
                .bind(id)
                .fetch_optional(self.db.pool())
                .await
                .map_err(sql)?;

        let (id, name, created_at) = row.ok_or(CatalogError::DatasetNotFound(id))?;
        Ok(Dataset {
            id,
            name,
            created_at,
        })
    }

    async fn add_file(
        &self,
        dataset_id: Uuid,
        name: &str,
        data: &[u8],
    ) -> Result<ContentFile, CatalogError> {
        self.ensure_dataset(dataset_id).await?;

        let checksum = self.blobs.put(data).await?;
        let file = ContentFile {
            id: Uuid::new_v4(),
            name: name.to_string(),
            checksum,
            size_bytes: data.len() as i64,
            created_at: Utc::now(),
        };

        sqlx::query(
            r#"
            INSERT INTO content_files (id, dataset_id, name, checksum, size_bytes, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(file.id)
        .bind(dataset_id)
        .bind(&file.name)
        .bind(&file.checksum)
        .bind(file.size_bytes)
        .bind(file.created_at)
        .execute(self.db.pool())
        .await
        .map_err(sql)?;

        Ok(file)
    }

    async fn list_files(&self, dataset_id: Uuid) -> Result<Vec<ContentFile>, CatalogError> {
        self.ensure_dataset(dataset_id).await?;

        let rows: Vec<FileRow> = sqlx::query_as(
            r#"
            SELECT id, name, checksum, size_bytes, created_at
            FROM content_files
            WHERE dataset_id = $1
            ORDER BY name, created_at
            "#,
        )
        .bind(dataset_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(sql)?;

        Ok(rows.into_iter().map(ContentFile::from).collect())
    }

    async fn read_file(&self, file: &ContentFile) -> Result<Vec<u8>, CatalogError> {
        match self.blobs.get(&file.checksum).await {
            Ok(data) => Ok(data),
            Err(StorageError::BlobNotFound(_)) => Err(CatalogError::FileNotFound(file.id)),
            Err(StorageError::ChecksumMismatch { expected, actual }) => {
                Err(CatalogError::ChecksumMismatch {
                    file: file.id,
                    expected,
                    actual,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn bulk_create_records(
        &self,
        kind: RecordKind,
        files: &[ContentFile],
    ) -> Result<Vec<ContentRecord>, CatalogError> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = files.iter().map(|_| Uuid::new_v4()).collect();
        let file_ids: Vec<Uuid> = files.iter().map(|f| f.id).collect();

        let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
            r#"
            INSERT INTO content_records (id, kind, file_id)
            SELECT t.id, $1, t.file_id
            FROM UNNEST($2::uuid[], $3::uuid[]) AS t(id, file_id)
            ON CONFLICT (kind, file_id) DO NOTHING
            RETURNING id, file_id
            "#,
        )
        .bind(kind.as_str())
        .bind(&ids)
        .bind(&file_ids)
        .fetch_all(self.db.pool())
        .await
        .map_err(sql)?;

        let created: HashMap<Uuid, Uuid> = rows
            .into_iter()
            .map(|(record_id, file_id)| (file_id, record_id))
            .collect();

        Ok(files
            .iter()
            .filter_map(|file| {
                created.get(&file.id).map(|record_id| ContentRecord {
                    id: *record_id,
                    kind,
                    file: file.clone(),
                })
            })
            .collect())
    }

    async fn find_records(
        &self,
        kind: RecordKind,
        files: &[ContentFile],
    ) -> Result<Vec<ContentRecord>, CatalogError> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let file_ids: Vec<Uuid> = files.iter().map(|f| f.id).collect();
        let rows: Vec<(Uuid, Uuid)> = sqlx::query_as(
            "SELECT id, file_id FROM content_records WHERE kind = $1 AND file_id = ANY($2)",
        )
        .bind(kind.as_str())
        .bind(&file_ids)
        .fetch_all(self.db.pool())
        .await
        .map_err(sql)?;

        let existing: HashMap<Uuid, Uuid> = rows
            .into_iter()
            .map(|(record_id, file_id)| (file_id, record_id))
            .collect();

        Ok(files
            .iter()
            .filter_map(|file| {
                existing.get(&file.id).map(|record_id| ContentRecord {
                    id: *record_id,
                    kind,
                    file: file.clone(),
                })
            })
            .collect())
    }

    async fn find_image_set(&self, image_id: Uuid) -> Result<Option<ImageSet>, CatalogError> {
        let row: Option<(Uuid, String)> = sqlx::query_as(
            r#"
            SELECT s.id, s.name
            FROM image_sets s
            JOIN image_set_members m ON m.image_set_id = s.id
            WHERE m.record_id = $1
            ORDER BY s.created_at
            LIMIT 1
            "#,
        )
        .bind(image_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(sql)?;

        let Some((id, name)) = row else {
            return Ok(None);
        };

        let members: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT record_id FROM image_set_members WHERE image_set_id = $1 ORDER BY position",
        )
        .bind(id)
        .fetch_all(self.db.pool())
        .await
        .map_err(sql)?;

        Ok(Some(ImageSet {
            id,
            name,
            image_ids: members.into_iter().map(|(record_id,)| record_id).collect(),
        }))
    }

    async fn find_raster(&self, image_set_id: Uuid) -> Result<Option<Raster>, CatalogError> {
        let row: Option<(Uuid, String)> = sqlx::query_as(
            "SELECT id, name FROM rasters WHERE image_set_id = $1 ORDER BY created_at LIMIT 1",
        )
        .bind(image_set_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(sql)?;

        Ok(row.map(|(id, name)| Raster {
            id,
            name,
            image_set_id,
        }))
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

        let mut tx = self.db.pool().begin().await.map_err(sql)?;

        sqlx::query("INSERT INTO image_sets (id, name) VALUES ($1, $2)")
            .bind(image_set.id)
            .bind(&image_set.name)
            .execute(&mut *tx)
            .await
            .map_err(sql)?;

        sqlx::query(
            r#"
            INSERT INTO image_set_members (image_set_id, record_id, position)
            SELECT $1, t.record_id, (t.ord - 1)::int
            FROM UNNEST($2::uuid[]) WITH ORDINALITY AS t(record_id, ord)
            "#,
        )
        .bind(image_set.id)
        .bind(&image_set.image_ids)
        .execute(&mut *tx)
        .await
        .map_err(sql)?;

        tx.commit().await.map_err(sql)?;
        Ok(image_set)
    }

    async fn create_raster(&self, name: &str, image_set_id: Uuid) -> Result<Raster, CatalogError> {
        let exists: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM image_sets WHERE id = $1")
            .bind(image_set_id)
            .fetch_optional(self.db.pool())
            .await
            .map_err(sql)?;
        if exists.is_none() {
            return Err(CatalogError::ImageSetNotFound(image_set_id));
        }

        let raster = Raster {
            id: Uuid::new_v4(),
            name: name.to_string(),
            image_set_id,
        };

        sqlx::query("INSERT INTO rasters (id, name, image_set_id) VALUES ($1, $2, $3)")
            .bind(raster.id)
            .bind(&raster.name)
            .bind(raster.image_set_id)
            .execute(self.db.pool())
            .await
            .map_err(sql)?;

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

        let mut tx = self.db.pool().begin().await.map_err(sql)?;

        sqlx::query("INSERT INTO file_groups (id, name) VALUES ($1, $2)")
            .bind(group.id)
            .bind(&group.name)
            .execute(&mut *tx)
            .await
            .map_err(sql)?;

        sqlx::query(
            r#"
            INSERT INTO file_group_members (group_id, file_id, position)
            SELECT $1, t.file_id, (t.ord - 1)::int
            FROM UNNEST($2::uuid[]) WITH ORDINALITY AS t(file_id, ord)
            "#,
        )
        .bind(group.id)
        .bind(&group.file_ids)
        .execute(&mut *tx)
        .await
        .map_err(sql)?;

        tx.commit().await.map_err(sql)?;
        Ok(group)
    }

    async fn find_file_group(
        &self,
        name: &str,
        file_id: Uuid,
    ) -> Result<Option<FileGroup>, CatalogError> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT g.id
            FROM file_groups g
            JOIN file_group_members m ON m.group_id = g.id
            WHERE g.name = $1 AND m.file_id = $2
            ORDER BY g.created_at
            LIMIT 1
            "#,
        )
        .bind(name)
        .bind(file_id)
        .fetch_optional(self.db.pool())
        .await
        .map_err(sql)?;

        let Some((id,)) = row else {
            return Ok(None);
        };

        let members: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT file_id FROM file_group_members WHERE group_id = $1 ORDER BY position",
        )
        .bind(id)
        .fetch_all(self.db.pool())
        .await
        .map_err(sql)?;

        Ok(Some(FileGroup {
            id,
            name: name.to_string(),
            file_ids: members.into_iter().map(|(file_id,)| file_id).collect(),
        }))
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

        sqlx::query("INSERT INTO tiled_datasets (id, name, manifest_file_id) VALUES ($1, $2, $3)")
            .bind(tiled.id)
            .bind(&tiled.name)
            .bind(tiled.manifest_file_id)
            .execute(self.db.pool())
            .await
            .map_err(sql)?;

        Ok(tiled)
    }

    async fn find_tiled_dataset(
        &self,
        manifest_file_id: Uuid,
    ) -> Result<Option<TiledDataset>, CatalogError> {
        let row: Option<(Uuid, String)> =
            sqlx::query_as("SELECT id, name FROM tiled_datasets WHERE manifest_file_id = $1")
                .bind(manifest_file_id)
                .fetch_optional(self.db.pool())
                .await
                .map_err(sql)?;

        Ok(row.map(|(id, name)| TiledDataset {
            id,
            name,
            manifest_file_id,
        }))
    }

    async fn viewer_target(
        &self,
        dataset_id: Uuid,
        path: &str,
    ) -> Result<Option<ViewerTarget>, CatalogError> {
        self.ensure_dataset(dataset_id).await?;

        let file: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM content_files
            WHERE dataset_id = $1 AND name = $2
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(dataset_id)
        .bind(path)
        .fetch_optional(self.db.pool())
        .await
        .map_err(sql)?;

        let Some((file_id,)) = file else {
            return Ok(None);
        };

        let raster: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT r.id
            FROM content_records c
            JOIN image_set_members m ON m.record_id = c.id
            JOIN rasters r ON r.image_set_id = m.image_set_id
            WHERE c.file_id = $1 AND c.kind = $2
            ORDER BY r.created_at
            LIMIT 1
            "#,
        )
        .bind(file_id)
        .bind(RecordKind::Image.as_str())
        .fetch_optional(self.db.pool())
        .await
        .map_err(sql)?;

        if let Some((raster_id,)) = raster {
            return Ok(Some(ViewerTarget::Raster { raster_id }));
        }

        let mesh: Option<(Uuid,)> =
            sqlx::query_as("SELECT id FROM content_records WHERE file_id = $1 AND kind = $2")
                .bind(file_id)
                .bind(RecordKind::Mesh.as_str())
                .fetch_optional(self.db.pool())
                .await
                .map_err(sql)?;

        Ok(mesh.map(|(record_id,)| ViewerTarget::Mesh { record_id }))
    }
}
