//! Post-insert hooks run for every record a bulk insert creates.

use async_trait::async_trait;
use tracing::debug;

use crate::catalog::{Catalog, ContentRecord, RecordKind};
use crate::error::CatalogError;

/// Follow-up registration for newly created records.
///
/// Bulk inserts never notify anyone on their own; the classifier calls
/// [`RecordHook::on_created`] for each record it got back, and again for
/// records a previous pass created. Implementations must complete missing
/// work without duplicating what already exists.
#[async_trait]
pub trait RecordHook: Send + Sync {
    /// Short identifier for logs.
    fn name(&self) -> &str;

    /// Whether this hook wants records of `kind`.
    fn applies_to(&self, kind: RecordKind) -> bool;

    async fn on_created(
        &self,
        catalog: &dyn Catalog,
        record: &ContentRecord,
    ) -> Result<(), CatalogError>;
}

/// Registers each new image as a single-image image set wrapped in a raster.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageRegistration;

#[async_trait]
impl RecordHook for ImageRegistration {
    fn name(&self) -> &str {
        "image_registration"
    }

    fn applies_to(&self, kind: RecordKind) -> bool {
        kind == RecordKind::Image
    }

    async fn on_created(
        &self,
        catalog: &dyn Catalog,
        record: &ContentRecord,
    ) -> Result<(), CatalogError> {
        let name = record.file.name.as_str();
        let image_set = match catalog.find_image_set(record.id).await? {
            Some(existing) => existing,
            None => catalog.create_image_set(name, &[record.id]).await?,
        };
        if catalog.find_raster(image_set.id).await?.is_some() {
            return Ok(());
        }
        let raster = catalog.create_raster(name, image_set.id).await?;
        debug!(
            record_id = %record.id,
            image_set_id = %image_set.id,
            raster_id = %raster.id,
            "Registered image raster"
        );
        Ok(())
    }
}
