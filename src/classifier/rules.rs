//! Name-based file classification rules.

use std::path::Path;

use crate::catalog::RecordKind;

pub const IMAGE_EXTENSIONS: &[&str] = &["tif", "png"];
pub const MESH_EXTENSIONS: &[&str] = &["ply", "obj"];
pub const VIDEO_EXTENSIONS: &[&str] = &["mpg", "mp4"];
pub const TILESET_MANIFEST: &str = "tileset.json";

/// The collection a file is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileClass {
    Image,
    Mesh,
    Video,
    TileManifest,
}

impl FileClass {
    /// Record kind for the classes that become typed records.
    pub fn record_kind(&self) -> Option<RecordKind> {
        match self {
            FileClass::Image => Some(RecordKind::Image),
            FileClass::Mesh => Some(RecordKind::Mesh),
            FileClass::Video => Some(RecordKind::Video),
            FileClass::TileManifest => None,
        }
    }
}

/// Classifies a file by name alone.
///
/// Rules are tried in order image, mesh, video, tile manifest; the first
/// match wins. Files without an extension are never classified.
pub fn classify_name(name: &str) -> Option<FileClass> {
    let ext = Path::new(name).extension()?.to_str()?;
    let mime = mime_guess::from_path(name).first_raw().unwrap_or("");

    if IMAGE_EXTENSIONS.contains(&ext) || mime.starts_with("image") {
        Some(FileClass::Image)
    } else if MESH_EXTENSIONS.contains(&ext) {
        Some(FileClass::Mesh)
    } else if VIDEO_EXTENSIONS.contains(&ext) || mime.starts_with("video") {
        Some(FileClass::Video)
    } else if name.ends_with(TILESET_MANIFEST) {
        Some(FileClass::TileManifest)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extension_rules() {
        assert_eq!(classify_name("ortho.tif"), Some(FileClass::Image));
        assert_eq!(classify_name("dsm.png"), Some(FileClass::Image));
        assert_eq!(classify_name("model.ply"), Some(FileClass::Mesh));
        assert_eq!(classify_name("out/model.obj"), Some(FileClass::Mesh));
        assert_eq!(classify_name("flight.mpg"), Some(FileClass::Video));
        assert_eq!(classify_name("flight.mp4"), Some(FileClass::Video));
        assert_eq!(
            classify_name("tiles/a/tileset.json"),
            Some(FileClass::TileManifest)
        );
    }

    #[test]
    fn test_media_type_fallback() {
        assert_eq!(classify_name("photo.jpg"), Some(FileClass::Image));
        assert_eq!(classify_name("PHOTO.JPEG"), Some(FileClass::Image));
        assert_eq!(classify_name("clip.avi"), Some(FileClass::Video));
    }

    #[test]
    fn test_extension_match_is_case_sensitive() {
        // Upper-case TIF still classifies through the media type guess.
        assert_eq!(classify_name("ORTHO.TIF"), Some(FileClass::Image));
        // No media type fallback exists for meshes.
        assert_eq!(classify_name("MODEL.PLY"), None);
    }

    #[test]
    fn test_unmatched_and_extensionless() {
        assert_eq!(classify_name("points.las"), None);
        assert_eq!(classify_name("notes.txt"), None);
        assert_eq!(classify_name("README"), None);
        assert_eq!(classify_name("dir.d/README"), None);
        assert_eq!(classify_name("metadata.json"), None);
    }

    #[test]
    fn test_record_kind_mapping() {
        assert_eq!(FileClass::Video.record_kind(), Some(RecordKind::Video));
        assert_eq!(FileClass::TileManifest.record_kind(), None);
    }
}
