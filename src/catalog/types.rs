//! Record types held by the data catalog.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named collection of content files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// A single checksummed, stored file.
///
/// The name is path-like (`sub/dir/tileset.json`) and is what the
/// classifier sniffs extensions and media types from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentFile {
    pub id: Uuid,
    pub name: String,
    /// Hex-encoded SHA-256 of the content.
    pub checksum: String,
    pub size_bytes: i64,
    pub created_at: DateTime<Utc>,
}

/// Classification axis of a typed content record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Image,
    Mesh,
    Video,
}

impl RecordKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Image => "image",
            RecordKind::Mesh => "mesh",
            RecordKind::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "image" => Some(RecordKind::Image),
            "mesh" => Some(RecordKind::Mesh),
            "video" => Some(RecordKind::Video),
            _ => None,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed wrapper around one content file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: Uuid,
    pub kind: RecordKind,
    pub file: ContentFile,
}

/// A named set of image records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageSet {
    pub id: Uuid,
    pub name: String,
    pub image_ids: Vec<Uuid>,
}

/// A raster wrapping an image set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Raster {
    pub id: Uuid,
    pub name: String,
    pub image_set_id: Uuid,
}

/// A named group of content files, e.g. the members of a 3D-tiles tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileGroup {
    pub id: Uuid,
    pub name: String,
    pub file_ids: Vec<Uuid>,
}

/// A tiled 3D dataset referencing its `tileset.json` manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TiledDataset {
    pub id: Uuid,
    pub name: String,
    pub manifest_file_id: Uuid,
}

/// What a viewer should open for a dataset file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerTarget {
    /// An image is shown through the raster wrapping its image set.
    Raster { raster_id: Uuid },
    /// A mesh is shown directly.
    Mesh { record_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_kind_round_trip_names() {
        for kind in [RecordKind::Image, RecordKind::Mesh, RecordKind::Video] {
            assert_eq!(RecordKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(RecordKind::parse("tiles"), None);
    }

    #[test]
    fn test_viewer_target_serialization() {
        let target = ViewerTarget::Raster {
            raster_id: Uuid::nil(),
        };
        let json = serde_json::to_value(&target).expect("serialize");
        assert_eq!(json["type"], "raster");
    }
}
