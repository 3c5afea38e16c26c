//! Database schema constants.
//!
//! Each constant is one statement; the migration runner applies them in
//! order and records each under its own name.

/// Datasets: named collections of content files.
pub const CREATE_DATASETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS datasets (
    id UUID PRIMARY KEY,
    name VARCHAR(1024) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Content files. Bytes live in the blob store, keyed by checksum.
pub const CREATE_CONTENT_FILES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS content_files (
    id UUID PRIMARY KEY,
    dataset_id UUID NOT NULL REFERENCES datasets(id) ON DELETE CASCADE,
    name VARCHAR(1024) NOT NULL,
    checksum VARCHAR(64) NOT NULL,
    size_bytes BIGINT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Typed records. At most one record per kind and file.
pub const CREATE_CONTENT_RECORDS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS content_records (
    id UUID PRIMARY KEY,
    kind VARCHAR(16) NOT NULL,
    file_id UUID NOT NULL REFERENCES content_files(id) ON DELETE CASCADE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    UNIQUE(kind, file_id)
)
"#;

pub const CREATE_IMAGE_SETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS image_sets (
    id UUID PRIMARY KEY,
    name VARCHAR(1024) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_IMAGE_SET_MEMBERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS image_set_members (
    image_set_id UUID NOT NULL REFERENCES image_sets(id) ON DELETE CASCADE,
    record_id UUID NOT NULL REFERENCES content_records(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    PRIMARY KEY (image_set_id, record_id)
)
"#;

pub const CREATE_RASTERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS rasters (
    id UUID PRIMARY KEY,
    name VARCHAR(1024) NOT NULL,
    image_set_id UUID NOT NULL REFERENCES image_sets(id) ON DELETE CASCADE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_FILE_GROUPS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS file_groups (
    id UUID PRIMARY KEY,
    name VARCHAR(1024) NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_FILE_GROUP_MEMBERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS file_group_members (
    group_id UUID NOT NULL REFERENCES file_groups(id) ON DELETE CASCADE,
    file_id UUID NOT NULL REFERENCES content_files(id) ON DELETE CASCADE,
    position INTEGER NOT NULL,
    PRIMARY KEY (group_id, file_id)
)
"#;

/// Tiled datasets. One per manifest file.
pub const CREATE_TILED_DATASETS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS tiled_datasets (
    id UUID PRIMARY KEY,
    name VARCHAR(1024) NOT NULL,
    manifest_file_id UUID NOT NULL UNIQUE REFERENCES content_files(id) ON DELETE CASCADE,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

/// Job records for both pipelines.
pub const CREATE_ALGORITHM_JOBS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS algorithm_jobs (
    id UUID PRIMARY KEY,
    pipeline VARCHAR(32) NOT NULL,
    input_dataset_id UUID NOT NULL REFERENCES datasets(id),
    output_dataset_id UUID REFERENCES datasets(id),
    status VARCHAR(16) NOT NULL,
    error TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
)
"#;

pub const CREATE_CONTENT_FILES_DATASET_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_content_files_dataset_id ON content_files(dataset_id)";

pub const CREATE_CONTENT_FILES_CHECKSUM_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_content_files_checksum ON content_files(checksum)";

pub const CREATE_RASTERS_IMAGE_SET_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_rasters_image_set_id ON rasters(image_set_id)";

pub const CREATE_ALGORITHM_JOBS_CREATED_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_algorithm_jobs_created_at ON algorithm_jobs(created_at)";

/// Returns all schema creation statements in the correct order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_DATASETS_TABLE,
        CREATE_CONTENT_FILES_TABLE,
        CREATE_CONTENT_RECORDS_TABLE,
        CREATE_IMAGE_SETS_TABLE,
        CREATE_IMAGE_SET_MEMBERS_TABLE,
        CREATE_RASTERS_TABLE,
        CREATE_FILE_GROUPS_TABLE,
        CREATE_FILE_GROUP_MEMBERS_TABLE,
        CREATE_TILED_DATASETS_TABLE,
        CREATE_ALGORITHM_JOBS_TABLE,
        CREATE_CONTENT_FILES_DATASET_INDEX,
        CREATE_CONTENT_FILES_CHECKSUM_INDEX,
        CREATE_RASTERS_IMAGE_SET_INDEX,
        CREATE_ALGORITHM_JOBS_CREATED_INDEX,
    ]
}

/// Table names in the schema, in reverse dependency order.
pub mod tables {
    pub const ALGORITHM_JOBS: &str = "algorithm_jobs";
    pub const TILED_DATASETS: &str = "tiled_datasets";
    pub const FILE_GROUP_MEMBERS: &str = "file_group_members";
    pub const FILE_GROUPS: &str = "file_groups";
    pub const RASTERS: &str = "rasters";
    pub const IMAGE_SET_MEMBERS: &str = "image_set_members";
    pub const IMAGE_SETS: &str = "image_sets";
    pub const CONTENT_RECORDS: &str = "content_records";
    pub const CONTENT_FILES: &str = "content_files";
    pub const DATASETS: &str = "datasets";

    pub const ALL: [&str; 10] = [
        ALGORITHM_JOBS,
        TILED_DATASETS,
        FILE_GROUP_MEMBERS,
        FILE_GROUPS,
        RASTERS,
        IMAGE_SET_MEMBERS,
        IMAGE_SETS,
        CONTENT_RECORDS,
        CONTENT_FILES,
        DATASETS,
    ];
}
