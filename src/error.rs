//! Error types for recon-forge operations.
//!
//! Defines the error types shared across subsystems:
//! - Catalog and job record storage
//! - Execution environment preparation
//! - Model asset download and caching
//! - Docker container management
//! - Managed job tasks and the job runner
//! - Pipeline triggers

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use crate::jobs::JobStatus;

/// Errors that can occur during catalog operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Dataset {0} not found")]
    DatasetNotFound(Uuid),

    #[error("Content file {0} not found")]
    FileNotFound(Uuid),

    #[error("Image set {0} not found")]
    ImageSetNotFound(Uuid),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Checksum mismatch for file {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: Uuid,
        expected: String,
        actual: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while reading or updating job records.
#[derive(Debug, Error)]
pub enum JobStoreError {
    #[error("Job {0} not found")]
    NotFound(Uuid),

    #[error("Invalid status transition for job {job}: {from} -> {to}")]
    InvalidTransition {
        job: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Storage error: {0}")]
    Storage(String),
}

/// Errors that can occur while preparing a job's execution environment.
#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error("Missing required input: no '{extension}' file among staged inputs")]
    MissingRequiredInput { extension: String },

    #[error("Missing support file: {0}")]
    MissingSupportFile(PathBuf),

    #[error("Refusing to stage file outside the input directory: {0}")]
    UnsafePath(String),

    #[error("Model assets unavailable: {0}")]
    Assets(#[from] AssetError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while fetching or caching model assets.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Asset source returned status {status}")]
    BadStatus { status: u16 },

    #[error("Failed to extract archive: {0}")]
    Extract(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during Docker operations.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Docker run failed: {0}")]
    RunFailed(String),

    #[error("Failed to pull image: {0}")]
    PullFailed(String),

    #[error("Container '{id}' not found")]
    ContainerNotFound { id: String },

    #[error("Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised inside a managed task. Any of these marks the job failed.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Setup failed: {0}")]
    Setup(#[from] EnvironmentError),

    #[error("Container invocation failed: {0}")]
    Invoke(#[from] DockerError),

    #[error("Container exited with non-zero code {code}")]
    ContainerFailed { code: i64 },

    #[error("Output collection failed: {0}")]
    Collect(#[from] CatalogError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Infrastructure errors from the job runner.
///
/// These are not job failures: the job record could not be read or
/// updated, so the queue's retry policy decides what happens next.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Job store error: {0}")]
    JobStore(#[from] JobStoreError),
}

/// Errors that can occur when triggering a pipeline.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Job store error: {0}")]
    JobStore(#[from] JobStoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] crate::scheduler::QueueError),
}
