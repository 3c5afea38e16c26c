//! recon-forge: orchestration core for chained geospatial processing jobs.
//!
//! Datasets are classified into typed catalog records, algorithm jobs run in
//! containers against a prepared working directory, and finished jobs
//! trigger their follow-on pipeline: extraction on a dataset with a video
//! triggers reconstruction, and every successful reconstruction triggers
//! extraction on its output.

pub mod algorithm;
pub mod catalog;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod environment;
pub mod error;
pub mod execution;
pub mod jobs;
pub mod metrics;
pub mod scheduler;
pub mod storage;

pub use error::{
    AssetError, CatalogError, DockerError, EnvironmentError, JobStoreError, RunnerError,
    TaskError, TriggerError,
};
