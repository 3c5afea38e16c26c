//! Metrics module for Prometheus-based monitoring.
//!
//! Covers job throughput and duration per pipeline, classifier output, model
//! asset downloads, queue depth and worker counts.
//!
//! # Example
//!
//! ```ignore
//! use recon_forge::metrics::{init_metrics, export_metrics, MetricsCollector};
//!
//! init_metrics().expect("Failed to initialize metrics");
//!
//! let collector = MetricsCollector::new();
//! collector.record_ingested("image", 12);
//!
//! let metrics_text = export_metrics();
//! ```

pub mod collectors;
pub mod prometheus;

pub use collectors::MetricsCollector;
pub use prometheus::{export_metrics, init_metrics};

pub use prometheus::{
    ACTIVE_WORKERS, ASSET_DOWNLOADS, JOBS_IN_PROGRESS, JOBS_TOTAL, JOB_DURATION, QUEUE_DEPTH,
    RECORDS_INGESTED, REGISTRY,
};
