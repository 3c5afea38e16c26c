//! Prometheus metrics registration and export.
//!
//! This module defines all Prometheus metrics used by recon-forge and provides
//! functions for initializing, registering, and exporting metrics.

use prometheus::{
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

/// Global Prometheus registry for all recon-forge metrics.
pub static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// Total number of jobs finished, labeled by pipeline and status.
pub static JOBS_TOTAL: OnceLock<CounterVec> = OnceLock::new();

/// Job duration in seconds, labeled by pipeline.
pub static JOB_DURATION: OnceLock<HistogramVec> = OnceLock::new();

/// Number of jobs currently being processed.
pub static JOBS_IN_PROGRESS: OnceLock<Gauge> = OnceLock::new();

/// Content records created by the classifier, labeled by record kind.
pub static RECORDS_INGESTED: OnceLock<IntCounterVec> = OnceLock::new();

/// Model asset bundle downloads, labeled by outcome.
pub static ASSET_DOWNLOADS: OnceLock<IntCounterVec> = OnceLock::new();

/// Number of messages waiting in a queue, labeled by queue name.
pub static QUEUE_DEPTH: OnceLock<GaugeVec> = OnceLock::new();

/// Number of active workers.
pub static ACTIVE_WORKERS: OnceLock<Gauge> = OnceLock::new();

/// Initialize all metrics and register them with the registry.
///
/// Call once at startup. Recording before initialization is a no-op.
///
/// # Errors
///
/// Returns a `prometheus::Error` if metric registration fails, typically due to
/// duplicate metric names or invalid metric configurations.
pub fn init_metrics() -> Result<(), prometheus::Error> {
    let registry = Registry::new();

    let jobs_total = CounterVec::new(
        Opts::new("recon_forge_jobs_total", "Total number of jobs finished"),
        &["pipeline", "status"],
    )?;

    // Reconstruction jobs routinely run for hours
    let job_duration = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "recon_forge_job_duration_seconds",
            "Job duration in seconds",
        )
        .buckets(vec![
            30.0, 60.0, 300.0, 900.0, 1800.0, 3600.0, 7200.0, 14400.0, 28800.0,
        ]),
        &["pipeline"],
    )?;

    let jobs_in_progress = Gauge::new(
        "recon_forge_jobs_in_progress",
        "Number of jobs currently being processed",
    )?;

    let records_ingested = IntCounterVec::new(
        Opts::new(
            "recon_forge_records_ingested_total",
            "Content records created from dataset files",
        ),
        &["kind"],
    )?;

    let asset_downloads = IntCounterVec::new(
        Opts::new(
            "recon_forge_asset_downloads_total",
            "Model asset bundle downloads",
        ),
        &["outcome"],
    )?;

    let queue_depth = GaugeVec::new(
        Opts::new("recon_forge_queue_depth", "Number of jobs in queue"),
        &["queue_name"],
    )?;

    let active_workers = Gauge::new("recon_forge_active_workers", "Number of active workers")?;

    registry.register(Box::new(jobs_total.clone()))?;
    registry.register(Box::new(job_duration.clone()))?;
    registry.register(Box::new(jobs_in_progress.clone()))?;
    registry.register(Box::new(records_ingested.clone()))?;
    registry.register(Box::new(asset_downloads.clone()))?;
    registry.register(Box::new(queue_depth.clone()))?;
    registry.register(Box::new(active_workers.clone()))?;

    // If any of these fail, metrics were already initialized (idempotent)
    let _ = REGISTRY.set(registry);
    let _ = JOBS_TOTAL.set(jobs_total);
    let _ = JOB_DURATION.set(job_duration);
    let _ = JOBS_IN_PROGRESS.set(jobs_in_progress);
    let _ = RECORDS_INGESTED.set(records_ingested);
    let _ = ASSET_DOWNLOADS.set(asset_downloads);
    let _ = QUEUE_DEPTH.set(queue_depth);
    let _ = ACTIVE_WORKERS.set(active_workers);

    tracing::info!("Prometheus metrics initialized successfully");

    Ok(())
}

/// Export all registered metrics in Prometheus text format.
///
/// Returns a comment line instead when the registry has not been
/// initialized or encoding fails.
pub fn export_metrics() -> String {
    let Some(registry) = REGISTRY.get() else {
        return "# Metrics not initialized. Call init_metrics() first.\n".to_string();
    };

    let encoder = TextEncoder::new();
    let metric_families = registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return format!("# Error encoding metrics: {}\n", e);
    }

    String::from_utf8(buffer)
        .unwrap_or_else(|e| format!("# Error converting metrics to UTF-8: {}\n", e))
}
