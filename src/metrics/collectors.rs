//! High-level recording interface over the raw Prometheus metrics.
//!
//! Every method is a no-op until [`init_metrics`](super::init_metrics) has
//! run, so library code and tests can record freely.

use super::prometheus::{
    ACTIVE_WORKERS, ASSET_DOWNLOADS, JOBS_IN_PROGRESS, JOBS_TOTAL, JOB_DURATION, QUEUE_DEPTH,
    RECORDS_INGESTED,
};

/// Metrics collector for recording recon-forge operational metrics.
///
/// # Example
///
/// ```ignore
/// use recon_forge::metrics::{init_metrics, MetricsCollector};
///
/// init_metrics().expect("Failed to init metrics");
/// let collector = MetricsCollector::new();
///
/// collector.job_started();
/// collector.job_finished("extraction", "succeeded", 412.0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    /// Marks a job as in progress.
    pub fn job_started(&self) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.inc();
        }
    }

    /// Records a finished job and releases its in-progress slot.
    ///
    /// # Arguments
    ///
    /// * `pipeline` - Pipeline the job ran (e.g., "extraction")
    /// * `status` - Terminal status (e.g., "succeeded", "failed")
    /// * `duration_secs` - Wall time of the job in seconds
    pub fn job_finished(&self, pipeline: &str, status: &str, duration_secs: f64) {
        if let Some(jobs_in_progress) = JOBS_IN_PROGRESS.get() {
            jobs_in_progress.dec();
        }

        if let Some(jobs_total) = JOBS_TOTAL.get() {
            jobs_total.with_label_values(&[pipeline, status]).inc();
        }

        if let Some(job_duration) = JOB_DURATION.get() {
            job_duration
                .with_label_values(&[pipeline])
                .observe(duration_secs);
        }

        tracing::trace!(
            pipeline = pipeline,
            status = status,
            duration_secs = duration_secs,
            "Recorded job metric"
        );
    }

    /// Counts content records created by one bulk insert.
    pub fn record_ingested(&self, kind: &str, count: u64) {
        if let Some(records) = RECORDS_INGESTED.get() {
            records.with_label_values(&[kind]).inc_by(count);
        }
    }

    /// Counts a model asset download attempt by outcome.
    pub fn record_asset_download(&self, outcome: &str) {
        if let Some(downloads) = ASSET_DOWNLOADS.get() {
            downloads.with_label_values(&[outcome]).inc();
        }

        tracing::trace!(outcome = outcome, "Recorded asset download metric");
    }

    /// Update the queue depth for a specific queue.
    pub fn set_queue_depth(&self, queue_name: &str, depth: usize) {
        if let Some(queue_depth) = QUEUE_DEPTH.get() {
            queue_depth
                .with_label_values(&[queue_name])
                .set(depth as f64);
        }

        tracing::trace!(
            queue_name = queue_name,
            depth = depth,
            "Updated queue depth metric"
        );
    }

    /// Update the count of active workers.
    pub fn set_active_workers(&self, count: usize) {
        if let Some(active_workers) = ACTIVE_WORKERS.get() {
            active_workers.set(count as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::init_metrics;

    fn ensure_metrics_init() {
        let _ = init_metrics();
    }

    #[test]
    fn test_metrics_collector_new() {
        let collector = MetricsCollector::new();
        assert!(std::mem::size_of_val(&collector) == 0);
    }

    #[test]
    fn test_job_lifecycle() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.job_started();
        collector.job_finished("extraction", "succeeded", 120.5);
        collector.job_started();
        collector.job_finished("reconstruction", "failed", 9000.0);

        let counter = JOBS_TOTAL
            .get()
            .expect("initialized")
            .with_label_values(&["reconstruction", "failed"]);
        assert!(counter.get() >= 1.0);
    }

    #[test]
    fn test_record_ingested() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.record_ingested("image", 3);
        collector.record_ingested("image", 2);

        let counter = RECORDS_INGESTED
            .get()
            .expect("initialized")
            .with_label_values(&["image"]);
        assert!(counter.get() >= 5);
    }

    #[test]
    fn test_gauges() {
        ensure_metrics_init();
        let collector = MetricsCollector::new();

        collector.set_queue_depth("extraction", 42);
        collector.set_queue_depth("extraction", 40);
        collector.set_active_workers(4);
        collector.record_asset_download("success");
    }
}
