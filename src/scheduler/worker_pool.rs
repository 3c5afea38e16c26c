//! Worker pool for processing queued jobs.
//!
//! Each queue gets its own set of workers. A worker runs as an independent
//! async task: it dequeues a message, hands the job to the [`JobRunner`],
//! and acknowledges, requeues or dead-letters the message.
//!
//! # Features
//!
//! - Configurable number of workers per queue
//! - Graceful shutdown with broadcast channel
//! - Retry of infrastructure failures within the message's attempt budget
//! - Dead letter queue for messages that cannot be processed
//! - Pool statistics tracking

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use uuid::Uuid;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::job::QueuedJob;
use super::queue::{QueueError, Recovery, TaskQueue};
use crate::jobs::{JobRunner, JobStatus};
use crate::metrics::MetricsCollector;

/// Errors that can occur in the worker pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Failed to talk to the job queue.
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Pool is already running.
    #[error("Pool is already running")]
    AlreadyRunning,

    /// Pool is not running.
    #[error("Pool is not running")]
    NotRunning,

    /// Shutdown timed out.
    #[error("Shutdown timed out after {0:?}")]
    ShutdownTimeout(Duration),

    /// The job runner could not read or update the job record.
    #[error("Runner error: {0}")]
    Runner(String),

    /// The message names a task no pipeline handles.
    #[error("Unknown task '{0}'")]
    UnknownTask(String),

    /// The job exceeded the configured time limit.
    #[error("Job timed out after {0:?}")]
    JobTimeout(Duration),
}

/// Configuration for the worker pool.
#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    /// Number of worker tasks to spawn per queue.
    pub num_workers: usize,
    /// How long a dequeue waits before checking for shutdown again.
    pub poll_interval: Duration,
    /// Maximum time allowed for processing a single job. Off by default.
    pub job_timeout: Option<Duration>,
    /// Timeout for graceful shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: 1,
            poll_interval: Duration::from_secs(1),
            job_timeout: None,
            shutdown_timeout: Duration::from_secs(60),
        }
    }
}

impl WorkerPoolConfig {
    /// Creates a new configuration with the specified number of workers.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the job timeout.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    /// Sets the shutdown timeout.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Statistics about the worker pool.
#[derive(Debug, Clone, Default)]
pub struct PoolStats {
    /// Total number of workers in the pool.
    pub num_workers: usize,
    /// Number of workers currently processing jobs.
    pub active_workers: usize,
    /// Total number of jobs that ran to success.
    pub jobs_completed: u64,
    /// Total number of jobs that failed or could not be processed.
    pub jobs_failed: u64,
    /// Average job processing duration.
    pub average_job_duration: Duration,
}

impl PoolStats {
    /// Returns the total number of jobs processed (completed + failed).
    pub fn total_processed(&self) -> u64 {
        self.jobs_completed + self.jobs_failed
    }

    /// Returns the success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_processed();
        if total == 0 {
            return 0.0;
        }
        (self.jobs_completed as f64 / total as f64) * 100.0
    }
}

/// Shared state for tracking pool statistics.
struct SharedPoolStats {
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    total_duration_ms: AtomicU64,
    active_workers: AtomicU64,
}

impl SharedPoolStats {
    fn new() -> Self {
        Self {
            jobs_completed: AtomicU64::new(0),
            jobs_failed: AtomicU64::new(0),
            total_duration_ms: AtomicU64::new(0),
            active_workers: AtomicU64::new(0),
        }
    }

    fn record_completion(&self, duration: Duration) {
        self.jobs_completed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn record_failure(&self, duration: Duration) {
        self.jobs_failed.fetch_add(1, Ordering::SeqCst);
        self.total_duration_ms
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    fn increment_active(&self) {
        self.active_workers.fetch_add(1, Ordering::SeqCst);
    }

    fn decrement_active(&self) {
        self.active_workers.fetch_sub(1, Ordering::SeqCst);
    }

    fn to_pool_stats(&self, num_workers: usize) -> PoolStats {
        let completed = self.jobs_completed.load(Ordering::SeqCst);
        let failed = self.jobs_failed.load(Ordering::SeqCst);
        let total_duration_ms = self.total_duration_ms.load(Ordering::SeqCst);
        let active = self.active_workers.load(Ordering::SeqCst);

        let total_jobs = completed + failed;
        let average_duration = if total_jobs > 0 {
            Duration::from_millis(total_duration_ms / total_jobs)
        } else {
            Duration::ZERO
        };

        PoolStats {
            num_workers,
            active_workers: active as usize,
            jobs_completed: completed,
            jobs_failed: failed,
            average_job_duration: average_duration,
        }
    }
}

/// Pool of workers consuming one or more queues.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    queues: Vec<Arc<dyn TaskQueue>>,
    runner: JobRunner,
    shutdown_tx: broadcast::Sender<()>,
    worker_handles: Vec<JoinHandle<()>>,
    stats: Arc<SharedPoolStats>,
    is_running: AtomicBool,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, queues: Vec<Arc<dyn TaskQueue>>, runner: JobRunner) -> Self {
        // Buffer size of 1 is sufficient since we only send once
        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            config,
            queues,
            runner,
            shutdown_tx,
            worker_handles: Vec::new(),
            stats: Arc::new(SharedPoolStats::new()),
            is_running: AtomicBool::new(false),
        }
    }

    /// Starts all workers.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::AlreadyRunning` if the pool is already running.
    pub async fn start(&mut self) -> Result<(), PoolError> {
        if self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::AlreadyRunning);
        }

        for queue in &self.queues {
            match queue.recover_processing_jobs().await {
                Ok(recovery) if !recovery.is_empty() => {
                    info!(
                        queue = queue.name(),
                        requeued = recovery.requeued.len(),
                        dead_lettered = recovery.dead_lettered.len(),
                        "Recovered jobs from processing queue"
                    );
                    self.fail_interrupted(&recovery).await;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(queue = queue.name(), error = %e, "Failed to recover processing jobs");
                }
            }

            for i in 0..self.config.num_workers {
                let worker = Worker::new(
                    format!("{}-worker-{}", queue.name(), i),
                    Arc::clone(queue),
                    self.runner.clone(),
                    self.config.poll_interval,
                    self.config.job_timeout,
                )
                .with_stats(Arc::clone(&self.stats));
                let shutdown_rx = self.shutdown_tx.subscribe();

                let handle = tokio::spawn(async move {
                    worker.run(shutdown_rx).await;
                });
                self.worker_handles.push(handle);
            }
        }

        self.is_running.store(true, Ordering::SeqCst);
        MetricsCollector::new().set_active_workers(self.total_workers());
        info!(
            queues = self.queues.len(),
            workers_per_queue = self.config.num_workers,
            "Worker pool started"
        );

        Ok(())
    }

    /// Gracefully shuts down all workers.
    ///
    /// Workers finish their current job before stopping.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::ShutdownTimeout` if workers don't stop within
    /// the configured timeout.
    pub async fn shutdown(&mut self) -> Result<(), PoolError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(PoolError::NotRunning);
        }

        info!("Initiating worker pool shutdown");

        // Workers may have already stopped
        let _ = self.shutdown_tx.send(());

        let shutdown_future = async {
            for handle in self.worker_handles.drain(..) {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task panicked during shutdown");
                }
            }
        };

        let result = tokio::time::timeout(self.config.shutdown_timeout, shutdown_future).await;
        self.is_running.store(false, Ordering::SeqCst);
        MetricsCollector::new().set_active_workers(0);

        match result {
            Ok(()) => {
                info!("Worker pool shutdown complete");
                Ok(())
            }
            Err(_) => Err(PoolError::ShutdownTimeout(self.config.shutdown_timeout)),
        }
    }

    /// Returns current pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.to_pool_stats(self.total_workers())
    }

    /// Fails the jobs behind recovered messages that can no longer finish.
    ///
    /// A requeued message whose job is already running would be skipped on
    /// redelivery, and a dead-lettered one is never delivered again.
    async fn fail_interrupted(&self, recovery: &Recovery) {
        let jobs = &self.runner.context().jobs;
        let mut abandoned: Vec<(Uuid, &str)> = recovery
            .dead_lettered
            .iter()
            .map(|m| (m.job_id, "delivery attempts exhausted after a worker crash"))
            .collect();
        for message in &recovery.requeued {
            if matches!(jobs.get(message.job_id).await.map(|j| j.status), Ok(JobStatus::Running)) {
                abandoned.push((message.job_id, "worker stopped while the job was running"));
            }
        }

        for (job_id, reason) in abandoned {
            if let Err(e) = self.runner.fail_unfinished(job_id, reason).await {
                warn!(job_id = %job_id, error = %e, "Failed to mark interrupted job failed");
            }
        }
    }

    fn total_workers(&self) -> usize {
        self.config.num_workers * self.queues.len()
    }
}

/// A single worker that processes jobs from one queue.
pub struct Worker {
    id: String,
    queue: Arc<dyn TaskQueue>,
    runner: JobRunner,
    poll_interval: Duration,
    job_timeout: Option<Duration>,
    stats: Arc<SharedPoolStats>,
    metrics: MetricsCollector,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<dyn TaskQueue>,
        runner: JobRunner,
        poll_interval: Duration,
        job_timeout: Option<Duration>,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            runner,
            poll_interval,
            job_timeout,
            stats: Arc::new(SharedPoolStats::new()),
            metrics: MetricsCollector::new(),
        }
    }

    fn with_stats(mut self, stats: Arc<SharedPoolStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Main worker loop.
    ///
    /// Polls for jobs and processes them until a shutdown signal arrives.
    async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!(worker_id = %self.id, queue = self.queue.name(), "Worker started");

        loop {
            match shutdown_rx.try_recv() {
                Ok(()) | Err(broadcast::error::TryRecvError::Closed) => {
                    info!(worker_id = %self.id, "Worker received shutdown signal");
                    break;
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(broadcast::error::TryRecvError::Empty) => {}
            }

            if let Err(e) = self.process_next().await {
                error!(worker_id = %self.id, error = %e, "Failed to dequeue job");
                tokio::time::sleep(self.poll_interval).await;
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Dequeues and processes at most one message.
    ///
    /// Returns false when the queue stayed empty for a poll interval.
    pub async fn process_next(&self) -> Result<bool, QueueError> {
        let message = self.queue.dequeue(self.poll_interval).await?;
        if let Ok(depth) = self.queue.len().await {
            self.metrics.set_queue_depth(self.queue.name(), depth);
        }

        match message {
            Some(message) => {
                self.process_job(message).await;
                Ok(true)
            }
            None => {
                debug!(worker_id = %self.id, "No jobs available");
                Ok(false)
            }
        }
    }

    async fn process_job(&self, mut message: QueuedJob) {
        let job_id = message.job_id;
        let start_time = Instant::now();

        info!(
            worker_id = %self.id,
            job_id = %job_id,
            task = %message.task_name,
            attempt = message.attempts + 1,
            "Processing job"
        );

        self.stats.increment_active();
        message.increment_attempts();
        let result = self.execute(&message).await;
        let duration = start_time.elapsed();
        self.stats.decrement_active();

        match result {
            Ok(succeeded) => {
                if succeeded {
                    self.stats.record_completion(duration);
                } else {
                    self.stats.record_failure(duration);
                }
                if let Err(e) = self.queue.complete(&message).await {
                    error!(worker_id = %self.id, job_id = %job_id, error = %e, "Failed to mark job complete");
                }
            }
            Err(e) => {
                self.stats.record_failure(duration);
                let retryable =
                    matches!(e, PoolError::Runner(_)) && self.can_rerun(job_id).await;

                if retryable && message.should_retry() {
                    warn!(
                        worker_id = %self.id,
                        job_id = %job_id,
                        error = %e,
                        remaining_attempts = message.remaining_attempts(),
                        "Job could not be processed, requeueing for retry"
                    );
                    if let Err(requeue_err) = self.queue.requeue(&message).await {
                        error!(worker_id = %self.id, job_id = %job_id, error = %requeue_err, "Failed to requeue job");
                    }
                } else {
                    error!(
                        worker_id = %self.id,
                        job_id = %job_id,
                        error = %e,
                        "Job could not be processed, moving to dead letter queue"
                    );
                    self.fail_job(job_id, &e.to_string()).await;
                    if let Err(dlq_err) = self.queue.dead_letter(&message, &e.to_string()).await {
                        error!(worker_id = %self.id, job_id = %job_id, error = %dlq_err, "Failed to move job to dead letter queue");
                    }
                }
            }
        }
    }

    /// Runs the job, honoring the optional time limit.
    ///
    /// `Ok(true)` means the job succeeded, `Ok(false)` that it finished
    /// without success (failed, or skipped as not pending).
    async fn execute(&self, message: &QueuedJob) -> Result<bool, PoolError> {
        if message.pipeline().is_none() {
            return Err(PoolError::UnknownTask(message.task_name.clone()));
        }

        let run = self.runner.run(message.job_id);
        let outcome = match self.job_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    let reason = PoolError::JobTimeout(limit).to_string();
                    warn!(worker_id = %self.id, job_id = %message.job_id, error = %reason, "Abandoning job");
                    self.fail_job(message.job_id, &reason).await;
                    return Ok(false);
                }
            },
            None => run.await,
        };

        match outcome {
            Ok(Some(event)) => Ok(event.is_success()),
            Ok(None) => Ok(false),
            Err(e) => Err(PoolError::Runner(e.to_string())),
        }
    }

    /// Whether a redelivery could still run the job. The runner skips jobs
    /// that are no longer pending.
    async fn can_rerun(&self, job_id: Uuid) -> bool {
        !matches!(
            self.runner.context().jobs.get(job_id).await.map(|j| j.status),
            Ok(status) if status != JobStatus::Pending
        )
    }

    async fn fail_job(&self, job_id: Uuid, reason: &str) {
        if let Err(e) = self.runner.fail_unfinished(job_id, reason).await {
            warn!(worker_id = %self.id, job_id = %job_id, error = %e, "Failed to mark job failed");
        }
    }

    /// Returns the worker's ID.
    pub fn id(&self) -> &str {
        &self.id
    }
}
