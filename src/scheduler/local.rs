//! Single-process driver for the pipeline chain.
//!
//! Runs one worker over one queue and feeds every finished job to the
//! coordinator before the next message is taken, so the chain advances
//! deterministically without a pool or a background coordinator task.

use tokio::sync::mpsc;
use tracing::{error, info};

use super::queue::QueueError;
use super::worker_pool::Worker;
use crate::jobs::{JobFinished, PipelineCoordinator};

pub struct LocalDriver {
    worker: Worker,
    coordinator: PipelineCoordinator,
    events: mpsc::UnboundedReceiver<JobFinished>,
}

impl LocalDriver {
    /// `events` must receive what the worker's job runner publishes.
    pub fn new(
        worker: Worker,
        coordinator: PipelineCoordinator,
        events: mpsc::UnboundedReceiver<JobFinished>,
    ) -> Self {
        Self {
            worker,
            coordinator,
            events,
        }
    }

    /// Processes messages and their follow-ons until the queue stays empty
    /// for one poll interval. Returns the finished-job events in order.
    pub async fn run_until_idle(&mut self) -> Result<Vec<JobFinished>, QueueError> {
        let mut finished = Vec::new();

        while self.worker.process_next().await? {
            while let Ok(event) = self.events.try_recv() {
                if let Err(e) = self.coordinator.handle(&event).await {
                    error!(job_id = %event.job_id, error = %e, "Failed to trigger follow-on job");
                }
                finished.push(event);
            }
        }

        info!(
            worker_id = self.worker.id(),
            jobs = finished.len(),
            "Local run idle"
        );
        Ok(finished)
    }
}
