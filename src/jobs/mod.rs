//! Job records, managed tasks and the pipeline chain.
//!
//! - [`JobStore`] persists [`AlgorithmTask`] records and enforces forward-only
//!   status transitions
//! - [`ManagedTask`] implements the extraction and reconstruction steps
//! - [`JobRunner`] composes those steps for one queued job and publishes a
//!   [`JobFinished`] event
//! - [`PipelineCoordinator`] turns events into follow-on jobs through
//!   [`Triggers`]

pub mod chain;
pub mod events;
pub mod memory;
pub mod record;
pub mod runner;
pub mod task;
pub mod triggers;

pub use chain::PipelineCoordinator;
pub use events::{JobFinished, JobOutcome};
pub use memory::InMemoryJobStore;
pub use record::{AlgorithmTask, JobStatus, JobStore, StatusUpdate};
pub use runner::{JobRunner, RunnerSettings, TaskContext};
pub use task::ManagedTask;
pub use triggers::Triggers;
