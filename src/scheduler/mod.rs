//! Task queues and the workers that drain them.
//!
//! - **TaskQueue**: queue abstraction with a Redis implementation using
//!   BRPOPLPUSH and an in-memory one for local runs
//! - **QueueRouter**: maps each pipeline to its queue
//! - **WorkerPool**: workers that hand queued jobs to the job runner
//!
//! # Architecture
//!
//! ```text
//!        ┌──────────────┐
//!        │   Triggers   │
//!        └──────┬───────┘
//!               │ QueuedJob
//!     ┌─────────┴──────────┐
//!     ▼                    ▼
//! ┌────────────┐    ┌────────────────┐
//! │ extraction │    │ reconstruction │
//! └─────┬──────┘    └───────┬────────┘
//!       ▼                   ▼
//!  ┌─────────┐         ┌─────────┐
//!  │ Workers │         │ Workers │
//!  └─────────┘         └─────────┘
//! ```
//!
//! # Reliability
//!
//! - **Atomic dequeue**: messages move to a processing list while in flight
//! - **Crash recovery**: processing lists are requeued when a pool starts,
//!   and jobs a crashed worker left running are marked failed
//! - **Dead letter queue**: messages that cannot be processed are kept for
//!   inspection

pub mod job;
pub mod local;
pub mod memory;
pub mod queue;
pub mod worker_pool;

pub use job::{QueuedJob, DEFAULT_MAX_ATTEMPTS};
pub use local::LocalDriver;
pub use memory::InMemoryQueue;
pub use queue::{QueueError, QueueRouter, Recovery, RedisQueue, TaskQueue};
pub use worker_pool::{PoolError, PoolStats, Worker, WorkerPool, WorkerPoolConfig};
