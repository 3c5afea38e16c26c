//! Docker execution layer for algorithm containers.
//!
//! This module provides the Docker execution layer using the bollard crate
//! for container lifecycle management and resource control, plus the
//! [`ContainerRunner`] seam the job runner talks to.
//!
//! # Architecture
//!
//! Container states follow this lifecycle:
//! ```text
//! PENDING → RUNNING → COMPLETED/FAILED → REMOVED
//! ```
//!
//! # Example
//!
//! ```ignore
//! use recon_forge::execution::{ContainerRunner, DockerClient, DockerRunner};
//!
//! let runner = DockerRunner::new(DockerClient::new()?);
//! let exit_code = runner.run(&invocation).await?;
//! ```

pub mod container;
pub mod docker_client;
pub mod resources;
pub mod runner;

pub use container::{Container, ContainerStatus};
pub use docker_client::{ContainerConfig, DockerClient};
pub use resources::ExecutionLimits;
pub use runner::{ContainerInvocation, ContainerRunner, DockerRunner};
