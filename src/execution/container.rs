//! Container lifecycle management for algorithm runs.
//!
//! This module provides a high-level abstraction over a single algorithm
//! container: creation, start, wait, log capture and cleanup.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::DockerError;
use crate::execution::docker_client::{ContainerConfig, DockerClient};

/// Status of a managed container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerStatus {
    /// Container is created but not started.
    Pending,
    /// Container is running.
    Running,
    /// Container exited with code zero.
    Completed,
    /// Container failed with an error message.
    Failed(String),
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContainerStatus::Pending => write!(f, "pending"),
            ContainerStatus::Running => write!(f, "running"),
            ContainerStatus::Completed => write!(f, "completed"),
            ContainerStatus::Failed(msg) => write!(f, "failed: {}", msg),
        }
    }
}

/// A managed Docker container with lifecycle tracking.
#[derive(Debug)]
pub struct Container {
    id: String,
    status: ContainerStatus,
}

impl Container {
    /// Creates the container in Docker without starting it, pulling the
    /// image first if it is not present locally.
    ///
    /// # Errors
    ///
    /// Returns `DockerError` if the pull or container creation fails.
    pub async fn new(client: &DockerClient, config: ContainerConfig) -> Result<Self, DockerError> {
        if !client.image_exists(&config.image).await {
            tracing::info!(image = %config.image, "Pulling algorithm image");
            client.pull_image(&config.image).await?;
        }

        let id = client.create_container(config.clone()).await?;

        debug!(container_id = %id, name = %config.name, "Created algorithm container");
        Ok(Self {
            id,
            status: ContainerStatus::Pending,
        })
    }

    /// Starts the container.
    ///
    /// # Errors
    ///
    /// Returns `DockerError` if the container is not `Pending` or the
    /// Docker API call fails.
    pub async fn start(&mut self, client: &DockerClient) -> Result<(), DockerError> {
        if self.status != ContainerStatus::Pending {
            return Err(DockerError::RunFailed(format!(
                "Cannot start container in {} state",
                self.status
            )));
        }

        match client.start_container(&self.id).await {
            Ok(()) => {
                self.status = ContainerStatus::Running;
                Ok(())
            }
            Err(e) => {
                self.status = ContainerStatus::Failed(format!("Start failed: {}", e));
                Err(e)
            }
        }
    }

    /// Blocks until the container exits and returns its exit code.
    pub async fn wait(&mut self, client: &DockerClient) -> Result<i64, DockerError> {
        let exit_code = client.wait_container(&self.id).await?;

        self.status = if exit_code == 0 {
            ContainerStatus::Completed
        } else {
            ContainerStatus::Failed(format!("Exited with code {}", exit_code))
        };

        Ok(exit_code)
    }

    /// Gets the logs from the container.
    pub async fn logs(&self, client: &DockerClient) -> Result<String, DockerError> {
        client.get_logs(&self.id).await
    }

    /// Force-removes the container. Terminal status is preserved.
    pub async fn cleanup(&mut self, client: &DockerClient) -> Result<(), DockerError> {
        client.remove_container(&self.id, true).await?;

        if matches!(
            self.status,
            ContainerStatus::Running | ContainerStatus::Pending
        ) {
            self.status = ContainerStatus::Failed("Removed before exit".to_string());
        }

        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> &ContainerStatus {
        &self.status
    }
}
