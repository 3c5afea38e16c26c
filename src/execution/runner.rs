//! The container-runner seam between job tasks and Docker.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::algorithm::AlgorithmDefinition;
use crate::error::DockerError;
use crate::execution::container::Container;
use crate::execution::docker_client::{ContainerConfig, DockerClient};

/// One containerized algorithm invocation.
#[derive(Debug, Clone)]
pub struct ContainerInvocation {
    /// Job this invocation belongs to; used to name the container.
    pub job_id: Uuid,
    /// Algorithm to run.
    pub algorithm: AlgorithmDefinition,
    /// Job-local input directory.
    pub input_dir: PathBuf,
    /// Job-local output directory.
    pub output_dir: PathBuf,
    /// Root of the execution environment, mounted at the same path.
    pub mount_root: PathBuf,
}

impl ContainerInvocation {
    /// Command with directory placeholders resolved.
    pub fn command(&self) -> Vec<String> {
        self.algorithm
            .render_command(&self.input_dir, &self.output_dir)
    }

    /// Container name derived from the job id.
    pub fn container_name(&self) -> String {
        format!("recon-{}-{}", self.algorithm.pipeline, self.job_id)
    }
}

/// Runs an algorithm container to completion.
#[async_trait]
pub trait ContainerRunner: Send + Sync {
    /// Runs the container and returns its exit code. Blocks until exit.
    async fn run(&self, invocation: &ContainerInvocation) -> Result<i64, DockerError>;
}

/// `ContainerRunner` backed by the local Docker daemon.
pub struct DockerRunner {
    client: DockerClient,
    network_mode: String,
}

impl DockerRunner {
    pub fn new(client: DockerClient) -> Self {
        Self {
            client,
            network_mode: "bridge".to_string(),
        }
    }

    pub fn with_network_mode(mut self, mode: impl Into<String>) -> Self {
        self.network_mode = mode.into();
        self
    }

    fn container_config(&self, invocation: &ContainerInvocation) -> ContainerConfig {
        ContainerConfig::new(invocation.container_name(), &invocation.algorithm.image)
            .with_cmd(invocation.command())
            .with_limits(invocation.algorithm.limits.clone())
            .with_working_dir(invocation.input_dir.to_string_lossy())
            .with_mount_root(&invocation.mount_root)
            .with_network_mode(&self.network_mode)
    }
}

/// Calls `remove` with the container id when dropped before
/// [`RemovalGuard::disarm`].
///
/// A worker's job timeout drops the whole `run` future while it waits on the
/// container, so the normal cleanup path never executes.
struct RemovalGuard<F: FnOnce(String)> {
    id: Option<String>,
    remove: Option<F>,
}

impl<F: FnOnce(String)> RemovalGuard<F> {
    fn new(id: impl Into<String>, remove: F) -> Self {
        Self {
            id: Some(id.into()),
            remove: Some(remove),
        }
    }

    fn disarm(mut self) {
        self.id = None;
    }
}

impl<F: FnOnce(String)> Drop for RemovalGuard<F> {
    fn drop(&mut self) {
        if let (Some(id), Some(remove)) = (self.id.take(), self.remove.take()) {
            remove(id);
        }
    }
}

/// Force-removes a container from a background task.
fn spawn_removal(client: DockerClient, id: String) {
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        warn!(container_id = %id, "No runtime left to remove abandoned container");
        return;
    };
    handle.spawn(async move {
        match client.remove_container(&id, true).await {
            Ok(()) => info!(container_id = %id, "Removed abandoned container"),
            Err(e) => warn!(container_id = %id, error = %e, "Failed to remove abandoned container"),
        }
    });
}

#[async_trait]
impl ContainerRunner for DockerRunner {
    async fn run(&self, invocation: &ContainerInvocation) -> Result<i64, DockerError> {
        let config = self.container_config(invocation);
        let mut container = Container::new(&self.client, config).await?;
        let client = self.client.clone();
        let guard = RemovalGuard::new(container.id(), move |id| spawn_removal(client, id));

        info!(
            job_id = %invocation.job_id,
            container_id = %container.id(),
            image = %invocation.algorithm.image,
            "Starting algorithm container"
        );

        let outcome = async {
            container.start(&self.client).await?;
            container.wait(&self.client).await
        }
        .await;

        match container.logs(&self.client).await {
            Ok(logs) => debug!(job_id = %invocation.job_id, logs = %logs, "Container output"),
            Err(e) => warn!(job_id = %invocation.job_id, error = %e, "Failed to read container logs"),
        }

        if let Err(e) = container.cleanup(&self.client).await {
            warn!(job_id = %invocation.job_id, error = %e, "Failed to remove container");
        }
        guard.disarm();

        let exit_code = outcome?;
        info!(
            job_id = %invocation.job_id,
            exit_code = exit_code,
            status = %container.status(),
            "Algorithm container exited"
        );
        Ok(exit_code)
    }
}
