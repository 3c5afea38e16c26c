//! CLI command definitions for recon-forge.
//!
//! Every command reads its settings from the environment through
//! [`OrchestratorConfig::from_env`]; flags only override the few knobs that
//! differ per invocation.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::algorithm::Pipeline;
use crate::catalog::{Catalog, InMemoryCatalog, ViewerTarget};
use crate::classifier::FileClassifier;
use crate::config::OrchestratorConfig;
use crate::environment::{HttpAssetSource, ModelAssetCache};
use crate::execution::{ContainerRunner, DockerClient, DockerRunner};
use crate::jobs::{
    AlgorithmTask, InMemoryJobStore, JobFinished, JobRunner, JobStore, PipelineCoordinator,
    TaskContext, Triggers,
};
use crate::metrics::{export_metrics, init_metrics};
use crate::scheduler::{
    InMemoryQueue, LocalDriver, QueueRouter, TaskQueue, Worker, WorkerPool, WorkerPoolConfig,
};
use crate::storage::{BlobStore, Database, PgCatalog, PgJobStore};

/// Poll interval of the in-process worker used by `local`.
const LOCAL_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Chained photogrammetry and building-extraction job orchestrator.
#[derive(Parser)]
#[command(name = "recon-forge")]
#[command(about = "Run and chain containerized reconstruction and extraction jobs")]
#[command(version)]
#[command(
    long_about = "recon-forge runs photogrammetry (reconstruction) and building-extraction jobs in containers, \
                  ingests their outputs into the catalog and chains them: extraction on a dataset with a video \
                  triggers reconstruction, and every reconstruction triggers extraction on its output.\n\n\
                  Example usage:\n  recon-forge migrate\n  recon-forge worker --queue all --workers 2\n  \
                  recon-forge submit --dataset 6f1c...\n  recon-forge local --input-dir ./capture"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Consume job queues and run jobs until interrupted.
    Worker(WorkerArgs),

    /// Create a job for a dataset and enqueue it.
    Submit(SubmitArgs),

    /// Print a job record as JSON.
    Status(StatusArgs),

    /// Print what a viewer should open for a dataset file.
    Viewer(ViewerArgs),

    /// Apply pending database migrations.
    Migrate,

    /// Run the whole chain in this process with in-memory queues.
    Local(LocalArgs),
}

/// Which queues a worker consumes.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueSelection {
    Extraction,
    Reconstruction,
    All,
}

#[derive(Parser, Debug)]
pub struct WorkerArgs {
    /// Queue to consume.
    #[arg(short, long, value_enum, default_value = "all")]
    pub queue: QueueSelection,

    /// Workers per queue (overrides RECON_WORKERS).
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Periodically write Prometheus metrics to this file.
    #[arg(long)]
    pub metrics_file: Option<PathBuf>,

    /// Seconds between metrics file writes.
    #[arg(long, default_value = "15")]
    pub metrics_interval: u64,
}

#[derive(Parser, Debug)]
pub struct SubmitArgs {
    /// Input dataset id.
    #[arg(short, long)]
    pub dataset: Uuid,

    /// Pipeline to run (extraction, reconstruction).
    #[arg(short, long, default_value = "extraction")]
    pub pipeline: Pipeline,
}

#[derive(Parser, Debug)]
pub struct StatusArgs {
    /// Job id.
    #[arg(short, long)]
    pub job: Uuid,
}

#[derive(Parser, Debug)]
pub struct ViewerArgs {
    /// Dataset holding the file.
    #[arg(short, long)]
    pub dataset: Uuid,

    /// File name inside the dataset, e.g. `odm_orthophoto/odm_orthophoto.tif`.
    #[arg(short, long)]
    pub path: String,
}

#[derive(Parser, Debug)]
#[command(group(clap::ArgGroup::new("source").required(true).args(["dataset", "input_dir"])))]
pub struct LocalArgs {
    /// Existing catalog dataset (requires DATABASE_URL).
    #[arg(short, long)]
    pub dataset: Option<Uuid>,

    /// Load this directory into an in-memory catalog instead.
    #[arg(short, long)]
    pub input_dir: Option<PathBuf>,

    /// Pipeline that starts the chain.
    #[arg(short, long, default_value = "extraction")]
    pub pipeline: Pipeline,
}

/// JSON output of a `local` run.
#[derive(Debug, Serialize)]
pub struct LocalRunOutput {
    pub dataset_id: Uuid,
    pub events: Vec<JobFinished>,
    pub jobs: Vec<AlgorithmTask>,
}

#[derive(Debug, Serialize)]
struct ViewerOutput {
    dataset_id: Uuid,
    path: String,
    target: Option<ViewerTarget>,
}

/// Parse CLI arguments and return the Cli struct.
///
/// This allows main.rs to access CLI arguments (like log_level) before running commands.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    let config = OrchestratorConfig::from_env().context("Invalid configuration")?;

    match cli.command {
        Commands::Worker(args) => run_worker_command(config, args).await,
        Commands::Submit(args) => run_submit_command(config, args).await,
        Commands::Status(args) => run_status_command(config, args).await,
        Commands::Viewer(args) => run_viewer_command(config, args).await,
        Commands::Migrate => run_migrate_command(config).await,
        Commands::Local(args) => run_local_command(config, args).await,
    }
}

// ============================================================================
// Shared wiring
// ============================================================================

struct PgBackends {
    catalog: Arc<dyn Catalog>,
    jobs: Arc<dyn JobStore>,
}

async fn connect_database(config: &OrchestratorConfig) -> anyhow::Result<Database> {
    let url = config.require_database_url()?;
    let db = Database::connect(url, config.db_max_connections).await?;
    Ok(db)
}

async fn connect_backends(config: &OrchestratorConfig) -> anyhow::Result<PgBackends> {
    let db = connect_database(config).await?;
    Ok(PgBackends {
        catalog: Arc::new(PgCatalog::new(db.clone(), BlobStore::new(&config.blob_path))),
        jobs: Arc::new(PgJobStore::new(db)),
    })
}

fn task_context(
    config: &OrchestratorConfig,
    catalog: Arc<dyn Catalog>,
    jobs: Arc<dyn JobStore>,
) -> anyhow::Result<TaskContext> {
    let client = DockerClient::new().context("Docker is required to run jobs")?;
    let mut docker = DockerRunner::new(client);
    if let Some(network) = &config.docker_network {
        docker = docker.with_network_mode(network.clone());
    }
    let runner: Arc<dyn ContainerRunner> = Arc::new(docker);

    let source = HttpAssetSource::new(config.asset_url.clone(), config.asset_folder.clone());
    let assets = ModelAssetCache::new(&config.model_cache_dir, Arc::new(source))
        .with_lock_timeout(config.asset_lock_timeout);

    Ok(TaskContext {
        catalog,
        jobs,
        runner,
        assets: Arc::new(assets),
        classifier: FileClassifier::new(),
        algorithms: config.algorithms(),
        settings: config.runner_settings(),
    })
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| anyhow::anyhow!("Failed to serialize JSON output: {}", e))?;
    println!("{}", json);
    Ok(())
}

// ============================================================================
// Command implementations
// ============================================================================

async fn run_worker_command(config: OrchestratorConfig, args: WorkerArgs) -> anyhow::Result<()> {
    init_metrics()?;

    let backends = connect_backends(&config).await?;
    let router = QueueRouter::connect_redis(&config.redis_url).await?;

    let (tx, rx) = mpsc::unbounded_channel();
    let ctx = task_context(&config, backends.catalog.clone(), backends.jobs.clone())?;
    let runner = JobRunner::new(ctx).with_events(tx);

    let triggers = Triggers::new(backends.catalog, backends.jobs, router.clone())
        .with_max_attempts(config.max_attempts);
    let coordinator = tokio::spawn(PipelineCoordinator::new(triggers).run(rx));

    let queues: Vec<Arc<dyn TaskQueue>> = match args.queue {
        QueueSelection::All => router.queues(),
        QueueSelection::Extraction => vec![router.get(Pipeline::Extraction).clone()],
        QueueSelection::Reconstruction => vec![router.get(Pipeline::Reconstruction).clone()],
    };

    let mut pool_config = WorkerPoolConfig::new(args.workers.unwrap_or(config.num_workers));
    if let Some(timeout) = config.job_timeout {
        pool_config = pool_config.with_job_timeout(timeout);
    }

    let mut pool = WorkerPool::new(pool_config, queues, runner);
    pool.start().await?;

    let metrics_writer = args.metrics_file.map(|path| {
        let interval = Duration::from_secs(args.metrics_interval.max(1));
        tokio::spawn(write_metrics_periodically(path, interval))
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");

    pool.shutdown().await?;
    let stats = pool.stats();
    info!(
        jobs_completed = stats.jobs_completed,
        jobs_failed = stats.jobs_failed,
        success_rate = stats.success_rate(),
        "Worker pool stopped"
    );

    // Dropping the pool drops the last event sender
    drop(pool);
    if let Err(e) = coordinator.await {
        warn!(error = %e, "Coordinator task ended abnormally");
    }
    if let Some(handle) = metrics_writer {
        handle.abort();
    }

    Ok(())
}

async fn write_metrics_periodically(path: PathBuf, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        if let Err(e) = tokio::fs::write(&path, export_metrics()).await {
            warn!(path = %path.display(), error = %e, "Failed to write metrics file");
        }
    }
}

async fn run_submit_command(config: OrchestratorConfig, args: SubmitArgs) -> anyhow::Result<()> {
    let backends = connect_backends(&config).await?;
    let router = QueueRouter::connect_redis(&config.redis_url).await?;

    let triggers = Triggers::new(backends.catalog, backends.jobs, router)
        .with_max_attempts(config.max_attempts);
    let job = triggers.run(args.pipeline, args.dataset).await?;

    print_json(&job)
}

async fn run_status_command(config: OrchestratorConfig, args: StatusArgs) -> anyhow::Result<()> {
    let db = connect_database(&config).await?;
    let job = PgJobStore::new(db).get(args.job).await?;
    print_json(&job)
}

async fn run_viewer_command(config: OrchestratorConfig, args: ViewerArgs) -> anyhow::Result<()> {
    let backends = connect_backends(&config).await?;
    let target = backends
        .catalog
        .viewer_target(args.dataset, &args.path)
        .await?;

    print_json(&ViewerOutput {
        dataset_id: args.dataset,
        path: args.path,
        target,
    })
}

async fn run_migrate_command(config: OrchestratorConfig) -> anyhow::Result<()> {
    let db = connect_database(&config).await?;
    let applied = db.run_migrations().await?;
    info!(applied = applied, "Migrations complete");
    Ok(())
}

async fn run_local_command(config: OrchestratorConfig, args: LocalArgs) -> anyhow::Result<()> {
    let (catalog, jobs, dataset_id): (Arc<dyn Catalog>, Arc<dyn JobStore>, Uuid) =
        match (args.dataset, &args.input_dir) {
            (Some(dataset_id), _) => {
                let backends = connect_backends(&config).await?;
                (backends.catalog, backends.jobs, dataset_id)
            }
            (None, Some(dir)) => {
                let catalog = InMemoryCatalog::new();
                let dataset_id = load_directory(&catalog, dir).await?;
                (Arc::new(catalog), Arc::new(InMemoryJobStore::new()), dataset_id)
            }
            (None, None) => anyhow::bail!("Either --dataset or --input-dir is required"),
        };

    let queue: Arc<dyn TaskQueue> = Arc::new(InMemoryQueue::new("local"));
    let router = QueueRouter::single(queue.clone());
    let triggers =
        Triggers::new(catalog.clone(), jobs.clone(), router).with_max_attempts(config.max_attempts);

    let (tx, rx) = mpsc::unbounded_channel();
    let runner = JobRunner::new(task_context(&config, catalog, jobs.clone())?).with_events(tx);
    let worker = Worker::new("local-worker", queue, runner, LOCAL_POLL_INTERVAL, config.job_timeout);
    let mut driver = LocalDriver::new(worker, PipelineCoordinator::new(triggers.clone()), rx);

    triggers.run(args.pipeline, dataset_id).await?;
    let events = driver.run_until_idle().await?;

    print_json(&LocalRunOutput {
        dataset_id,
        events,
        jobs: jobs.list().await?,
    })
}

/// Adds every regular file under `dir` to a new dataset named after it.
async fn load_directory(catalog: &InMemoryCatalog, dir: &Path) -> anyhow::Result<Uuid> {
    let name = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "local".to_string());
    let dataset = catalog.create_dataset(&name).await?;

    let root = dir.to_path_buf();
    let files = tokio::task::spawn_blocking(move || {
        walkdir::WalkDir::new(&root)
            .sort_by_file_name()
            .into_iter()
            .filter_map(Result::ok)
            .filter(|entry| entry.file_type().is_file())
            .filter_map(|entry| {
                let relative = entry.path().strip_prefix(&root).ok()?;
                let name = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                Some((name, entry.into_path()))
            })
            .collect::<Vec<_>>()
    })
    .await?;

    for (name, path) in &files {
        let data = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        catalog.add_file(dataset.id, name, &data).await?;
    }

    info!(dataset_id = %dataset.id, files = files.len(), "Loaded input directory");
    Ok(dataset.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::TempDir;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_worker_args() {
        let cli = Cli::try_parse_from([
            "recon-forge",
            "worker",
            "--queue",
            "reconstruction",
            "--workers",
            "2",
        ])
        .expect("parse");

        match cli.command {
            Commands::Worker(args) => {
                assert_eq!(args.queue, QueueSelection::Reconstruction);
                assert_eq!(args.workers, Some(2));
                assert!(args.metrics_file.is_none());
            }
            _ => panic!("expected worker command"),
        }
    }

    #[test]
    fn test_parse_submit_defaults_to_extraction() {
        let dataset = Uuid::new_v4().to_string();
        let cli = Cli::try_parse_from(["recon-forge", "submit", "--dataset", &dataset])
            .expect("parse");

        match cli.command {
            Commands::Submit(args) => assert_eq!(args.pipeline, Pipeline::Extraction),
            _ => panic!("expected submit command"),
        }
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_local_requires_a_source() {
        assert!(Cli::try_parse_from(["recon-forge", "local"]).is_err());
        assert!(Cli::try_parse_from(["recon-forge", "local", "--input-dir", "capture"]).is_ok());
    }

    #[tokio::test]
    async fn test_load_directory_uses_relative_names() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("tiles/0")).expect("mkdir");
        std::fs::write(dir.path().join("flight.mp4"), b"video").expect("write");
        std::fs::write(dir.path().join("tiles/0/tileset.json"), b"{}").expect("write");

        let catalog = InMemoryCatalog::new();
        let dataset_id = load_directory(&catalog, dir.path()).await.expect("load");

        let names: Vec<String> = catalog
            .list_files(dataset_id)
            .await
            .expect("files")
            .into_iter()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec!["flight.mp4", "tiles/0/tileset.json"]);
    }
}
