//! End-to-end chain test: extraction -> reconstruction -> extraction, driven
//! in process with in-memory catalog, job store and queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use recon_forge::algorithm::{AlgorithmDefinition, AlgorithmSet, Pipeline};
use recon_forge::catalog::{Catalog, InMemoryCatalog, RecordKind, ViewerTarget};
use recon_forge::classifier::FileClassifier;
use recon_forge::environment::config_file::DEFAULT_GSD;
use recon_forge::environment::{AssetSource, ModelAssetCache, SUPPORT_FILES};
use recon_forge::error::{AssetError, DockerError, JobStoreError};
use recon_forge::execution::{ContainerInvocation, ContainerRunner};
use recon_forge::jobs::{
    AlgorithmTask, InMemoryJobStore, JobOutcome, JobRunner, JobStatus, JobStore,
    PipelineCoordinator, RunnerSettings, StatusUpdate, TaskContext, Triggers,
};
use recon_forge::scheduler::{
    InMemoryQueue, LocalDriver, QueueRouter, QueuedJob, TaskQueue, Worker, WorkerPool,
    WorkerPoolConfig,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Fakes both algorithms. The first extraction finds a video, later ones
/// do not, so the chain stops after the second extraction.
#[derive(Default)]
struct FakeAlgorithms {
    extractions: AtomicUsize,
    reconstructions: AtomicUsize,
}

#[async_trait]
impl ContainerRunner for FakeAlgorithms {
    async fn run(&self, invocation: &ContainerInvocation) -> Result<i64, DockerError> {
        let outputs: &[(&str, &str)] = match invocation.algorithm.pipeline {
            Pipeline::Extraction => {
                if self.extractions.fetch_add(1, Ordering::SeqCst) == 0 {
                    &[
                        ("buildings.obj", "obj"),
                        ("capture/flight.mp4", "video"),
                        ("capture/points.las", "las"),
                    ]
                } else {
                    &[("buildings.obj", "obj")]
                }
            }
            Pipeline::Reconstruction => {
                self.reconstructions.fetch_add(1, Ordering::SeqCst);
                &[
                    ("odm_georeferencing/odm_georeferenced_model.las", "las"),
                    ("odm_texturing/odm_textured_model.ply", "ply"),
                    ("odm_orthophoto/odm_orthophoto.tif", "tif"),
                ]
            }
        };

        for (name, data) in outputs {
            let path = invocation.output_dir.join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, data.as_bytes())?;
        }
        Ok(0)
    }
}

struct OfflineSource;

#[async_trait]
impl AssetSource for OfflineSource {
    fn describe(&self) -> String {
        "offline".to_string()
    }

    async fn download(&self, _dest: &mut tokio::fs::File) -> Result<u64, AssetError> {
        Err(AssetError::RequestFailed("offline".to_string()))
    }
}

fn prepare_dirs(root: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
    let cache_dir = root.path().join("model-cache");
    std::fs::create_dir_all(&cache_dir).expect("cache dir");
    std::fs::write(cache_dir.join("dayton_geon.pth.tar"), "weights").expect("model");

    let support_dir = root.path().join("support");
    std::fs::create_dir_all(support_dir.join("reconstruction")).expect("support dir");
    for name in SUPPORT_FILES {
        std::fs::write(support_dir.join("reconstruction").join(name), "#").expect("support");
    }

    (cache_dir, support_dir)
}

fn task_context(
    root: &TempDir,
    catalog: Arc<InMemoryCatalog>,
    jobs: Arc<dyn JobStore>,
    runner: Arc<dyn ContainerRunner>,
) -> TaskContext {
    let (cache_dir, support_dir) = prepare_dirs(root);
    TaskContext {
        catalog,
        jobs,
        runner,
        assets: Arc::new(ModelAssetCache::new(&cache_dir, Arc::new(OfflineSource))),
        classifier: FileClassifier::new(),
        algorithms: AlgorithmSet {
            extraction: AlgorithmDefinition::extraction("test/extraction"),
            reconstruction: AlgorithmDefinition::reconstruction("test/reconstruction"),
        },
        settings: RunnerSettings {
            work_root: root.path().join("work"),
            support_dir,
            keep_workdirs: false,
            gsd: DEFAULT_GSD,
        },
    }
}

/// Extraction writes a mesh and a video, reconstruction an orthophoto; each
/// exits with its configured code.
struct ExitCodes {
    extraction: i64,
    reconstruction: i64,
}

#[async_trait]
impl ContainerRunner for ExitCodes {
    async fn run(&self, invocation: &ContainerInvocation) -> Result<i64, DockerError> {
        let (outputs, code): (&[(&str, &str)], i64) = match invocation.algorithm.pipeline {
            Pipeline::Extraction => (
                &[("buildings.obj", "obj"), ("capture/flight.mp4", "video")],
                self.extraction,
            ),
            Pipeline::Reconstruction => (
                &[("odm_orthophoto/odm_orthophoto.tif", "tif")],
                self.reconstruction,
            ),
        };
        for (name, data) in outputs {
            let path = invocation.output_dir.join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, data.as_bytes())?;
        }
        Ok(code)
    }
}

#[tokio::test]
async fn test_extraction_reconstruction_extraction_chain() {
    let root = TempDir::new().expect("tempdir");

    let catalog = Arc::new(InMemoryCatalog::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let queue = Arc::new(InMemoryQueue::new("local"));
    let algorithms = Arc::new(FakeAlgorithms::default());

    let triggers = Triggers::new(
        catalog.clone(),
        jobs.clone(),
        QueueRouter::single(queue.clone()),
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let runner = JobRunner::new(task_context(
        &root,
        catalog.clone(),
        jobs.clone(),
        algorithms.clone(),
    ))
    .with_events(tx);

    let queue_handle: Arc<dyn TaskQueue> = queue.clone();
    let worker = Worker::new(
        "chain-worker",
        queue_handle,
        runner,
        Duration::from_millis(50),
        None,
    );
    let mut driver = LocalDriver::new(worker, PipelineCoordinator::new(triggers.clone()), rx);

    // X: a point cloud to extract buildings from.
    let x = catalog.create_dataset("site").await.expect("dataset");
    catalog
        .add_file(x.id, "site.las", b"las")
        .await
        .expect("file");

    let first = triggers.run_extraction(x.id).await.expect("trigger");
    assert_eq!(first.status, JobStatus::Pending);

    let events = driver.run_until_idle().await.expect("drive");

    // Three jobs ran, all successfully.
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.is_success()));
    assert_eq!(algorithms.extractions.load(Ordering::SeqCst), 2);
    assert_eq!(algorithms.reconstructions.load(Ordering::SeqCst), 1);

    // Messages were enqueued as A(X), B(Y), A(Z).
    let enqueued = queue.enqueued().await;
    let pipelines: Vec<Option<Pipeline>> = enqueued.iter().map(|m| m.pipeline()).collect();
    assert_eq!(
        pipelines,
        vec![
            Some(Pipeline::Extraction),
            Some(Pipeline::Reconstruction),
            Some(Pipeline::Extraction),
        ]
    );

    let y = events[0].output_dataset_id().expect("Y");
    let z = events[1].output_dataset_id().expect("Z");

    let mut inputs = Vec::new();
    for message in &enqueued {
        let job = jobs.get(message.job_id).await.expect("job");
        assert_eq!(job.status, JobStatus::Succeeded);
        inputs.push(job.input_dataset_id);
    }
    assert_eq!(inputs, vec![x.id, y, z]);

    // Y and Z were classified when they were ingested.
    match &events[0].outcome {
        JobOutcome::Succeeded { report, .. } => {
            assert_eq!(report.videos, 1);
            assert_eq!(report.meshes, 1);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    match &events[1].outcome {
        JobOutcome::Succeeded { report, .. } => {
            assert_eq!(report.images, 1);
            assert_eq!(report.meshes, 1);
            assert_eq!(report.videos, 0);
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(catalog.records(RecordKind::Video).await.len(), 1);
    assert_eq!(catalog.rasters().await.len(), 1);

    // The reconstruction's orthophoto opens as a raster.
    let target = catalog
        .viewer_target(z, "odm_orthophoto/odm_orthophoto.tif")
        .await
        .expect("viewer");
    assert!(matches!(target, Some(ViewerTarget::Raster { .. })));

    // Nothing left over.
    assert!(queue.is_empty().await.expect("len"));
    assert!(queue.processing().await.is_empty());
    assert!(queue.dead_letters().await.is_empty());
}

#[tokio::test]
async fn test_failed_job_does_not_chain() {
    let root = TempDir::new().expect("tempdir");

    let catalog = Arc::new(InMemoryCatalog::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let queue = Arc::new(InMemoryQueue::new("local"));
    let triggers = Triggers::new(
        catalog.clone(),
        jobs.clone(),
        QueueRouter::single(queue.clone()),
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let crashing = Arc::new(ExitCodes {
        extraction: 137,
        reconstruction: 137,
    });
    let runner =
        JobRunner::new(task_context(&root, catalog.clone(), jobs.clone(), crashing)).with_events(tx);

    let queue_handle: Arc<dyn TaskQueue> = queue.clone();
    let worker = Worker::new("crash-worker", queue_handle, runner, Duration::from_millis(50), None);
    let mut driver = LocalDriver::new(worker, PipelineCoordinator::new(triggers.clone()), rx);

    let video = catalog.create_dataset("flight").await.expect("dataset");
    catalog
        .add_file(video.id, "flight.mp4", b"video")
        .await
        .expect("file");

    let job = triggers
        .run_reconstruction(video.id)
        .await
        .expect("trigger");
    let events = driver.run_until_idle().await.expect("drive");

    assert_eq!(events.len(), 1);
    assert!(!events[0].is_success());
    assert_eq!(queue.enqueued().await.len(), 1);

    let stored = jobs.get(job.id).await.expect("job");
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error.as_deref().unwrap_or_default().contains("137"));
}

#[tokio::test]
async fn test_failed_follow_on_leaves_first_job_intact() {
    let root = TempDir::new().expect("tempdir");

    let catalog = Arc::new(InMemoryCatalog::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let queue = Arc::new(InMemoryQueue::new("local"));
    let triggers = Triggers::new(
        catalog.clone(),
        jobs.clone(),
        QueueRouter::single(queue.clone()),
    );

    let (tx, rx) = mpsc::unbounded_channel();
    let algorithms = Arc::new(ExitCodes {
        extraction: 0,
        reconstruction: 1,
    });
    let runner =
        JobRunner::new(task_context(&root, catalog.clone(), jobs.clone(), algorithms)).with_events(tx);

    let queue_handle: Arc<dyn TaskQueue> = queue.clone();
    let worker = Worker::new("chain-worker", queue_handle, runner, Duration::from_millis(50), None);
    let mut driver = LocalDriver::new(worker, PipelineCoordinator::new(triggers.clone()), rx);

    let x = catalog.create_dataset("site").await.expect("dataset");
    catalog
        .add_file(x.id, "site.las", b"las")
        .await
        .expect("file");

    let extraction = triggers.run_extraction(x.id).await.expect("trigger");
    let events = driver.run_until_idle().await.expect("drive");

    assert_eq!(events.len(), 2);
    assert!(events[0].is_success());
    assert!(!events[1].is_success());
    assert_eq!(events[1].pipeline, Pipeline::Reconstruction);

    // The extraction and its output survive the reconstruction failure.
    let y = events[0].output_dataset_id().expect("Y");
    let stored = jobs.get(extraction.id).await.expect("job");
    assert_eq!(stored.status, JobStatus::Succeeded);
    assert_eq!(stored.output_dataset_id, Some(y));
    let names: Vec<String> = catalog
        .list_files(y)
        .await
        .expect("files")
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(names, vec!["buildings.obj", "capture/flight.mp4"]);

    let reconstruction = jobs.get(events[1].job_id).await.expect("job");
    assert_eq!(reconstruction.status, JobStatus::Failed);
    assert!(reconstruction.output_dataset_id.is_none());

    // Nothing follows the failed reconstruction.
    assert_eq!(queue.enqueued().await.len(), 2);
    assert!(queue.is_empty().await.expect("len"));
    assert_eq!(catalog.datasets().await.len(), 2);
}

/// Rejects every `Succeeded` update.
struct ReadOnlyOnSuccess {
    inner: InMemoryJobStore,
}

#[async_trait]
impl JobStore for ReadOnlyOnSuccess {
    async fn create(
        &self,
        pipeline: Pipeline,
        input_dataset_id: Uuid,
    ) -> Result<AlgorithmTask, JobStoreError> {
        self.inner.create(pipeline, input_dataset_id).await
    }

    async fn get(&self, id: Uuid) -> Result<AlgorithmTask, JobStoreError> {
        self.inner.get(id).await
    }

    async fn update(&self, id: Uuid, update: StatusUpdate) -> Result<AlgorithmTask, JobStoreError> {
        if matches!(update, StatusUpdate::Succeeded { .. }) {
            return Err(JobStoreError::Storage("disk full".to_string()));
        }
        self.inner.update(id, update).await
    }

    async fn list(&self) -> Result<Vec<AlgorithmTask>, JobStoreError> {
        self.inner.list().await
    }
}

#[tokio::test]
async fn test_store_failure_after_start_fails_job() {
    let root = TempDir::new().expect("tempdir");

    let catalog = Arc::new(InMemoryCatalog::new());
    let jobs = Arc::new(ReadOnlyOnSuccess {
        inner: InMemoryJobStore::new(),
    });
    let queue = Arc::new(InMemoryQueue::new("local"));
    let triggers = Triggers::new(
        catalog.clone(),
        jobs.clone(),
        QueueRouter::single(queue.clone()),
    )
    .with_max_attempts(3);

    let (tx, rx) = mpsc::unbounded_channel();
    let algorithms = Arc::new(ExitCodes {
        extraction: 0,
        reconstruction: 0,
    });
    let runner =
        JobRunner::new(task_context(&root, catalog.clone(), jobs.clone(), algorithms)).with_events(tx);

    let queue_handle: Arc<dyn TaskQueue> = queue.clone();
    let worker = Worker::new("store-worker", queue_handle, runner, Duration::from_millis(50), None);
    let mut driver = LocalDriver::new(worker, PipelineCoordinator::new(triggers.clone()), rx);

    let x = catalog.create_dataset("site").await.expect("dataset");
    catalog
        .add_file(x.id, "site.las", b"las")
        .await
        .expect("file");

    let job = triggers.run_extraction(x.id).await.expect("trigger");
    let events = driver.run_until_idle().await.expect("drive");
    assert!(events.is_empty());

    // The job started, so a redelivery would be skipped: it is failed and
    // dead-lettered on the first attempt instead of being left running.
    let stored = jobs.get(job.id).await.expect("job");
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.error.as_deref().unwrap_or_default().contains("disk full"));

    let dead = queue.dead_letters().await;
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].0.job_id, job.id);
    assert_eq!(dead[0].0.attempts, 1);
    assert!(queue.is_empty().await.expect("len"));
    assert!(queue.processing().await.is_empty());
}

#[tokio::test]
async fn test_pool_start_fails_jobs_left_running_by_a_crash() {
    let root = TempDir::new().expect("tempdir");

    let catalog = Arc::new(InMemoryCatalog::new());
    let jobs = Arc::new(InMemoryJobStore::new());
    let queue = Arc::new(InMemoryQueue::new("extraction"));
    let algorithms = Arc::new(ExitCodes {
        extraction: 0,
        reconstruction: 0,
    });
    let runner = JobRunner::new(task_context(&root, catalog.clone(), jobs.clone(), algorithms));

    // A previous worker took the message and started the job, then died.
    let x = catalog.create_dataset("site").await.expect("dataset");
    let job = jobs.create(Pipeline::Extraction, x.id).await.expect("job");
    jobs.update(job.id, StatusUpdate::Running)
        .await
        .expect("running");
    let message = QueuedJob::new(Pipeline::Extraction, job.id).with_max_attempts(3);
    queue.enqueue(&message).await.expect("enqueue");
    queue
        .dequeue(Duration::from_millis(10))
        .await
        .expect("dequeue")
        .expect("message");

    let queue_handle: Arc<dyn TaskQueue> = queue.clone();
    let mut pool = WorkerPool::new(
        WorkerPoolConfig::new(1).with_poll_interval(Duration::from_millis(20)),
        vec![queue_handle],
        runner,
    );
    pool.start().await.expect("start");

    let stored = jobs.get(job.id).await.expect("job");
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("worker stopped"));

    // The redelivered message is skipped and acknowledged.
    tokio::time::sleep(Duration::from_millis(150)).await;
    pool.shutdown().await.expect("shutdown");
    assert!(queue.is_empty().await.expect("len"));
    assert!(queue.processing().await.is_empty());
    assert!(queue.dead_letters().await.is_empty());
}
