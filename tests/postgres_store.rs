//! Integration tests for the PostgreSQL catalog and job store.
//!
//! These tests need a disposable database.
//! Run with: DATABASE_URL=postgres://... cargo test --test postgres_store -- --ignored

use recon_forge::algorithm::Pipeline;
use recon_forge::catalog::{Catalog, RecordKind, ViewerTarget};
use recon_forge::classifier::FileClassifier;
use recon_forge::jobs::{JobStatus, JobStore, StatusUpdate};
use recon_forge::storage::{BlobStore, Database, PgCatalog, PgJobStore};
use tempfile::TempDir;

async fn connect() -> Database {
    let url = std::env::var("DATABASE_URL")
        .expect("DATABASE_URL environment variable must be set for integration tests");
    let db = Database::connect(&url, 2).await.expect("connect");
    db.run_migrations().await.expect("migrations");
    db
}

#[tokio::test]
#[ignore] // Run with: cargo test --test postgres_store -- --ignored
async fn test_classification_is_idempotent() {
    let blobs_dir = TempDir::new().expect("tempdir");
    let catalog = PgCatalog::new(connect().await, BlobStore::new(blobs_dir.path()));

    let dataset = catalog.create_dataset("pg-classify").await.expect("dataset");
    for (name, data) in [
        ("odm_orthophoto/odm_orthophoto.tif", "tif"),
        ("odm_texturing/model.ply", "ply"),
        ("flight.mp4", "video"),
        ("notes.txt", "text"),
    ] {
        catalog
            .add_file(dataset.id, name, data.as_bytes())
            .await
            .expect("file");
    }

    let classifier = FileClassifier::new();
    let first = classifier.ingest(&catalog, dataset.id).await.expect("ingest");
    assert_eq!((first.images, first.meshes, first.videos), (1, 1, 1));

    let second = classifier.ingest(&catalog, dataset.id).await.expect("ingest");
    assert_eq!((second.images, second.meshes, second.videos), (0, 0, 0));

    let target = catalog
        .viewer_target(dataset.id, "odm_orthophoto/odm_orthophoto.tif")
        .await
        .expect("viewer");
    assert!(matches!(target, Some(ViewerTarget::Raster { .. })));

    let target = catalog
        .viewer_target(dataset.id, "odm_texturing/model.ply")
        .await
        .expect("viewer");
    assert!(matches!(target, Some(ViewerTarget::Mesh { .. })));

    let files = catalog.list_files(dataset.id).await.expect("files");
    let video = files.iter().find(|f| f.name == "flight.mp4").expect("video");
    assert_eq!(catalog.read_file(video).await.expect("read"), b"video");

    let again = catalog
        .bulk_create_records(RecordKind::Video, std::slice::from_ref(video))
        .await
        .expect("bulk");
    assert!(again.is_empty());
}

#[tokio::test]
#[ignore] // Run with: cargo test --test postgres_store -- --ignored
async fn test_job_status_moves_forward_only() {
    let db = connect().await;
    let blobs_dir = TempDir::new().expect("tempdir");
    let catalog = PgCatalog::new(db.clone(), BlobStore::new(blobs_dir.path()));
    let jobs = PgJobStore::new(db);

    let input = catalog.create_dataset("pg-jobs").await.expect("dataset");
    let output = catalog.create_dataset("pg-jobs (out)").await.expect("dataset");

    let job = jobs
        .create(Pipeline::Reconstruction, input.id)
        .await
        .expect("create");
    assert_eq!(job.status, JobStatus::Pending);

    jobs.update(job.id, StatusUpdate::Running).await.expect("running");
    let done = jobs
        .update(
            job.id,
            StatusUpdate::Succeeded {
                output_dataset_id: output.id,
            },
        )
        .await
        .expect("succeeded");
    assert_eq!(done.output_dataset_id, Some(output.id));

    assert!(jobs.update(job.id, StatusUpdate::Running).await.is_err());
    assert_eq!(
        jobs.get(job.id).await.expect("get").status,
        JobStatus::Succeeded
    );
}
