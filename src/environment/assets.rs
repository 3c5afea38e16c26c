//! Model asset download and on-disk caching.
//!
//! The extraction algorithm needs a pretrained segmentation model bundle.
//! It is fetched once per cache directory, extracted, and then copied into
//! each job's input directory.
//!
//! Population is exclusive across tasks (async mutex) and across processes
//! (a `<cache>.lock` file created with create-new semantics). Extraction
//! happens in a staging directory next to the cache that is renamed into
//! place, so a cache directory that exists is always complete.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use crate::error::AssetError;
use crate::metrics::MetricsCollector;

pub const DEFAULT_ASSET_URL: &str = "https://data.kitware.com/api/v1/resource/download";
pub const DEFAULT_ASSET_FOLDER: &str = "5fa1b6c850a41e3d192de93b";

/// Where the model bundle comes from.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Human-readable location for logs.
    fn describe(&self) -> String;

    /// Streams the zip bundle into `dest`, returning the bytes written.
    async fn download(&self, dest: &mut tokio::fs::File) -> Result<u64, AssetError>;
}

/// Folder download from a Girder-style data server.
#[derive(Debug, Clone)]
pub struct HttpAssetSource {
    client: reqwest::Client,
    url: String,
    folder_id: String,
}

impl HttpAssetSource {
    pub fn new(url: impl Into<String>, folder_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            folder_id: folder_id.into(),
        }
    }

    /// Full request URL including the encoded `resources` parameter.
    pub fn request_url(&self) -> String {
        let resources = serde_json::json!({ "folder": [self.folder_id] }).to_string();
        format!(
            "{}?resources={}",
            self.url,
            urlencoding::encode(&resources)
        )
    }
}

impl Default for HttpAssetSource {
    fn default() -> Self {
        Self::new(DEFAULT_ASSET_URL, DEFAULT_ASSET_FOLDER)
    }
}

#[async_trait]
impl AssetSource for HttpAssetSource {
    fn describe(&self) -> String {
        format!("{} (folder {})", self.url, self.folder_id)
    }

    async fn download(&self, dest: &mut tokio::fs::File) -> Result<u64, AssetError> {
        let mut response = self
            .client
            .get(self.request_url())
            .send()
            .await
            .map_err(|e| AssetError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AssetError::BadStatus {
                status: status.as_u16(),
            });
        }

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AssetError::RequestFailed(e.to_string()))?
        {
            dest.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        dest.flush().await?;

        Ok(written)
    }
}

/// Process-wide cache of the extracted model bundle.
pub struct ModelAssetCache {
    cache_dir: PathBuf,
    source: Arc<dyn AssetSource>,
    lock_timeout: Duration,
    poll_interval: Duration,
    populate_guard: Mutex<()>,
    metrics: MetricsCollector,
}

impl ModelAssetCache {
    pub fn new(cache_dir: impl Into<PathBuf>, source: Arc<dyn AssetSource>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            source,
            lock_timeout: Duration::from_secs(1800),
            poll_interval: Duration::from_millis(500),
            populate_guard: Mutex::new(()),
            metrics: MetricsCollector::new(),
        }
    }

    /// Age after which a lock file nobody refreshes is considered abandoned.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .cache_dir
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.cache_dir.with_file_name(name)
    }

    fn is_populated(&self) -> bool {
        self.cache_dir.is_dir()
    }

    /// Makes sure the cache directory is populated.
    ///
    /// Returns true if this call downloaded the bundle. A populated cache
    /// never touches the network.
    pub async fn ensure(&self) -> Result<bool, AssetError> {
        if self.is_populated() {
            return Ok(false);
        }

        let _guard = self.populate_guard.lock().await;
        if self.is_populated() {
            return Ok(false);
        }

        let Some(lock) = self.acquire_lock().await? else {
            debug!(cache = %self.cache_dir.display(), "Model assets populated by another process");
            return Ok(false);
        };

        if self.is_populated() {
            drop(lock);
            return Ok(false);
        }

        let result = self.populate().await;
        drop(lock);

        match result {
            Ok(()) => {
                self.metrics.record_asset_download("success");
                Ok(true)
            }
            Err(e) => {
                self.metrics.record_asset_download("failure");
                Err(e)
            }
        }
    }

    /// Takes the cross-process lock.
    ///
    /// Returns `None` when the cache appeared while waiting. Waits as long
    /// as the holder keeps its lock fresh.
    async fn acquire_lock(&self) -> Result<Option<LockFile>, AssetError> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        loop {
            match std::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&lock_path)
            {
                Ok(_) => return Ok(Some(LockFile::hold(lock_path, self.lock_timeout / 3))),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(e.into()),
            }

            if self.is_populated() {
                return Ok(None);
            }

            if self.lock_is_stale(&lock_path) {
                self.reclaim_stale_lock(&lock_path)?;
                continue;
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn lock_is_stale(&self, lock_path: &Path) -> bool {
        std::fs::metadata(lock_path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok())
            .is_some_and(|age| age > self.lock_timeout)
    }

    /// Moves a stale lock aside with an atomic rename, so of several
    /// waiters only one takes it. A lock that turns out to be fresh once
    /// moved was re-created by another waiter and is put back.
    fn reclaim_stale_lock(&self, lock_path: &Path) -> std::io::Result<()> {
        let mut name = lock_path.as_os_str().to_os_string();
        name.push(format!(".stale-{}", Uuid::new_v4()));
        let moved = PathBuf::from(name);

        match std::fs::rename(lock_path, &moved) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        }

        if self.lock_is_stale(&moved) {
            warn!(lock = %lock_path.display(), "Removed stale model asset lock");
        } else {
            match std::fs::hard_link(&moved, lock_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => {
                    std::fs::remove_file(&moved)?;
                    return Err(e);
                }
            }
        }
        std::fs::remove_file(&moved)
    }

    async fn populate(&self) -> Result<(), AssetError> {
        let parent = self
            .cache_dir
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        info!(
            source = %self.source.describe(),
            cache = %self.cache_dir.display(),
            "Downloading model assets. This may take a while..."
        );

        let archive = tempfile::Builder::new()
            .prefix(".model-assets-")
            .suffix(".zip")
            .tempfile_in(&parent)?;
        let mut dest = tokio::fs::File::from_std(archive.reopen()?);
        let bytes = self.source.download(&mut dest).await?;
        drop(dest);
        debug!(bytes = bytes, "Model asset archive downloaded");

        let staging = parent.join(format!(
            "{}.partial-{}",
            self.cache_dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            Uuid::new_v4()
        ));

        let staging_clone = staging.clone();
        let extracted = tokio::task::spawn_blocking(move || -> Result<usize, AssetError> {
            let file = std::fs::File::open(archive.path())?;
            let mut zip =
                zip::ZipArchive::new(file).map_err(|e| AssetError::Extract(e.to_string()))?;
            let entries = zip.len();
            std::fs::create_dir_all(&staging_clone)?;
            zip.extract(&staging_clone)
                .map_err(|e| AssetError::Extract(e.to_string()))?;
            Ok(entries)
        })
        .await
        .map_err(|e| AssetError::Extract(e.to_string()))?;

        let entries = match extracted {
            Ok(entries) => entries,
            Err(e) => {
                let _ = tokio::fs::remove_dir_all(&staging).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&staging, &self.cache_dir).await {
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e.into());
        }

        info!(
            cache = %self.cache_dir.display(),
            entries = entries,
            "Model assets ready"
        );
        Ok(())
    }

    /// Copies the whole cache into `dest`, returning the number of files.
    pub async fn copy_into(&self, dest: &Path) -> Result<usize, AssetError> {
        let source = self.cache_dir.clone();
        let dest = dest.to_path_buf();

        tokio::task::spawn_blocking(move || copy_tree(&source, &dest))
            .await
            .map_err(|e| AssetError::Io(std::io::Error::other(e)))?
            .map_err(AssetError::from)
    }
}

fn copy_tree(source: &Path, dest: &Path) -> std::io::Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(source).min_depth(1) {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }
    Ok(copied)
}

/// Cross-process lock held while populating the cache.
///
/// A background task bumps the lock's modification time so a download
/// longer than the stale threshold is not mistaken for an abandoned one.
#[derive(Debug)]
struct LockFile {
    path: PathBuf,
    heartbeat: Option<JoinHandle<()>>,
}

impl LockFile {
    fn hold(path: PathBuf, refresh_every: Duration) -> Self {
        let heartbeat = tokio::runtime::Handle::try_current().ok().map(|handle| {
            let path = path.clone();
            handle.spawn(async move {
                loop {
                    tokio::time::sleep(refresh_every).await;
                    if let Err(e) = touch(&path) {
                        warn!(lock = %path.display(), error = %e, "Failed to refresh model asset lock");
                        break;
                    }
                }
            })
        });
        Self { path, heartbeat }
    }
}

fn touch(path: &Path) -> std::io::Result<()> {
    std::fs::OpenOptions::new()
        .write(true)
        .open(path)?
        .set_modified(SystemTime::now())
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            heartbeat.abort();
        }
        if let Err(e) = std::fs::remove_file(&self.path) {
            warn!(lock = %self.path.display(), error = %e, "Failed to release model asset lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    const MODEL_FILE: &str = "Columbia Geon Segmentation Model/dayton_geon.pth.tar";

    fn bundle() -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        writer.start_file(MODEL_FILE, options).expect("start file");
        writer.write_all(b"weights").expect("write");
        writer.start_file("README.txt", options).expect("start file");
        writer.write_all(b"model bundle").expect("write");
        writer.finish().expect("finish").into_inner()
    }

    struct CountingSource {
        payload: Vec<u8>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl CountingSource {
        fn new(payload: Vec<u8>) -> Arc<Self> {
            Arc::new(Self {
                payload,
                calls: AtomicUsize::new(0),
                delay: Duration::from_millis(50),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl AssetSource for CountingSource {
        fn describe(&self) -> String {
            "counting source".to_string()
        }

        async fn download(&self, dest: &mut tokio::fs::File) -> Result<u64, AssetError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            dest.write_all(&self.payload).await?;
            dest.flush().await?;
            Ok(self.payload.len() as u64)
        }
    }

    fn cache(dir: &TempDir, source: Arc<CountingSource>) -> ModelAssetCache {
        ModelAssetCache::new(dir.path().join("models"), source)
            .with_poll_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_request_url_encodes_resources() {
        let source = HttpAssetSource::default();
        assert_eq!(
            source.request_url(),
            "https://data.kitware.com/api/v1/resource/download?resources=%7B%22folder%22%3A%5B%225fa1b6c850a41e3d192de93b%22%5D%7D"
        );
    }

    #[tokio::test]
    async fn test_populated_cache_is_not_fetched() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("models")).expect("mkdir");
        let source = CountingSource::new(bundle());

        let downloaded = cache(&dir, source.clone()).ensure().await.expect("ensure");

        assert!(!downloaded);
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_first_use_downloads_and_extracts() {
        let dir = TempDir::new().expect("tempdir");
        let source = CountingSource::new(bundle());
        let cache = cache(&dir, source.clone());

        assert!(cache.ensure().await.expect("ensure"));
        assert!(!cache.ensure().await.expect("ensure again"));
        assert_eq!(source.calls(), 1);

        assert!(cache.cache_dir().join(MODEL_FILE).is_file());
        assert!(!dir.path().join("models.lock").exists());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .filter(|n| n != "models")
            .collect();
        assert!(leftovers.is_empty(), "unexpected files: {leftovers:?}");
    }

    #[tokio::test]
    async fn test_concurrent_first_use_fetches_once() {
        let dir = TempDir::new().expect("tempdir");
        let source = CountingSource::new(bundle());
        let shared = Arc::new(cache(&dir, source.clone()));
        // A second cache over the same directory stands in for another process.
        let other = Arc::new(cache(&dir, source.clone()));

        let mut handles = Vec::new();
        for i in 0..6 {
            let cache = if i % 2 == 0 {
                shared.clone()
            } else {
                other.clone()
            };
            handles.push(tokio::spawn(async move { cache.ensure().await }));
        }

        let mut downloads = 0;
        for handle in handles {
            if handle.await.expect("join").expect("ensure") {
                downloads += 1;
            }
        }

        assert_eq!(downloads, 1);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_archive_leaves_no_cache() {
        let dir = TempDir::new().expect("tempdir");
        let source = CountingSource::new(b"not a zip".to_vec());
        let cache = cache(&dir, source);

        let err = cache.ensure().await.unwrap_err();
        assert!(matches!(err, AssetError::Extract(_)));
        assert!(!cache.cache_dir().exists());
        assert!(!dir.path().join("models.lock").exists());
    }

    #[tokio::test]
    async fn test_stale_lock_is_reclaimed() {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("models.lock"), b"").expect("lock");
        let source = CountingSource::new(bundle());
        let cache = cache(&dir, source.clone()).with_lock_timeout(Duration::from_millis(20));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.ensure().await.expect("ensure"));
        assert_eq!(source.calls(), 1);

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["models".to_string()]);
    }

    #[tokio::test]
    async fn test_long_download_keeps_lock_fresh() {
        let dir = TempDir::new().expect("tempdir");
        let source = Arc::new(CountingSource {
            payload: bundle(),
            calls: AtomicUsize::new(0),
            delay: Duration::from_millis(300),
        });
        let holder = Arc::new(
            ModelAssetCache::new(dir.path().join("models"), source.clone())
                .with_poll_interval(Duration::from_millis(10))
                .with_lock_timeout(Duration::from_millis(90)),
        );
        // Another process waiting on the same directory.
        let waiter = Arc::new(
            ModelAssetCache::new(dir.path().join("models"), source.clone())
                .with_poll_interval(Duration::from_millis(10))
                .with_lock_timeout(Duration::from_millis(90)),
        );

        let first = tokio::spawn({
            let holder = holder.clone();
            async move { holder.ensure().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = tokio::spawn(async move { waiter.ensure().await });

        assert!(first.await.expect("join").expect("holder"));
        assert!(!second.await.expect("join").expect("waiter"));
        assert_eq!(source.calls(), 1);
    }

    #[test]
    fn test_reclaim_restores_fresh_lock() {
        let dir = TempDir::new().expect("tempdir");
        let lock = dir.path().join("models.lock");
        std::fs::write(&lock, b"").expect("lock");
        let cache = ModelAssetCache::new(dir.path().join("models"), CountingSource::new(bundle()));

        cache.reclaim_stale_lock(&lock).expect("reclaim");

        assert!(lock.exists());
        let names: Vec<String> = std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["models.lock".to_string()]);
    }

    #[tokio::test]
    async fn test_copy_into_copies_full_tree() {
        let dir = TempDir::new().expect("tempdir");
        let source = CountingSource::new(bundle());
        let cache = cache(&dir, source);
        cache.ensure().await.expect("ensure");

        let input = dir.path().join("input");
        std::fs::create_dir_all(&input).expect("mkdir");
        let copied = cache.copy_into(&input).await.expect("copy");

        assert_eq!(copied, 2);
        assert_eq!(
            std::fs::read(input.join(MODEL_FILE)).expect("read"),
            b"weights"
        );
        // Copies, not links.
        assert!(!input.join(MODEL_FILE).is_symlink());
    }
}
