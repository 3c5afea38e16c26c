//! Orchestrator configuration.
//!
//! Settings come from `RECON_*` environment variables plus `DATABASE_URL`
//! and `REDIS_URL`. Every setting has a default except the database URL,
//! which only the commands that touch PostgreSQL require.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::algorithm::{AlgorithmDefinition, AlgorithmSet};
use crate::environment::assets::{DEFAULT_ASSET_FOLDER, DEFAULT_ASSET_URL};
use crate::environment::config_file::DEFAULT_GSD;
use crate::execution::ExecutionLimits;
use crate::jobs::RunnerSettings;
use crate::scheduler::DEFAULT_MAX_ATTEMPTS;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for workers, triggers and the CLI.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    // Storage settings
    /// PostgreSQL connection URL.
    pub database_url: Option<String>,
    /// Upper bound on pooled database connections.
    pub db_max_connections: u32,
    /// Directory for content-addressed file bytes.
    pub blob_path: PathBuf,
    /// Redis connection URL for the task queues.
    pub redis_url: String,

    // Execution environment settings
    /// Parent directory of per-job execution environments.
    pub work_root: PathBuf,
    /// Directory holding the reconstruction support files.
    pub support_dir: PathBuf,
    /// Keep execution environments after the job for debugging.
    pub keep_workdirs: bool,
    /// Ground sample distance written to the extraction config.
    pub gsd: f64,

    // Model asset settings
    /// Shared model asset cache directory.
    pub model_cache_dir: PathBuf,
    /// Base download URL of the asset service.
    pub asset_url: String,
    /// Folder id of the model bundle on the asset service.
    pub asset_folder: String,
    /// Age after which a cache lock is considered stale.
    pub asset_lock_timeout: Duration,

    // Container settings
    pub extraction_image: String,
    pub reconstruction_image: String,
    /// Memory limit for algorithm containers (in MB).
    pub docker_memory_mb: u64,
    /// CPU cores for algorithm containers. Zero means unlimited.
    pub docker_cpu_cores: f64,
    /// Docker network mode, if not the default bridge.
    pub docker_network: Option<String>,

    // Worker settings
    /// Workers per queue.
    pub num_workers: usize,
    /// Per-job time limit. Off unless set.
    pub job_timeout: Option<Duration>,
    /// Delivery attempts per queued message.
    pub max_attempts: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            db_max_connections: 10,
            blob_path: PathBuf::from("./blobs"),
            redis_url: "redis://127.0.0.1:6379".to_string(),

            work_root: std::env::temp_dir().join("recon-forge"),
            support_dir: PathBuf::from("./support"),
            keep_workdirs: false,
            gsd: DEFAULT_GSD,

            model_cache_dir: PathBuf::from("./model-cache"),
            asset_url: DEFAULT_ASSET_URL.to_string(),
            asset_folder: DEFAULT_ASSET_FOLDER.to_string(),
            asset_lock_timeout: Duration::from_secs(1800),

            extraction_image: "recon-forge/extraction:latest".to_string(),
            reconstruction_image: "recon-forge/reconstruction:latest".to_string(),
            docker_memory_mb: 16 * 1024,
            docker_cpu_cores: 4.0,
            docker_network: None,

            num_workers: 1,
            job_timeout: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl OrchestratorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DATABASE_URL`: PostgreSQL connection URL
    /// - `REDIS_URL`: Redis connection URL (default: redis://127.0.0.1:6379)
    /// - `RECON_DB_MAX_CONNECTIONS`: Pool size (default: 10)
    /// - `RECON_BLOB_PATH`: Blob store directory (default: ./blobs)
    /// - `RECON_WORK_ROOT`: Parent of job directories (default: system temp dir)
    /// - `RECON_SUPPORT_DIR`: Support files directory (default: ./support)
    /// - `RECON_KEEP_WORKDIRS`: Keep job directories (default: false)
    /// - `RECON_GSD`: Ground sample distance (default: 0.25)
    /// - `RECON_MODEL_CACHE_DIR`: Model asset cache (default: ./model-cache)
    /// - `RECON_ASSET_URL` / `RECON_ASSET_FOLDER`: Model bundle location
    /// - `RECON_ASSET_LOCK_TIMEOUT_SECS`: Stale cache lock age (default: 1800)
    /// - `RECON_EXTRACTION_IMAGE` / `RECON_RECONSTRUCTION_IMAGE`: Container images
    /// - `RECON_DOCKER_MEMORY_MB`: Container memory limit (default: 16384)
    /// - `RECON_DOCKER_CPU_CORES`: Container CPU cores (default: 4.0)
    /// - `RECON_DOCKER_NETWORK`: Container network mode
    /// - `RECON_WORKERS`: Workers per queue (default: 1)
    /// - `RECON_JOB_TIMEOUT_SECS`: Per-job time limit (default: none)
    /// - `RECON_MAX_ATTEMPTS`: Delivery attempts per message (default: 1)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        // Storage settings
        if let Some(val) = lookup("DATABASE_URL") {
            config.database_url = Some(val);
        }

        if let Some(val) = lookup("RECON_DB_MAX_CONNECTIONS") {
            config.db_max_connections = parse_env_value(&val, "RECON_DB_MAX_CONNECTIONS")?;
        }

        if let Some(val) = lookup("RECON_BLOB_PATH") {
            config.blob_path = PathBuf::from(val);
        }

        if let Some(val) = lookup("REDIS_URL") {
            config.redis_url = val;
        }

        // Execution environment settings
        if let Some(val) = lookup("RECON_WORK_ROOT") {
            config.work_root = PathBuf::from(val);
        }

        if let Some(val) = lookup("RECON_SUPPORT_DIR") {
            config.support_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("RECON_KEEP_WORKDIRS") {
            config.keep_workdirs = parse_env_bool(&val, "RECON_KEEP_WORKDIRS")?;
        }

        if let Some(val) = lookup("RECON_GSD") {
            config.gsd = parse_env_value(&val, "RECON_GSD")?;
        }

        // Model asset settings
        if let Some(val) = lookup("RECON_MODEL_CACHE_DIR") {
            config.model_cache_dir = PathBuf::from(val);
        }

        if let Some(val) = lookup("RECON_ASSET_URL") {
            config.asset_url = val;
        }

        if let Some(val) = lookup("RECON_ASSET_FOLDER") {
            config.asset_folder = val;
        }

        if let Some(val) = lookup("RECON_ASSET_LOCK_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "RECON_ASSET_LOCK_TIMEOUT_SECS")?;
            config.asset_lock_timeout = Duration::from_secs(secs);
        }

        // Container settings
        if let Some(val) = lookup("RECON_EXTRACTION_IMAGE") {
            config.extraction_image = val;
        }

        if let Some(val) = lookup("RECON_RECONSTRUCTION_IMAGE") {
            config.reconstruction_image = val;
        }

        if let Some(val) = lookup("RECON_DOCKER_MEMORY_MB") {
            config.docker_memory_mb = parse_env_value(&val, "RECON_DOCKER_MEMORY_MB")?;
        }

        if let Some(val) = lookup("RECON_DOCKER_CPU_CORES") {
            config.docker_cpu_cores = parse_env_value(&val, "RECON_DOCKER_CPU_CORES")?;
        }

        if let Some(val) = lookup("RECON_DOCKER_NETWORK") {
            config.docker_network = Some(val);
        }

        // Worker settings
        if let Some(val) = lookup("RECON_WORKERS") {
            config.num_workers = parse_env_value(&val, "RECON_WORKERS")?;
        }

        if let Some(val) = lookup("RECON_JOB_TIMEOUT_SECS") {
            let secs: u64 = parse_env_value(&val, "RECON_JOB_TIMEOUT_SECS")?;
            config.job_timeout = Some(Duration::from_secs(secs));
        }

        if let Some(val) = lookup("RECON_MAX_ATTEMPTS") {
            config.max_attempts = parse_env_value(&val, "RECON_MAX_ATTEMPTS")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if matches!(&self.database_url, Some(url) if url.is_empty()) {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        if self.db_max_connections == 0 {
            return Err(ConfigError::ValidationFailed(
                "db_max_connections must be greater than 0".to_string(),
            ));
        }

        if self.redis_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "redis_url cannot be empty".to_string(),
            ));
        }

        if self.gsd.is_nan() || self.gsd <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "gsd must be greater than 0".to_string(),
            ));
        }

        if self.asset_lock_timeout.as_secs() == 0 {
            return Err(ConfigError::ValidationFailed(
                "asset_lock_timeout must be greater than 0".to_string(),
            ));
        }

        if self.extraction_image.is_empty() || self.reconstruction_image.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "container images cannot be empty".to_string(),
            ));
        }

        if self.docker_memory_mb < 256 {
            return Err(ConfigError::ValidationFailed(
                "docker_memory_mb must be at least 256 MB".to_string(),
            ));
        }

        if self.docker_cpu_cores < 0.0 {
            return Err(ConfigError::ValidationFailed(
                "docker_cpu_cores cannot be negative".to_string(),
            ));
        }

        if self.num_workers == 0 {
            return Err(ConfigError::ValidationFailed(
                "num_workers must be greater than 0".to_string(),
            ));
        }

        if matches!(self.job_timeout, Some(t) if t.is_zero()) {
            return Err(ConfigError::ValidationFailed(
                "job_timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_attempts must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// The database URL, for commands that need PostgreSQL.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))
    }

    /// Algorithm definitions for both pipelines with the configured images
    /// and limits.
    pub fn algorithms(&self) -> AlgorithmSet {
        let limits = ExecutionLimits::new(self.docker_memory_mb, self.docker_cpu_cores, 2048);
        AlgorithmSet {
            extraction: AlgorithmDefinition::extraction(&self.extraction_image)
                .with_limits(limits.clone()),
            reconstruction: AlgorithmDefinition::reconstruction(&self.reconstruction_image)
                .with_limits(limits),
        }
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            work_root: self.work_root.clone(),
            support_dir: self.support_dir.clone(),
            keep_workdirs: self.keep_workdirs,
            gsd: self.gsd,
        }
    }

    /// Builder method to set the database URL.
    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    /// Builder method to set the Redis URL.
    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    /// Builder method to set the job directory root.
    pub fn with_work_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.work_root = path.into();
        self
    }

    /// Builder method to set the support files directory.
    pub fn with_support_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.support_dir = path.into();
        self
    }

    /// Builder method to keep job directories.
    pub fn with_keep_workdirs(mut self, keep: bool) -> Self {
        self.keep_workdirs = keep;
        self
    }

    /// Builder method to set the ground sample distance.
    pub fn with_gsd(mut self, gsd: f64) -> Self {
        self.gsd = gsd;
        self
    }

    /// Builder method to set the model asset cache directory.
    pub fn with_model_cache_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_cache_dir = path.into();
        self
    }

    /// Builder method to set the container images.
    pub fn with_images(
        mut self,
        extraction: impl Into<String>,
        reconstruction: impl Into<String>,
    ) -> Self {
        self.extraction_image = extraction.into();
        self.reconstruction_image = reconstruction.into();
        self
    }

    /// Builder method to set workers per queue.
    pub fn with_num_workers(mut self, workers: usize) -> Self {
        self.num_workers = workers;
        self
    }

    /// Builder method to set the per-job time limit.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    /// Builder method to set delivery attempts per message.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}
