//! Entry point tying the managers together
//!
//! A [`Rewind`] owns one project's storage directory (default
//! `<project>/.rewind`) and wires the [`RestorePointManager`],
//! [`CommandManager`] and [`CheckpointSystem`] over it with a shared
//! [`WriterLock`]. Instances are independent; open as many as needed.

use crate::blob_store::BlobStore;
use crate::checkpoint::{CheckpointSystem, DEFAULT_AUTO_SAVE_INTERVAL};
use crate::command::{CommandManager, DEFAULT_MAX_HISTORY_SIZE};
use crate::compression::{CompressionEngine, CompressionStrategy};
use crate::content_store::ContentStore;
use crate::error::{Result, RewindError};
use crate::restore_point::{RestorePointManager, DEFAULT_DELTA_THRESHOLD, DEFAULT_RETENTION_DAYS};
use crate::types::{default_exclude_dirs, RestorePointKind, RestorePointMetadata, RestorePointOptions, RewindConfig, WriterLock};
use crate::utils;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Name of the default storage directory inside a project
pub const STORAGE_DIR_NAME: &str = ".rewind";

const CONFIG_FILE: &str = "config.json";

/// Versioning engine for one project directory
///
/// # Examples
///
/// ```rust
/// use rewind::{RestorePointKind, RestorePointOptions, RewindBuilder};
///
/// # fn main() -> rewind::Result<()> {
/// let project = tempfile::tempdir()?;
/// std::fs::write(project.path().join("draft.md"), "v1")?;
///
/// let rewind = RewindBuilder::new().delta_threshold(5).build(project.path())?;
/// let point = rewind.restore_points().create_restore_point(
///     RestorePointKind::Manual,
///     "first draft",
///     RestorePointOptions::default(),
/// )?;
///
/// std::fs::write(project.path().join("draft.md"), "v2")?;
/// rewind.restore_points().restore(&point.id)?;
/// assert_eq!(std::fs::read_to_string(project.path().join("draft.md"))?, "v1");
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Rewind {
    config: RewindConfig,
    writer: WriterLock,
    restore_points: Arc<RestorePointManager>,
    commands: CommandManager,
    checkpoints: CheckpointSystem,
}

impl Rewind {
    /// Open a project initialized earlier with [`RewindBuilder::build`]
    ///
    /// Storage is expected at `<project_root>/.rewind`.
    pub fn open(project_root: impl AsRef<Path>) -> Result<Self> {
        let root = project_root.as_ref();
        Self::open_at(root, &root.join(STORAGE_DIR_NAME))
    }

    /// Open a project whose storage lives at `storage_path`
    pub fn open_at(project_root: impl AsRef<Path>, storage_path: &Path) -> Result<Self> {
        let config_path = storage_path.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(RewindError::InvalidConfiguration(format!(
                "no rewind storage at {:?}; initialize it first",
                storage_path
            )));
        }

        let mut config: RewindConfig = utils::read_json(&config_path)?;
        let root = fs::canonicalize(project_root.as_ref())?;
        if config.project_root != root {
            debug!("Project moved from {:?} to {:?}", config.project_root, root);
            config.project_root = root;
        }
        config.storage_path = fs::canonicalize(storage_path)?;

        info!("Opening rewind storage at {:?}", config.storage_path);
        Self::from_config(config)
    }

    fn from_config(config: RewindConfig) -> Result<Self> {
        let strategy: CompressionStrategy = config.compression_strategy.parse()?;
        let blobs = Arc::new(BlobStore::open(
            config.storage_path.clone(),
            CompressionEngine::new(strategy),
        )?);

        let content = ContentStore::new(config.project_root.clone(), config.capture_options())?
            .with_excluded_path(&config.storage_path);

        let restore_points = Arc::new(RestorePointManager::open(
            &config.storage_path,
            content,
            blobs,
            config.delta_threshold,
            config.retention_days,
        )?);

        let writer = WriterLock::new();
        let commands = CommandManager::open(
            &config.storage_path,
            &config.project_root,
            Some(Arc::clone(&restore_points)),
            writer.clone(),
            config.max_history_size,
        )?;
        let checkpoints = CheckpointSystem::open(
            &config.storage_path,
            Some(Arc::clone(&restore_points)),
            writer.clone(),
            Duration::from_secs(config.auto_save_interval_secs),
        )?;

        Ok(Self {
            config,
            writer,
            restore_points,
            commands,
            checkpoints,
        })
    }

    /// Effective configuration
    pub fn config(&self) -> &RewindConfig {
        &self.config
    }

    /// Project directory
    pub fn project_root(&self) -> &Path {
        &self.config.project_root
    }

    /// Storage directory
    pub fn storage_path(&self) -> &Path {
        &self.config.storage_path
    }

    /// Lock shared by command execution and autosave
    pub fn writer_lock(&self) -> &WriterLock {
        &self.writer
    }

    /// File-level restore points
    pub fn restore_points(&self) -> &Arc<RestorePointManager> {
        &self.restore_points
    }

    /// Command history with undo and redo
    pub fn commands(&self) -> &CommandManager {
        &self.commands
    }

    /// Task-level checkpoints
    pub fn checkpoints(&self) -> &CheckpointSystem {
        &self.checkpoints
    }

    /// Take a manual restore point while holding the writer lock
    pub fn snapshot(&self, description: &str, options: RestorePointOptions) -> Result<RestorePointMetadata> {
        let _writer = self.writer.acquire();
        self.restore_points
            .create_restore_point(RestorePointKind::Manual, description, options)
    }

    /// Write the blob metadata cache to disk
    pub fn flush(&self) -> Result<()> {
        self.restore_points.blob_store().persist_cache()
    }
}

impl Drop for Rewind {
    fn drop(&mut self) {
        self.checkpoints.stop_auto_save();
        if let Err(e) = self.flush() {
            warn!("Failed to persist object cache: {}", e);
        }
    }
}

/// Configures and initializes a [`Rewind`]
///
/// `build` writes the configuration to `config.json` so that later
/// [`Rewind::open`] calls use the same settings.
#[derive(Debug, Clone)]
pub struct RewindBuilder {
    storage_path: Option<PathBuf>,
    delta_threshold: usize,
    retention_days: i64,
    max_history_size: usize,
    auto_save_interval: Duration,
    exclude_dirs: Vec<String>,
    include_patterns: Vec<String>,
    max_file_size: u64,
    compression_strategy: CompressionStrategy,
    parallel_workers: usize,
}

impl RewindBuilder {
    /// Builder with default settings
    pub fn new() -> Self {
        Self {
            storage_path: None,
            delta_threshold: DEFAULT_DELTA_THRESHOLD,
            retention_days: DEFAULT_RETENTION_DAYS,
            max_history_size: DEFAULT_MAX_HISTORY_SIZE,
            auto_save_interval: DEFAULT_AUTO_SAVE_INTERVAL,
            exclude_dirs: default_exclude_dirs(),
            include_patterns: Vec::new(),
            max_file_size: 0,
            compression_strategy: CompressionStrategy::default(),
            parallel_workers: num_cpus::get(),
        }
    }

    /// Store data somewhere other than `<project>/.rewind`
    pub fn storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage_path = Some(path.into());
        self
    }

    /// Deltas allowed on one snapshot before the next point is a snapshot
    pub fn delta_threshold(mut self, threshold: usize) -> Self {
        self.delta_threshold = threshold;
        self
    }

    /// Remove restore points older than `days`; 0 disables retention
    pub fn retention_days(mut self, days: i64) -> Self {
        self.retention_days = days;
        self
    }

    /// Commands kept in history
    pub fn max_history_size(mut self, size: usize) -> Self {
        self.max_history_size = size;
        self
    }

    /// Autosave period (rounded down to whole seconds)
    pub fn auto_save_interval(mut self, interval: Duration) -> Self {
        self.auto_save_interval = interval;
        self
    }

    /// Replace the directory names skipped during capture
    pub fn exclude_dirs(mut self, dirs: Vec<String>) -> Self {
        self.exclude_dirs = dirs;
        self
    }

    /// Skip one more directory name during capture
    pub fn add_exclude_dir(mut self, dir: impl Into<String>) -> Self {
        self.exclude_dirs.push(dir.into());
        self
    }

    /// Only capture files matching these globs
    pub fn include_patterns(mut self, patterns: Vec<String>) -> Self {
        self.include_patterns = patterns;
        self
    }

    /// Skip files larger than `size` bytes; 0 means unlimited
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Blob compression strategy
    pub fn compression_strategy(mut self, strategy: CompressionStrategy) -> Self {
        self.compression_strategy = strategy;
        self
    }

    /// Worker threads for capture
    pub fn parallel_workers(mut self, workers: usize) -> Self {
        self.parallel_workers = workers.max(1);
        self
    }

    fn validate(&self) -> Result<()> {
        if self.delta_threshold == 0 {
            return Err(RewindError::InvalidConfiguration(
                "delta threshold must be at least 1".to_string(),
            ));
        }
        if self.max_history_size == 0 {
            return Err(RewindError::InvalidConfiguration(
                "max history size must be at least 1".to_string(),
            ));
        }
        if self.auto_save_interval.as_secs() == 0 {
            return Err(RewindError::InvalidConfiguration(
                "auto-save interval must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    /// Initialize storage for `project_root` and open it
    ///
    /// An existing store at the same location is reconfigured; its restore
    /// points, history and checkpoints are kept.
    pub fn build(self, project_root: impl AsRef<Path>) -> Result<Rewind> {
        self.validate()?;

        let root = project_root.as_ref();
        if !root.is_dir() {
            return Err(RewindError::InvalidConfiguration(format!(
                "project root {:?} is not a directory",
                root
            )));
        }
        let root = fs::canonicalize(root)?;

        let storage = self.storage_path.clone().unwrap_or_else(|| root.join(STORAGE_DIR_NAME));
        fs::create_dir_all(&storage)?;
        let storage = fs::canonicalize(storage)?;

        let config = RewindConfig {
            project_root: root,
            storage_path: storage.clone(),
            delta_threshold: self.delta_threshold,
            retention_days: self.retention_days,
            max_history_size: self.max_history_size,
            auto_save_interval_secs: self.auto_save_interval.as_secs(),
            exclude_dirs: self.exclude_dirs,
            include_patterns: self.include_patterns,
            max_file_size: self.max_file_size,
            compression_strategy: self.compression_strategy.name().to_string(),
            parallel_workers: self.parallel_workers,
            version: env!("CARGO_PKG_VERSION").to_string(),
        };

        // validates patterns before anything is persisted
        ContentStore::new(config.project_root.clone(), config.capture_options())?;

        utils::write_json(&storage.join(CONFIG_FILE), &config)?;
        info!("Initialized rewind storage at {:?}", storage);
        Rewind::from_config(config)
    }
}

impl Default for RewindBuilder {
    fn default() -> Self {
        Self::new()
    }
}
