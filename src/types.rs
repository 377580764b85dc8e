//! Core data types shared across the engine
//!
//! ## Overview
//!
//! - **Project state**: `FileState`, `ProjectState`, `ProjectMetadata` - a captured file tree
//! - **Deltas**: `DeltaChange`, `ChangeStats` - differences between two captured trees
//! - **Restore points**: `RestorePointKind`, `RestorePointMetadata`, `RestorePointOptions`,
//!   `RestorePointStats`, `RestoreOutcome`, `VerificationReport`
//! - **Configuration**: `RewindConfig`, `CaptureOptions`
//! - **Concurrency**: `WriterLock` - the single-writer gate shared by foreground
//!   commands and autosave
//!
//! ## Examples
//!
//! ```rust
//! use rewind::types::{FileState, ProjectState};
//!
//! let mut state = ProjectState::new(Some("screening".to_string()));
//! state.insert(FileState::new("notes.md", b"# Notes"));
//! assert_eq!(state.metadata.total_files, 1);
//! assert_eq!(state.metadata.total_size, 7);
//! ```

use crate::utils;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Version of the on-disk payload formats written by this crate
pub const FORMAT_VERSION: u32 = 1;

/// One file of a captured project
///
/// Content is not stored inline: `hash` addresses the raw bytes in the blob
/// store. Two `FileState`s are equal when path, hash and size agree; the
/// modification time is informational only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileState {
    /// Project-relative path using `/` separators
    pub path: String,
    /// SHA-256 of the raw file bytes
    pub hash: String,
    /// File size in bytes
    pub size: u64,
    /// Last modification time observed at capture
    pub modified_at: DateTime<Utc>,
}

impl FileState {
    /// Build a file state from in-memory content
    pub fn new(path: impl Into<String>, content: &[u8]) -> Self {
        Self {
            path: path.into(),
            hash: utils::hash_data(content),
            size: content.len() as u64,
            modified_at: Utc::now(),
        }
    }
}

impl PartialEq for FileState {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.hash == other.hash && self.size == other.size
    }
}

impl Eq for FileState {}

/// Aggregate figures for a `ProjectState`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectMetadata {
    /// Number of files
    pub total_files: usize,
    /// Sum of file sizes
    pub total_size: u64,
    /// Digest over the sorted per-file hashes
    pub aggregate_checksum: String,
}

/// A captured project tree
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectState {
    /// Capture time
    pub timestamp: DateTime<Utc>,
    /// Payload format version
    pub format_version: u32,
    /// Workflow phase label at capture time
    pub phase: Option<String>,
    /// Files keyed by project-relative path
    pub files: BTreeMap<String, FileState>,
    /// Opaque memory snapshot supplied by the orchestrator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_snapshot: Option<serde_json::Value>,
    /// Opaque configuration blob supplied by the orchestrator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    /// Derived totals; refreshed by [`ProjectState::recompute_metadata`]
    pub metadata: ProjectMetadata,
}

impl ProjectState {
    /// Create an empty state
    pub fn new(phase: Option<String>) -> Self {
        let mut state = Self {
            timestamp: Utc::now(),
            format_version: FORMAT_VERSION,
            phase,
            files: BTreeMap::new(),
            memory_snapshot: None,
            config: None,
            metadata: ProjectMetadata::default(),
        };
        state.recompute_metadata();
        state
    }

    /// Create a state from a list of files
    pub fn from_files(phase: Option<String>, files: impl IntoIterator<Item = FileState>) -> Self {
        let mut state = Self::new(phase);
        for file in files {
            state.files.insert(file.path.clone(), file);
        }
        state.recompute_metadata();
        state
    }

    /// Insert or replace a file and refresh the metadata
    pub fn insert(&mut self, file: FileState) {
        self.files.insert(file.path.clone(), file);
        self.recompute_metadata();
    }

    /// Look up a file by path
    pub fn file(&self, path: &str) -> Option<&FileState> {
        self.files.get(path)
    }

    /// Recompute `metadata` from `files`
    pub fn recompute_metadata(&mut self) {
        self.metadata = ProjectMetadata {
            total_files: self.files.len(),
            total_size: self.files.values().map(|f| f.size).sum(),
            aggregate_checksum: utils::aggregate_checksum(self.files.values().map(|f| f.hash.as_str())),
        };
    }

    /// All blob hashes referenced by this state
    pub fn referenced_hashes(&self) -> impl Iterator<Item = &str> {
        self.files.values().map(|f| f.hash.as_str())
    }
}

/// A single file-level difference between two states
///
/// Added and modified entries reference the new content by hash; deletions
/// carry only the path.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeltaChange {
    /// File present only in the newer state
    Added {
        /// Project-relative path
        path: String,
        /// Hash of the new content
        hash: String,
        /// New size
        size: u64,
        /// Modification time of the new content
        modified_at: DateTime<Utc>,
    },
    /// File present in both states with different content
    Modified {
        /// Project-relative path
        path: String,
        /// Hash of the new content
        hash: String,
        /// Hash of the content it replaces
        previous_hash: String,
        /// New size
        size: u64,
        /// Modification time of the new content
        modified_at: DateTime<Utc>,
    },
    /// File present only in the older state
    Deleted {
        /// Project-relative path
        path: String,
    },
}

impl DeltaChange {
    /// Path this change applies to
    pub fn path(&self) -> &str {
        match self {
            DeltaChange::Added { path, .. }
            | DeltaChange::Modified { path, .. }
            | DeltaChange::Deleted { path } => path,
        }
    }

    /// Hash of the content written by this change, if any
    pub fn hash(&self) -> Option<&str> {
        match self {
            DeltaChange::Added { hash, .. } | DeltaChange::Modified { hash, .. } => Some(hash),
            DeltaChange::Deleted { .. } => None,
        }
    }
}

/// Summary of a change list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChangeStats {
    /// Number of files added
    pub files_added: usize,
    /// Number of files modified
    pub files_modified: usize,
    /// Number of files deleted
    pub files_deleted: usize,
    /// Total size of added files
    pub bytes_added: u64,
    /// Total size of modified files (new size)
    pub bytes_modified: u64,
    /// Paths touched, in change order
    pub changed_paths: Vec<String>,
}

impl ChangeStats {
    /// Summarize a list of changes
    pub fn from_changes(changes: &[DeltaChange]) -> Self {
        let mut stats = ChangeStats::default();
        for change in changes {
            match change {
                DeltaChange::Added { size, .. } => {
                    stats.files_added += 1;
                    stats.bytes_added += size;
                }
                DeltaChange::Modified { size, .. } => {
                    stats.files_modified += 1;
                    stats.bytes_modified += size;
                }
                DeltaChange::Deleted { .. } => stats.files_deleted += 1,
            }
            stats.changed_paths.push(change.path().to_string());
        }
        stats
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total_operations() > 0
    }

    /// Get total number of file operations
    pub fn total_operations(&self) -> usize {
        self.files_added + self.files_modified + self.files_deleted
    }
}

/// Why a restore point was created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePointKind {
    /// Requested explicitly by a user or orchestrator
    Manual,
    /// Taken at a workflow phase boundary; always a snapshot
    AutoPhase,
    /// Taken alongside a task-level checkpoint
    AutoCheckpoint,
    /// Taken before a command executes
    PreOperation,
    /// Taken after a command completes
    PostOperation,
}

impl RestorePointKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            RestorePointKind::Manual => "manual",
            RestorePointKind::AutoPhase => "auto_phase",
            RestorePointKind::AutoCheckpoint => "auto_checkpoint",
            RestorePointKind::PreOperation => "pre_operation",
            RestorePointKind::PostOperation => "post_operation",
        }
    }
}

impl fmt::Display for RestorePointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RestorePointKind {
    type Err = crate::error::RewindError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "manual" => Ok(RestorePointKind::Manual),
            "auto_phase" => Ok(RestorePointKind::AutoPhase),
            "auto_checkpoint" => Ok(RestorePointKind::AutoCheckpoint),
            "pre_operation" => Ok(RestorePointKind::PreOperation),
            "post_operation" => Ok(RestorePointKind::PostOperation),
            other => Err(crate::error::RewindError::InvalidConfiguration(format!(
                "unknown restore point kind '{}'",
                other
            ))),
        }
    }
}

/// Metadata persisted next to every restore point payload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RestorePointMetadata {
    /// Opaque unique id
    pub id: String,
    /// Why the point was created
    pub kind: RestorePointKind,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Monotonic creation counter; replay order within a chain
    pub sequence: u64,
    /// Human readable description
    pub description: String,
    /// Workflow phase at creation
    pub phase: Option<String>,
    /// Payload format version
    pub format_version: u32,
    /// Snapshot this delta replays on top of (deltas only)
    pub parent_id: Option<String>,
    /// Payload is a full `ProjectState`
    pub is_snapshot: bool,
    /// Payload is a change list
    pub is_delta: bool,
    /// Size of the payload file on disk
    pub size_bytes: u64,
    /// Payload is gzip-compressed
    pub compressed: bool,
    /// SHA-256 of the uncompressed JSON payload
    pub checksum: String,
    /// Number of changes in a delta
    pub files_changed: Option<usize>,
    /// Number of files in the captured tree
    pub total_files: usize,
    /// Free-form tags
    pub tags: Vec<String>,
}

impl RestorePointMetadata {
    /// First 8 characters of the id
    pub fn short_id(&self) -> &str {
        utils::short_id(&self.id)
    }
}

/// Options for restore point creation
#[derive(Debug, Clone, Default)]
pub struct RestorePointOptions {
    /// Workflow phase label
    pub phase: Option<String>,
    /// Tags attached to the metadata
    pub tags: Vec<String>,
    /// Write a snapshot even when a delta would do
    pub force_snapshot: bool,
}

/// Aggregate statistics over the restore point store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestorePointStats {
    /// Number of restore points
    pub total: usize,
    /// Number of snapshots
    pub snapshots: usize,
    /// Number of deltas
    pub deltas: usize,
    /// Payload bytes over all restore points
    pub total_size_bytes: u64,
    /// Payload bytes of snapshots
    pub snapshot_bytes: u64,
    /// Payload bytes of deltas
    pub delta_bytes: u64,
    /// Oldest restore point timestamp
    pub oldest: Option<DateTime<Utc>>,
    /// Newest restore point timestamp
    pub newest: Option<DateTime<Utc>>,
    /// Number of blobs in the object store
    pub blob_count: usize,
    /// Bytes used by blobs on disk
    pub blob_bytes: u64,
}

/// Result of writing a state back to disk
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WriteStats {
    /// Files written
    pub files_written: usize,
    /// Files already identical on disk
    pub files_unchanged: usize,
    /// Files removed because the state does not contain them
    pub files_deleted: usize,
    /// Bytes written
    pub bytes_written: u64,
    /// Non-fatal problems
    pub warnings: Vec<String>,
}

/// Result of restoring a restore point
#[derive(Debug, Clone)]
pub struct RestoreOutcome {
    /// Restore point that was restored
    pub restore_point_id: String,
    /// Reconstructed state
    pub state: ProjectState,
    /// Number of deltas folded onto the snapshot
    pub deltas_replayed: usize,
    /// Disk write statistics
    pub write: WriteStats,
    /// Time taken in milliseconds
    pub duration_ms: u64,
}

/// Integrity report for one restore point
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationReport {
    /// Restore point checked
    pub restore_point_id: String,
    /// Payload checksum matches metadata
    pub checksum_valid: bool,
    /// Parent snapshot exists (deltas only)
    pub parent_present: Option<bool>,
    /// Referenced blobs that are missing
    pub missing_blobs: Vec<String>,
    /// Referenced blobs whose content no longer hashes to their address
    pub corrupt_blobs: Vec<String>,
    /// Other problems
    pub errors: Vec<String>,
}

impl VerificationReport {
    /// Whether every check passed
    pub fn is_valid(&self) -> bool {
        self.checksum_valid
            && self.parent_present.unwrap_or(true)
            && self.missing_blobs.is_empty()
            && self.corrupt_blobs.is_empty()
            && self.errors.is_empty()
    }
}

/// Statistics from sweeping the blob store
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GcStats {
    /// Number of objects examined
    pub objects_examined: usize,
    /// Number of objects deleted
    pub objects_deleted: usize,
    /// Bytes reclaimed
    pub bytes_reclaimed: u64,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

/// What to capture from a project tree
#[derive(Debug, Clone)]
pub struct CaptureOptions {
    /// Glob patterns a file must match to be captured (empty = everything)
    pub include_patterns: Vec<String>,
    /// Directory names skipped anywhere in the tree
    pub exclude_dirs: Vec<String>,
    /// Skip files larger than this (0 = unlimited)
    pub max_file_size: u64,
    /// Worker threads for the directory walk
    pub parallel_workers: usize,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            include_patterns: Vec::new(),
            exclude_dirs: default_exclude_dirs(),
            max_file_size: 0,
            parallel_workers: num_cpus::get(),
        }
    }
}

/// Build, VCS, log and tool directories never captured
pub fn default_exclude_dirs() -> Vec<String> {
    [
        ".git",
        ".rewind",
        "node_modules",
        "target",
        "logs",
        "__pycache__",
        ".venv",
        "dist",
        "build",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Persisted configuration of a project's store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewindConfig {
    /// Project directory being versioned
    pub project_root: PathBuf,
    /// Storage location
    pub storage_path: PathBuf,
    /// Deltas allowed on one snapshot before a new snapshot is forced
    pub delta_threshold: usize,
    /// Restore points older than this many days are removed
    pub retention_days: i64,
    /// Commands kept in history
    pub max_history_size: usize,
    /// Autosave period in seconds
    pub auto_save_interval_secs: u64,
    /// Directory names skipped during capture
    pub exclude_dirs: Vec<String>,
    /// Glob patterns restricting capture (empty = everything)
    pub include_patterns: Vec<String>,
    /// Skip files larger than this (0 = unlimited)
    pub max_file_size: u64,
    /// Blob compression strategy name
    pub compression_strategy: String,
    /// Worker threads for capture
    pub parallel_workers: usize,
    /// Crate version that wrote the config
    pub version: String,
}

impl RewindConfig {
    /// Capture options derived from this config
    pub fn capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            include_patterns: self.include_patterns.clone(),
            exclude_dirs: self.exclude_dirs.clone(),
            max_file_size: self.max_file_size,
            parallel_workers: self.parallel_workers,
        }
    }
}

/// Single-writer gate for a project
///
/// Foreground command execution and autosave ticks both hold this lock, so a
/// checkpoint is never captured while a command is half-applied. Clones share
/// the same underlying mutex.
#[derive(Debug, Clone, Default)]
pub struct WriterLock(Arc<Mutex<()>>);

impl WriterLock {
    /// Create a fresh, unshared lock
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until the lock is free and hold it for the guard's lifetime
    pub fn acquire(&self) -> MutexGuard<'_, ()> {
        self.0.lock()
    }

    /// Take the lock if nobody holds it
    pub fn try_acquire(&self) -> Option<MutexGuard<'_, ()>> {
        self.0.try_lock()
    }
}
