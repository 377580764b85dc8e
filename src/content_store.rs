//! Capturing a project tree and writing it back
//!
//! [`ContentStore`] walks a project directory with the `ignore` crate, hashes
//! every in-scope file in parallel, stores the bytes in the
//! [`BlobStore`](crate::blob_store::BlobStore) and assembles a
//! [`ProjectState`]. [`ContentStore::write_state`] is the inverse: it
//! materializes a state on disk and optionally prunes files the state does
//! not contain.
//!
//! ## Scope
//!
//! A file is in scope when
//! - no directory on its path is one of the configured exclude dirs, and
//! - it matches one of the include globs (or no include globs are configured), and
//! - it is no larger than `max_file_size` (0 = unlimited).
//!
//! `.gitignore` files are not consulted; scope is fully determined by
//! [`CaptureOptions`] so that capture and prune always agree.
//!
//! ## Example
//!
//! ```rust
//! use rewind::blob_store::BlobStore;
//! use rewind::compression::{CompressionEngine, CompressionStrategy};
//! use rewind::content_store::ContentStore;
//! use rewind::types::CaptureOptions;
//!
//! # fn main() -> rewind::Result<()> {
//! let project = tempfile::tempdir()?;
//! let storage = tempfile::tempdir()?;
//! std::fs::write(project.path().join("protocol.md"), "# Protocol")?;
//!
//! let blobs = BlobStore::open(storage.path().to_path_buf(), CompressionEngine::new(CompressionStrategy::Fast))?;
//! let store = ContentStore::new(project.path().to_path_buf(), CaptureOptions::default())?;
//! let state = store.capture(&blobs, Some("protocol".to_string()))?;
//! assert!(state.file("protocol.md").is_some());
//! # Ok(())
//! # }
//! ```

use crate::blob_store::BlobStore;
use crate::collections::{HashSet, HashSetExt};
use crate::error::{Result, RewindError};
use crate::types::{CaptureOptions, FileState, ProjectState, WriteStats};
use crate::utils;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::{overrides::OverrideBuilder, WalkBuilder, WalkState};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, trace, warn};

/// Captures and restores the files of one project directory
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
    options: CaptureOptions,
    include: Option<GlobSet>,
    extra_excludes: Vec<PathBuf>,
}

impl ContentStore {
    /// Create a content store for `root`
    ///
    /// Fails with [`RewindError::InvalidPattern`] if an include glob does not compile.
    pub fn new(root: PathBuf, options: CaptureOptions) -> Result<Self> {
        let include = if options.include_patterns.is_empty() {
            None
        } else {
            let mut builder = GlobSetBuilder::new();
            for pattern in &options.include_patterns {
                builder.add(Glob::new(pattern)?);
            }
            Some(builder.build()?)
        };

        Ok(Self {
            root,
            options,
            include,
            extra_excludes: Vec::new(),
        })
    }

    /// Also skip `path` (typically a storage directory inside the project)
    pub fn with_excluded_path(mut self, path: &Path) -> Self {
        if let Ok(relative) = path.strip_prefix(&self.root) {
            if !relative.as_os_str().is_empty() {
                self.extra_excludes.push(relative.to_path_buf());
            }
        }
        self
    }

    /// Project directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Capture options in effect
    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    /// Capture the current tree into a `ProjectState`
    ///
    /// Unreadable files are skipped with a warning. The result is keyed by
    /// project-relative path, so two captures of the same tree are equal
    /// regardless of walk order.
    #[instrument(skip(self, blobs), fields(root = ?self.root))]
    pub fn capture(&self, blobs: &BlobStore, phase: Option<String>) -> Result<ProjectState> {
        let start = Instant::now();
        let paths = self.scan_paths()?;

        let files: Vec<Option<FileState>> = paths
            .par_iter()
            .map(|(key, path)| {
                self.capture_file(blobs, key, path).unwrap_or_else(|e| {
                    warn!("Skipping {:?}: {}", path, e);
                    None
                })
            })
            .collect();

        let state = ProjectState::from_files(phase, files.into_iter().flatten());
        debug!(
            "Captured {} files ({}) in {:?}",
            state.metadata.total_files,
            utils::format_bytes(state.metadata.total_size),
            start.elapsed()
        );
        Ok(state)
    }

    /// Project keys and absolute paths of every in-scope file, sorted by key
    pub fn scan_paths(&self) -> Result<Vec<(String, PathBuf)>> {
        if !self.root.is_dir() {
            return Err(RewindError::InvalidConfiguration(format!(
                "project root {:?} is not a directory",
                self.root
            )));
        }

        let mut walker_builder = WalkBuilder::new(&self.root);
        walker_builder
            .follow_links(false)
            .hidden(false)
            .parents(false)
            .ignore(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .require_git(false)
            .threads(self.options.parallel_workers.max(1));

        // In override globs, a leading ! means exclude
        let mut override_builder = OverrideBuilder::new(&self.root);
        for dir in &self.options.exclude_dirs {
            override_builder.add(&format!("!{}/", dir))?;
        }
        for path in &self.extra_excludes {
            let pattern = format!("!/{}/", path.to_string_lossy().replace('\\', "/"));
            override_builder.add(&pattern)?;
        }
        walker_builder.overrides(override_builder.build()?);

        let collected = Arc::new(Mutex::new(Vec::<PathBuf>::new()));
        walker_builder.build_parallel().run(|| {
            let collected = Arc::clone(&collected);
            Box::new(move |entry_result| {
                match entry_result {
                    Ok(entry) => {
                        if entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                            collected.lock().push(entry.into_path());
                        }
                    }
                    Err(e) => warn!("Walk error: {}", e),
                }
                WalkState::Continue
            })
        });

        let paths = std::mem::take(&mut *collected.lock());
        let mut keyed: Vec<(String, PathBuf)> = paths
            .into_iter()
            .filter_map(|path| {
                let key = utils::to_project_key(&path, &self.root)?;
                self.in_scope(&key).then_some((key, path))
            })
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));

        trace!("Scan found {} in-scope files", keyed.len());
        Ok(keyed)
    }

    fn in_scope(&self, key: &str) -> bool {
        if let Some((dirs, _)) = key.rsplit_once('/') {
            if dirs.split('/').any(|part| self.options.exclude_dirs.iter().any(|d| d == part)) {
                return false;
            }
        }
        match &self.include {
            Some(globs) => globs.is_match(key),
            None => true,
        }
    }

    fn capture_file(&self, blobs: &BlobStore, key: &str, path: &Path) -> Result<Option<FileState>> {
        let metadata = fs::metadata(path)?;
        if self.options.max_file_size > 0 && metadata.len() > self.options.max_file_size {
            warn!(
                "Skipping {} ({} exceeds max file size)",
                key,
                utils::format_bytes(metadata.len())
            );
            return Ok(None);
        }

        let content = fs::read(path)?;
        let hash = utils::hash_data(&content);
        blobs.put_with_hash(&hash, &content, path)?;

        let modified_at = metadata
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        trace!("Captured {} ({} bytes)", key, content.len());
        Ok(Some(FileState {
            path: key.to_string(),
            hash,
            size: content.len() as u64,
            modified_at,
        }))
    }

    /// Materialize `state` under the project root
    ///
    /// Every referenced blob is checked before the first write, so a missing
    /// blob leaves the tree untouched. Files whose content already matches are
    /// not rewritten. With `prune`, in-scope files absent from `state` are
    /// deleted along with directories this leaves empty.
    #[instrument(skip(self, blobs, state), fields(files = state.files.len()))]
    pub fn write_state(&self, blobs: &BlobStore, state: &ProjectState, prune: bool) -> Result<WriteStats> {
        let missing: Vec<&str> = state.referenced_hashes().filter(|h| !blobs.exists(h)).collect();
        if let Some(first) = missing.first() {
            return Err(RewindError::integrity(format!(
                "{} blob(s) referenced by the state are missing (first: {})",
                missing.len(),
                utils::short_id(first)
            )));
        }

        let mut stats = WriteStats::default();
        self.clear_parent_conflicts(state, &mut stats)?;

        for (key, file) in &state.files {
            let dest = utils::from_project_key(&self.root, key)?;

            if dest.is_file() {
                if let Ok(existing) = fs::read(&dest) {
                    if existing.len() as u64 == file.size && utils::hash_data(&existing) == file.hash {
                        stats.files_unchanged += 1;
                        continue;
                    }
                }
            } else if dest.is_dir() {
                fs::remove_dir_all(&dest)?;
                stats.warnings.push(format!("replaced directory {} with a file", key));
            }

            let content = blobs.get_verified(&file.hash)?;
            utils::atomic_write(&dest, &content)?;
            stats.files_written += 1;
            stats.bytes_written += content.len() as u64;
            trace!("Wrote {} ({} bytes)", key, content.len());
        }

        if prune {
            let mut touched_dirs = HashSet::new();
            for (key, path) in self.scan_paths()? {
                if state.files.contains_key(&key) {
                    continue;
                }
                match fs::remove_file(&path) {
                    Ok(()) => {
                        stats.files_deleted += 1;
                        if let Some(parent) = path.parent() {
                            touched_dirs.insert(parent.to_path_buf());
                        }
                        trace!("Pruned {}", key);
                    }
                    Err(e) => {
                        warn!("Failed to prune {}: {}", key, e);
                        stats.warnings.push(format!("failed to prune {}: {}", key, e));
                    }
                }
            }
            self.remove_empty_dirs(touched_dirs)?;
        }

        debug!(
            "Wrote state: {} written, {} unchanged, {} deleted",
            stats.files_written, stats.files_unchanged, stats.files_deleted
        );
        Ok(stats)
    }

    /// Remove non-directories sitting where `state` needs a parent directory
    fn clear_parent_conflicts(&self, state: &ProjectState, stats: &mut WriteStats) -> Result<()> {
        let mut checked = HashSet::new();
        for key in state.files.keys() {
            let mut prefix = String::new();
            let mut parts = key.split('/').filter(|p| !p.is_empty() && *p != ".").peekable();
            while let Some(part) = parts.next() {
                if parts.peek().is_none() {
                    break;
                }
                if !prefix.is_empty() {
                    prefix.push('/');
                }
                prefix.push_str(part);
                if !checked.insert(prefix.clone()) {
                    continue;
                }
                if state.files.contains_key(&prefix) {
                    return Err(RewindError::integrity(format!(
                        "'{}' is both a file and the parent of '{}'",
                        prefix, key
                    )));
                }

                let path = utils::from_project_key(&self.root, &prefix)?;
                match fs::symlink_metadata(&path) {
                    Ok(meta) if !meta.is_dir() => {
                        fs::remove_file(&path)?;
                        warn!("Replaced {} with a directory", prefix);
                        stats.warnings.push(format!("replaced file {} with a directory", prefix));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    fn remove_empty_dirs(&self, dirs: HashSet<PathBuf>) -> Result<()> {
        let mut dirs: Vec<PathBuf> = dirs.into_iter().collect();
        // deepest first so parents see their children gone
        dirs.sort_by_key(|d| std::cmp::Reverse(d.components().count()));

        for dir in dirs {
            let mut current = Some(dir.as_path());
            while let Some(path) = current {
                if path == self.root || !path.starts_with(&self.root) {
                    break;
                }
                if !utils::remove_dir_if_empty(path)? {
                    break;
                }
                current = path.parent();
            }
        }
        Ok(())
    }
}
