//! Restore point management
//!
//! A restore point is either a **snapshot** (a full [`ProjectState`]) or a
//! **delta** (the changes since the previously created point, replayed on top
//! of the snapshot that started the chain). The manager decides which to
//! write, persists payloads gzip-compressed next to a JSON metadata record,
//! and reconstructs any point on demand.
//!
//! ## Layout
//!
//! ```text
//! storage_root/restore-points/
//! ├── snapshots/<id>.json.gz
//! ├── deltas/<id>.json.gz
//! └── metadata/<id>.json
//! ```
//!
//! A point exists once its metadata file exists; payloads are written first.
//!
//! ## Chains
//!
//! A new point is a snapshot when forced, when there is no chain head, for
//! [`RestorePointKind::AutoPhase`], or when the head's chain already holds
//! `delta_threshold` deltas. Every delta records the snapshot id as its
//! `parent_id`; the deltas of one parent replay in `sequence` order.
//!
//! Deleting a delta folds its changes into the next delta of the same chain,
//! so later points still reconstruct to the same state.

use crate::blob_store::BlobStore;
use crate::collections::{HashSet, HashSetExt};
use crate::compression::{gzip_compress, gzip_decompress};
use crate::content_store::ContentStore;
use crate::delta;
use crate::error::{Result, RewindError};
use crate::types::{
    DeltaChange, GcStats, ProjectState, RestoreOutcome, RestorePointKind, RestorePointMetadata,
    RestorePointOptions, RestorePointStats, VerificationReport, FORMAT_VERSION,
};
use crate::utils;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, trace, warn};
use uuid::Uuid;

/// Default number of deltas allowed on one snapshot
pub const DEFAULT_DELTA_THRESHOLD: usize = 10;

/// Default retention in days
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Persisted body of a delta restore point
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeltaPayload {
    /// Payload format version
    pub format_version: u32,
    /// Snapshot this delta replays on
    pub parent_id: String,
    /// Capture time of the resulting state
    pub timestamp: DateTime<Utc>,
    /// Workflow phase of the resulting state
    pub phase: Option<String>,
    /// Changes relative to the previous point of the chain
    pub changes: Vec<DeltaChange>,
    /// Memory snapshot of the resulting state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_snapshot: Option<serde_json::Value>,
    /// Config blob of the resulting state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
    /// Aggregate checksum of the state after replaying this delta
    pub result_checksum: String,
}

/// What a retention pass removed
#[derive(Debug, Clone, Default)]
pub struct CleanupReport {
    /// Ids of deleted restore points
    pub deleted: Vec<String>,
    /// Expired snapshots kept because live deltas depend on them
    pub kept_snapshots: Vec<String>,
    /// Blob sweep results
    pub gc: GcStats,
}

#[derive(Debug, Clone)]
struct ChainHead {
    snapshot_id: String,
    last_id: String,
    delta_count: usize,
    // materialized lazily after open
    state: Option<ProjectState>,
}

/// Creates, restores and maintains the restore points of one project
pub struct RestorePointManager {
    dir: PathBuf,
    content: ContentStore,
    blobs: Arc<BlobStore>,
    delta_threshold: usize,
    retention: Option<Duration>,
    head: Mutex<Option<ChainHead>>,
    next_sequence: AtomicU64,
}

impl std::fmt::Debug for RestorePointManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestorePointManager")
            .field("dir", &self.dir)
            .field("delta_threshold", &self.delta_threshold)
            .field("retention", &self.retention)
            .finish()
    }
}

impl RestorePointManager {
    /// Open the restore point store under `storage_root`
    ///
    /// The chain head and sequence counter are rebuilt from the metadata
    /// directory. A `retention_days` of 0 or less disables retention.
    pub fn open(
        storage_root: &Path,
        content: ContentStore,
        blobs: Arc<BlobStore>,
        delta_threshold: usize,
        retention_days: i64,
    ) -> Result<Self> {
        if delta_threshold == 0 {
            return Err(RewindError::InvalidConfiguration(
                "delta threshold must be at least 1".to_string(),
            ));
        }

        let dir = storage_root.join("restore-points");
        fs::create_dir_all(dir.join("snapshots"))?;
        fs::create_dir_all(dir.join("deltas"))?;
        fs::create_dir_all(dir.join("metadata"))?;

        let manager = Self {
            dir,
            content,
            blobs,
            delta_threshold,
            retention: (retention_days > 0).then(|| Duration::days(retention_days)),
            head: Mutex::new(None),
            next_sequence: AtomicU64::new(0),
        };

        let points = manager.list_restore_points()?;
        let next = points.iter().map(|m| m.sequence + 1).max().unwrap_or(0);
        manager.next_sequence.store(next, Ordering::SeqCst);
        *manager.head.lock() = manager.rebuild_head(&points);

        debug!(
            "Opened restore point store at {:?} ({} points, next sequence {})",
            manager.dir,
            points.len(),
            next
        );
        Ok(manager)
    }

    /// Content store used for capture and restore
    pub fn content_store(&self) -> &ContentStore {
        &self.content
    }

    /// Blob store holding file contents
    pub fn blob_store(&self) -> &Arc<BlobStore> {
        &self.blobs
    }

    /// Capture the project and persist it as a restore point
    #[instrument(skip(self, options))]
    pub fn create_restore_point(
        &self,
        kind: RestorePointKind,
        description: &str,
        options: RestorePointOptions,
    ) -> Result<RestorePointMetadata> {
        let mut head = self.head.lock();
        let state = self.content.capture(&self.blobs, options.phase.clone())?;
        self.create_locked(&mut head, kind, description, options, state)
    }

    /// Persist an already captured state as a restore point
    ///
    /// Every blob the state references must already be in the blob store.
    pub fn create_restore_point_from_state(
        &self,
        kind: RestorePointKind,
        description: &str,
        options: RestorePointOptions,
        state: ProjectState,
    ) -> Result<RestorePointMetadata> {
        let missing = state.referenced_hashes().filter(|h| !self.blobs.exists(h)).count();
        if missing > 0 {
            return Err(RewindError::integrity(format!(
                "{} blob(s) referenced by the state are not stored",
                missing
            )));
        }
        let mut head = self.head.lock();
        self.create_locked(&mut head, kind, description, options, state)
    }

    fn create_locked(
        &self,
        head: &mut Option<ChainHead>,
        kind: RestorePointKind,
        description: &str,
        options: RestorePointOptions,
        mut state: ProjectState,
    ) -> Result<RestorePointMetadata> {
        let start = Instant::now();
        if options.phase.is_some() {
            state.phase = options.phase.clone();
        }
        state.recompute_metadata();

        let make_snapshot = options.force_snapshot
            || kind == RestorePointKind::AutoPhase
            || match head.as_ref() {
                None => true,
                Some(h) => h.delta_count >= self.delta_threshold,
            };

        let id = Uuid::new_v4().to_string();
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);

        let metadata = if make_snapshot {
            debug!("Writing snapshot {} ({} files)", utils::short_id(&id), state.files.len());
            let json = serde_json::to_vec(&state)?;
            let (checksum, size_bytes) = self.write_payload(&self.snapshot_path(&id), &json)?;

            let metadata = RestorePointMetadata {
                id: id.clone(),
                kind,
                timestamp: Utc::now(),
                sequence,
                description: description.to_string(),
                phase: state.phase.clone(),
                format_version: FORMAT_VERSION,
                parent_id: None,
                is_snapshot: true,
                is_delta: false,
                size_bytes,
                compressed: true,
                checksum,
                files_changed: None,
                total_files: state.files.len(),
                tags: options.tags,
            };
            self.write_metadata(&metadata)?;

            *head = Some(ChainHead {
                snapshot_id: id.clone(),
                last_id: id.clone(),
                delta_count: 0,
                state: Some(state),
            });
            metadata
        } else {
            let Some(chain) = head.as_mut() else {
                return Err(RewindError::internal("delta requested without a chain head"));
            };
            if chain.state.is_none() {
                let (previous, _) = self.reconstruct(&chain.last_id)?;
                chain.state = Some(previous);
            }
            let previous = chain
                .state
                .as_ref()
                .ok_or_else(|| RewindError::internal("chain head state unavailable"))?;

            let changes = delta::diff(previous, &state);
            debug!(
                "Writing delta {} on {} ({} changes, chain length {})",
                utils::short_id(&id),
                utils::short_id(&chain.snapshot_id),
                changes.len(),
                chain.delta_count + 1
            );

            let payload = DeltaPayload {
                format_version: FORMAT_VERSION,
                parent_id: chain.snapshot_id.clone(),
                timestamp: state.timestamp,
                phase: state.phase.clone(),
                changes,
                memory_snapshot: state.memory_snapshot.clone(),
                config: state.config.clone(),
                result_checksum: state.metadata.aggregate_checksum.clone(),
            };
            let json = serde_json::to_vec(&payload)?;
            let (checksum, size_bytes) = self.write_payload(&self.delta_path(&id), &json)?;

            let metadata = RestorePointMetadata {
                id: id.clone(),
                kind,
                timestamp: Utc::now(),
                sequence,
                description: description.to_string(),
                phase: state.phase.clone(),
                format_version: FORMAT_VERSION,
                parent_id: Some(chain.snapshot_id.clone()),
                is_snapshot: false,
                is_delta: true,
                size_bytes,
                compressed: true,
                checksum,
                files_changed: Some(payload.changes.len()),
                total_files: state.files.len(),
                tags: options.tags,
            };
            self.write_metadata(&metadata)?;

            chain.last_id = id.clone();
            chain.delta_count += 1;
            chain.state = Some(state);
            metadata
        };

        info!(
            "Created {} restore point {} ({}) in {:?}",
            if metadata.is_snapshot { "snapshot" } else { "delta" },
            metadata.short_id(),
            metadata.kind,
            start.elapsed()
        );

        if let Some(retention) = self.retention {
            if let Err(e) = self.cleanup_locked(head, Utc::now() - retention) {
                warn!("Retention cleanup after create failed: {}", e);
            }
        }

        Ok(metadata)
    }

    /// Reconstruct a restore point and write it to the project directory
    ///
    /// Files absent from the restored state are removed. The chain head is
    /// cleared, so the next restore point starts a new snapshot.
    #[instrument(skip(self))]
    pub fn restore(&self, id: &str) -> Result<RestoreOutcome> {
        info!("Restoring to restore point {}", utils::short_id(id));
        let start = Instant::now();
        let mut head = self.head.lock();

        let (state, deltas_replayed) = self.reconstruct(id)?;
        let write = self.content.write_state(&self.blobs, &state, true)?;
        *head = None;

        let outcome = RestoreOutcome {
            restore_point_id: id.to_string(),
            state,
            deltas_replayed,
            write,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Restored {} in {}ms ({} written, {} deleted, {} deltas replayed)",
            utils::short_id(id),
            outcome.duration_ms,
            outcome.write.files_written,
            outcome.write.files_deleted,
            deltas_replayed
        );
        Ok(outcome)
    }

    /// Reconstruct the state of a restore point without touching the project
    pub fn load_state(&self, id: &str) -> Result<ProjectState> {
        self.reconstruct(id).map(|(state, _)| state)
    }

    fn reconstruct(&self, id: &str) -> Result<(ProjectState, usize)> {
        let target = self.get_restore_point(id)?;
        if target.is_snapshot {
            return Ok((self.read_snapshot(&target)?, 0));
        }

        let parent_id = target
            .parent_id
            .as_deref()
            .ok_or_else(|| RewindError::integrity(format!("delta {} has no parent id", target.id)))?;
        let parent = match self.get_restore_point(parent_id) {
            Ok(parent) if parent.is_snapshot => parent,
            Ok(_) => {
                return Err(RewindError::integrity(format!(
                    "parent {} of delta {} is not a snapshot",
                    parent_id, target.id
                )))
            }
            Err(RewindError::RestorePointNotFound(_)) => {
                return Err(RewindError::integrity(format!(
                    "parent snapshot {} of delta {} is missing",
                    parent_id, target.id
                )))
            }
            Err(e) => return Err(e),
        };

        let base = self.read_snapshot(&parent)?;
        let chain: Vec<RestorePointMetadata> = self
            .chain_of(&parent.id)?
            .into_iter()
            .filter(|m| m.sequence <= target.sequence)
            .collect();

        let mut payloads = Vec::with_capacity(chain.len());
        for meta in &chain {
            payloads.push(self.read_delta(meta)?);
        }

        let mut state = delta::replay(&base, payloads.iter().map(|p| p.changes.as_slice()));
        if let Some(last) = payloads.last() {
            state.timestamp = last.timestamp;
            state.phase = last.phase.clone();
            state.memory_snapshot = last.memory_snapshot.clone();
            state.config = last.config.clone();
            if state.metadata.aggregate_checksum != last.result_checksum {
                return Err(RewindError::integrity(format!(
                    "replaying {} deltas onto {} did not reproduce restore point {}",
                    payloads.len(),
                    parent.short_id(),
                    target.short_id()
                )));
            }
        }

        trace!("Reconstructed {} from {} deltas", target.short_id(), payloads.len());
        Ok((state, payloads.len()))
    }

    /// All restore points, newest first
    pub fn list_restore_points(&self) -> Result<Vec<RestorePointMetadata>> {
        let mut points = Vec::new();
        for entry in fs::read_dir(self.dir.join("metadata"))? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match utils::read_json::<RestorePointMetadata>(&path) {
                Ok(meta) => points.push(meta),
                Err(e) => warn!("Skipping unreadable restore point metadata {:?}: {}", path, e),
            }
        }
        points.sort_by(|a, b| b.sequence.cmp(&a.sequence).then(b.timestamp.cmp(&a.timestamp)));
        Ok(points)
    }

    /// Metadata of one restore point
    pub fn get_restore_point(&self, id: &str) -> Result<RestorePointMetadata> {
        let path = self.metadata_path(id)?;
        if !path.exists() {
            return Err(RewindError::RestorePointNotFound(id.to_string()));
        }
        utils::read_json(&path)
    }

    /// Resolve a unique id prefix to a full restore point id
    pub fn resolve_id(&self, prefix: &str) -> Result<String> {
        let matches: Vec<String> = self
            .list_restore_points()?
            .into_iter()
            .filter(|m| m.id.starts_with(prefix))
            .map(|m| m.id)
            .collect();
        match matches.as_slice() {
            [id] => Ok(id.clone()),
            [] => Err(RewindError::RestorePointNotFound(prefix.to_string())),
            _ => Err(RewindError::InvalidConfiguration(format!(
                "restore point prefix '{}' is ambiguous ({} matches)",
                prefix,
                matches.len()
            ))),
        }
    }

    /// Ids of the deltas chained on a snapshot, in replay order
    pub fn dependents_of(&self, snapshot_id: &str) -> Result<Vec<String>> {
        Ok(self.chain_of(snapshot_id)?.into_iter().map(|m| m.id).collect())
    }

    fn chain_of(&self, snapshot_id: &str) -> Result<Vec<RestorePointMetadata>> {
        let mut chain: Vec<RestorePointMetadata> = self
            .list_restore_points()?
            .into_iter()
            .filter(|m| m.is_delta && m.parent_id.as_deref() == Some(snapshot_id))
            .collect();
        chain.sort_by_key(|m| m.sequence);
        Ok(chain)
    }

    /// Delete one restore point
    ///
    /// A snapshot with dependent deltas is refused with
    /// [`RewindError::RestorePointHasDependents`]; use
    /// [`RestorePointManager::delete_restore_point_cascade`] to remove the
    /// whole chain.
    #[instrument(skip(self))]
    pub fn delete_restore_point(&self, id: &str) -> Result<()> {
        let mut head = self.head.lock();
        let meta = self.get_restore_point(id)?;

        if meta.is_snapshot {
            let dependents = self.dependents_of(id)?;
            if !dependents.is_empty() {
                return Err(RewindError::RestorePointHasDependents {
                    id: id.to_string(),
                    dependents,
                });
            }
        }

        self.delete_locked(&meta)?;
        self.refresh_head(&mut head, &[meta.id.clone()])?;
        self.collect_garbage_locked()?;
        info!("Deleted restore point {}", meta.short_id());
        Ok(())
    }

    /// Delete a snapshot together with every delta chained on it
    ///
    /// Returns the ids removed. On a delta this behaves like
    /// [`RestorePointManager::delete_restore_point`].
    #[instrument(skip(self))]
    pub fn delete_restore_point_cascade(&self, id: &str) -> Result<Vec<String>> {
        let mut head = self.head.lock();
        let meta = self.get_restore_point(id)?;

        let mut removed = Vec::new();
        if meta.is_snapshot {
            for dependent in self.chain_of(id)?.into_iter().rev() {
                self.remove_files(&dependent)?;
                removed.push(dependent.id);
            }
            self.remove_files(&meta)?;
        } else {
            self.delete_locked(&meta)?;
        }
        removed.push(meta.id.clone());

        self.refresh_head(&mut head, &removed)?;
        self.collect_garbage_locked()?;
        info!("Deleted restore point {} and {} dependents", meta.short_id(), removed.len() - 1);
        Ok(removed)
    }

    fn delete_locked(&self, meta: &RestorePointMetadata) -> Result<()> {
        if meta.is_delta {
            self.fold_into_successor(meta)?;
        }
        self.remove_files(meta)
    }

    /// Prepend a delta's changes to the next delta of its chain
    fn fold_into_successor(&self, meta: &RestorePointMetadata) -> Result<()> {
        let Some(parent_id) = meta.parent_id.as_deref() else {
            return Ok(());
        };
        let Some(next) = self
            .chain_of(parent_id)?
            .into_iter()
            .find(|m| m.sequence > meta.sequence)
        else {
            return Ok(());
        };

        let removed = self.read_delta(meta)?;
        let mut successor = self.read_delta(&next)?;
        let mut changes = removed.changes;
        changes.append(&mut successor.changes);
        successor.changes = changes;

        let json = serde_json::to_vec(&successor)?;
        let (checksum, size_bytes) = self.write_payload(&self.delta_path(&next.id), &json)?;
        let mut updated = next;
        updated.checksum = checksum;
        updated.size_bytes = size_bytes;
        updated.files_changed = Some(successor.changes.len());
        self.write_metadata(&updated)?;

        debug!("Folded delta {} into {}", meta.short_id(), updated.short_id());
        Ok(())
    }

    fn remove_files(&self, meta: &RestorePointMetadata) -> Result<()> {
        // metadata first: a point without metadata does not exist
        let metadata_path = self.metadata_path(&meta.id)?;
        if metadata_path.exists() {
            fs::remove_file(&metadata_path)?;
        }
        let payload = self.payload_path(meta);
        if payload.exists() {
            fs::remove_file(&payload)?;
        }
        trace!("Removed restore point files for {}", meta.short_id());
        Ok(())
    }

    fn refresh_head(&self, head: &mut Option<ChainHead>, removed: &[String]) -> Result<()> {
        let affected = head
            .as_ref()
            .map(|h| removed.iter().any(|id| *id == h.last_id || *id == h.snapshot_id))
            .unwrap_or(false);
        if affected {
            *head = self.rebuild_head(&self.list_restore_points()?);
            debug!("Chain head rebuilt after deletion");
        } else if let Some(h) = head.as_mut() {
            h.delta_count = self.chain_of(&h.snapshot_id)?.len();
        }
        Ok(())
    }

    fn rebuild_head(&self, newest_first: &[RestorePointMetadata]) -> Option<ChainHead> {
        let newest = newest_first.first()?;
        if newest.is_snapshot {
            return Some(ChainHead {
                snapshot_id: newest.id.clone(),
                last_id: newest.id.clone(),
                delta_count: 0,
                state: None,
            });
        }

        let parent_id = newest.parent_id.clone()?;
        if !newest_first.iter().any(|m| m.id == parent_id && m.is_snapshot) {
            warn!("Newest delta {} has no parent snapshot; next point will be a snapshot", newest.short_id());
            return None;
        }
        let delta_count = newest_first
            .iter()
            .filter(|m| m.is_delta && m.parent_id.as_deref() == Some(parent_id.as_str()))
            .count();
        Some(ChainHead {
            snapshot_id: parent_id,
            last_id: newest.id.clone(),
            delta_count,
            state: None,
        })
    }

    /// Aggregate statistics over all restore points and blobs
    pub fn get_statistics(&self) -> Result<RestorePointStats> {
        let points = self.list_restore_points()?;
        let blob_stats = self.blobs.stats()?;

        let mut stats = RestorePointStats {
            total: points.len(),
            blob_count: blob_stats.object_count,
            blob_bytes: blob_stats.total_size,
            ..Default::default()
        };
        for meta in &points {
            stats.total_size_bytes += meta.size_bytes;
            if meta.is_snapshot {
                stats.snapshots += 1;
                stats.snapshot_bytes += meta.size_bytes;
            } else {
                stats.deltas += 1;
                stats.delta_bytes += meta.size_bytes;
            }
        }
        stats.oldest = points.iter().map(|m| m.timestamp).min();
        stats.newest = points.iter().map(|m| m.timestamp).max();
        Ok(stats)
    }

    /// Apply the retention policy now
    ///
    /// Returns an empty report when retention is disabled.
    pub fn cleanup_expired(&self) -> Result<CleanupReport> {
        match self.retention {
            Some(retention) => self.cleanup_older_than(Utc::now() - retention),
            None => Ok(CleanupReport::default()),
        }
    }

    /// Remove restore points created before `cutoff`
    ///
    /// Expired deltas are always removed. An expired snapshot is removed only
    /// when no delta depends on it any more. Unreferenced blobs are swept
    /// afterwards.
    #[instrument(skip(self))]
    pub fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> Result<CleanupReport> {
        let mut head = self.head.lock();
        self.cleanup_locked(&mut head, cutoff)
    }

    fn cleanup_locked(&self, head: &mut Option<ChainHead>, cutoff: DateTime<Utc>) -> Result<CleanupReport> {
        let mut report = CleanupReport::default();
        let mut expired: Vec<RestorePointMetadata> = self
            .list_restore_points()?
            .into_iter()
            .filter(|m| m.timestamp < cutoff)
            .collect();
        if expired.is_empty() {
            return Ok(report);
        }
        expired.sort_by_key(|m| m.sequence);

        for meta in expired.iter().filter(|m| m.is_delta) {
            self.delete_locked(meta)?;
            report.deleted.push(meta.id.clone());
        }
        for meta in expired.iter().filter(|m| m.is_snapshot) {
            if self.chain_of(&meta.id)?.is_empty() {
                self.remove_files(meta)?;
                report.deleted.push(meta.id.clone());
            } else {
                report.kept_snapshots.push(meta.id.clone());
            }
        }

        self.refresh_head(head, &report.deleted)?;
        report.gc = self.collect_garbage_locked()?;
        info!(
            "Retention removed {} restore points ({} snapshots kept for live deltas)",
            report.deleted.len(),
            report.kept_snapshots.len()
        );
        Ok(report)
    }

    /// Delete blobs no restore point references
    pub fn collect_garbage(&self) -> Result<GcStats> {
        let _head = self.head.lock();
        self.collect_garbage_locked()
    }

    fn collect_garbage_locked(&self) -> Result<GcStats> {
        let mut referenced = HashSet::new();
        for meta in self.list_restore_points()? {
            if meta.is_snapshot {
                let state = self.read_snapshot(&meta)?;
                referenced.extend(state.referenced_hashes().map(String::from));
            } else {
                let payload = self.read_delta(&meta)?;
                referenced.extend(payload.changes.iter().filter_map(|c| c.hash().map(String::from)));
            }
        }
        let stats = self.blobs.sweep(&referenced)?;
        self.blobs.persist_cache()?;
        Ok(stats)
    }

    /// Check payload checksum, parent presence and blob integrity
    pub fn verify_restore_point(&self, id: &str) -> Result<VerificationReport> {
        let meta = self.get_restore_point(id)?;
        let mut report = VerificationReport {
            restore_point_id: meta.id.clone(),
            ..Default::default()
        };

        match self.read_payload(&meta) {
            Ok(_) => report.checksum_valid = true,
            Err(e) => report.errors.push(e.to_string()),
        }

        if let Some(parent_id) = meta.parent_id.as_deref() {
            report.parent_present = Some(self.get_restore_point(parent_id).map(|p| p.is_snapshot).unwrap_or(false));
        }

        if report.checksum_valid && report.parent_present.unwrap_or(true) {
            match self.reconstruct(&meta.id) {
                Ok((state, _)) => {
                    for file in state.files.values() {
                        match self.blobs.get_verified(&file.hash) {
                            Ok(_) => {}
                            Err(RewindError::ObjectNotFound(_)) => report.missing_blobs.push(file.path.clone()),
                            Err(RewindError::ChecksumMismatch { .. }) => report.corrupt_blobs.push(file.path.clone()),
                            Err(e) => report.errors.push(format!("{}: {}", file.path, e)),
                        }
                    }
                }
                Err(e) => report.errors.push(e.to_string()),
            }
        }

        debug!("Verified {}: valid={}", meta.short_id(), report.is_valid());
        Ok(report)
    }

    fn write_payload(&self, path: &Path, json: &[u8]) -> Result<(String, u64)> {
        let checksum = utils::hash_data(json);
        let packed = gzip_compress(json)?;
        utils::atomic_write(path, &packed)?;
        Ok((checksum, packed.len() as u64))
    }

    fn write_metadata(&self, meta: &RestorePointMetadata) -> Result<()> {
        utils::write_json(&self.metadata_path(&meta.id)?, meta)
    }

    fn read_payload(&self, meta: &RestorePointMetadata) -> Result<Vec<u8>> {
        let path = self.payload_path(meta);
        if !path.exists() {
            return Err(RewindError::integrity(format!(
                "payload of restore point {} is missing",
                meta.id
            )));
        }
        let raw = fs::read(&path)?;
        let json = if meta.compressed { gzip_decompress(&raw)? } else { raw };

        let actual = utils::hash_data(&json);
        if actual != meta.checksum {
            return Err(RewindError::ChecksumMismatch {
                expected: meta.checksum.clone(),
                actual,
            });
        }
        Ok(json)
    }

    fn read_snapshot(&self, meta: &RestorePointMetadata) -> Result<ProjectState> {
        Ok(serde_json::from_slice(&self.read_payload(meta)?)?)
    }

    fn read_delta(&self, meta: &RestorePointMetadata) -> Result<DeltaPayload> {
        Ok(serde_json::from_slice(&self.read_payload(meta)?)?)
    }

    fn snapshot_path(&self, id: &str) -> PathBuf {
        self.dir.join("snapshots").join(format!("{}.json.gz", id))
    }

    fn delta_path(&self, id: &str) -> PathBuf {
        self.dir.join("deltas").join(format!("{}.json.gz", id))
    }

    fn payload_path(&self, meta: &RestorePointMetadata) -> PathBuf {
        if meta.is_snapshot {
            self.snapshot_path(&meta.id)
        } else {
            self.delta_path(&meta.id)
        }
    }

    fn metadata_path(&self, id: &str) -> Result<PathBuf> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(RewindError::RestorePointNotFound(id.to_string()));
        }
        Ok(self.dir.join("metadata").join(format!("{}.json", id)))
    }
}
