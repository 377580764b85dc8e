//! Content-addressed blob store
//!
//! Raw file bytes captured into a [`ProjectState`](crate::types::ProjectState)
//! live here, addressed by their SHA-256 hash. Identical content is stored
//! once no matter how many files or restore points reference it.
//!
//! ## Layout
//!
//! ```text
//! storage_root/
//! ├── objects/
//! │   └── <prefix>/          # First 2 chars of hash
//! │       └── <suffix>       # Remaining hash chars, LZ4-framed
//! └── object_cache.bin       # bincode cache of blob metadata
//! ```
//!
//! Blobs carry no reference counts. Restore point payloads are the source of
//! truth for which hashes are live; [`BlobStore::sweep`] removes everything
//! else.

use crate::collections::{GxBuildHasher, HashSet};
use crate::compression::CompressionEngine;
use crate::error::{Result, RewindError};
use crate::types::GcStats;
use crate::utils;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// Cached metadata for one stored blob
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobInfo {
    /// SHA-256 of the raw content
    pub hash: String,
    /// Bytes on disk, including the frame header
    pub stored_size: u64,
    /// Raw content size
    pub raw_size: u64,
    /// Whether the frame holds LZ4 data
    pub is_compressed: bool,
    /// When the blob was first written
    pub created_at: DateTime<Utc>,
}

/// Object count and size of the store
#[derive(Debug, Clone, Copy, Default)]
pub struct BlobStats {
    /// Number of blobs on disk
    pub object_count: usize,
    /// Bytes used by blobs on disk
    pub total_size: u64,
}

/// Sharded, compressed, deduplicating blob store
pub struct BlobStore {
    root: PathBuf,
    compression: Arc<Mutex<CompressionEngine>>,
    object_cache: Arc<DashMap<String, BlobInfo, GxBuildHasher>>,
}

impl std::fmt::Debug for BlobStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobStore")
            .field("root", &self.root)
            .field("object_cache_size", &self.object_cache.len())
            .finish()
    }
}

impl BlobStore {
    /// Open the store under `root`, creating `objects/` if needed
    ///
    /// A corrupt `object_cache.bin` is discarded with a warning; the cache is
    /// only an accelerator and is rebuilt as blobs are touched.
    pub fn open(root: PathBuf, compression: CompressionEngine) -> Result<Self> {
        fs::create_dir_all(root.join("objects"))?;

        let object_cache = Arc::new(DashMap::with_capacity_and_hasher(1000, GxBuildHasher::default()));
        let cache_path = root.join("object_cache.bin");
        if cache_path.exists() {
            match fs::read(&cache_path) {
                Ok(bytes) => {
                    match bincode::serde::decode_from_slice::<Vec<BlobInfo>, _>(&bytes, bincode::config::standard()) {
                        Ok((entries, _)) => {
                            debug!("Loaded {} cached blob entries", entries.len());
                            for info in entries {
                                object_cache.insert(info.hash.clone(), info);
                            }
                        }
                        Err(e) => {
                            warn!("Failed to decode blob cache: {}", e);
                            fs::remove_file(&cache_path).ok();
                        }
                    }
                }
                Err(e) => warn!("Failed to read blob cache: {}", e),
            }
        }

        debug!("Opened blob store at {:?}", root);
        Ok(Self {
            root,
            compression: Arc::new(Mutex::new(compression)),
            object_cache,
        })
    }

    /// Store `content`, returning its hash and on-disk size
    ///
    /// Existing content is not rewritten. `path_hint` only steers the
    /// compression strategy.
    pub fn put(&self, content: &[u8], path_hint: &Path) -> Result<(String, u64)> {
        let hash = utils::hash_data(content);
        self.put_with_hash(&hash, content, path_hint)
    }

    /// Store `content` whose hash the caller already computed
    pub fn put_with_hash(&self, hash: &str, content: &[u8], path_hint: &Path) -> Result<(String, u64)> {
        let object_path = self.object_path(hash)?;
        let on_disk = object_path.exists();
        if let Some(info) = self.object_cache.get(hash).map(|entry| entry.clone()) {
            if on_disk {
                trace!("Blob {} already cached", utils::short_id(hash));
                return Ok((hash.to_string(), info.stored_size));
            }
            warn!("Blob {} is cached but missing on disk, rewriting", utils::short_id(hash));
            self.object_cache.remove(hash);
        }

        if on_disk {
            let stored_size = fs::metadata(&object_path)?.len();
            trace!("Blob {} already on disk", utils::short_id(hash));
            return Ok((hash.to_string(), stored_size));
        }

        let framed = self.compression.lock().compress(path_hint, content)?;
        let stored_size = framed.len() as u64;
        utils::atomic_write(&object_path, &framed)?;

        self.object_cache.insert(
            hash.to_string(),
            BlobInfo {
                hash: hash.to_string(),
                stored_size,
                raw_size: content.len() as u64,
                is_compressed: stored_size < content.len() as u64 + 4,
                created_at: Utc::now(),
            },
        );

        trace!("Stored blob {} ({} bytes)", utils::short_id(hash), stored_size);
        Ok((hash.to_string(), stored_size))
    }

    /// Load the raw content of a blob
    pub fn get(&self, hash: &str) -> Result<Vec<u8>> {
        let object_path = self.object_path(hash)?;
        if !object_path.exists() {
            return Err(RewindError::ObjectNotFound(hash.to_string()));
        }

        let framed = fs::read(&object_path)?;
        let content = self.compression.lock().decompress(&framed)?;
        trace!("Loaded blob {} ({} bytes)", utils::short_id(hash), content.len());
        Ok(content)
    }

    /// Load a blob and check that it still hashes to its address
    pub fn get_verified(&self, hash: &str) -> Result<Vec<u8>> {
        let content = self.get(hash)?;
        let actual = utils::hash_data(&content);
        if actual != hash {
            return Err(RewindError::ChecksumMismatch {
                expected: hash.to_string(),
                actual,
            });
        }
        Ok(content)
    }

    /// Check if a blob exists
    ///
    /// Always consults the disk; a cached entry whose object is gone is evicted.
    pub fn exists(&self, hash: &str) -> bool {
        let on_disk = self.object_path(hash).map(|p| p.exists()).unwrap_or(false);
        if !on_disk && self.object_cache.remove(hash).is_some() {
            warn!("Blob {} is cached but missing on disk", utils::short_id(hash));
        }
        on_disk
    }

    /// Delete a blob; missing blobs are ignored
    pub fn delete(&self, hash: &str) -> Result<u64> {
        let object_path = self.object_path(hash)?;
        self.object_cache.remove(hash);
        if !object_path.exists() {
            return Ok(0);
        }

        let size = fs::metadata(&object_path)?.len();
        fs::remove_file(&object_path)?;
        if let Some(shard) = object_path.parent() {
            utils::remove_dir_if_empty(shard)?;
        }
        trace!("Deleted blob {}", utils::short_id(hash));
        Ok(size)
    }

    /// List the hashes of every blob on disk
    pub fn list_all(&self) -> Result<Vec<String>> {
        let mut objects = Vec::new();

        let objects_dir = self.root.join("objects");
        if !objects_dir.exists() {
            return Ok(objects);
        }

        for shard_entry in fs::read_dir(objects_dir)? {
            let shard_entry = shard_entry?;
            if !shard_entry.path().is_dir() {
                continue;
            }
            let shard_name = shard_entry.file_name().to_string_lossy().to_string();

            for object_entry in fs::read_dir(shard_entry.path())? {
                let object_entry = object_entry?;
                let name = object_entry.file_name().to_string_lossy().to_string();
                // skip temp files left by an interrupted atomic write
                if object_entry.path().is_file() && !name.starts_with('.') {
                    objects.push(format!("{}{}", shard_name, name));
                }
            }
        }

        objects.sort_unstable();
        Ok(objects)
    }

    /// Delete every blob not in `referenced`
    pub fn sweep(&self, referenced: &HashSet<String>) -> Result<GcStats> {
        let start = Instant::now();
        let mut stats = GcStats::default();

        for hash in self.list_all()? {
            stats.objects_examined += 1;
            if referenced.contains(&hash) {
                continue;
            }
            stats.bytes_reclaimed += self.delete(&hash)?;
            stats.objects_deleted += 1;
        }

        stats.duration_ms = start.elapsed().as_millis() as u64;
        if stats.objects_deleted > 0 {
            info!(
                "Swept {} unreferenced blobs ({})",
                stats.objects_deleted,
                utils::format_bytes(stats.bytes_reclaimed)
            );
            self.persist_cache()?;
        }
        Ok(stats)
    }

    /// Count and size of blobs on disk
    pub fn stats(&self) -> Result<BlobStats> {
        let objects = self.list_all()?;
        Ok(BlobStats {
            object_count: objects.len(),
            total_size: utils::dir_size(&self.root.join("objects")),
        })
    }

    /// Persist the metadata cache for faster startup
    pub fn persist_cache(&self) -> Result<()> {
        let cache_path = self.root.join("object_cache.bin");
        let entries: Vec<BlobInfo> = self.object_cache.iter().map(|e| e.value().clone()).collect();

        if entries.is_empty() {
            if cache_path.exists() {
                fs::remove_file(&cache_path).ok();
            }
            return Ok(());
        }

        let bytes = bincode::serde::encode_to_vec(&entries, bincode::config::standard())?;
        utils::atomic_write(&cache_path, &bytes)?;
        debug!("Persisted {} blob cache entries ({} bytes)", entries.len(), bytes.len());
        Ok(())
    }

    /// Cached metadata for a blob
    pub fn info(&self, hash: &str) -> Option<BlobInfo> {
        self.object_cache.get(hash).map(|e| e.value().clone())
    }

    /// Store root
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, hash: &str) -> Result<PathBuf> {
        if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(RewindError::integrity(format!("invalid blob hash '{}'", hash)));
        }
        let (prefix, suffix) = hash.split_at(2);
        Ok(self.root.join("objects").join(prefix).join(suffix))
    }
}
