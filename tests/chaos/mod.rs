//! Chaos testing for Rewind
//!
//! Damages the storage directory in the ways a crash, a full disk or a
//! careless user would, and checks that Rewind reports the damage instead of
//! restoring garbage.

use ::rewind::compression::{gzip_compress, gzip_decompress};
use ::rewind::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Project plus engine with a few restore points already taken
pub struct RewindChaosTest {
    pub project_dir: TempDir,
    pub rewind: Rewind,
    pub chaos_engine: ChaosEngine,
}

impl RewindChaosTest {
    pub fn new() -> Self {
        let project_dir = TempDir::new().unwrap();
        let rewind = RewindBuilder::new()
            .compression_strategy(CompressionStrategy::Fast)
            .build(project_dir.path())
            .unwrap();
        Self {
            project_dir,
            rewind,
            chaos_engine: ChaosEngine::new(42),
        }
    }

    pub fn root(&self) -> &Path {
        self.project_dir.path()
    }

    /// Take `count` restore points, each after changing one file
    pub fn create_test_points(&self, count: usize) -> Vec<RestorePointMetadata> {
        (0..count)
            .map(|i| {
                fs::write(self.root().join(format!("file_{}.txt", i % 3)), format!("revision {}", i)).unwrap();
                self.rewind
                    .snapshot(&format!("point {}", i), RestorePointOptions::default())
                    .unwrap()
            })
            .collect()
    }

    pub fn payload_path(&self, meta: &RestorePointMetadata) -> PathBuf {
        let dir = if meta.is_snapshot { "snapshots" } else { "deltas" };
        self.rewind
            .storage_path()
            .join("restore-points")
            .join(dir)
            .join(format!("{}.json.gz", meta.id))
    }

    pub fn metadata_path(&self, id: &str) -> PathBuf {
        self.rewind
            .storage_path()
            .join("restore-points")
            .join("metadata")
            .join(format!("{}.json", id))
    }

    pub fn object_files(&self) -> Vec<PathBuf> {
        WalkDir::new(self.rewind.storage_path().join("objects"))
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .collect()
    }

    pub fn object_path(&self, hash: &str) -> PathBuf {
        self.rewind.storage_path().join("objects").join(&hash[..2]).join(&hash[2..])
    }
}

/// Seeded source of damage
pub struct ChaosEngine {
    rng: StdRng,
}

impl ChaosEngine {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Flip a handful of bytes past `skip`
    pub fn corrupt_file(&mut self, path: &Path, skip: usize) -> anyhow::Result<()> {
        let mut data = fs::read(path)?;
        if data.len() <= skip {
            anyhow::bail!("{} is too small to corrupt", path.display());
        }
        for _ in 0..4 {
            let idx = self.rng.random_range(skip..data.len());
            data[idx] ^= 0xFF;
        }
        fs::write(path, data)?;
        Ok(())
    }

    /// Cut the file to a random shorter length
    pub fn truncate_file(&mut self, path: &Path) -> anyhow::Result<()> {
        let data = fs::read(path)?;
        let len = self.rng.random_range(0..data.len().max(1));
        fs::write(path, &data[..len])?;
        Ok(())
    }
}

#[test]
fn test_tampered_payload_is_detected() {
    let chaos = RewindChaosTest::new();
    let points = chaos.create_test_points(1);
    let point = &points[0];

    // still valid gzip and valid JSON, but not what was written
    let path = chaos.payload_path(point);
    let mut json = gzip_decompress(&fs::read(&path).unwrap()).unwrap();
    json.push(b' ');
    fs::write(&path, gzip_compress(&json).unwrap()).unwrap();

    let report = chaos.rewind.restore_points().verify_restore_point(&point.id).unwrap();
    assert!(!report.checksum_valid);
    assert!(!report.is_valid());

    fs::write(chaos.root().join("file_0.txt"), "edited after").unwrap();
    let err = chaos.rewind.restore_points().restore(&point.id).unwrap_err();
    assert!(err.is_integrity(), "unexpected error: {err}");
    assert_eq!(fs::read_to_string(chaos.root().join("file_0.txt")).unwrap(), "edited after");
}

#[test]
fn test_missing_blob_leaves_project_untouched() {
    let chaos = RewindChaosTest::new();
    fs::write(chaos.root().join("keep.txt"), "keep").unwrap();
    let points = chaos.create_test_points(1);
    let point = &points[0];

    let state = chaos.rewind.restore_points().load_state(&point.id).unwrap();
    let lost = state.file("file_0.txt").unwrap().hash.clone();
    fs::remove_file(chaos.object_path(&lost)).unwrap();

    fs::write(chaos.root().join("keep.txt"), "changed").unwrap();
    fs::write(chaos.root().join("file_0.txt"), "changed").unwrap();
    fs::write(chaos.root().join("new.txt"), "new").unwrap();

    let err = chaos.rewind.restore_points().restore(&point.id).unwrap_err();
    assert!(err.is_integrity(), "unexpected error: {err}");

    // nothing written, nothing pruned
    assert_eq!(fs::read_to_string(chaos.root().join("keep.txt")).unwrap(), "changed");
    assert_eq!(fs::read_to_string(chaos.root().join("file_0.txt")).unwrap(), "changed");
    assert!(chaos.root().join("new.txt").exists());

    let report = chaos.rewind.restore_points().verify_restore_point(&point.id).unwrap();
    assert_eq!(report.missing_blobs, vec!["file_0.txt".to_string()]);
}

#[test]
fn test_corrupted_blobs_fail_verification() {
    let mut chaos = RewindChaosTest::new();
    let points = chaos.create_test_points(3);

    let objects = chaos.object_files();
    assert!(!objects.is_empty());
    for object in &objects {
        // skip the 4-byte frame header
        if let Err(e) = chaos.chaos_engine.corrupt_file(object, 4) {
            warn!("Could not corrupt {:?}: {}", object, e);
        }
    }

    for meta in &points {
        let report = chaos.rewind.restore_points().verify_restore_point(&meta.id).unwrap();
        assert!(!report.is_valid(), "corruption in {} went unnoticed", meta.id);

        // files already matching are skipped, so make every file differ
        for i in 0..3 {
            fs::write(chaos.root().join(format!("file_{}.txt", i)), "scribbled").unwrap();
        }
        assert!(chaos.rewind.restore_points().restore(&meta.id).is_err());
    }
}

#[test]
fn test_missing_parent_snapshot() {
    let chaos = RewindChaosTest::new();
    let points = chaos.create_test_points(3);
    let snapshot = &points[0];
    let delta = &points[2];
    assert!(delta.is_delta);

    fs::remove_file(chaos.metadata_path(&snapshot.id)).unwrap();

    let err = chaos.rewind.restore_points().restore(&delta.id).unwrap_err();
    assert!(err.is_integrity(), "unexpected error: {err}");

    let report = chaos.rewind.restore_points().verify_restore_point(&delta.id).unwrap();
    assert_eq!(report.parent_present, Some(false));
    assert!(!report.is_valid());
}

#[test]
fn test_truncated_payloads_never_panic() {
    let mut chaos = RewindChaosTest::new();
    let points = chaos.create_test_points(6);

    for meta in points.iter().skip(1).step_by(2) {
        chaos.chaos_engine.truncate_file(&chaos.payload_path(meta)).unwrap();
    }

    let mut failures = 0;
    for meta in &points {
        match chaos.rewind.restore_points().restore(&meta.id) {
            Ok(_) => {}
            Err(e) => {
                info!("Restore of {} failed as expected: {}", meta.short_id(), e);
                failures += 1;
            }
        }
    }
    assert!(failures >= 3);
}

#[test]
fn test_corrupt_blob_cache_is_discarded() {
    let project_dir = TempDir::new().unwrap();
    fs::write(project_dir.path().join("a.txt"), "a").unwrap();
    let point_id = {
        let rewind = RewindBuilder::new().build(project_dir.path()).unwrap();
        rewind.snapshot("base", RestorePointOptions::default()).unwrap().id
    };

    let cache = project_dir.path().join(".rewind").join("object_cache.bin");
    fs::write(&cache, b"\xff\xfe not bincode at all").unwrap();

    let rewind = Rewind::open(project_dir.path()).unwrap();
    fs::write(project_dir.path().join("a.txt"), "b").unwrap();
    rewind.restore_points().restore(&point_id).unwrap();
    assert_eq!(fs::read_to_string(project_dir.path().join("a.txt")).unwrap(), "a");
}

#[test]
fn test_corrupt_history_fails_to_open() {
    let project_dir = TempDir::new().unwrap();
    drop(RewindBuilder::new().build(project_dir.path()).unwrap());

    let history = project_dir.path().join(".rewind").join("commands").join("history.json");
    fs::create_dir_all(history.parent().unwrap()).unwrap();
    fs::write(&history, "{ truncated").unwrap();

    let err = Rewind::open(project_dir.path()).unwrap_err();
    assert!(matches!(err, RewindError::Json(_)), "unexpected error: {err}");
}

#[test]
fn test_missing_latest_checkpoint_falls_back() {
    let chaos = RewindChaosTest::new();
    let checkpoints = chaos.rewind.checkpoints();

    let mut last = String::new();
    for i in 0..3 {
        last = checkpoints
            .create_checkpoint(CheckpointKind::Manual, CheckpointState::default(), &format!("c{}", i))
            .unwrap();
    }

    fs::remove_file(checkpoints.dir().join("latest.json")).unwrap();
    assert_eq!(checkpoints.load_latest_checkpoint().unwrap().unwrap().id, last);

    fs::write(checkpoints.dir().join("latest.json"), "not json").unwrap();
    assert_eq!(checkpoints.load_latest_checkpoint().unwrap().unwrap().id, last);
}

#[test]
fn test_missing_config_is_reported() {
    let project_dir = TempDir::new().unwrap();
    let err = Rewind::open(project_dir.path()).unwrap_err();
    assert!(matches!(err, RewindError::InvalidConfiguration(_)));
}

#[test]
fn test_deleted_object_is_rewritten_by_next_snapshot() {
    let chaos = RewindChaosTest::new();
    fs::write(chaos.root().join("a.txt"), "A").unwrap();
    let first = chaos.rewind.snapshot("base", RestorePointOptions::default()).unwrap();

    let state = chaos.rewind.restore_points().load_state(&first.id).unwrap();
    let hash = state.file("a.txt").unwrap().hash.clone();
    fs::remove_file(chaos.object_path(&hash)).unwrap();

    // same content, so the blob cache still believes the object is stored
    let options = RestorePointOptions {
        force_snapshot: true,
        ..Default::default()
    };
    let second = chaos.rewind.snapshot("again", options).unwrap();
    assert!(chaos.object_path(&hash).exists());

    let report = chaos.rewind.restore_points().verify_restore_point(&second.id).unwrap();
    assert!(report.is_valid(), "unexpected report: {report:?}");

    fs::write(chaos.root().join("a.txt"), "B").unwrap();
    chaos.rewind.restore_points().restore(&second.id).unwrap();
    assert_eq!(fs::read_to_string(chaos.root().join("a.txt")).unwrap(), "A");
}
