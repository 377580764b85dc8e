//! Integration tests for Rewind
//!
//! Scenario tests that drive restore points, the command history and
//! checkpoints together against a real project directory.

use ::rewind::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::info;

/// Test harness owning a project directory and its engine
pub struct RewindTestHarness {
    pub project_dir: TempDir,
    pub rewind: Rewind,
    pub file_generator: FileGenerator,
}

impl RewindTestHarness {
    /// Harness with default settings
    pub fn new() -> Self {
        Self::with_builder(RewindBuilder::new())
    }

    /// Harness with a custom builder
    pub fn with_builder(builder: RewindBuilder) -> Self {
        let project_dir = TempDir::new().unwrap();
        let rewind = builder.build(project_dir.path()).unwrap();
        rewind.commands().register_executor("write_file", Arc::new(WriteFileExecutor));
        rewind.commands().register_executor("noop", Arc::new(NoopExecutor));
        Self {
            project_dir,
            rewind,
            file_generator: FileGenerator::new(42),
        }
    }

    pub fn root(&self) -> &Path {
        self.project_dir.path()
    }

    pub fn write(&self, path: &str, content: &str) {
        let full = self.root().join(path);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(full, content).unwrap();
    }

    pub fn read(&self, path: &str) -> Option<String> {
        fs::read_to_string(self.root().join(path)).ok()
    }

    /// Every captured file and its content
    pub fn snapshot_contents(&self) -> BTreeMap<String, String> {
        let mut files = BTreeMap::new();
        for entry in walkdir::WalkDir::new(self.root()) {
            let entry = entry.unwrap();
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(self.root()).unwrap();
            if relative.starts_with(".rewind") {
                continue;
            }
            let key = relative.to_string_lossy().replace('\\', "/");
            files.insert(key, fs::read_to_string(entry.path()).unwrap_or_default());
        }
        files
    }

    pub fn restore_point(&self, description: &str) -> RestorePointMetadata {
        self.rewind
            .snapshot(description, RestorePointOptions::default())
            .unwrap()
    }

    pub fn write_command(&self, path: &str, content: &str) -> Result<Value> {
        self.rewind.commands().execute_command(
            "write_file",
            json!({ "path": path, "content": content }),
            CommandContext::described(format!("write {}", path)),
        )
    }

    /// Apply `count` random mutations to the project
    pub fn mutate(&mut self, count: usize) {
        for _ in 0..count {
            let name = format!("dir{}/file{}.txt", self.file_generator.index(3), self.file_generator.index(8));
            let path = self.root().join(&name);
            if path.exists() && self.file_generator.chance(0.3) {
                fs::remove_file(&path).unwrap();
            } else {
                let content = self.file_generator.text(64);
                self.write(&name, &content);
            }
        }
    }
}

/// Writes `params.content` to `params.path`; undo puts the previous content back
pub struct WriteFileExecutor;

impl CommandExecutor for WriteFileExecutor {
    fn execute(&self, params: &Value, ctx: &ExecutionContext<'_>) -> Result<Value> {
        let path = ctx.project_root.join(params["path"].as_str().unwrap_or_default());
        let previous = fs::read_to_string(&path).ok();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, params["content"].as_str().unwrap_or_default())?;
        Ok(json!({ "previous": previous }))
    }

    fn undo(&self, params: &Value, result: Option<&Value>, ctx: &ExecutionContext<'_>) -> Result<()> {
        let path = ctx.project_root.join(params["path"].as_str().unwrap_or_default());
        match result.and_then(|r| r["previous"].as_str()) {
            Some(previous) => fs::write(&path, previous)?,
            None => fs::remove_file(&path)?,
        }
        Ok(())
    }

    fn validate(&self, params: &Value, _ctx: &ExecutionContext<'_>) -> Result<bool> {
        Ok(params["path"].is_string() && params["content"].is_string())
    }
}

/// Does nothing and cannot be undone
pub struct NoopExecutor;

impl CommandExecutor for NoopExecutor {
    fn execute(&self, _params: &Value, _ctx: &ExecutionContext<'_>) -> Result<Value> {
        Ok(Value::Null)
    }

    fn undo(&self, _params: &Value, _result: Option<&Value>, _ctx: &ExecutionContext<'_>) -> Result<()> {
        Ok(())
    }

    fn undoable(&self) -> bool {
        false
    }
}

/// Seeded generator for file names and contents
pub struct FileGenerator {
    rng: StdRng,
}

impl FileGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn index(&mut self, upper: usize) -> usize {
        self.rng.random_range(0..upper)
    }

    pub fn chance(&mut self, p: f64) -> bool {
        self.rng.random_bool(p)
    }

    pub fn text(&mut self, len: usize) -> String {
        (0..len)
            .map(|_| char::from(b'a' + self.rng.random_range(0..26u8)))
            .collect()
    }
}

#[test]
fn test_rollback_to_command_scenario() {
    let harness = RewindTestHarness::new();
    harness.write("one.txt", "1");
    harness.write("two.txt", "2");
    harness.write("three.txt", "3");
    let s0 = harness.restore_point("S0");
    assert_eq!(s0.total_files, 3);

    harness.write_command("a.txt", "x").unwrap();
    let c1 = harness.rewind.commands().history()[0].clone();
    harness.write_command("a.txt", "y").unwrap();
    assert_eq!(harness.read("a.txt").as_deref(), Some("y"));

    let result = harness.rewind.commands().rollback_to_command(&c1.id).unwrap();
    assert!(result.is_clean());
    assert_eq!(result.commands_undone.len(), 1);

    assert_eq!(harness.read("a.txt").as_deref(), Some("x"));
    let history = harness.rewind.commands().history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, c1.id);
}

#[test]
fn test_rollback_to_timestamp_removes_exactly_newer_commands() {
    let harness = RewindTestHarness::new();
    for i in 0..6 {
        harness.write_command(&format!("f{}.txt", i), "v").unwrap();
    }
    let history = harness.rewind.commands().history();
    let cutoff = history[2].timestamp;

    let result = harness.rewind.commands().rollback_to_timestamp(cutoff).unwrap();
    let expected: Vec<String> = history[3..].iter().rev().map(|c| c.id.clone()).collect();
    assert_eq!(result.commands_undone, expected);

    let remaining = harness.rewind.commands().history();
    assert_eq!(remaining, history[..3].to_vec());
    for i in 0..6 {
        assert_eq!(harness.root().join(format!("f{}.txt", i)).exists(), i < 3);
    }
}

#[test]
fn test_undo_redo_and_redo_stack_clearing() {
    let harness = RewindTestHarness::new();
    harness.write_command("notes.md", "draft").unwrap();
    let original = harness.rewind.commands().history()[0].clone();

    let undone = harness.rewind.commands().undo().unwrap();
    assert_eq!(undone.status, CommandStatus::Undone);
    assert!(harness.read("notes.md").is_none());

    let redone = harness.rewind.commands().redo().unwrap();
    assert_eq!(redone.status, original.status);
    assert_eq!(redone.result, original.result);
    assert_eq!(harness.read("notes.md").as_deref(), Some("draft"));

    harness.rewind.commands().undo().unwrap();
    assert!(harness.rewind.commands().can_redo());
    harness.write_command("other.md", "x").unwrap();
    assert!(!harness.rewind.commands().can_redo());
}

#[test]
fn test_noop_is_not_undoable() {
    let harness = RewindTestHarness::new();
    harness
        .rewind
        .commands()
        .execute_command("noop", json!({}), CommandContext::default())
        .unwrap();

    let err = harness.rewind.commands().undo().unwrap_err();
    assert!(matches!(err, RewindError::NotUndoable(_)));
    assert_eq!(harness.rewind.commands().history()[0].status, CommandStatus::Completed);
}

#[test]
fn test_delta_threshold_forces_snapshot() {
    let harness = RewindTestHarness::with_builder(RewindBuilder::new().delta_threshold(10));
    harness.write("log.txt", "0");
    let first = harness.restore_point("base");
    assert!(first.is_snapshot);

    for i in 1..=10 {
        harness.write("log.txt", &i.to_string());
        let meta = harness.restore_point(&format!("delta {}", i));
        assert!(meta.is_delta, "point {} should be a delta", i);
        assert_eq!(meta.parent_id.as_deref(), Some(first.id.as_str()));
    }

    harness.write("log.txt", "11");
    let next = harness.restore_point("after threshold");
    assert!(next.is_snapshot);
    assert_eq!(harness.rewind.restore_points().dependents_of(&first.id).unwrap().len(), 10);
}

#[test]
fn test_restoring_any_delta_matches_replay() {
    let mut harness = RewindTestHarness::with_builder(RewindBuilder::new().delta_threshold(4));
    let mut expected = Vec::new();

    for i in 0..9 {
        harness.mutate(6);
        let meta = harness.restore_point(&format!("point {}", i));
        expected.push((meta, harness.snapshot_contents()));
    }
    info!("Created {} restore points", expected.len());

    for (meta, contents) in expected.iter().rev() {
        let outcome = harness.rewind.restore_points().restore(&meta.id).unwrap();
        assert_eq!(&harness.snapshot_contents(), contents, "mismatch restoring {}", meta.id);
        if meta.is_delta {
            assert!(outcome.deltas_replayed >= 1);
        }

        let loaded = harness.rewind.restore_points().load_state(&meta.id).unwrap();
        assert_eq!(loaded.files.len(), contents.len());
    }
}

#[test]
fn test_restore_then_new_point_starts_new_chain() {
    let harness = RewindTestHarness::new();
    harness.write("a.txt", "a");
    let base = harness.restore_point("base");
    harness.write("a.txt", "b");
    harness.restore_point("delta");

    harness.rewind.restore_points().restore(&base.id).unwrap();
    harness.write("a.txt", "c");
    let after = harness.restore_point("after restore");
    assert!(after.is_snapshot);
}

#[test]
fn test_batch_with_single_restore_point() {
    let harness = RewindTestHarness::new();
    harness.write("keep.txt", "keep");
    harness.restore_point("base");
    let points_before = harness.rewind.restore_points().list_restore_points().unwrap().len();

    let err = harness
        .rewind
        .commands()
        .execute_batch(
            vec![
                BatchCommand::new("write_file", json!({"path": "a.txt", "content": "a"})),
                BatchCommand::new("write_file", json!({"path": "b.txt", "content": "b"})),
                BatchCommand::new("write_file", json!({"path": "c.txt"})),
            ],
            CommandContext::described("three writes").with_restore_point(),
        )
        .unwrap_err();

    match err {
        RewindError::BatchFailed { index, .. } => assert_eq!(index, 2),
        other => panic!("unexpected error: {other}"),
    }
    assert!(harness.read("a.txt").is_none());
    assert!(harness.read("b.txt").is_none());
    assert_eq!(
        harness.rewind.restore_points().list_restore_points().unwrap().len(),
        points_before + 1
    );
}

#[test]
fn test_checkpoint_cleanup_keeps_newest_ten() {
    let harness = RewindTestHarness::new();
    let checkpoints = harness.rewind.checkpoints();

    let mut ids = Vec::new();
    for i in 0..15 {
        let state = CheckpointState {
            current_phase: Some(format!("phase-{}", i % 3)),
            next_steps: vec![format!("step {}", i)],
            ..Default::default()
        };
        ids.push(
            checkpoints
                .create_checkpoint(CheckpointKind::Auto, state, &format!("checkpoint {}", i))
                .unwrap(),
        );
    }

    assert_eq!(checkpoints.cleanup_old_checkpoints(10).unwrap(), 5);

    let listed: Vec<String> = checkpoints.list_checkpoints().unwrap().into_iter().map(|m| m.id).collect();
    let newest: Vec<String> = ids.iter().rev().take(10).cloned().collect();
    assert_eq!(listed, newest);

    let dir = checkpoints.dir();
    for (i, id) in ids.iter().enumerate() {
        let on_disk = dir.join(format!("checkpoint-{}.json", id)).exists()
            && dir.join("metadata").join(format!("{}.json", id)).exists();
        assert_eq!(on_disk, i >= 5, "checkpoint {} on disk: {}", i, on_disk);
    }

    let latest = checkpoints.load_latest_checkpoint().unwrap().unwrap();
    assert_eq!(&latest.id, ids.last().unwrap());
}

#[test]
fn test_state_survives_reopen() {
    let project_dir = TempDir::new().unwrap();
    fs::write(project_dir.path().join("paper.md"), "abstract").unwrap();

    let (point_id, command_id) = {
        let rewind = RewindBuilder::new().delta_threshold(3).build(project_dir.path()).unwrap();
        rewind.commands().register_executor("write_file", Arc::new(WriteFileExecutor));
        let point = rewind.snapshot("before edits", RestorePointOptions::default()).unwrap();
        rewind
            .commands()
            .execute_command(
                "write_file",
                json!({"path": "paper.md", "content": "methods"}),
                CommandContext::default(),
            )
            .unwrap();
        rewind
            .checkpoints()
            .create_checkpoint(CheckpointKind::SessionEnd, CheckpointState::default(), "bye")
            .unwrap();
        (point.id, rewind.commands().history()[0].id.clone())
    };

    let rewind = Rewind::open(project_dir.path()).unwrap();
    assert_eq!(rewind.config().delta_threshold, 3);
    assert_eq!(rewind.commands().get_command(&command_id).unwrap().status, CommandStatus::Completed);
    assert_eq!(
        rewind.checkpoints().load_latest_checkpoint().unwrap().unwrap().kind,
        CheckpointKind::SessionEnd
    );

    // chain head rebuilt from metadata: next point is a delta on the old snapshot
    let next = rewind.snapshot("after reopen", RestorePointOptions::default()).unwrap();
    assert!(next.is_delta);
    assert_eq!(next.parent_id.as_deref(), Some(point_id.as_str()));

    rewind.restore_points().restore(&point_id).unwrap();
    assert_eq!(fs::read_to_string(project_dir.path().join("paper.md")).unwrap(), "abstract");
}

#[test]
fn test_phase_points_are_snapshots_and_tagged() {
    let harness = RewindTestHarness::new();
    harness.write("a.txt", "a");
    harness.restore_point("base");
    harness.write("a.txt", "b");

    let meta = harness
        .rewind
        .restore_points()
        .create_restore_point(
            RestorePointKind::AutoPhase,
            "entering analysis",
            RestorePointOptions {
                phase: Some("analysis".to_string()),
                tags: vec!["phase".to_string()],
                force_snapshot: false,
            },
        )
        .unwrap();
    assert!(meta.is_snapshot);
    assert_eq!(meta.phase.as_deref(), Some("analysis"));
    assert_eq!(meta.tags, vec!["phase".to_string()]);
}

#[test]
fn test_statistics_and_cleanup() {
    let harness = RewindTestHarness::with_builder(RewindBuilder::new().retention_days(0));
    harness.write("a.txt", "a");
    harness.restore_point("one");
    harness.write("b.txt", "b");
    harness.restore_point("two");

    let stats = harness.rewind.restore_points().get_statistics().unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.snapshots, 1);
    assert_eq!(stats.deltas, 1);
    assert!(stats.blob_count >= 2);
    assert!(stats.oldest <= stats.newest);

    // retention disabled
    let report = harness.rewind.restore_points().cleanup_expired().unwrap();
    assert!(report.deleted.is_empty());

    let report = harness
        .rewind
        .restore_points()
        .cleanup_older_than(chrono::Utc::now() + chrono::Duration::seconds(1))
        .unwrap();
    assert_eq!(report.deleted.len(), 2);
    assert!(harness.rewind.restore_points().list_restore_points().unwrap().is_empty());
    assert_eq!(harness.rewind.restore_points().get_statistics().unwrap().blob_count, 0);
}
