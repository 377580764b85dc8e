//! Property-based testing for Rewind
//!
//! Uses proptest to check the delta laws on in-memory states and the
//! restore and undo guarantees on real project directories.

use ::rewind::delta::{apply, diff, replay};
use ::rewind::*;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::info;

/// Strategy for generating file operations
#[derive(Debug, Clone)]
pub enum FileOperation {
    Create { path: PathBuf, content: Vec<u8> },
    Modify { path: PathBuf, content: Vec<u8> },
    Delete { path: PathBuf },
}

fn file_operation_strategy() -> impl Strategy<Value = FileOperation> {
    prop_oneof![
        (path_strategy(), content_strategy()).prop_map(|(path, content)| FileOperation::Create { path, content }),
        (path_strategy(), content_strategy()).prop_map(|(path, content)| FileOperation::Modify { path, content }),
        path_strategy().prop_map(|path| FileOperation::Delete { path }),
    ]
}

/// Directories never carry an extension and files always do, so a path is
/// never both.
fn path_strategy() -> impl Strategy<Value = PathBuf> {
    let dir_strategy = prop::collection::vec("d[0-9]", 0..=2);
    let filename_strategy = "[a-e]{1,3}\\.(txt|md|csv)";

    (dir_strategy, filename_strategy).prop_map(|(dirs, filename)| {
        let mut path = PathBuf::new();
        for dir in dirs {
            path = path.join(dir);
        }
        path.join(filename)
    })
}

fn content_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        "[a-zA-Z0-9 \n]{0,200}".prop_map(|s| s.into_bytes()),
        prop::collection::vec(any::<u8>(), 1..2000),
        (any::<u8>(), 1..500usize).prop_map(|(byte, count)| vec![byte; count]),
    ]
}

/// In-memory project: path to content
fn files_strategy() -> impl Strategy<Value = BTreeMap<String, Vec<u8>>> {
    prop::collection::btree_map("[a-d]/[a-f]{1,2}\\.txt", prop::collection::vec(any::<u8>(), 0..64), 0..12)
}

fn to_state(files: &BTreeMap<String, Vec<u8>>) -> ProjectState {
    ProjectState::from_files(None, files.iter().map(|(path, content)| FileState::new(path.clone(), content)))
}

fn apply_operation(root: &Path, op: &FileOperation) -> anyhow::Result<()> {
    match op {
        FileOperation::Create { path, content } => {
            let full_path = root.join(path);
            if let Some(parent) = full_path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(full_path, content)?;
        }
        FileOperation::Modify { path, content } => {
            let full_path = root.join(path);
            if full_path.exists() {
                fs::write(full_path, content)?;
            }
        }
        FileOperation::Delete { path } => {
            let full_path = root.join(path);
            if full_path.exists() {
                fs::remove_file(full_path)?;
            }
        }
    }
    Ok(())
}

/// Hash of every file outside the storage directory
fn compute_directory_hash(root: &Path) -> anyhow::Result<String> {
    use sha2::{Digest, Sha256};
    use walkdir::WalkDir;

    let mut hasher = Sha256::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != ".rewind");
    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_file() {
            let relative = entry.path().strip_prefix(root)?;
            hasher.update(relative.to_string_lossy().as_bytes());
            hasher.update(b"\0");
            hasher.update(fs::read(entry.path())?);
            hasher.update(b"\0");
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Writes raw bytes; undo restores the previous bytes or removes the file
struct WriteBytes;

impl CommandExecutor for WriteBytes {
    fn execute(&self, params: &Value, ctx: &ExecutionContext<'_>) -> Result<Value> {
        let path = ctx.project_root.join(params["path"].as_str().unwrap_or_default());
        let previous = fs::read(&path).ok().map(hex::encode);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, hex::decode(params["hex"].as_str().unwrap_or_default()).unwrap_or_default())?;
        Ok(json!({ "previous": previous }))
    }

    fn undo(&self, params: &Value, result: Option<&Value>, ctx: &ExecutionContext<'_>) -> Result<()> {
        let path = ctx.project_root.join(params["path"].as_str().unwrap_or_default());
        match result.and_then(|r| r["previous"].as_str()) {
            Some(previous) => fs::write(&path, hex::decode(previous).unwrap_or_default())?,
            None => fs::remove_file(&path)?,
        }
        Ok(())
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// apply(a, diff(a, b)) reproduces b
    #[test]
    fn diff_apply_law(a in files_strategy(), b in files_strategy()) {
        let a = to_state(&a);
        let b = to_state(&b);
        let changes = diff(&a, &b);

        let result = apply(&a, &changes);
        prop_assert_eq!(&result.files, &b.files);
        prop_assert_eq!(&result.metadata.aggregate_checksum, &b.metadata.aggregate_checksum);
        prop_assert_eq!(diff(&a, &a).len(), 0);
    }

    /// Replaying a chain of consecutive diffs equals the last state
    #[test]
    fn replay_equals_final_state(states in prop::collection::vec(files_strategy(), 1..8)) {
        let states: Vec<ProjectState> = states.iter().map(to_state).collect();
        let chain: Vec<Vec<DeltaChange>> = states.windows(2).map(|w| diff(&w[0], &w[1])).collect();

        let result = replay(&states[0], chain.iter().map(|c| c.as_slice()));
        prop_assert_eq!(&result.files, &states[states.len() - 1].files);
    }

    /// Change statistics agree with the change list
    #[test]
    fn change_stats_match_diff(a in files_strategy(), b in files_strategy()) {
        let a = to_state(&a);
        let b = to_state(&b);
        let changes = diff(&a, &b);
        let stats = ChangeStats::from_changes(&changes);

        prop_assert_eq!(stats.total_operations(), changes.len());
        prop_assert_eq!(stats.has_changes(), a.files != b.files);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Every restore point restores the exact tree it captured
    #[test]
    fn restore_points_are_independent(
        operation_sets in prop::collection::vec(
            prop::collection::vec(file_operation_strategy(), 1..15),
            2..8
        ),
        threshold in 1usize..4,
    ) {
        let temp_dir = TempDir::new().unwrap();
        let rewind = RewindBuilder::new()
            .delta_threshold(threshold)
            .compression_strategy(CompressionStrategy::Fast)
            .build(temp_dir.path())
            .unwrap();

        let mut expected = Vec::new();
        for (idx, operations) in operation_sets.iter().enumerate() {
            for op in operations {
                apply_operation(temp_dir.path(), op).unwrap();
            }
            let meta = rewind.snapshot(&format!("point {}", idx), RestorePointOptions::default()).unwrap();
            expected.push((meta.id, compute_directory_hash(temp_dir.path()).unwrap()));
        }
        info!("Checking {} restore points with threshold {}", expected.len(), threshold);

        // oldest first, so every restore has to undo later changes
        for (id, hash) in &expected {
            rewind.restore_points().restore(id).unwrap();
            prop_assert_eq!(&compute_directory_hash(temp_dir.path()).unwrap(), hash);
        }
    }

    /// Undoing every command returns the tree to where it started
    #[test]
    fn undo_all_is_identity(
        setup in prop::collection::vec(file_operation_strategy(), 0..10),
        writes in prop::collection::vec((path_strategy(), content_strategy()), 1..12),
    ) {
        let temp_dir = TempDir::new().unwrap();
        for op in &setup {
            apply_operation(temp_dir.path(), op).unwrap();
        }
        let rewind = RewindBuilder::new().build(temp_dir.path()).unwrap();
        rewind.commands().register_executor("write", Arc::new(WriteBytes));
        let before = compute_directory_hash(temp_dir.path()).unwrap();

        for (path, content) in &writes {
            rewind.commands().execute_command(
                "write",
                json!({"path": path.to_string_lossy(), "hex": hex::encode(content)}),
                CommandContext::default(),
            ).unwrap();
        }
        let after = compute_directory_hash(temp_dir.path()).unwrap();

        while rewind.commands().can_undo() {
            rewind.commands().undo().unwrap();
        }
        // undo removes files but leaves the directories it created
        prop_assert_eq!(compute_directory_hash(temp_dir.path()).unwrap(), before);

        while rewind.commands().can_redo() {
            rewind.commands().redo().unwrap();
        }
        prop_assert_eq!(compute_directory_hash(temp_dir.path()).unwrap(), after);
    }
}
