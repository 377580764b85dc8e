//! Main test module for Rewind
//!
//! This module includes all test suites:
//! - Integration tests for complex scenarios
//! - Chaos tests for resilience against damaged storage
//! - Property-based tests for invariants
//! - Edge cases and stress tests

pub mod integration;
pub mod chaos;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use ::rewind::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let rewind = RewindBuilder::new().build(temp_dir.path()).unwrap();

        let point = rewind.snapshot("Empty", RestorePointOptions::default()).unwrap();
        assert_eq!(point.total_files, 0);

        fs::write(temp_dir.path().join("file.txt"), "content").unwrap();

        // Restore should remove the file
        let outcome = rewind.restore_points().restore(&point.id).unwrap();
        assert_eq!(outcome.write.files_deleted, 1);
        assert!(!temp_dir.path().join("file.txt").exists());
        assert!(temp_dir.path().join(".rewind").exists());
    }

    #[test]
    fn test_special_filenames() {
        let temp_dir = TempDir::new().unwrap();
        let rewind = RewindBuilder::new().build(temp_dir.path()).unwrap();

        let special_names = vec![
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file.with.dots.txt",
            "file@with#special$chars.txt",
            "file(with)parens.txt",
            "file[with]brackets.txt",
        ];

        let mut written = Vec::new();
        for name in &special_names {
            // Skip names the OS rejects
            if fs::write(temp_dir.path().join(name), format!("Content of {}", name)).is_ok() {
                written.push(*name);
            }
        }

        let point = rewind.snapshot("Special names", RestorePointOptions::default()).unwrap();
        assert_eq!(point.total_files, written.len());

        for name in &written {
            fs::remove_file(temp_dir.path().join(name)).unwrap();
        }

        rewind.restore_points().restore(&point.id).unwrap();
        for name in &written {
            let content = fs::read_to_string(temp_dir.path().join(name)).unwrap();
            assert_eq!(content, format!("Content of {}", name));
        }
    }

    #[test]
    fn test_unicode_filenames() {
        let temp_dir = TempDir::new().unwrap();
        let rewind = RewindBuilder::new().build(temp_dir.path()).unwrap();

        let names = ["résumé.md", "日本語.txt", "данные/таблица.csv", "emoji_🚀.txt"];
        let mut written = Vec::new();
        for name in names {
            let path = temp_dir.path().join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            if fs::write(&path, name.as_bytes()).is_ok() {
                written.push(name);
            }
        }

        let base = rewind.snapshot("Unicode", RestorePointOptions::default()).unwrap();
        for name in &written {
            fs::write(temp_dir.path().join(name), "changed").unwrap();
        }
        let changed = rewind.snapshot("Changed", RestorePointOptions::default()).unwrap();
        assert!(changed.is_delta);
        assert_eq!(changed.files_changed, Some(written.len()));

        rewind.restore_points().restore(&base.id).unwrap();
        for name in &written {
            assert_eq!(fs::read(temp_dir.path().join(name)).unwrap(), name.as_bytes());
        }
    }

    #[test]
    fn test_nested_directories_pruned_on_restore() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("top.txt"), "top").unwrap();
        let rewind = RewindBuilder::new().build(temp_dir.path()).unwrap();
        let point = rewind.snapshot("flat", RestorePointOptions::default()).unwrap();

        let deep = temp_dir.path().join("a/b/c/d");
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("leaf.txt"), "leaf").unwrap();
        fs::write(temp_dir.path().join("a/side.txt"), "side").unwrap();

        let outcome = rewind.restore_points().restore(&point.id).unwrap();
        assert_eq!(outcome.write.files_deleted, 2);
        assert!(!temp_dir.path().join("a").exists());
        assert_eq!(fs::read_to_string(temp_dir.path().join("top.txt")).unwrap(), "top");
    }

    #[test]
    fn test_excluded_directories_survive_restore() {
        let temp_dir = TempDir::new().unwrap();
        let rewind = RewindBuilder::new().build(temp_dir.path()).unwrap();
        let point = rewind.snapshot("clean", RestorePointOptions::default()).unwrap();

        fs::create_dir_all(temp_dir.path().join("node_modules/pkg")).unwrap();
        fs::write(temp_dir.path().join("node_modules/pkg/index.js"), "x").unwrap();
        fs::create_dir_all(temp_dir.path().join(".git")).unwrap();
        fs::write(temp_dir.path().join(".git/HEAD"), "ref").unwrap();

        rewind.restore_points().restore(&point.id).unwrap();
        assert!(temp_dir.path().join("node_modules/pkg/index.js").exists());
        assert!(temp_dir.path().join(".git/HEAD").exists());
    }

    #[test]
    fn test_unknown_ids() {
        let temp_dir = TempDir::new().unwrap();
        let rewind = RewindBuilder::new().build(temp_dir.path()).unwrap();

        assert!(rewind.restore_points().restore("does-not-exist").unwrap_err().is_not_found());
        assert!(rewind.restore_points().get_restore_point("../escape").unwrap_err().is_not_found());
        assert!(rewind.checkpoints().load_checkpoint("missing").unwrap_err().is_not_found());
        assert!(rewind.commands().get_command("missing").unwrap_err().is_not_found());
        assert!(matches!(rewind.commands().undo(), Err(RewindError::NothingToUndo)));
        assert!(matches!(rewind.commands().redo(), Err(RewindError::NothingToRedo)));
        assert!(rewind.checkpoints().load_latest_checkpoint().unwrap().is_none());
    }
}

#[cfg(test)]
mod stress_tests {
    use ::rewind::*;
    use serde_json::{json, Value};
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Appends a line to its target file
    struct AppendLine;

    impl CommandExecutor for AppendLine {
        fn execute(&self, params: &Value, ctx: &ExecutionContext<'_>) -> Result<Value> {
            let path = ctx.project_root.join(params["path"].as_str().unwrap_or_default());
            let mut content = fs::read_to_string(&path).unwrap_or_default();
            let previous_len = content.len();
            content.push_str(params["line"].as_str().unwrap_or_default());
            content.push('\n');
            fs::write(&path, content)?;
            Ok(json!({ "previous_len": previous_len }))
        }

        fn undo(&self, params: &Value, result: Option<&Value>, ctx: &ExecutionContext<'_>) -> Result<()> {
            let path = ctx.project_root.join(params["path"].as_str().unwrap_or_default());
            let previous_len = result.and_then(|r| r["previous_len"].as_u64()).unwrap_or(0) as usize;
            let mut content = fs::read_to_string(&path)?;
            content.truncate(previous_len);
            fs::write(&path, content)?;
            Ok(())
        }
    }

    #[test]
    fn test_multithreaded_stress() {
        let temp_dir = TempDir::new().unwrap();
        let rewind = Arc::new(
            RewindBuilder::new()
                .delta_threshold(5)
                .max_history_size(500)
                .build(temp_dir.path())
                .unwrap(),
        );
        rewind.commands().register_executor("append", Arc::new(AppendLine));

        let num_threads = 4;
        let operations_per_thread = 10;
        let executed = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..num_threads)
            .map(|thread_id| {
                let rewind = Arc::clone(&rewind);
                let executed = Arc::clone(&executed);

                thread::spawn(move || {
                    for op in 0..operations_per_thread {
                        match thread_id % 3 {
                            0 | 1 => {
                                rewind
                                    .commands()
                                    .execute_command(
                                        "append",
                                        json!({"path": format!("log_{}.txt", thread_id), "line": format!("op {}", op)}),
                                        CommandContext::described(format!("thread {} op {}", thread_id, op)),
                                    )
                                    .unwrap();
                                executed.fetch_add(1, Ordering::SeqCst);
                            }
                            _ => {
                                rewind
                                    .snapshot(&format!("thread {} point {}", thread_id, op), RestorePointOptions::default())
                                    .unwrap();
                                rewind
                                    .checkpoints()
                                    .create_checkpoint(CheckpointKind::Auto, CheckpointState::default(), "stress")
                                    .unwrap();
                            }
                        }
                        thread::sleep(Duration::from_micros(10));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let history = rewind.commands().history();
        assert_eq!(history.len(), executed.load(Ordering::SeqCst));
        assert!(history.windows(2).all(|w| w[0].timestamp < w[1].timestamp));

        for thread_id in [0, 1, 3] {
            let log = fs::read_to_string(temp_dir.path().join(format!("log_{}.txt", thread_id))).unwrap();
            assert_eq!(log.lines().count(), operations_per_thread);
        }

        for meta in rewind.restore_points().list_restore_points().unwrap() {
            let report = rewind.restore_points().verify_restore_point(&meta.id).unwrap();
            assert!(report.is_valid(), "{:?}", report.errors);
        }

        let checkpoints = rewind.checkpoints().list_checkpoints().unwrap();
        assert_eq!(checkpoints.len(), operations_per_thread);
        assert!(checkpoints.windows(2).all(|w| w[0].created_at > w[1].created_at));

        // unwind everything
        let result = rewind.commands().rollback_to_timestamp(chrono::DateTime::<chrono::Utc>::MIN_UTC).unwrap();
        assert!(result.is_clean());
        for thread_id in [0, 1, 3] {
            let log = fs::read_to_string(temp_dir.path().join(format!("log_{}.txt", thread_id))).unwrap();
            assert!(log.is_empty());
        }
    }
}

// Re-export test utilities for use in integration tests
pub use integration::{FileGenerator, RewindTestHarness};
