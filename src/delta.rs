//! File-level deltas between project states
//!
//! Deltas are whole-file: a changed file is recorded by the hash of its new
//! content, never as a byte-level patch. For any two states `a` and `b`:
//!
//! ```rust
//! use rewind::delta::{apply, diff};
//! use rewind::types::{FileState, ProjectState};
//!
//! let a = ProjectState::from_files(None, vec![FileState::new("x.txt", b"1"), FileState::new("y.txt", b"2")]);
//! let b = ProjectState::from_files(None, vec![FileState::new("x.txt", b"1!"), FileState::new("z.txt", b"3")]);
//!
//! let changes = diff(&a, &b);
//! assert_eq!(apply(&a, &changes).files, b.files);
//! ```

use crate::types::{ChangeStats, DeltaChange, FileState, ProjectState};
use tracing::{debug, trace};

/// Compute the changes that turn `old` into `new`
///
/// Additions and modifications come first in path order, followed by
/// deletions in path order. Files are compared by content hash.
pub fn diff(old: &ProjectState, new: &ProjectState) -> Vec<DeltaChange> {
    let mut changes = Vec::new();

    for (path, current) in &new.files {
        match old.files.get(path) {
            Some(previous) if previous.hash == current.hash => {}
            Some(previous) => changes.push(DeltaChange::Modified {
                path: path.clone(),
                hash: current.hash.clone(),
                previous_hash: previous.hash.clone(),
                size: current.size,
                modified_at: current.modified_at,
            }),
            None => changes.push(DeltaChange::Added {
                path: path.clone(),
                hash: current.hash.clone(),
                size: current.size,
                modified_at: current.modified_at,
            }),
        }
    }

    for path in old.files.keys() {
        if !new.files.contains_key(path) {
            changes.push(DeltaChange::Deleted { path: path.clone() });
        }
    }

    trace!("Diff produced {} changes", changes.len());
    changes
}

/// Apply `changes` to a copy of `base`
///
/// Added and modified entries upsert, deleted entries remove; when a path
/// appears more than once the last change wins. Metadata is recomputed.
pub fn apply(base: &ProjectState, changes: &[DeltaChange]) -> ProjectState {
    let mut state = base.clone();
    apply_in_place(&mut state, changes);
    state
}

fn apply_in_place(state: &mut ProjectState, changes: &[DeltaChange]) {
    for change in changes {
        match change {
            DeltaChange::Added { path, hash, size, modified_at }
            | DeltaChange::Modified { path, hash, size, modified_at, .. } => {
                state.files.insert(
                    path.clone(),
                    FileState {
                        path: path.clone(),
                        hash: hash.clone(),
                        size: *size,
                        modified_at: *modified_at,
                    },
                );
            }
            DeltaChange::Deleted { path } => {
                state.files.remove(path);
            }
        }
    }
    state.recompute_metadata();
}

/// Fold an ordered chain of change lists onto `base`
pub fn replay<'a>(base: &ProjectState, chain: impl IntoIterator<Item = &'a [DeltaChange]>) -> ProjectState {
    let mut state = base.clone();
    let mut applied = 0usize;
    for changes in chain {
        apply_in_place(&mut state, changes);
        applied += 1;
    }
    debug!("Replayed {} deltas onto base with {} files", applied, base.files.len());
    state
}

/// Summarize the difference between two states without keeping the change list
pub fn change_stats(old: &ProjectState, new: &ProjectState) -> ChangeStats {
    ChangeStats::from_changes(&diff(old, new))
}
