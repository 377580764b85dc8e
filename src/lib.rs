//! # Rewind - restore points, undo history and resumable checkpoints
//!
//! A local state-versioning engine for long-running, multi-step workflows.
//! It lets an orchestrator pause, inspect, roll back and resume its work
//! without a full version-control system.
//!
//! ## Overview
//!
//! Rewind keeps three kinds of history for a project directory:
//!
//! - **Restore points**: file-level captures of the project tree, stored as
//!   full snapshots or as deltas against the previous point
//! - **Commands**: a log of every unit of work with undo, redo, rollback and
//!   all-or-nothing batches
//! - **Checkpoints**: task-level state (phase, todos, decisions, approvals)
//!   with a generated resume prompt and a timer-driven autosave
//!
//! ## Architecture
//!
//! - **Content-Addressable Storage**: file contents live once in a sharded
//!   blob store keyed by SHA-256, so unchanged files cost nothing per point
//! - **Delta Chains**: a snapshot is followed by up to `delta_threshold`
//!   deltas; restoring a delta replays its chain on top of the snapshot
//! - **Compression**: blobs are LZ4-framed, restore point payloads gzipped
//! - **Single Writer**: command execution and autosave share one
//!   [`WriterLock`], so checkpoints never observe a half-applied command
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rewind::{CheckpointKind, CheckpointState, RestorePointOptions, RewindBuilder};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let rewind = RewindBuilder::new()
//!     .delta_threshold(10)
//!     .retention_days(30)
//!     .build("./my_project")?;
//!
//! // File-level restore point
//! let point = rewind.snapshot("before screening", RestorePointOptions::default())?;
//!
//! // ... work happens ...
//!
//! // Task-level checkpoint
//! let state = CheckpointState {
//!     current_phase: Some("screening".to_string()),
//!     ..Default::default()
//! };
//! rewind.checkpoints().create_checkpoint(CheckpointKind::PhaseBoundary, state, "screening started")?;
//!
//! // Put the files back
//! rewind.restore_points().restore(&point.id)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Storage Layout
//!
//! ```text
//! <project>/.rewind/
//! ├── config.json
//! ├── objects/<2-hex>/<62-hex>
//! ├── object_cache.bin
//! ├── restore-points/{snapshots,deltas,metadata}/
//! ├── commands/history.json
//! └── checkpoints/
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`Result<T>`](error::Result) with a [`RewindError`]
//! describing what went wrong. Failed lookups, rejected commands and damaged
//! stores are distinct variants; see [`RewindError::is_not_found`] and
//! [`RewindError::is_integrity`].
//!
//! ## Module Organization
//!
//! - [`rewind`]: the [`Rewind`] entry point and its builder
//! - [`restore_point`]: snapshot and delta restore points
//! - [`command`]: executors, undo, redo and rollback
//! - [`checkpoint`]: task-level checkpoints and autosave
//! - [`content_store`] and [`blob_store`]: capturing and storing file trees
//! - [`delta`]: diffing and replaying project states
//! - [`compression`]: blob and payload codecs
//! - [`types`]: shared data structures
//! - [`error`]: error types

// Public API modules
pub mod blob_store;
pub mod checkpoint;
pub mod command;
pub mod compression;
pub mod content_store;
pub mod delta;
pub mod error;
pub mod restore_point;
pub mod rewind;
pub mod types;
pub mod utils;

// Internal modules
mod collections;

// Re-export main types for convenience
pub use checkpoint::{
    CheckpointKind, CheckpointMetadata, CheckpointRecord, CheckpointState, CheckpointSystem, Decision,
    PendingApproval, PhaseProgress, PhaseStatus, ProjectInfo, TodoItem, TodoStatus,
};
pub use command::{
    BatchCommand, Command, CommandContext, CommandExecutor, CommandManager, CommandStatus, ExecutionContext,
    RollbackResult,
};
pub use compression::{CompressionEngine, CompressionStrategy};
pub use error::{Result, RewindError};
pub use restore_point::{CleanupReport, RestorePointManager};
pub use rewind::{Rewind, RewindBuilder};
pub use types::*;
