//! Reversible command history
//!
//! Every unit of work the orchestrator performs goes through the
//! [`CommandManager`] as a [`Command`]: a kind, JSON parameters and, once it
//! ran, a JSON result. The work itself is done by a [`CommandExecutor`]
//! registered for the kind, which also knows how to undo it.
//!
//! ## Lifecycle
//!
//! ```text
//! pending -> executing -> completed -> undone
//!                      \-> failed
//! ```
//!
//! A completed command is undone at most once. Redo re-executes the command
//! and appends a *new* completed record with a fresh id.
//!
//! ## Persistence
//!
//! History and redo stack are written to `commands/history.json` after every
//! mutation and reloaded on open. History is bounded; the oldest entries are
//! dropped first.
//!
//! ## Example
//!
//! ```rust
//! use rewind::command::{CommandContext, CommandExecutor, CommandManager, ExecutionContext};
//! use rewind::types::WriterLock;
//! use rewind::Result;
//! use serde_json::{json, Value};
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! impl CommandExecutor for Echo {
//!     fn execute(&self, params: &Value, _ctx: &ExecutionContext<'_>) -> Result<Value> {
//!         Ok(params.clone())
//!     }
//!
//!     fn undo(&self, _params: &Value, _result: Option<&Value>, _ctx: &ExecutionContext<'_>) -> Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! # fn main() -> Result<()> {
//! let dir = tempfile::tempdir()?;
//! let manager = CommandManager::open(dir.path(), dir.path(), None, WriterLock::new(), 1000)?;
//! manager.register_executor("echo", Arc::new(Echo));
//!
//! let result = manager.execute_command("echo", json!({"n": 1}), CommandContext::default())?;
//! assert_eq!(result, json!({"n": 1}));
//! assert!(manager.can_undo());
//! # Ok(())
//! # }
//! ```

use crate::collections::{HashMap, HashMapExt};
use crate::error::{Result, RewindError};
use crate::restore_point::RestorePointManager;
use crate::types::{RestorePointKind, RestorePointOptions, WriterLock};
use crate::utils;
use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Default number of commands kept in history
pub const DEFAULT_MAX_HISTORY_SIZE: usize = 1000;

const HISTORY_VERSION: u32 = 1;

/// Where a command is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    /// Created, not started
    Pending,
    /// Executor running
    Executing,
    /// Executor succeeded
    Completed,
    /// Executor or validation failed
    Failed,
    /// Completed and later undone
    Undone,
}

impl CommandStatus {
    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Pending => "pending",
            CommandStatus::Executing => "executing",
            CommandStatus::Completed => "completed",
            CommandStatus::Failed => "failed",
            CommandStatus::Undone => "undone",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow context recorded with a command
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommandMetadata {
    /// Workflow phase
    pub phase: Option<String>,
    /// Free-form tags
    pub tags: Vec<String>,
    /// Orchestrator session
    pub session_id: Option<String>,
    /// Batch this command ran in
    pub batch_id: Option<String>,
}

/// One recorded unit of work
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Command {
    /// Unique id
    pub id: String,
    /// Executor kind
    pub kind: String,
    /// Execution start time
    pub timestamp: DateTime<Utc>,
    /// Human readable description
    pub description: String,
    /// Executor parameters
    pub params: Value,
    /// Executor result once completed
    pub result: Option<Value>,
    /// Error message once failed
    pub error: Option<String>,
    /// Lifecycle status
    pub status: CommandStatus,
    /// Whether the executor supports undo
    pub undoable: bool,
    /// Pre-operation restore point, if one was taken
    pub restore_point_id: Option<String>,
    /// Execution time in milliseconds
    pub duration_ms: Option<u64>,
    /// Workflow context
    pub metadata: CommandMetadata,
}

impl Command {
    /// First 8 characters of the id
    pub fn short_id(&self) -> &str {
        utils::short_id(&self.id)
    }
}

/// Caller-supplied options for executing a command
#[derive(Debug, Clone, Default)]
pub struct CommandContext {
    /// Description stored with the command (defaults to the kind)
    pub description: Option<String>,
    /// Take a pre-operation restore point before executing
    pub create_restore_point: bool,
    /// Workflow phase
    pub phase: Option<String>,
    /// Tags stored with the command
    pub tags: Vec<String>,
    /// Orchestrator session
    pub session_id: Option<String>,
}

impl CommandContext {
    /// Context with a description
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Default::default()
        }
    }

    /// Request a pre-operation restore point
    pub fn with_restore_point(mut self) -> Self {
        self.create_restore_point = true;
        self
    }

    /// Set the workflow phase
    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }
}

/// What an executor sees while running
#[derive(Debug, Clone, Copy)]
pub struct ExecutionContext<'a> {
    /// Id of the command record
    pub command_id: &'a str,
    /// Project directory
    pub project_root: &'a Path,
    /// Workflow phase
    pub phase: Option<&'a str>,
    /// Orchestrator session
    pub session_id: Option<&'a str>,
}

/// Performs and reverts one kind of command
pub trait CommandExecutor: Send + Sync {
    /// Do the work and return a result to store with the command
    fn execute(&self, params: &Value, ctx: &ExecutionContext<'_>) -> Result<Value>;

    /// Revert a completed execution
    fn undo(&self, params: &Value, result: Option<&Value>, ctx: &ExecutionContext<'_>) -> Result<()>;

    /// Reject parameters before anything runs
    fn validate(&self, _params: &Value, _ctx: &ExecutionContext<'_>) -> Result<bool> {
        Ok(true)
    }

    /// Clean up after a failed execution
    fn compensate(&self, _params: &Value, _error: &RewindError, _ctx: &ExecutionContext<'_>) -> Result<()> {
        Ok(())
    }

    /// Whether completed executions can be undone
    fn undoable(&self) -> bool {
        true
    }
}

/// One entry of [`CommandManager::execute_batch`]
#[derive(Debug, Clone)]
pub struct BatchCommand {
    /// Executor kind
    pub kind: String,
    /// Executor parameters
    pub params: Value,
    /// Description (defaults to the kind)
    pub description: Option<String>,
}

impl BatchCommand {
    /// Create a batch entry
    pub fn new(kind: impl Into<String>, params: Value) -> Self {
        Self {
            kind: kind.into(),
            params,
            description: None,
        }
    }
}

/// Outcome of a rollback
#[derive(Debug, Clone, Default)]
pub struct RollbackResult {
    /// Ids of commands removed from history, newest first
    pub commands_undone: Vec<String>,
    /// Undo failures; the rollback continues past them
    pub errors: Vec<String>,
    /// Restore point the files were restored from, if any
    pub restore_point_id: Option<String>,
}

impl RollbackResult {
    /// Whether every undo succeeded
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Counts over the history
#[derive(Debug, Clone, Default, Serialize)]
pub struct CommandStats {
    /// Commands in history
    pub total: usize,
    /// Commands per status
    pub by_status: BTreeMap<String, usize>,
    /// Commands per kind
    pub by_kind: BTreeMap<String, usize>,
    /// Entries on the redo stack
    pub redo_depth: usize,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryFile {
    version: u32,
    saved_at: DateTime<Utc>,
    history: Vec<Command>,
    redo_stack: Vec<Command>,
}

#[derive(Debug, Default)]
struct HistoryState {
    history: Vec<Command>,
    redo_stack: Vec<Command>,
}

/// Executes commands and maintains their undo/redo history
pub struct CommandManager {
    history_path: PathBuf,
    project_root: PathBuf,
    executors: RwLock<HashMap<String, Arc<dyn CommandExecutor>>>,
    state: Mutex<HistoryState>,
    restore_points: Option<Arc<RestorePointManager>>,
    writer: WriterLock,
    max_history_size: usize,
}

impl fmt::Debug for CommandManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandManager")
            .field("history_path", &self.history_path)
            .field("executors", &self.executors.read().len())
            .field("history_len", &self.state.lock().history.len())
            .finish()
    }
}

impl CommandManager {
    /// Open the command history under `storage_root`
    ///
    /// Without a restore point manager, `create_restore_point` requests and
    /// [`CommandManager::rollback_to_restore_point`] are unavailable.
    pub fn open(
        storage_root: &Path,
        project_root: &Path,
        restore_points: Option<Arc<RestorePointManager>>,
        writer: WriterLock,
        max_history_size: usize,
    ) -> Result<Self> {
        if max_history_size == 0 {
            return Err(RewindError::InvalidConfiguration(
                "max history size must be at least 1".to_string(),
            ));
        }

        let history_path = storage_root.join("commands").join("history.json");
        let state = if history_path.exists() {
            let file: HistoryFile = utils::read_json(&history_path)?;
            debug!(
                "Loaded {} commands and {} redo entries",
                file.history.len(),
                file.redo_stack.len()
            );
            HistoryState {
                history: file.history,
                redo_stack: file.redo_stack,
            }
        } else {
            HistoryState::default()
        };

        Ok(Self {
            history_path,
            project_root: project_root.to_path_buf(),
            executors: RwLock::new(HashMap::new()),
            state: Mutex::new(state),
            restore_points,
            writer,
            max_history_size,
        })
    }

    /// Register the executor for a command kind, replacing any previous one
    pub fn register_executor(&self, kind: impl Into<String>, executor: Arc<dyn CommandExecutor>) {
        let kind = kind.into();
        debug!("Registered executor for '{}'", kind);
        self.executors.write().insert(kind, executor);
    }

    /// Kinds with a registered executor, sorted
    pub fn registered_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.executors.read().keys().cloned().collect();
        kinds.sort();
        kinds
    }

    fn executor(&self, kind: &str) -> Result<Arc<dyn CommandExecutor>> {
        self.executors
            .read()
            .get(kind)
            .cloned()
            .ok_or_else(|| RewindError::ExecutorNotFound(kind.to_string()))
    }

    /// Execute a command and record it
    ///
    /// On executor failure the command is recorded as failed, the executor's
    /// `compensate` hook runs, and [`RewindError::ExecutionFailed`] carrying
    /// the command id is returned. A successful command clears the redo stack.
    #[instrument(skip(self, params, ctx))]
    pub fn execute_command(&self, kind: &str, params: Value, ctx: CommandContext) -> Result<Value> {
        let executor = self.executor(kind)?;
        let _writer = self.writer.acquire();

        let restore_point_id = if ctx.create_restore_point {
            Some(self.pre_operation_restore_point(kind, &ctx)?)
        } else {
            None
        };

        let description = ctx.description.clone().unwrap_or_else(|| kind.to_string());
        let metadata = CommandMetadata {
            phase: ctx.phase.clone(),
            tags: ctx.tags.clone(),
            session_id: ctx.session_id.clone(),
            batch_id: None,
        };
        let command = self.execute_inner(&executor, kind, params, description, metadata, restore_point_id)?;
        Ok(command.result.unwrap_or(Value::Null))
    }

    /// Run one command: validate, execute, record
    ///
    /// Caller holds the writer lock.
    fn execute_inner(
        &self,
        executor: &Arc<dyn CommandExecutor>,
        kind: &str,
        params: Value,
        description: String,
        metadata: CommandMetadata,
        restore_point_id: Option<String>,
    ) -> Result<Command> {
        let mut command = Command {
            id: Uuid::new_v4().to_string(),
            kind: kind.to_string(),
            timestamp: self.next_timestamp(),
            description,
            params,
            result: None,
            error: None,
            status: CommandStatus::Pending,
            undoable: executor.undoable(),
            restore_point_id,
            duration_ms: None,
            metadata,
        };

        let ctx = ExecutionContext {
            command_id: &command.id,
            project_root: &self.project_root,
            phase: command.metadata.phase.as_deref(),
            session_id: command.metadata.session_id.as_deref(),
        };

        if !executor.validate(&command.params, &ctx)? {
            warn!("Validation rejected {} command {}", kind, command.short_id());
            return Err(RewindError::ValidationFailed {
                kind: kind.to_string(),
                command_id: command.id.clone(),
            });
        }

        command.status = CommandStatus::Executing;
        let start = Instant::now();
        let outcome = executor.execute(&command.params, &ctx);
        let duration_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                command.status = CommandStatus::Completed;
                command.result = Some(result);
                command.duration_ms = Some(duration_ms);

                let mut state = self.state.lock();
                state.history.push(command.clone());
                state.redo_stack.clear();
                self.trim_history(&mut state);
                self.persist(&state)?;

                debug!("Executed {} command {} in {}ms", kind, command.short_id(), duration_ms);
                Ok(command)
            }
            Err(error) => {
                warn!("Command {} ({}) failed: {}", command.short_id(), kind, error);
                if let Err(e) = executor.compensate(&command.params, &error, &ctx) {
                    warn!("Compensation for {} failed: {}", command.short_id(), e);
                }

                command.status = CommandStatus::Failed;
                command.error = Some(error.to_string());
                command.duration_ms = Some(duration_ms);

                let mut state = self.state.lock();
                state.history.push(command.clone());
                self.trim_history(&mut state);
                self.persist(&state)?;

                Err(RewindError::ExecutionFailed {
                    command_id: command.id,
                    message: error.to_string(),
                })
            }
        }
    }

    fn pre_operation_restore_point(&self, label: &str, ctx: &CommandContext) -> Result<String> {
        let manager = self.restore_points.as_ref().ok_or_else(|| {
            RewindError::InvalidConfiguration("restore points are not enabled for this command manager".to_string())
        })?;
        let description = match &ctx.description {
            Some(d) => format!("Before {}: {}", label, d),
            None => format!("Before {}", label),
        };
        let meta = manager.create_restore_point(
            RestorePointKind::PreOperation,
            &description,
            RestorePointOptions {
                phase: ctx.phase.clone(),
                tags: ctx.tags.clone(),
                force_snapshot: false,
            },
        )?;
        Ok(meta.id)
    }

    /// Strictly increasing timestamps, so rollback by time is unambiguous
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.state.lock().history.last() {
            Some(last) if last.timestamp >= now => last.timestamp + Duration::microseconds(1),
            _ => now,
        }
    }

    fn trim_history(&self, state: &mut HistoryState) {
        if state.history.len() > self.max_history_size {
            let excess = state.history.len() - self.max_history_size;
            state.history.drain(..excess);
            debug!("Dropped {} oldest commands from history", excess);
        }
    }

    fn persist(&self, state: &HistoryState) -> Result<()> {
        let file = HistoryFile {
            version: HISTORY_VERSION,
            saved_at: Utc::now(),
            history: state.history.clone(),
            redo_stack: state.redo_stack.clone(),
        };
        utils::write_json(&self.history_path, &file)
    }

    fn run_undo(&self, command: &Command) -> Result<()> {
        if !command.undoable {
            return Err(RewindError::NotUndoable(command.id.clone()));
        }
        let executor = self.executor(&command.kind)?;
        let ctx = ExecutionContext {
            command_id: &command.id,
            project_root: &self.project_root,
            phase: command.metadata.phase.as_deref(),
            session_id: command.metadata.session_id.as_deref(),
        };
        executor.undo(&command.params, command.result.as_ref(), &ctx)
    }

    /// Undo the most recent completed command
    ///
    /// A non-undoable command is left `completed` and
    /// [`RewindError::NotUndoable`] is returned.
    #[instrument(skip(self))]
    pub fn undo(&self) -> Result<Command> {
        let _writer = self.writer.acquire();

        let command = {
            let state = self.state.lock();
            state
                .history
                .iter()
                .rev()
                .find(|c| c.status == CommandStatus::Completed)
                .cloned()
                .ok_or(RewindError::NothingToUndo)?
        };

        self.run_undo(&command)?;

        let mut state = self.state.lock();
        let mut undone = command;
        undone.status = CommandStatus::Undone;
        if let Some(entry) = state.history.iter_mut().find(|c| c.id == undone.id) {
            entry.status = CommandStatus::Undone;
        }
        state.redo_stack.push(undone.clone());
        self.persist(&state)?;

        info!("Undid {} command {}", undone.kind, undone.short_id());
        Ok(undone)
    }

    /// Re-execute the most recently undone command
    ///
    /// The new execution is a separate history record with its own id. If it
    /// fails the redo entry stays on the stack.
    #[instrument(skip(self))]
    pub fn redo(&self) -> Result<Command> {
        let _writer = self.writer.acquire();

        let entry = self
            .state
            .lock()
            .redo_stack
            .pop()
            .ok_or(RewindError::NothingToRedo)?;

        let executor = match self.executor(&entry.kind) {
            Ok(executor) => executor,
            Err(e) => {
                self.state.lock().redo_stack.push(entry);
                return Err(e);
            }
        };

        // execute_inner clears the redo stack on success; keep the remainder
        let remaining = std::mem::take(&mut self.state.lock().redo_stack);
        let outcome = self.execute_inner(
            &executor,
            &entry.kind,
            entry.params.clone(),
            entry.description.clone(),
            entry.metadata.clone(),
            None,
        );

        let mut state = self.state.lock();
        state.redo_stack = remaining;
        match outcome {
            Ok(command) => {
                self.persist(&state)?;
                info!("Redid {} command as {}", entry.kind, command.short_id());
                Ok(command)
            }
            Err(e) => {
                state.redo_stack.push(entry);
                self.persist(&state)?;
                Err(e)
            }
        }
    }

    /// Undo every completed command newer than `timestamp`
    ///
    /// Undo failures are collected, not fatal. Afterwards history holds only
    /// commands at or before `timestamp` and the redo stack is empty.
    #[instrument(skip(self))]
    pub fn rollback_to_timestamp(&self, timestamp: DateTime<Utc>) -> Result<RollbackResult> {
        let _writer = self.writer.acquire();
        self.rollback_locked(timestamp)
    }

    fn rollback_locked(&self, timestamp: DateTime<Utc>) -> Result<RollbackResult> {
        let newer: Vec<Command> = {
            let state = self.state.lock();
            state
                .history
                .iter()
                .rev()
                .filter(|c| c.timestamp > timestamp)
                .cloned()
                .collect()
        };

        let mut result = RollbackResult::default();
        for command in &newer {
            if command.status == CommandStatus::Completed {
                if let Err(e) = self.run_undo(command) {
                    warn!("Rollback could not undo {}: {}", command.short_id(), e);
                    result.errors.push(format!("{}: {}", command.id, e));
                }
            }
            result.commands_undone.push(command.id.clone());
        }

        let mut state = self.state.lock();
        state.history.retain(|c| c.timestamp <= timestamp);
        state.redo_stack.clear();
        self.persist(&state)?;

        info!(
            "Rolled back {} commands to {} ({} errors)",
            result.commands_undone.len(),
            timestamp,
            result.errors.len()
        );
        Ok(result)
    }

    /// Roll back to the point right after `id` executed
    pub fn rollback_to_command(&self, id: &str) -> Result<RollbackResult> {
        let command = self.get_command(id)?;
        self.rollback_to_timestamp(command.timestamp)
    }

    /// Restore project files from a restore point and drop newer history
    ///
    /// Commands are not undone individually; the restored files replace their
    /// effects.
    #[instrument(skip(self))]
    pub fn rollback_to_restore_point(&self, id: &str) -> Result<RollbackResult> {
        let manager = self.restore_points.as_ref().ok_or_else(|| {
            RewindError::InvalidConfiguration("restore points are not enabled for this command manager".to_string())
        })?;
        let _writer = self.writer.acquire();

        let meta = manager.get_restore_point(id)?;
        manager.restore(id)?;

        let mut state = self.state.lock();
        let commands_undone: Vec<String> = state
            .history
            .iter()
            .rev()
            .filter(|c| c.timestamp > meta.timestamp)
            .map(|c| c.id.clone())
            .collect();
        state.history.retain(|c| c.timestamp <= meta.timestamp);
        state.redo_stack.clear();
        self.persist(&state)?;

        info!(
            "Rolled back to restore point {} ({} commands dropped)",
            meta.short_id(),
            commands_undone.len()
        );
        Ok(RollbackResult {
            commands_undone,
            errors: Vec::new(),
            restore_point_id: Some(meta.id),
        })
    }

    /// Execute commands as a unit
    ///
    /// At most one restore point is taken, before the first command. If any
    /// command fails, the ones already executed are undone newest-first and
    /// [`RewindError::BatchFailed`] names the failing position.
    #[instrument(skip(self, commands, ctx), fields(len = commands.len()))]
    pub fn execute_batch(&self, commands: Vec<BatchCommand>, ctx: CommandContext) -> Result<Vec<Value>> {
        let executors = commands
            .iter()
            .map(|c| self.executor(&c.kind))
            .collect::<Result<Vec<_>>>()?;
        let _writer = self.writer.acquire();

        let restore_point_id = if ctx.create_restore_point {
            Some(self.pre_operation_restore_point("batch", &ctx)?)
        } else {
            None
        };
        let batch_id = Uuid::new_v4().to_string();

        let mut executed: Vec<Command> = Vec::with_capacity(commands.len());
        for (index, (entry, executor)) in commands.into_iter().zip(executors.iter()).enumerate() {
            let metadata = CommandMetadata {
                phase: ctx.phase.clone(),
                tags: ctx.tags.clone(),
                session_id: ctx.session_id.clone(),
                batch_id: Some(batch_id.clone()),
            };
            let description = entry.description.unwrap_or_else(|| entry.kind.clone());

            match self.execute_inner(
                executor,
                &entry.kind,
                entry.params,
                description,
                metadata,
                restore_point_id.clone(),
            ) {
                Ok(command) => executed.push(command),
                Err(error) => {
                    let (command_id, message) = match error {
                        RewindError::ExecutionFailed { command_id, message } => (Some(command_id), message),
                        RewindError::ValidationFailed { kind, .. } => (None, format!("validation failed for {}", kind)),
                        other => (None, other.to_string()),
                    };
                    self.unwind_batch(&executed)?;
                    warn!("Batch {} failed at command {}", utils::short_id(&batch_id), index);
                    return Err(RewindError::BatchFailed {
                        index,
                        command_id,
                        message,
                    });
                }
            }
        }

        info!("Executed batch {} ({} commands)", utils::short_id(&batch_id), executed.len());
        Ok(executed.into_iter().map(|c| c.result.unwrap_or(Value::Null)).collect())
    }

    fn unwind_batch(&self, executed: &[Command]) -> Result<()> {
        let mut undone = Vec::new();
        for command in executed.iter().rev() {
            match self.run_undo(command) {
                Ok(()) => undone.push(command.id.clone()),
                Err(e) => warn!("Could not undo batch command {}: {}", command.short_id(), e),
            }
        }

        let mut state = self.state.lock();
        for entry in state.history.iter_mut() {
            if undone.contains(&entry.id) {
                entry.status = CommandStatus::Undone;
            }
        }
        self.persist(&state)
    }

    /// Copy of the history, oldest first
    pub fn history(&self) -> Vec<Command> {
        self.state.lock().history.clone()
    }

    /// Copy of the redo stack, most recently undone last
    pub fn redo_stack(&self) -> Vec<Command> {
        self.state.lock().redo_stack.clone()
    }

    /// Look up a command in history
    pub fn get_command(&self, id: &str) -> Result<Command> {
        self.state
            .lock()
            .history
            .iter()
            .find(|c| c.id == id)
            .cloned()
            .ok_or_else(|| RewindError::CommandNotFound(id.to_string()))
    }

    /// Whether a completed command exists
    pub fn can_undo(&self) -> bool {
        self.state
            .lock()
            .history
            .iter()
            .any(|c| c.status == CommandStatus::Completed)
    }

    /// Whether the redo stack is non-empty
    pub fn can_redo(&self) -> bool {
        !self.state.lock().redo_stack.is_empty()
    }

    /// Counts per status and per kind
    pub fn statistics(&self) -> CommandStats {
        let state = self.state.lock();
        let mut stats = CommandStats {
            total: state.history.len(),
            redo_depth: state.redo_stack.len(),
            ..Default::default()
        };
        for command in &state.history {
            *stats.by_status.entry(command.status.to_string()).or_insert(0) += 1;
            *stats.by_kind.entry(command.kind.clone()).or_insert(0) += 1;
        }
        stats
    }
}
