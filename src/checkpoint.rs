//! Task-level checkpoints
//!
//! A checkpoint captures where a long-running workflow stands: phase, task,
//! todo list, decisions, pending approvals and next steps. It is independent
//! of file-level restore points, although a checkpoint can optionally take an
//! [`RestorePointKind::AutoCheckpoint`] restore point alongside.
//!
//! Every checkpoint is written three ways:
//!
//! - `checkpoint-<id>.json` holds the full [`CheckpointRecord`]
//! - `metadata/<id>.json` holds a [`CheckpointMetadata`] used for listing
//! - `latest.json` is a copy of the newest record
//!
//! `current-state.json` and `resume-prompt.md` are regenerated from the newest
//! checkpoint so a new session can pick up where the last one stopped.
//!
//! ## Autosave
//!
//! [`CheckpointSystem::start_auto_save`] runs a tokio interval that asks a
//! callback for a fresh [`CheckpointState`] and stores it as
//! [`CheckpointKind::Auto`]. Each tick holds the project's [`WriterLock`], so
//! an autosave never observes a half-applied command. Failures are logged and
//! the timer keeps running.

use crate::error::{Result, RewindError};
use crate::restore_point::RestorePointManager;
use crate::types::{RestorePointKind, RestorePointOptions, WriterLock};
use crate::utils;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Default autosave period
pub const DEFAULT_AUTO_SAVE_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Why a checkpoint was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    /// A workflow phase finished or started
    PhaseBoundary,
    /// Written by the autosave timer
    Auto,
    /// Requested explicitly
    Manual,
    /// Written when a session ends
    SessionEnd,
}

impl CheckpointKind {
    /// Wire name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointKind::PhaseBoundary => "phase_boundary",
            CheckpointKind::Auto => "auto",
            CheckpointKind::Manual => "manual",
            CheckpointKind::SessionEnd => "session_end",
        }
    }
}

impl fmt::Display for CheckpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Project the workflow runs for
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProjectInfo {
    /// Display name
    pub name: String,
    /// Project directory
    pub path: Option<String>,
    /// When work on the project began
    pub started_at: Option<DateTime<Utc>>,
    /// Anything else the orchestrator wants to keep
    pub extra: serde_json::Value,
}

/// Status of a todo item
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    /// Being worked on
    InProgress,
    /// Not started
    #[default]
    Pending,
    /// Waiting on something
    Blocked,
    /// Done
    Completed,
}

impl TodoStatus {
    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            TodoStatus::InProgress => "in_progress",
            TodoStatus::Pending => "pending",
            TodoStatus::Blocked => "blocked",
            TodoStatus::Completed => "completed",
        }
    }
}

/// One entry of the workflow todo list
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TodoItem {
    /// Stable id
    pub id: String,
    /// What needs doing
    pub content: String,
    /// Current status
    pub status: TodoStatus,
    /// Priority label
    pub priority: Option<String>,
    /// Phase the item belongs to
    pub phase: Option<String>,
}

/// Status of a workflow phase
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Not reached yet
    #[default]
    NotStarted,
    /// Current phase
    InProgress,
    /// Finished
    Completed,
}

impl PhaseStatus {
    /// Wire name of the status
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::NotStarted => "not_started",
            PhaseStatus::InProgress => "in_progress",
            PhaseStatus::Completed => "completed",
        }
    }
}

/// Progress of one workflow phase
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PhaseProgress {
    /// Phase status
    pub status: PhaseStatus,
    /// Percentage complete, 0 to 100
    pub percent: u8,
    /// When the phase started
    pub started_at: Option<DateTime<Utc>>,
    /// When the phase finished
    pub completed_at: Option<DateTime<Utc>>,
    /// Free-form notes
    pub notes: Option<String>,
}

/// A decision recorded during the workflow
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decision {
    /// When it was made
    pub timestamp: DateTime<Utc>,
    /// What was decided
    pub description: String,
    /// Why
    #[serde(default)]
    pub rationale: Option<String>,
    /// Phase it was made in
    #[serde(default)]
    pub phase: Option<String>,
}

/// An action waiting for human approval
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingApproval {
    /// Stable id
    pub id: String,
    /// What needs approving
    pub description: String,
    /// When approval was requested
    pub requested_at: DateTime<Utc>,
    /// Who asked
    #[serde(default)]
    pub requested_by: Option<String>,
}

/// Point-in-time state of a workflow, supplied by the orchestrator
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CheckpointState {
    /// Project the workflow runs for
    pub project: ProjectInfo,
    /// Current phase
    pub current_phase: Option<String>,
    /// Current task
    pub current_task: Option<String>,
    /// Full todo list
    pub todos: Vec<TodoItem>,
    /// Progress per phase
    pub phase_progress: BTreeMap<String, PhaseProgress>,
    /// Most recent decisions, oldest first
    pub recent_decisions: Vec<Decision>,
    /// Names of agents currently working
    pub active_agents: Vec<String>,
    /// Actions awaiting approval
    pub pending_approvals: Vec<PendingApproval>,
    /// Free-text summary of the context
    pub context_summary: Option<String>,
    /// Ordered next steps
    pub next_steps: Vec<String>,
}

impl CheckpointState {
    /// Number of todos with `status`
    pub fn todo_count(&self, status: TodoStatus) -> usize {
        self.todos.iter().filter(|t| t.status == status).count()
    }
}

/// Machine a checkpoint was written on
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostInfo {
    /// Hostname
    pub hostname: String,
    /// Operating system
    pub os: String,
    /// Architecture
    pub arch: String,
    /// Username, if known
    pub username: Option<String>,
}

impl Default for HostInfo {
    fn default() -> Self {
        Self {
            hostname: hostname::get()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            username: std::env::var("USER")
                .or_else(|_| std::env::var("USERNAME"))
                .ok(),
        }
    }
}

/// A persisted checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointRecord {
    /// Unique id
    pub id: String,
    /// Why it was taken
    pub kind: CheckpointKind,
    /// Human readable description
    pub description: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Workflow state
    pub state: CheckpointState,
    /// Restore point taken alongside, if any
    #[serde(default)]
    pub restore_point_id: Option<String>,
    /// Machine that wrote it
    pub host: HostInfo,
    /// Crate version that wrote it
    pub rewind_version: String,
}

impl CheckpointRecord {
    /// First 8 characters of the id
    pub fn short_id(&self) -> &str {
        utils::short_id(&self.id)
    }
}

/// Listing entry for a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CheckpointMetadata {
    /// Checkpoint id
    pub id: String,
    /// Why it was taken
    pub kind: CheckpointKind,
    /// Human readable description
    pub description: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Phase at creation
    pub phase: Option<String>,
    /// Task at creation
    pub task: Option<String>,
    /// Todos in total
    pub todos_total: usize,
    /// Todos completed
    pub todos_completed: usize,
    /// Restore point taken alongside
    pub restore_point_id: Option<String>,
}

impl CheckpointMetadata {
    fn from_record(record: &CheckpointRecord) -> Self {
        Self {
            id: record.id.clone(),
            kind: record.kind,
            description: record.description.clone(),
            created_at: record.created_at,
            phase: record.state.current_phase.clone(),
            task: record.state.current_task.clone(),
            todos_total: record.state.todos.len(),
            todos_completed: record.state.todo_count(TodoStatus::Completed),
            restore_point_id: record.restore_point_id.clone(),
        }
    }

    /// First 8 characters of the id
    pub fn short_id(&self) -> &str {
        utils::short_id(&self.id)
    }
}

/// Compact summary rewritten on every checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CurrentState {
    /// Checkpoint this summary was derived from
    pub checkpoint_id: String,
    /// Current phase
    pub phase: Option<String>,
    /// Current task
    pub task: Option<String>,
    /// Agents currently working
    pub active_agents: Vec<String>,
    /// Actions awaiting approval
    pub pending_approvals: Vec<PendingApproval>,
    /// Ordered next steps
    pub next_steps: Vec<String>,
    /// Time of the checkpoint
    pub updated_at: DateTime<Utc>,
}

/// Produces a fresh state for each autosave tick
pub type StateProvider = dyn Fn() -> Result<CheckpointState> + Send + Sync;

/// File-level access to the checkpoint directory
#[derive(Debug)]
struct CheckpointStore {
    dir: PathBuf,
    last_created: Mutex<Option<DateTime<Utc>>>,
}

impl CheckpointStore {
    fn metadata_dir(&self) -> PathBuf {
        self.dir.join("metadata")
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("checkpoint-{}.json", id))
    }

    fn metadata_path(&self, id: &str) -> PathBuf {
        self.metadata_dir().join(format!("{}.json", id))
    }

    fn latest_path(&self) -> PathBuf {
        self.dir.join("latest.json")
    }

    /// Strictly increasing creation times, so listing order is stable
    fn next_timestamp(&self) -> DateTime<Utc> {
        let mut last = self.last_created.lock();
        let now = Utc::now();
        let ts = match *last {
            Some(prev) if prev >= now => prev + ChronoDuration::microseconds(1),
            _ => now,
        };
        *last = Some(ts);
        ts
    }

    fn create(
        &self,
        kind: CheckpointKind,
        state: CheckpointState,
        description: &str,
        restore_point_id: Option<String>,
    ) -> Result<CheckpointRecord> {
        let previous = self.load_latest()?;

        let record = CheckpointRecord {
            id: Uuid::new_v4().to_string(),
            kind,
            description: description.to_string(),
            created_at: self.next_timestamp(),
            state,
            restore_point_id,
            host: HostInfo::default(),
            rewind_version: env!("CARGO_PKG_VERSION").to_string(),
        };

        utils::write_json(&self.record_path(&record.id), &record)?;
        utils::write_json(&self.metadata_path(&record.id), &CheckpointMetadata::from_record(&record))?;
        utils::write_json(&self.latest_path(), &record)?;

        let current = CurrentState {
            checkpoint_id: record.id.clone(),
            phase: record.state.current_phase.clone(),
            task: record.state.current_task.clone(),
            active_agents: record.state.active_agents.clone(),
            pending_approvals: record.state.pending_approvals.clone(),
            next_steps: record.state.next_steps.clone(),
            updated_at: record.created_at,
        };
        utils::write_json(&self.dir.join("current-state.json"), &current)?;

        let prompt = render_resume_prompt(previous.as_ref(), &record);
        utils::atomic_write(&self.dir.join("resume-prompt.md"), prompt.as_bytes())?;

        Ok(record)
    }

    fn load(&self, id: &str) -> Result<CheckpointRecord> {
        if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(RewindError::CheckpointNotFound(id.to_string()));
        }
        let path = self.record_path(id);
        if !path.exists() {
            return Err(RewindError::CheckpointNotFound(id.to_string()));
        }
        utils::read_json(&path)
    }

    fn load_latest(&self) -> Result<Option<CheckpointRecord>> {
        let latest = self.latest_path();
        if latest.exists() {
            match utils::read_json::<CheckpointRecord>(&latest) {
                Ok(record) => return Ok(Some(record)),
                Err(e) => warn!("Ignoring unreadable {:?}: {}", latest, e),
            }
        }

        match self.list()?.first() {
            Some(newest) => {
                debug!("Falling back to newest listed checkpoint {}", newest.short_id());
                self.load(&newest.id).map(Some)
            }
            None => Ok(None),
        }
    }

    fn list(&self) -> Result<Vec<CheckpointMetadata>> {
        let dir = self.metadata_dir();
        let mut entries = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match utils::read_json::<CheckpointMetadata>(&path) {
                Ok(meta) => entries.push(meta),
                Err(e) => warn!("Skipping unreadable checkpoint metadata {:?}: {}", path, e),
            }
        }
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));
        Ok(entries)
    }

    fn remove(&self, id: &str) -> Result<()> {
        for path in [self.record_path(id), self.metadata_path(id)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

struct AutoSaveHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Creates, lists and autosaves checkpoints
pub struct CheckpointSystem {
    store: Arc<CheckpointStore>,
    io: Arc<Mutex<()>>,
    restore_points: Option<Arc<RestorePointManager>>,
    writer: WriterLock,
    interval: Duration,
    auto_save: Mutex<Option<AutoSaveHandle>>,
}

impl fmt::Debug for CheckpointSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckpointSystem")
            .field("dir", &self.store.dir)
            .field("interval", &self.interval)
            .field("auto_saving", &self.is_auto_saving())
            .finish()
    }
}

impl CheckpointSystem {
    /// Open the checkpoint directory under `storage_root`
    pub fn open(
        storage_root: &Path,
        restore_points: Option<Arc<RestorePointManager>>,
        writer: WriterLock,
        interval: Duration,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(RewindError::InvalidConfiguration(
                "auto-save interval must be greater than zero".to_string(),
            ));
        }

        let dir = storage_root.join("checkpoints");
        fs::create_dir_all(dir.join("metadata"))?;

        let store = CheckpointStore {
            dir,
            last_created: Mutex::new(None),
        };
        let newest = store.list()?.first().map(|m| m.created_at);
        *store.last_created.lock() = newest;

        Ok(Self {
            store: Arc::new(store),
            io: Arc::new(Mutex::new(())),
            restore_points,
            writer,
            interval,
            auto_save: Mutex::new(None),
        })
    }

    /// Checkpoint directory
    pub fn dir(&self) -> &Path {
        &self.store.dir
    }

    /// Persist `state` as a new checkpoint and return its id
    #[instrument(skip(self, state))]
    pub fn create_checkpoint(&self, kind: CheckpointKind, state: CheckpointState, description: &str) -> Result<String> {
        let _io = self.io.lock();
        let record = self.store.create(kind, state, description, None)?;
        info!("Created {} checkpoint {}", kind, record.short_id());
        Ok(record.id)
    }

    /// Persist `state` together with a file-level restore point
    #[instrument(skip(self, state))]
    pub fn create_checkpoint_with_restore_point(
        &self,
        kind: CheckpointKind,
        state: CheckpointState,
        description: &str,
    ) -> Result<String> {
        let manager = self.restore_points.as_ref().ok_or_else(|| {
            RewindError::InvalidConfiguration("restore points are not enabled for this checkpoint system".to_string())
        })?;
        let restore_point = manager.create_restore_point(
            RestorePointKind::AutoCheckpoint,
            &format!("Checkpoint: {}", description),
            RestorePointOptions {
                phase: state.current_phase.clone(),
                tags: vec![kind.as_str().to_string()],
                force_snapshot: false,
            },
        )?;

        let _io = self.io.lock();
        let record = self.store.create(kind, state, description, Some(restore_point.id.clone()))?;
        info!(
            "Created {} checkpoint {} with restore point {}",
            kind,
            record.short_id(),
            restore_point.short_id()
        );
        Ok(record.id)
    }

    /// Newest checkpoint, if any
    ///
    /// Reads `latest.json`; when it is missing or unreadable the newest
    /// metadata entry is loaded instead.
    pub fn load_latest_checkpoint(&self) -> Result<Option<CheckpointRecord>> {
        self.store.load_latest()
    }

    /// Load a checkpoint by id
    pub fn load_checkpoint(&self, id: &str) -> Result<CheckpointRecord> {
        self.store.load(id)
    }

    /// All checkpoints, newest first
    pub fn list_checkpoints(&self) -> Result<Vec<CheckpointMetadata>> {
        self.store.list()
    }

    /// Resolve a unique id prefix
    pub fn resolve_id(&self, prefix: &str) -> Result<String> {
        let matches: Vec<String> = self
            .store
            .list()?
            .into_iter()
            .filter(|m| m.id.starts_with(prefix))
            .map(|m| m.id)
            .collect();
        match matches.as_slice() {
            [id] => Ok(id.clone()),
            _ => Err(RewindError::CheckpointNotFound(prefix.to_string())),
        }
    }

    /// Keep the newest `keep_last` checkpoints and delete the rest
    ///
    /// Returns the number of checkpoints deleted.
    #[instrument(skip(self))]
    pub fn cleanup_old_checkpoints(&self, keep_last: usize) -> Result<usize> {
        let _io = self.io.lock();
        let listing = self.store.list()?;
        let mut deleted = 0;
        for meta in listing.iter().skip(keep_last) {
            self.store.remove(&meta.id)?;
            deleted += 1;
        }

        if keep_last == 0 && self.store.latest_path().exists() {
            fs::remove_file(self.store.latest_path())?;
        }

        if deleted > 0 {
            info!("Removed {} old checkpoints, kept {}", deleted, listing.len() - deleted);
        }
        Ok(deleted)
    }

    /// Compact summary of the newest checkpoint
    pub fn current_state(&self) -> Result<Option<CurrentState>> {
        let path = self.store.dir.join("current-state.json");
        if path.exists() {
            utils::read_json(&path).map(Some)
        } else {
            Ok(None)
        }
    }

    /// Contents of `resume-prompt.md`
    pub fn resume_prompt(&self) -> Result<Option<String>> {
        let path = self.store.dir.join("resume-prompt.md");
        if path.exists() {
            Ok(Some(fs::read_to_string(path)?))
        } else {
            Ok(None)
        }
    }

    /// Start writing an autosave checkpoint every interval
    ///
    /// Must be called from within a tokio runtime. A running timer is
    /// replaced. The first autosave happens one interval after the call.
    pub fn start_auto_save<F>(&self, provider: F) -> Result<()>
    where
        F: Fn() -> Result<CheckpointState> + Send + Sync + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| RewindError::AutoSave(format!("no tokio runtime: {}", e)))?;

        self.stop_auto_save();

        let provider: Arc<StateProvider> = Arc::new(provider);
        let (shutdown, mut stopped) = watch::channel(false);
        let store = Arc::clone(&self.store);
        let io = Arc::clone(&self.io);
        let writer = self.writer.clone();
        let period = self.interval;

        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = stopped.changed() => break,
                }

                let store = Arc::clone(&store);
                let io = Arc::clone(&io);
                let writer = writer.clone();
                let provider = Arc::clone(&provider);
                let outcome = tokio::task::spawn_blocking(move || {
                    let _writer = writer.acquire();
                    let state = provider()?;
                    let _io = io.lock();
                    store.create(CheckpointKind::Auto, state, "Auto-save", None)
                })
                .await;

                match outcome {
                    Ok(Ok(record)) => debug!("Auto-saved checkpoint {}", record.short_id()),
                    Ok(Err(e)) => warn!("Auto-save failed: {}", e),
                    Err(e) => warn!("Auto-save task panicked: {}", e),
                }
            }
            debug!("Auto-save loop stopped");
        });

        *self.auto_save.lock() = Some(AutoSaveHandle { shutdown, task });
        info!(
            "Auto-save started every {}",
            humantime::format_duration(self.interval)
        );
        Ok(())
    }

    /// Stop the autosave timer; a tick in progress runs to completion
    pub fn stop_auto_save(&self) {
        if let Some(handle) = self.auto_save.lock().take() {
            let _ = handle.shutdown.send(true);
            info!("Auto-save stopped");
        }
    }

    /// Whether the autosave timer is running
    pub fn is_auto_saving(&self) -> bool {
        self.auto_save
            .lock()
            .as_ref()
            .is_some_and(|h| !h.task.is_finished())
    }
}

impl Drop for CheckpointSystem {
    fn drop(&mut self) {
        self.stop_auto_save();
    }
}

/// Render the Markdown resume prompt for `current`
///
/// `previous` is the checkpoint that was latest before `current`; it supplies
/// the elapsed time and the list of todos completed since.
pub fn render_resume_prompt(previous: Option<&CheckpointRecord>, current: &CheckpointRecord) -> String {
    let state = &current.state;
    let mut out = String::new();

    let name = if state.project.name.is_empty() {
        "project"
    } else {
        state.project.name.as_str()
    };
    let _ = writeln!(out, "# Resume: {}\n", name);
    let _ = writeln!(
        out,
        "Last checkpoint `{}` ({}) at {}: {}",
        current.short_id(),
        current.kind,
        current.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        current.description
    );

    match previous {
        Some(prev) => {
            let elapsed = (current.created_at - prev.created_at)
                .to_std()
                .unwrap_or_default();
            let elapsed = Duration::from_secs(elapsed.as_secs());
            let _ = writeln!(
                out,
                "Time since previous checkpoint: {}",
                humantime::format_duration(elapsed)
            );
        }
        None => {
            let _ = writeln!(out, "This is the first checkpoint.");
        }
    }

    let _ = writeln!(out, "\n## Where things stand\n");
    let _ = writeln!(out, "- Phase: {}", state.current_phase.as_deref().unwrap_or("none"));
    let _ = writeln!(out, "- Task: {}", state.current_task.as_deref().unwrap_or("none"));
    if !state.active_agents.is_empty() {
        let _ = writeln!(out, "- Active agents: {}", state.active_agents.join(", "));
    }

    if let Some(summary) = &state.context_summary {
        let _ = writeln!(out, "\n## Context\n\n{}", summary);
    }

    if let Some(prev) = previous {
        let mut changes = Vec::new();
        if prev.state.current_phase != state.current_phase {
            changes.push(format!(
                "Phase moved from {} to {}",
                prev.state.current_phase.as_deref().unwrap_or("none"),
                state.current_phase.as_deref().unwrap_or("none")
            ));
        }
        for todo in state.todos.iter().filter(|t| t.status == TodoStatus::Completed) {
            let was_done = prev
                .state
                .todos
                .iter()
                .any(|p| p.id == todo.id && p.status == TodoStatus::Completed);
            if !was_done {
                changes.push(format!("Completed: {}", todo.content));
            }
        }
        if !changes.is_empty() {
            let _ = writeln!(out, "\n## Since the previous checkpoint\n");
            for change in changes {
                let _ = writeln!(out, "- {}", change);
            }
        }
    }

    if !state.todos.is_empty() {
        let _ = writeln!(
            out,
            "\n## Todos ({}/{} completed)\n",
            state.todo_count(TodoStatus::Completed),
            state.todos.len()
        );
        let _ = writeln!(out, "| Status | Task | Phase |");
        let _ = writeln!(out, "|---|---|---|");
        let mut todos: Vec<&TodoItem> = state.todos.iter().collect();
        todos.sort_by_key(|t| t.status);
        for todo in todos {
            let _ = writeln!(
                out,
                "| {} | {} | {} |",
                todo.status.as_str(),
                todo.content,
                todo.phase.as_deref().unwrap_or("-")
            );
        }
    }

    if !state.phase_progress.is_empty() {
        let _ = writeln!(out, "\n## Phase progress\n");
        let _ = writeln!(out, "| Phase | Status | Progress |");
        let _ = writeln!(out, "|---|---|---|");
        for (phase, progress) in &state.phase_progress {
            let _ = writeln!(
                out,
                "| {} | {} | {}% |",
                phase,
                progress.status.as_str(),
                progress.percent.min(100)
            );
        }
    }

    if !state.recent_decisions.is_empty() {
        let _ = writeln!(out, "\n## Recent decisions\n");
        for decision in &state.recent_decisions {
            match &decision.rationale {
                Some(why) => {
                    let _ = writeln!(out, "- {} ({})", decision.description, why);
                }
                None => {
                    let _ = writeln!(out, "- {}", decision.description);
                }
            }
        }
    }

    if !state.pending_approvals.is_empty() {
        let _ = writeln!(out, "\n## Pending approvals\n");
        for approval in &state.pending_approvals {
            let _ = writeln!(out, "- [ ] {} (`{}`)", approval.description, approval.id);
        }
    }

    if !state.next_steps.is_empty() {
        let _ = writeln!(out, "\n## Next steps\n");
        for (i, step) in state.next_steps.iter().enumerate() {
            let _ = writeln!(out, "{}. {}", i + 1, step);
        }
    }

    out
}
