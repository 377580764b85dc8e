//! Error types for the rewind engine
//!
//! Errors fall into a handful of families: lookups that found nothing,
//! commands that were rejected or failed, rollbacks that could not complete,
//! and integrity problems in the persisted restore point store. Every variant
//! that concerns a persisted record carries its id so the failure can be
//! located in the history on disk.

use thiserror::Error;

/// Type alias for Results in the rewind library
pub type Result<T> = std::result::Result<T, RewindError>;

/// Main error type for all rewind operations
#[derive(Debug, Error)]
pub enum RewindError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors during bincode serialization/deserialization
    #[error("Bincode error: {0}")]
    Bincode(String),

    /// Restore point id does not exist in the metadata directory
    #[error("Restore point not found: {0}")]
    RestorePointNotFound(String),

    /// Command id does not exist in the history
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    /// Checkpoint id does not exist in the checkpoint store
    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(String),

    /// No executor registered for a command kind
    #[error("No executor registered for command kind '{0}'")]
    ExecutorNotFound(String),

    /// Blob missing from the content-addressed store
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Executor rejected the parameters before anything was mutated
    #[error("Validation failed for command {command_id} ({kind})")]
    ValidationFailed {
        /// Command kind
        kind: String,
        /// Id of the rejected command record
        command_id: String,
    },

    /// Executor returned an error while running a command
    #[error("Command {command_id} failed: {message}")]
    ExecutionFailed {
        /// Id of the failed command record
        command_id: String,
        /// Error reported by the executor
        message: String,
    },

    /// Command cannot be undone
    #[error("Command {0} is not undoable")]
    NotUndoable(String),

    /// Command is not in a state that allows the requested transition
    #[error("Command {id} is {status} and cannot be undone")]
    InvalidCommandState {
        /// Command id
        id: String,
        /// Current status
        status: String,
    },

    /// Undo requested with no completed command in history
    #[error("Nothing to undo")]
    NothingToUndo,

    /// Redo requested with an empty redo stack
    #[error("Nothing to redo")]
    NothingToRedo,

    /// One command of a batch failed; earlier commands were undone
    #[error("Batch failed at command {index}: {message}")]
    BatchFailed {
        /// Position of the failing command inside the batch
        index: usize,
        /// Id of the failed history record; `None` when the command was
        /// rejected before it ran and nothing was recorded
        command_id: Option<String>,
        /// Error reported by the executor
        message: String,
    },

    /// Structural problem in the restore point store (broken delta chain etc.)
    #[error("Integrity error: {0}")]
    Integrity(String),

    /// Payload checksum does not match its metadata
    #[error("Checksum mismatch - expected: {expected}, actual: {actual}")]
    ChecksumMismatch {
        /// Checksum recorded in metadata
        expected: String,
        /// Checksum computed from the payload
        actual: String,
    },

    /// Snapshot still has deltas that replay on top of it
    #[error("Cannot delete snapshot {id}: {} dependent delta(s)", dependents.len())]
    RestorePointHasDependents {
        /// Snapshot id
        id: String,
        /// Ids of the deltas chained off the snapshot
        dependents: Vec<String>,
    },

    /// Compression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Decompression errors
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Pattern parsing error
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// Autosave timer error
    #[error("Auto-save error: {0}")]
    AutoSave(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<bincode::error::DecodeError> for RewindError {
    fn from(err: bincode::error::DecodeError) -> Self {
        RewindError::Bincode(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for RewindError {
    fn from(err: bincode::error::EncodeError) -> Self {
        RewindError::Bincode(err.to_string())
    }
}

impl From<globset::Error> for RewindError {
    fn from(err: globset::Error) -> Self {
        RewindError::InvalidPattern(err.to_string())
    }
}

impl From<ignore::Error> for RewindError {
    fn from(err: ignore::Error) -> Self {
        RewindError::InvalidPattern(err.to_string())
    }
}

impl RewindError {
    /// Create an integrity error with a custom message
    pub fn integrity(msg: impl Into<String>) -> Self {
        RewindError::Integrity(msg.into())
    }

    /// Create a compression error with a custom message
    pub fn compression(msg: impl Into<String>) -> Self {
        RewindError::Compression(msg.into())
    }

    /// Create a decompression error with a custom message
    pub fn decompression(msg: impl Into<String>) -> Self {
        RewindError::Decompression(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        RewindError::Internal(msg.into())
    }

    /// Check if this error is a failed lookup
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RewindError::RestorePointNotFound(_)
                | RewindError::CommandNotFound(_)
                | RewindError::CheckpointNotFound(_)
                | RewindError::ExecutorNotFound(_)
                | RewindError::ObjectNotFound(_)
        )
    }

    /// Check if this error indicates a damaged store
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            RewindError::Integrity(_)
                | RewindError::ChecksumMismatch { .. }
                | RewindError::ObjectNotFound(_)
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            RewindError::RestorePointNotFound(id) => {
                format!("Restore point '{}' not found. Use 'rewind list' to see available restore points.", id)
            }
            RewindError::RestorePointHasDependents { id, dependents } => {
                format!(
                    "Snapshot '{}' still has {} delta(s) built on it. Delete with --cascade to remove them too.",
                    id,
                    dependents.len()
                )
            }
            RewindError::ExecutorNotFound(kind) => {
                format!("No executor is registered for '{}'. Register one before executing commands of this kind.", kind)
            }
            RewindError::NothingToRedo => {
                "Nothing to redo. Executing a new command clears previously undone commands.".to_string()
            }
            _ => self.to_string(),
        }
    }
}
