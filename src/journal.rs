/// Persistent record of the moves made by the most recent run.
///
/// Each real move is appended to the journal and the journal is rewritten on
/// disk right away, so an interrupted watch session can still be undone.
use crate::mover::Moved;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Represents a single file organization operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    /// The original path of the file before organization.
    pub original_path: PathBuf,
    /// The new path of the file after organization.
    pub new_path: PathBuf,
    /// The category the file was moved to.
    pub category: String,
}

impl From<&Moved> for Operation {
    fn from(moved: &Moved) -> Self {
        Self {
            original_path: moved.from.clone(),
            new_path: moved.to.clone(),
            category: moved.category.clone(),
        }
    }
}

/// All moves of one run, in the order they happened.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationLog {
    /// RFC 3339 timestamp of when the run started.
    pub timestamp: String,
    /// The directory that was organized.
    pub watch_dir: PathBuf,
    pub operations: Vec<Operation>,
}

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("failed to write history file {}: {cause}", .path.display())]
    WriteFailed {
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },
    #[error("failed to read history file {}: {cause}", .path.display())]
    ReadFailed {
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },
    #[error("invalid history file {}: {reason}", .path.display())]
    InvalidFormat { path: PathBuf, reason: String },
    #[error("no previous organization found to undo ({} does not exist)", .0.display())]
    NothingToUndo(PathBuf),
}

impl OperationLog {
    pub fn new(watch_dir: PathBuf) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            watch_dir,
            operations: Vec::new(),
        }
    }

    pub fn add_operation(&mut self, operation: Operation) {
        self.operations.push(operation);
    }

    /// Writes the log to `path` as pretty JSON, replacing any previous journal.
    pub fn save(&self, path: &Path) -> Result<(), JournalError> {
        let json = serde_json::to_string_pretty(self).map_err(|e| JournalError::InvalidFormat {
            path: path.to_path_buf(),
            reason: format!("JSON serialization failed: {e}"),
        })?;

        fs::write(path, json).map_err(|cause| JournalError::WriteFailed {
            path: path.to_path_buf(),
            cause,
        })
    }

    /// Loads the journal at `path`, or `None` if there is none.
    pub fn load(path: &Path) -> Result<Option<Self>, JournalError> {
        if !path.exists() {
            return Ok(None);
        }

        let json = fs::read_to_string(path).map_err(|cause| JournalError::ReadFailed {
            path: path.to_path_buf(),
            cause,
        })?;

        serde_json::from_str(&json)
            .map(Some)
            .map_err(|e| JournalError::InvalidFormat {
                path: path.to_path_buf(),
                reason: format!("JSON parse error: {e}"),
            })
    }

    /// Deletes the journal at `path` if present.
    pub fn delete(path: &Path) -> Result<(), JournalError> {
        if path.exists() {
            fs::remove_file(path).map_err(|cause| JournalError::WriteFailed {
                path: path.to_path_buf(),
                cause,
            })?;
        }
        Ok(())
    }
}
