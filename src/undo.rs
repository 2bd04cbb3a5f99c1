/// Undo functionality for reverting file organization operations.
///
/// This module moves files back to their original locations based on the
/// journal written by the most recent run.
use crate::journal::{JournalError, Operation, OperationLog};
use crate::mover::move_file;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Represents the result of an undo operation.
#[derive(Debug, Default)]
pub struct UndoReport {
    /// Number of files successfully restored.
    pub restored_files: usize,
    /// Files that failed to restore, with the reason.
    pub failed_restores: Vec<(PathBuf, String)>,
    /// Files that were skipped (e.g., file not found).
    pub skipped_files: Vec<(PathBuf, String)>,
}

impl UndoReport {
    /// Returns true if the undo was completely successful.
    pub fn is_complete_success(&self) -> bool {
        self.failed_restores.is_empty() && self.skipped_files.is_empty()
    }
}

/// Manages undo operations for file organization.
pub struct UndoManager;

impl UndoManager {
    /// Undoes the moves recorded in the journal at `history_file`.
    ///
    /// Operations are reversed last-to-first. The journal is deleted only
    /// when every file was restored.
    ///
    /// # Edge Cases Handled
    ///
    /// * **File not found**: Skipped with a note that the file couldn't be found
    /// * **File name conflict**: The conflicting file is backed up with a timestamp suffix
    /// * **Permission denied**: Recorded as a failure with the error reason
    ///
    /// # Errors
    ///
    /// [`JournalError::NothingToUndo`] when there is no journal, or a read /
    /// format error when it cannot be loaded.
    pub fn undo(history_file: &Path) -> Result<UndoReport, JournalError> {
        let log = OperationLog::load(history_file)?
            .ok_or_else(|| JournalError::NothingToUndo(history_file.to_path_buf()))?;
        info!(
            operations = log.operations.len(),
            run = %log.timestamp,
            "undoing previous organization of {}",
            log.watch_dir.display()
        );

        let mut report = UndoReport::default();
        for operation in log.operations.iter().rev() {
            match Self::restore_file(operation) {
                Ok(()) => {
                    info!(
                        "restored {} -> {}",
                        operation.new_path.display(),
                        operation.original_path.display()
                    );
                    report.restored_files += 1;
                }
                Err(Restore::Missing(path, reason)) => {
                    warn!("skipped {}: {}", path.display(), reason);
                    report.skipped_files.push((path, reason));
                }
                Err(Restore::Failed(path, reason)) => {
                    warn!("failed to restore {}: {}", path.display(), reason);
                    report.failed_restores.push((path, reason));
                }
            }
        }

        if report.is_complete_success() {
            OperationLog::delete(history_file)?;
        }

        Ok(report)
    }

    /// Restores a single file to its original location.
    ///
    /// Handles file name conflicts by backing up the existing file with a timestamp.
    fn restore_file(operation: &Operation) -> Result<(), Restore> {
        if !operation.new_path.exists() {
            return Err(Restore::Missing(
                operation.new_path.clone(),
                "File not found at expected location".to_string(),
            ));
        }

        if operation.original_path.exists() {
            let backup_path = Self::generate_backup_path(&operation.original_path);
            fs::rename(&operation.original_path, &backup_path).map_err(|e| {
                Restore::Failed(
                    operation.original_path.clone(),
                    format!("Could not backup conflicting file: {e}"),
                )
            })?;
        }

        if let Some(parent) = operation.original_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Restore::Failed(
                    parent.to_path_buf(),
                    format!("Could not recreate original directory: {e}"),
                )
            })?;
        }

        move_file(&operation.new_path, &operation.original_path).map_err(|e| {
            Restore::Failed(
                operation.new_path.clone(),
                format!("Failed to restore file: {e}"),
            )
        })?;

        Ok(())
    }

    /// Generates a backup path for a file by appending a timestamp.
    ///
    /// Example: `file.txt` becomes `file.txt.bak.20251109-143052`
    fn generate_backup_path(original_path: &Path) -> PathBuf {
        let timestamp = chrono::Local::now().format("%Y%m%d-%H%M%S");
        let filename = original_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        original_path.with_file_name(format!("{filename}.bak.{timestamp}"))
    }
}

enum Restore {
    Missing(PathBuf, String),
    Failed(PathBuf, String),
}
