/// Moving files into their category directories.
///
/// This module carries out a planned [`MoveTask`]: it creates the destination
/// directory when needed, renames the file atomically when source and
/// destination share a volume, falls back to copy-and-remove when they do not,
/// and retries with exponential backoff while another process holds the file.
use crate::planner::MoveTask;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Bounded exponential backoff for locked files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,
    /// Delay before the first retry; doubled for each further retry.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            base_delay: Duration::from_millis(200),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }
}

/// A completed move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Moved {
    pub from: PathBuf,
    pub to: PathBuf,
    pub category: String,
    /// Number of attempts it took.
    pub attempts: u32,
    /// True when the file crossed volumes and was copied instead of renamed.
    pub copied: bool,
}

/// Errors that can occur while moving a single file.
///
/// All of them are per-file: the caller logs them and carries on with the batch.
#[derive(Debug, Error)]
pub enum MoveError {
    /// The source stayed locked by another process through every retry.
    #[error("{} is in use by another process (gave up after {attempts} attempts)", .path.display())]
    Locked { path: PathBuf, attempts: u32 },
    /// The OS refused access to the source or destination.
    #[error("permission denied moving {} to {}: {cause}", .from.display(), .to.display())]
    Permission {
        from: PathBuf,
        to: PathBuf,
        #[source]
        cause: io::Error,
    },
    /// Something appeared at the destination after planning.
    #[error("destination {} already exists", .path.display())]
    DestinationExists { path: PathBuf },
    /// Any other OS-level failure (path too long, disk full, source vanished, ...).
    #[error("failed to move {} to {}: {cause}", .from.display(), .to.display())]
    Other {
        from: PathBuf,
        to: PathBuf,
        #[source]
        cause: io::Error,
    },
}

impl MoveError {
    fn from_io(task: &MoveTask, cause: io::Error, attempts: u32) -> Self {
        if is_lock_error(&cause) {
            Self::Locked {
                path: task.source.clone(),
                attempts,
            }
        } else if cause.kind() == io::ErrorKind::PermissionDenied {
            Self::Permission {
                from: task.source.clone(),
                to: task.destination.clone(),
                cause,
            }
        } else {
            Self::Other {
                from: task.source.clone(),
                to: task.destination.clone(),
                cause,
            }
        }
    }
}

/// Executes planned moves.
#[derive(Debug, Clone, Default)]
pub struct FileMover {
    retry: RetryPolicy,
}

impl FileMover {
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Moves `task.source` to `task.destination`.
    ///
    /// The destination directory is created if it doesn't exist. An existing
    /// destination is never overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`MoveError::Locked`] once the retry budget is spent on a file
    /// that is in use; every other failure is reported immediately.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use dorg::mover::{FileMover, RetryPolicy};
    /// use dorg::planner::MoveTask;
    /// use std::path::PathBuf;
    ///
    /// let task = MoveTask {
    ///     source: PathBuf::from("/home/me/Downloads/report.pdf"),
    ///     destination: PathBuf::from("/home/me/Downloads/Documents/report.pdf"),
    ///     category: "Documents".to_string(),
    /// };
    /// match FileMover::new(RetryPolicy::default()).execute(&task) {
    ///     Ok(moved) => println!("Moved {} to {}", moved.from.display(), moved.to.display()),
    ///     Err(e) => eprintln!("Move failed: {}", e),
    /// }
    /// ```
    pub fn execute(&self, task: &MoveTask) -> Result<Moved, MoveError> {
        if let Some(parent) = task.destination.parent() {
            fs::create_dir_all(parent).map_err(|e| MoveError::from_io(task, e, 1))?;
        }

        if fs::symlink_metadata(&task.destination).is_ok() {
            return Err(MoveError::DestinationExists {
                path: task.destination.clone(),
            });
        }

        let (result, attempts) =
            retry_when_locked(&self.retry, || move_file(&task.source, &task.destination));
        let copied = result.map_err(|e| MoveError::from_io(task, e, attempts))?;

        Ok(Moved {
            from: task.source.clone(),
            to: task.destination.clone(),
            category: task.category.clone(),
            attempts,
            copied,
        })
    }
}

/// Runs `op` until it succeeds, fails with something other than a lock error,
/// or the policy's attempts are used up. Returns the last result and the
/// number of attempts made.
fn retry_when_locked<T>(
    policy: &RetryPolicy,
    mut op: impl FnMut() -> io::Result<T>,
) -> (io::Result<T>, u32) {
    let mut attempt = 1;
    loop {
        match op() {
            Err(e) if is_lock_error(&e) && attempt < policy.attempts => {
                let delay = policy.delay_after(attempt);
                debug!(attempt, delay_ms = delay.as_millis() as u64, error = %e, "file locked, retrying");
                thread::sleep(delay);
                attempt += 1;
            }
            result => return (result, attempt),
        }
    }
}

/// Renames `from` to `to`, copying and removing when the rename crosses volumes.
/// Returns whether a copy was needed.
pub(crate) fn move_file(from: &Path, to: &Path) -> io::Result<bool> {
    match fs::rename(from, to) {
        Ok(()) => Ok(false),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            warn!(error = %e, "atomic rename failed, falling back to copy+remove");
            copy_then_remove(from, to, |from, to| fs::copy(from, to))?;
            Ok(true)
        }
        Err(e) => Err(e),
    }
}

/// Copies `from` to `to` with `copy`, then removes `from`.
///
/// On any failure `to` is removed again, so the file exists exactly once and
/// no truncated copy is left to take up a destination name. `to` must not
/// exist beforehand.
fn copy_then_remove(
    from: &Path,
    to: &Path,
    copy: impl FnOnce(&Path, &Path) -> io::Result<u64>,
) -> io::Result<()> {
    if let Err(e) = copy(from, to) {
        let _ = fs::remove_file(to);
        return Err(e);
    }
    if let Err(e) = fs::remove_file(from) {
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

fn is_lock_error(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ResourceBusy | io::ErrorKind::ExecutableFileBusy | io::ErrorKind::WouldBlock
    ) || is_sharing_violation(error)
}

#[cfg(windows)]
fn is_sharing_violation(error: &io::Error) -> bool {
    // ERROR_SHARING_VIOLATION, ERROR_LOCK_VIOLATION
    matches!(error.raw_os_error(), Some(32 | 33))
}

#[cfg(not(windows))]
fn is_sharing_violation(_error: &io::Error) -> bool {
    false
}
