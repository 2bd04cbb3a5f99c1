//! Command-line interface for dorg.
//!
//! This module handles argument parsing, the top-level error type with its
//! exit codes, and dispatching to an organize run or an undo.

use crate::config::ConfigError;
use crate::context::{AppContext, AppPaths};
use crate::controller::{RunController, RunMode, RunOptions};
use crate::journal::JournalError;
use crate::output::OutputFormatter;
use crate::undo::UndoManager;
use crate::watcher::WatcherError;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use thiserror::Error;
use tracing::info;

/// Sort a downloads folder into category subdirectories.
///
/// Without `--watch` a single pass is made over the folder. The configuration
/// is read from `config.toml` next to the executable.
#[derive(Debug, Parser)]
#[command(name = "dorg", version, about)]
pub struct Cli {
    /// Organize the current contents once and exit (default)
    #[arg(long, conflicts_with = "watch")]
    pub once: bool,

    /// Keep polling the folder until interrupted
    #[arg(long)]
    pub watch: bool,

    /// Log the planned moves without touching any file
    #[arg(long)]
    pub dry: bool,

    /// Alternative configuration file, relative to the executable's directory
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Move the files of the last run back where they came from
    #[arg(long, conflicts_with_all = ["once", "watch", "dry"])]
    pub undo: bool,
}

impl Cli {
    pub fn run_options(&self) -> RunOptions {
        RunOptions {
            mode: if self.watch { RunMode::Watch } else { RunMode::Once },
            dry_run: self.dry,
        }
    }
}

/// Fatal errors that end the process.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Watcher(#[from] WatcherError),
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error("cannot locate the executable's directory: {0}")]
    AppDir(#[source] std::io::Error),
    #[error("cannot set up logging in {}: {reason}", .path.display())]
    Logging { path: PathBuf, reason: String },
}

impl AppError {
    /// 1 for configuration problems, 2 for I/O and startup failures.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 1,
            _ => 2,
        }
    }
}

/// Runs the command described by `cli`.
///
/// # Examples
///
/// ```no_run
/// use clap::Parser;
/// use dorg::cli::{Cli, run_cli};
/// use dorg::context::AppPaths;
/// use std::sync::atomic::AtomicBool;
///
/// let cli = Cli::parse_from(["dorg", "--once", "--dry"]);
/// let paths = AppPaths::from_current_exe(cli.config.as_deref()).expect("exe dir");
/// if let Err(e) = run_cli(&cli, paths, &AtomicBool::new(false)) {
///     eprintln!("Error: {e}");
/// }
/// ```
pub fn run_cli(cli: &Cli, paths: AppPaths, stop: &AtomicBool) -> Result<(), AppError> {
    if cli.undo {
        return undo_last_run(&paths);
    }

    let ctx = AppContext::load(paths)?;
    let report = RunController::new(&ctx, cli.run_options()).run(stop)?;
    OutputFormatter::run_summary(&report);
    Ok(())
}

fn undo_last_run(paths: &AppPaths) -> Result<(), AppError> {
    info!("undoing previous organization");
    let report = UndoManager::undo(&paths.history_file)?;
    OutputFormatter::undo_summary(&report);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_defaults_to_single_pass() {
        let cli = Cli::parse_from(["dorg"]);
        assert_eq!(
            cli.run_options(),
            RunOptions {
                mode: RunMode::Once,
                dry_run: false
            }
        );
    }

    #[test]
    fn test_watch_and_dry_combine() {
        let cli = Cli::parse_from(["dorg", "--watch", "--dry", "--config", "alt.toml"]);
        assert_eq!(
            cli.run_options(),
            RunOptions {
                mode: RunMode::Watch,
                dry_run: true
            }
        );
        assert_eq!(cli.config.as_deref(), Some(Path::new("alt.toml")));
    }

    #[test]
    fn test_once_conflicts_with_watch() {
        assert!(Cli::try_parse_from(["dorg", "--once", "--watch"]).is_err());
    }

    #[test]
    fn test_undo_is_exclusive() {
        assert!(Cli::try_parse_from(["dorg", "--undo"]).is_ok());
        assert!(Cli::try_parse_from(["dorg", "--undo", "--dry"]).is_err());
    }

    #[test]
    fn test_unknown_flag_is_rejected() {
        assert!(Cli::try_parse_from(["dorg", "--force"]).is_err());
    }

    #[test]
    fn test_exit_codes() {
        let config = AppError::Config(ConfigError::ConfigNotFound(PathBuf::from("config.toml")));
        assert_eq!(config.exit_code(), 1);

        let io = AppError::AppDir(std::io::Error::from(std::io::ErrorKind::NotFound));
        assert_eq!(io.exit_code(), 2);
    }
}
