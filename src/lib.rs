//! dorg - keeps a downloads folder tidy
//!
//! This library watches a directory for files whose writes have completed,
//! classifies them with ordered, configurable rules, and moves them into
//! category subdirectories without ever overwriting anything. Runs can be
//! simulated with a dry run and reverted from the journal of the last run.

pub mod cli;
pub mod config;
pub mod context;
pub mod controller;
pub mod journal;
pub mod logging;
pub mod mover;
pub mod output;
pub mod planner;
pub mod report;
pub mod rules;
pub mod undo;
pub mod watcher;

pub use config::{CompiledFilters, ConfigError, OrganizerConfig, OrganizerSettings};
pub use context::{AppContext, AppPaths};
pub use controller::{RunController, RunMode, RunOptions, RunState};
pub use mover::{FileMover, MoveError, RetryPolicy};
pub use planner::{MovePlanner, MoveTask};
pub use report::RunReport;
pub use rules::{Classification, FileMeta, Rule, RuleSet};
pub use undo::{UndoManager, UndoReport};
pub use watcher::DirectoryWatcher;

pub use cli::{Cli, run_cli};
