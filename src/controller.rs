//! Run orchestration.
//!
//! The controller owns one run from start to finish: it drives the watcher
//! (a single scan, or a polling loop until asked to stop), pushes every
//! settled file through classification, planning and moving, and keeps the
//! [`RunReport`]. Work is strictly sequential.
//!
//! The stop flag is checked before every file, never in the middle of a move.
//! Once it is set the run enters `Draining`: the file in flight is finished,
//! files not yet reached stay where they are for the next run, and the report
//! is finalized. A single pass drains its scanned batch the same way.

use crate::context::AppContext;
use crate::journal::{Operation, OperationLog};
use crate::mover::{FileMover, MoveError};
use crate::planner::MovePlanner;
use crate::report::{FileOutcome, RunReport};
use crate::rules::{Classification, FileMeta};
use crate::watcher::{DirectoryWatcher, SettledFile, WatcherError};
use chrono::Local;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

/// Longest uninterrupted sleep while waiting for the next poll.
const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Single enumeration pass, then exit.
    Once,
    /// Poll until stopped.
    Watch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Scanning,
    Watching,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Compute and log plans without touching the filesystem.
    pub dry_run: bool,
}

pub struct RunController<'a> {
    ctx: &'a AppContext,
    options: RunOptions,
    state: RunState,
    planner: MovePlanner,
    mover: FileMover,
    journal: OperationLog,
    report: RunReport,
}

impl<'a> RunController<'a> {
    pub fn new(ctx: &'a AppContext, options: RunOptions) -> Self {
        let settings = &ctx.settings;
        Self {
            ctx,
            options,
            state: RunState::Idle,
            planner: MovePlanner::new(settings.max_plan_attempts),
            mover: FileMover::new(settings.retry),
            journal: OperationLog::new(settings.watch_dir.clone()),
            report: RunReport::new(options.dry_run),
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Runs to completion and returns the report.
    ///
    /// The report is finalized and logged on every path out of here,
    /// including a failed first scan and a stop request.
    ///
    /// # Errors
    ///
    /// [`WatcherError`] when the watched directory cannot be read on the
    /// first pass. Later read failures in watch mode are logged and retried.
    pub fn run(mut self, stop: &AtomicBool) -> Result<RunReport, WatcherError> {
        let outcome = self.drive(stop);

        self.transition(RunState::Stopped);
        self.report.finish();
        self.report.log_summary();

        outcome.map(|()| self.report)
    }

    fn drive(&mut self, stop: &AtomicBool) -> Result<(), WatcherError> {
        let ctx = self.ctx;
        let settings = &ctx.settings;
        let mut watcher = DirectoryWatcher::from_settings(settings);

        self.transition(RunState::Scanning);
        info!(
            mode = ?self.options.mode,
            dry_run = self.options.dry_run,
            rules = settings.rules.len(),
            "organizing {}",
            settings.watch_dir.display()
        );

        match self.options.mode {
            RunMode::Once => {
                let settled = watcher.scan_once(SystemTime::now())?;
                self.transition(RunState::Draining);
                self.process_batch(&mut watcher, settled, stop);
            }
            RunMode::Watch => {
                let settled = watcher.poll()?;
                self.process_batch(&mut watcher, settled, stop);

                self.transition(RunState::Watching);
                while sleep_unless_stopped(settings.poll_interval, stop) {
                    match watcher.poll() {
                        Ok(settled) => {
                            debug!(settled = settled.len(), pending = watcher.pending(), "poll");
                            if self.options.dry_run {
                                self.planner.prune();
                            }
                            self.process_batch(&mut watcher, settled, stop);
                        }
                        Err(e) => warn!(error = %e, "{} unavailable, retrying on next poll", watcher.dir().display()),
                    }
                }
                info!("stop requested, shutting down");
                self.transition(RunState::Draining);
            }
        }

        Ok(())
    }

    /// Processes `settled` in order until done or until `stop` is set.
    /// Files not reached stay unresolved in the watcher.
    fn process_batch(
        &mut self,
        watcher: &mut DirectoryWatcher<'_>,
        settled: Vec<SettledFile>,
        stop: &AtomicBool,
    ) {
        let total = settled.len();
        for (done, file) in settled.into_iter().enumerate() {
            if stop.load(Ordering::SeqCst) {
                info!(left = total - done, "stop requested, leaving remaining files for the next run");
                return;
            }
            let outcome = self.process_file(&file);
            match outcome {
                FileOutcome::Failed { locked: true } => watcher.forget(&file.path),
                _ => watcher.mark_resolved(&file),
            }
            self.report.record(&outcome);
        }
    }

    /// Classify, plan and (unless dry) move one settled file.
    fn process_file(&mut self, file: &SettledFile) -> FileOutcome {
        let ctx = self.ctx;
        let settings = &ctx.settings;
        let path = &file.path;

        let meta = FileMeta {
            size: file.observation.size,
            modified: file.observation.modified,
            mime: if settings.rules.needs_mime() {
                sniff_mime(path)
            } else {
                None
            },
        };

        let rule = match settings.rules.classify(path, &meta, SystemTime::now()) {
            Classification::Matched(rule) => rule,
            Classification::Unmatched => {
                info!("{}: no rule matched, leaving in place", path.display());
                return FileOutcome::Unmatched;
            }
        };
        debug!(rule = rule.name(), category = rule.category(), "{} classified", path.display());

        let now = Local::now();
        let (Some(destination_dir), Some(file_name)) = (
            settings.category_dir(rule.category(), &now),
            rule.target_name(path, &now),
        ) else {
            error!("{}: cannot resolve destination for category {}", path.display(), rule.category());
            return FileOutcome::Failed { locked: false };
        };

        let task = match self
            .planner
            .plan(path, rule.category(), &destination_dir, &file_name)
        {
            Ok(task) => task,
            Err(e) => {
                error!(error = %e, "skipping {}", path.display());
                return FileOutcome::Failed { locked: false };
            }
        };

        if task.is_noop() {
            info!("{}: already in place", path.display());
            return FileOutcome::AlreadyInPlace;
        }

        if self.options.dry_run {
            info!(
                category = %task.category,
                "[DRY RUN] would move {} to {}",
                task.source.display(),
                task.destination.display()
            );
            return FileOutcome::Planned {
                source: task.source,
                destination: task.destination,
                category: task.category,
            };
        }

        let result = self.mover.execute(&task);
        self.planner.release(&task.destination);

        match result {
            Ok(moved) => {
                info!(
                    category = %moved.category,
                    attempts = moved.attempts,
                    copied = moved.copied,
                    "moved {} to {}",
                    moved.from.display(),
                    moved.to.display()
                );
                self.journal.add_operation(Operation::from(&moved));
                if let Err(e) = self.journal.save(&ctx.paths.history_file) {
                    warn!(error = %e, "could not save history, undo may be incomplete");
                }
                FileOutcome::Moved {
                    source: moved.from,
                    destination: moved.to,
                    category: moved.category,
                }
            }
            Err(e) => {
                error!(error = %e, "could not move {}", path.display());
                FileOutcome::Failed {
                    locked: matches!(e, MoveError::Locked { .. }),
                }
            }
        }
    }

    fn transition(&mut self, next: RunState) {
        debug!(from = ?self.state, to = ?next, "run state");
        self.state = next;
    }
}

/// Sleeps for `total`, waking regularly to check `stop`.
/// Returns false as soon as a stop was requested.
fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) -> bool {
    let mut remaining = total;
    loop {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        if remaining.is_zero() {
            return true;
        }
        let slice = remaining.min(STOP_CHECK_INTERVAL);
        thread::sleep(slice);
        remaining -= slice;
    }
}

/// Detects the MIME type from file content using the `infer` crate.
fn sniff_mime(path: &Path) -> Option<String> {
    match infer::get_from_path(path) {
        Ok(kind) => kind.map(|k| k.mime_type().to_string()),
        Err(e) => {
            debug!(error = %e, "could not read {} for type detection", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::AppPaths;
    use std::fs;
    use std::sync::Arc;
    use std::time::Instant;
    use tempfile::TempDir;

    const CONFIG: &str = r#"
watch_dir = "inbox"

[watch]
poll_interval_secs = 0.02
debounce_secs = 0.02

[mover]
retry_base_ms = 1

[categories]
Documents = "Documents"
Images = "Images"

[[rules]]
category = "Documents"
extensions = ["pdf"]

[[rules]]
category = "Images"
mime = ["image/"]
"#;

    const PNG_HEADER: &[u8] = &[
        0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A, 0x00, 0x00, 0x00, 0x0D, 0x49, 0x48, 0x44,
        0x52,
    ];

    fn context(app_dir: &Path) -> AppContext {
        fs::create_dir_all(app_dir.join("inbox")).expect("mkdir inbox");
        fs::write(app_dir.join("config.toml"), CONFIG).expect("write config");
        AppContext::load(AppPaths::new(app_dir, None)).expect("config loads")
    }

    #[test]
    fn test_once_moves_matching_files_and_stops() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ctx = context(temp_dir.path());
        let inbox = temp_dir.path().join("inbox");
        fs::write(inbox.join("a.pdf"), "pdf").expect("write");
        fs::write(inbox.join("pixel"), PNG_HEADER).expect("write");
        fs::write(inbox.join("notes.txt"), "txt").expect("write");

        let controller = RunController::new(
            &ctx,
            RunOptions {
                mode: RunMode::Once,
                dry_run: false,
            },
        );
        assert_eq!(controller.state(), RunState::Idle);
        let report = controller.run(&AtomicBool::new(false)).expect("run");

        assert_eq!(report.moved, 2);
        assert_eq!(report.unmatched, 1);
        assert!(inbox.join("Documents").join("a.pdf").exists());
        assert!(inbox.join("Images").join("pixel").exists());
        assert!(inbox.join("notes.txt").exists());
        assert!(ctx.paths.history_file.exists());
    }

    #[test]
    fn test_once_fails_when_watch_dir_missing() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ctx = context(temp_dir.path());
        fs::remove_dir(temp_dir.path().join("inbox")).expect("rmdir");

        let result = RunController::new(
            &ctx,
            RunOptions {
                mode: RunMode::Once,
                dry_run: false,
            },
        )
        .run(&AtomicBool::new(false));

        assert!(result.is_err());
    }

    #[test]
    fn test_watch_moves_settled_file_and_stops_on_signal() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ctx = context(temp_dir.path());
        let inbox = temp_dir.path().join("inbox");
        fs::write(inbox.join("late.pdf"), "pdf").expect("write");

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let target = inbox.join("Documents").join("late.pdf");
        let waiter = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(10);
            while !target.exists() && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(10));
            }
            flag.store(true, Ordering::SeqCst);
        });

        let report = RunController::new(
            &ctx,
            RunOptions {
                mode: RunMode::Watch,
                dry_run: false,
            },
        )
        .run(&stop)
        .expect("run");
        waiter.join().expect("waiter thread");

        assert_eq!(report.moved, 1);
        assert!(inbox.join("Documents").join("late.pdf").exists());
        assert!(report.finished_at.is_some());
    }

    #[test]
    fn test_watch_returns_promptly_when_already_stopped() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ctx = context(temp_dir.path());

        let started = Instant::now();
        let report = RunController::new(
            &ctx,
            RunOptions {
                mode: RunMode::Watch,
                dry_run: true,
            },
        )
        .run(&AtomicBool::new(true))
        .expect("run");

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(report.total(), 0);
    }

    #[test]
    fn test_once_stops_before_first_file_when_stop_already_requested() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ctx = context(temp_dir.path());
        let inbox = temp_dir.path().join("inbox");
        for i in 0..20 {
            fs::write(inbox.join(format!("doc{i}.pdf")), "pdf").expect("write");
        }

        let report = RunController::new(
            &ctx,
            RunOptions {
                mode: RunMode::Once,
                dry_run: false,
            },
        )
        .run(&AtomicBool::new(true))
        .expect("run");

        assert_eq!(report.moved, 0);
        assert_eq!(report.total(), 0);
        assert!(report.finished_at.is_some());
        assert!(inbox.join("doc0.pdf").exists());
        assert!(!inbox.join("Documents").exists());
    }

    #[test]
    fn test_batch_stops_between_files() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ctx = context(temp_dir.path());
        let inbox = temp_dir.path().join("inbox");
        for name in ["a.pdf", "b.pdf", "c.pdf"] {
            fs::write(inbox.join(name), "pdf").expect("write");
        }

        let mut controller = RunController::new(
            &ctx,
            RunOptions {
                mode: RunMode::Once,
                dry_run: false,
            },
        );
        let mut watcher = DirectoryWatcher::from_settings(&ctx.settings);
        let mut settled = watcher.scan_once(SystemTime::now()).expect("scan");
        assert_eq!(settled.len(), 3);

        let first = settled.remove(0);
        controller.process_batch(&mut watcher, vec![first], &AtomicBool::new(false));
        controller.process_batch(&mut watcher, settled, &AtomicBool::new(true));

        assert_eq!(controller.report.moved, 1);
        assert!(inbox.join("Documents").join("a.pdf").exists());
        assert!(inbox.join("b.pdf").exists());
        assert!(inbox.join("c.pdf").exists());

        // unprocessed files are still offered by the next scan
        let again = watcher.scan_once(SystemTime::now()).expect("scan");
        assert_eq!(again.len(), 2);
    }

    #[test]
    fn test_dry_watch_prunes_reservations_of_removed_files() {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ctx = context(temp_dir.path());
        let inbox = temp_dir.path().join("inbox");
        fs::write(inbox.join("gone.pdf"), "pdf").expect("write");

        let mut controller = RunController::new(
            &ctx,
            RunOptions {
                mode: RunMode::Watch,
                dry_run: true,
            },
        );
        let mut watcher = DirectoryWatcher::from_settings(&ctx.settings);
        let settled = watcher.scan_once(SystemTime::now()).expect("scan");
        controller.process_batch(&mut watcher, settled, &AtomicBool::new(false));
        assert_eq!(controller.report.planned, 1);
        assert_eq!(controller.planner.reserved(), 1);

        fs::remove_file(inbox.join("gone.pdf")).expect("remove");
        controller.planner.prune();
        assert_eq!(controller.planner.reserved(), 0);
    }

    #[test]
    fn test_sleep_unless_stopped() {
        assert!(sleep_unless_stopped(Duration::from_millis(5), &AtomicBool::new(false)));
        assert!(!sleep_unless_stopped(Duration::from_secs(60), &AtomicBool::new(true)));
    }
}
