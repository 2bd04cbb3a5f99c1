//! Per-run outcome tallies.

use chrono::{DateTime, Local};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// What happened to one settled file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Moved for real.
    Moved {
        source: PathBuf,
        destination: PathBuf,
        category: String,
    },
    /// Dry run: would have been moved.
    Planned {
        source: PathBuf,
        destination: PathBuf,
        category: String,
    },
    /// No rule matched.
    Unmatched,
    /// The file already sits at its planned destination.
    AlreadyInPlace,
    /// Planning or moving failed.
    Failed { locked: bool },
}

/// One move decision, real or simulated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub category: String,
}

/// Aggregate counts for one invocation.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub dry_run: bool,
    pub started_at: DateTime<Local>,
    pub finished_at: Option<DateTime<Local>>,
    pub moved: usize,
    /// Moves computed but not applied because of `--dry`.
    pub planned: usize,
    pub unmatched: usize,
    pub already_in_place: usize,
    pub errored: usize,
    /// Moved (or planned, in a dry run) files per category.
    pub by_category: BTreeMap<String, usize>,
    /// Every move decision in the order it was made.
    pub decisions: Vec<PlannedMove>,
}

impl RunReport {
    pub fn new(dry_run: bool) -> Self {
        Self {
            dry_run,
            started_at: Local::now(),
            finished_at: None,
            moved: 0,
            planned: 0,
            unmatched: 0,
            already_in_place: 0,
            errored: 0,
            by_category: BTreeMap::new(),
            decisions: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: &FileOutcome) {
        match outcome {
            FileOutcome::Moved {
                source,
                destination,
                category,
            } => {
                self.moved += 1;
                self.record_decision(source, destination, category);
            }
            FileOutcome::Planned {
                source,
                destination,
                category,
            } => {
                self.planned += 1;
                self.record_decision(source, destination, category);
            }
            FileOutcome::Unmatched => self.unmatched += 1,
            FileOutcome::AlreadyInPlace => self.already_in_place += 1,
            FileOutcome::Failed { .. } => self.errored += 1,
        }
    }

    fn record_decision(&mut self, source: &Path, destination: &Path, category: &str) {
        *self.by_category.entry(category.to_string()).or_insert(0) += 1;
        self.decisions.push(PlannedMove {
            source: source.to_path_buf(),
            destination: destination.to_path_buf(),
            category: category.to_string(),
        });
    }

    /// Files left where they were.
    pub fn skipped(&self) -> usize {
        self.unmatched + self.already_in_place
    }

    /// Files that were resolved one way or another.
    pub fn total(&self) -> usize {
        self.moved + self.planned + self.skipped() + self.errored
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Local::now());
    }

    /// Writes the one-line run summary to the log.
    pub fn log_summary(&self) {
        let elapsed = self
            .finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
            .unwrap_or_default();
        info!(
            moved = self.moved,
            planned = self.planned,
            skipped = self.skipped(),
            errored = self.errored,
            elapsed_ms = elapsed,
            dry_run = self.dry_run,
            "run summary"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn moved(name: &str, category: &str) -> FileOutcome {
        FileOutcome::Moved {
            source: PathBuf::from("/in").join(name),
            destination: PathBuf::from("/in").join(category).join(name),
            category: category.to_string(),
        }
    }

    #[test]
    fn test_record_counts_every_outcome() {
        let mut report = RunReport::new(false);
        report.record(&moved("a.pdf", "Documents"));
        report.record(&moved("b.pdf", "Documents"));
        report.record(&moved("c.png", "Images"));
        report.record(&FileOutcome::Unmatched);
        report.record(&FileOutcome::AlreadyInPlace);
        report.record(&FileOutcome::Failed { locked: true });

        assert_eq!(report.moved, 3);
        assert_eq!(report.skipped(), 2);
        assert_eq!(report.errored, 1);
        assert_eq!(report.total(), 6);
        assert_eq!(report.by_category.get("Documents"), Some(&2));
        assert_eq!(report.by_category.get("Images"), Some(&1));
        assert_eq!(report.decisions.len(), 3);
    }

    #[test]
    fn test_planned_outcomes_count_separately() {
        let mut report = RunReport::new(true);
        report.record(&FileOutcome::Planned {
            source: PathBuf::from("/in/a.pdf"),
            destination: PathBuf::from("/in/Documents/a.pdf"),
            category: "Documents".to_string(),
        });

        assert_eq!(report.moved, 0);
        assert_eq!(report.planned, 1);
        assert_eq!(report.by_category.get("Documents"), Some(&1));
    }

    #[test]
    fn test_finish_sets_timestamp() {
        let mut report = RunReport::new(false);
        assert!(report.finished_at.is_none());
        report.finish();
        assert!(report.finished_at.is_some_and(|end| end >= report.started_at));
    }
}
