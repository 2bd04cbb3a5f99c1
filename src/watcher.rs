//! Polling directory watcher.
//!
//! Downloads are written incrementally, so a file is only handed on once its
//! size and modification time have stayed the same across consecutive polls
//! spanning at least the debounce window. Only regular files directly inside
//! the watched directory are considered; category subdirectories are never
//! descended into.

use crate::config::{CompiledFilters, OrganizerSettings};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};
use thiserror::Error;
use tracing::{debug, trace};

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("cannot read watched directory {}: {cause}", .path.display())]
    ReadDir {
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },
}

/// Size and modification time seen by one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub size: u64,
    pub modified: SystemTime,
}

/// A file being tracked until it settles.
#[derive(Debug, Clone)]
struct Candidate {
    observation: Observation,
    stable_since: Instant,
    /// Consecutive polls that saw the same observation.
    confirmations: u32,
    seq: u64,
}

/// A file whose write appears complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettledFile {
    pub path: PathBuf,
    pub observation: Observation,
}

/// Tracks candidates in one directory and emits the ones that settled.
#[derive(Debug)]
pub struct DirectoryWatcher<'a> {
    dir: PathBuf,
    debounce: Duration,
    min_age: Duration,
    filters: &'a CompiledFilters,
    candidates: HashMap<PathBuf, Candidate>,
    /// Files already handled this run, with the observation they had then.
    resolved: HashMap<PathBuf, Observation>,
    next_seq: u64,
}

impl<'a> DirectoryWatcher<'a> {
    pub fn new(
        dir: impl Into<PathBuf>,
        debounce: Duration,
        min_age: Duration,
        filters: &'a CompiledFilters,
    ) -> Self {
        Self {
            dir: dir.into(),
            debounce,
            min_age,
            filters,
            candidates: HashMap::new(),
            resolved: HashMap::new(),
            next_seq: 0,
        }
    }

    pub fn from_settings(settings: &'a OrganizerSettings) -> Self {
        Self::new(
            settings.watch_dir.clone(),
            settings.debounce,
            settings.min_age,
            &settings.filters,
        )
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of files seen but not yet settled.
    pub fn pending(&self) -> usize {
        self.candidates.len()
    }

    /// Single enumeration pass; every eligible file counts as settled at once.
    pub fn scan_once(&mut self, wall_now: SystemTime) -> Result<Vec<SettledFile>, WatcherError> {
        let settled = self
            .enumerate(wall_now)?
            .into_iter()
            .filter(|(path, observation)| self.resolved.get(path) != Some(observation))
            .map(|(path, observation)| SettledFile { path, observation })
            .collect();
        self.candidates.clear();
        Ok(settled)
    }

    /// Polls using the current clocks.
    pub fn poll(&mut self) -> Result<Vec<SettledFile>, WatcherError> {
        self.poll_at(Instant::now(), SystemTime::now())
    }

    /// Polls the directory as of `now` and returns newly settled files in
    /// discovery order.
    pub fn poll_at(
        &mut self,
        now: Instant,
        wall_now: SystemTime,
    ) -> Result<Vec<SettledFile>, WatcherError> {
        let seen = self.enumerate(wall_now)?;
        let present: HashSet<&PathBuf> = seen.iter().map(|(path, _)| path).collect();
        self.candidates.retain(|path, _| present.contains(path));
        self.resolved.retain(|path, _| present.contains(path));

        for (path, observation) in &seen {
            if self.resolved.get(path) == Some(observation) {
                continue;
            }
            // changed since it was handled: evaluate it again from scratch
            self.resolved.remove(path);

            match self.candidates.get_mut(path) {
                Some(candidate) if candidate.observation == *observation => {
                    candidate.confirmations += 1;
                }
                Some(candidate) => {
                    trace!(path = %path.display(), size = observation.size, "candidate still changing");
                    candidate.observation = *observation;
                    candidate.stable_since = now;
                    candidate.confirmations = 0;
                }
                None => {
                    debug!(path = %path.display(), size = observation.size, "new candidate");
                    self.candidates.insert(
                        path.clone(),
                        Candidate {
                            observation: *observation,
                            stable_since: now,
                            confirmations: 0,
                            seq: self.next_seq,
                        },
                    );
                    self.next_seq += 1;
                }
            }
        }

        let debounce = self.debounce;
        let mut ready: Vec<(u64, PathBuf)> = self
            .candidates
            .iter()
            .filter(|(_, c)| {
                c.confirmations > 0 && now.saturating_duration_since(c.stable_since) >= debounce
            })
            .map(|(path, c)| (c.seq, path.clone()))
            .collect();
        ready.sort();

        Ok(ready
            .into_iter()
            .filter_map(|(_, path)| {
                self.candidates.remove(&path).map(|c| SettledFile {
                    path,
                    observation: c.observation,
                })
            })
            .collect())
    }

    /// Records that `file` was handled, so it is not emitted again unless it changes.
    pub fn mark_resolved(&mut self, file: &SettledFile) {
        self.resolved.insert(file.path.clone(), file.observation);
    }

    /// Drops all knowledge of `path`; it will be tracked afresh on the next poll.
    pub fn forget(&mut self, path: &Path) {
        self.candidates.remove(path);
        self.resolved.remove(path);
    }

    /// Lists eligible regular files, sorted by path.
    fn enumerate(&self, wall_now: SystemTime) -> Result<Vec<(PathBuf, Observation)>, WatcherError> {
        let entries = fs::read_dir(&self.dir).map_err(|cause| WatcherError::ReadDir {
            path: self.dir.clone(),
            cause,
        })?;

        let mut files = Vec::new();
        for entry in entries.flatten() {
            if !entry.file_type().is_ok_and(|t| t.is_file()) {
                continue;
            }
            let name = entry.file_name();
            if !self.filters.should_include(Path::new(&name)) {
                trace!(file = %name.to_string_lossy(), "filtered out");
                continue;
            }
            // the file may vanish between listing and stat
            let Ok(metadata) = entry.metadata() else {
                continue;
            };
            let Ok(modified) = metadata.modified() else {
                continue;
            };
            let age = wall_now.duration_since(modified).unwrap_or(Duration::ZERO);
            if age < self.min_age {
                continue;
            }
            files.push((
                entry.path(),
                Observation {
                    size: metadata.len(),
                    modified,
                },
            ));
        }

        files.sort_by(|(a, _), (b, _)| a.cmp(b));
        Ok(files)
    }
}
