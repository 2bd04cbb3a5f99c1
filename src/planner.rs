//! Destination planning.
//!
//! The planner turns a classified file into a [`MoveTask`] whose destination
//! does not collide with anything on disk or with anything planned earlier in
//! the same run. Colliding names get a ` (N)` suffix before the extension.

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// A planned move. Consumed once by the mover, or dropped in dry-run mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveTask {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub category: String,
}

impl MoveTask {
    /// True when the file already sits where it would be moved to.
    pub fn is_noop(&self) -> bool {
        self.source == self.destination
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    /// Every candidate name up to the configured cap was taken.
    #[error("no free destination name for {} in {} after {attempts} attempts", .file.display(), .directory.display())]
    Exhausted {
        file: PathBuf,
        directory: PathBuf,
        attempts: u32,
    },
}

/// Computes collision-free destinations.
///
/// Besides checking the filesystem, the planner remembers destinations it has
/// handed out, so a dry run plans the same names a real run would.
#[derive(Debug)]
pub struct MovePlanner {
    max_attempts: u32,
    /// Destination handed out, keyed to the source it was planned for.
    reserved: HashMap<PathBuf, PathBuf>,
}

impl MovePlanner {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            reserved: HashMap::new(),
        }
    }

    /// Plans a move of `source` into `destination_dir` under `file_name`.
    ///
    /// Tries `file_name` first, then `stem (1).ext`, `stem (2).ext`, ... up to
    /// `max_attempts` suffixes.
    ///
    /// # Errors
    ///
    /// [`PlanError::Exhausted`] when no free name was found.
    pub fn plan(
        &mut self,
        source: &Path,
        category: &str,
        destination_dir: &Path,
        file_name: &OsStr,
    ) -> Result<MoveTask, PlanError> {
        let task = |destination: PathBuf| MoveTask {
            source: source.to_path_buf(),
            destination,
            category: category.to_string(),
        };

        let first = destination_dir.join(file_name);
        if first == source {
            return Ok(task(first));
        }
        if self.try_reserve(&first, source) {
            return Ok(task(first));
        }

        let name = Path::new(file_name);
        let stem = name.file_stem().unwrap_or(file_name);
        let ext = name.extension();
        for n in 1..=self.max_attempts {
            let candidate = destination_dir.join(suffixed_name(stem, ext, n));
            if self.try_reserve(&candidate, source) {
                return Ok(task(candidate));
            }
        }

        Err(PlanError::Exhausted {
            file: source.to_path_buf(),
            directory: destination_dir.to_path_buf(),
            attempts: self.max_attempts,
        })
    }

    /// Forgets a reservation once its move has been carried out or abandoned.
    pub fn release(&mut self, destination: &Path) {
        self.reserved.remove(destination);
    }

    /// Drops reservations whose source file no longer exists.
    ///
    /// Dry runs never release what they plan; in a long watch session this
    /// keeps the set bounded by the files still waiting in the directory.
    pub fn prune(&mut self) {
        self.reserved
            .retain(|_, source| fs::symlink_metadata(source).is_ok());
    }

    /// Number of destinations currently held.
    pub fn reserved(&self) -> usize {
        self.reserved.len()
    }

    fn try_reserve(&mut self, candidate: &Path, source: &Path) -> bool {
        // symlink_metadata so that dangling links also count as taken
        if self.reserved.contains_key(candidate) || fs::symlink_metadata(candidate).is_ok() {
            return false;
        }
        self.reserved
            .insert(candidate.to_path_buf(), source.to_path_buf());
        true
    }
}

fn suffixed_name(stem: &OsStr, ext: Option<&OsStr>, n: u32) -> OsString {
    let mut name = stem.to_os_string();
    name.push(format!(" ({n})"));
    if let Some(ext) = ext {
        name.push(".");
        name.push(ext);
    }
    name
}
