//! Organizer configuration.
//!
//! The configuration lives in a TOML file next to the executable. It names the
//! watched directory, the destination categories, the ordered classification
//! rules, timing knobs for the watcher and the mover, and filter rules for
//! files that must never be touched.
//!
//! # Configuration File Format
//!
//! ```toml
//! watch_dir = "~/Downloads"
//!
//! [watch]
//! poll_interval_secs = 5
//! debounce_secs = 2
//!
//! [categories]
//! Documents = "Documents"
//! Images = "Images/{YYYY}-{MM}"
//!
//! [[rules]]
//! category = "Documents"
//! extensions = ["pdf", "docx"]
//!
//! [filters.exclude]
//! extensions = ["crdownload", "part", "tmp"]
//! ```
//!
//! Unknown keys are rejected so that typos surface as errors instead of being
//! silently ignored.

use crate::context::{expand_path, render_dated_dir};
use crate::mover::RetryPolicy;
use crate::rules::{Rule, RuleSet};
use chrono::{DateTime, Local};
use glob::Pattern;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while loading or validating the configuration.
///
/// Every variant is fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found at the specified path.
    #[error("configuration file not found: {} (expected next to the executable)", .0.display())]
    ConfigNotFound(PathBuf),
    /// The file exists but could not be read.
    #[error("failed to read configuration {}: {cause}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        cause: std::io::Error,
    },
    /// Invalid TOML syntax or structure. The message carries line and column.
    #[error("invalid configuration {}: {message}", .path.display())]
    ConfigInvalid { path: PathBuf, message: String },
    /// Invalid glob pattern provided.
    #[error("{field}: invalid glob pattern '{pattern}'")]
    InvalidGlobPattern { field: String, pattern: String },
    /// Invalid regex pattern provided with the actual error reason.
    #[error("{field}: invalid regex pattern '{pattern}': {reason}")]
    InvalidRegexPattern {
        field: String,
        pattern: String,
        reason: String,
    },
    /// A value that parsed but makes no sense.
    #[error("{field}: {reason}")]
    InvalidField { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Raw configuration as written in the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrganizerConfig {
    /// Directory to organize.
    pub watch_dir: String,

    /// Root that relative category paths are resolved against. Defaults to `watch_dir`.
    #[serde(default)]
    pub destination_root: Option<String>,

    #[serde(default)]
    pub watch: WatchSettings,

    #[serde(default)]
    pub mover: MoverSettings,

    /// Category label to destination subdirectory.
    #[serde(default)]
    pub categories: BTreeMap<String, String>,

    /// Classification rules, evaluated in order.
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    #[serde(default)]
    pub filters: FilterRules,
}

/// Timing of the directory watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WatchSettings {
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: f64,
    /// How long size and modification time must stay unchanged before a file is settled.
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: f64,
    /// Files modified more recently than this are not considered at all.
    #[serde(default)]
    pub min_age_secs: f64,
}

fn default_poll_interval_secs() -> f64 {
    5.0
}

fn default_debounce_secs() -> f64 {
    2.0
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_poll_interval_secs(),
            debounce_secs: default_debounce_secs(),
            min_age_secs: 0.0,
        }
    }
}

/// Retry and collision limits for planning and moving.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoverSettings {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_max_plan_attempts")]
    pub max_plan_attempts: u32,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    200
}

fn default_max_plan_attempts() -> u32 {
    1000
}

impl Default for MoverSettings {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_base_ms: default_retry_base_ms(),
            max_plan_attempts: default_max_plan_attempts(),
        }
    }
}

/// One classification rule as written in the file.
///
/// Name matchers (`extensions`, `globs`, `regex`, `mime`, `match_all`) are
/// alternatives: any of them matching is enough. `older_than_days`, when set,
/// must hold as well.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RuleConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub category: String,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub globs: Vec<String>,
    #[serde(default)]
    pub regex: Vec<String>,
    /// Prefixes of the MIME type sniffed from file content, e.g. `image/`.
    #[serde(default)]
    pub mime: Vec<String>,
    #[serde(default)]
    pub match_all: bool,
    #[serde(default)]
    pub older_than_days: Option<u64>,
    /// Template for the new file stem: `{stem}`, `{ext}`, `{date}`, `{time}`.
    #[serde(default)]
    pub rename: Option<String>,
}

/// Filter rules for files that are never organized.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilterRules {
    /// Whether to include hidden files (starting with "."). Defaults to false.
    #[serde(default)]
    pub enable_hidden_files: bool,

    /// Rules for excluding files.
    #[serde(default)]
    pub exclude: ExcludeRules,

    /// Rules for including files (whitelist, overrides exclude rules).
    #[serde(default)]
    pub include: IncludeRules,
}

impl Default for FilterRules {
    fn default() -> Self {
        Self {
            enable_hidden_files: false,
            exclude: ExcludeRules {
                extensions: ["crdownload", "part", "partial", "download", "tmp"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
                ..Default::default()
            },
            include: IncludeRules::default(),
        }
    }
}

/// Rules for excluding files from organization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExcludeRules {
    /// Exact filenames to exclude (e.g., "desktop.ini", "Thumbs.db").
    #[serde(default)]
    pub filenames: Vec<String>,

    /// Glob patterns to exclude (e.g., "~$*").
    #[serde(default)]
    pub patterns: Vec<String>,

    /// File extensions to exclude (e.g., "crdownload", "part").
    #[serde(default)]
    pub extensions: Vec<String>,

    /// Regex patterns to exclude.
    #[serde(default)]
    pub regex: Vec<String>,
}

/// Rules for including files, overriding exclude rules (whitelist).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IncludeRules {
    /// Glob patterns that override exclude rules.
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Validated configuration with every path resolved and every pattern compiled.
#[derive(Debug)]
pub struct OrganizerSettings {
    pub watch_dir: PathBuf,
    pub destination_root: PathBuf,
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub min_age: Duration,
    pub retry: RetryPolicy,
    pub max_plan_attempts: u32,
    /// Category label to destination directory (may still hold date placeholders).
    pub categories: BTreeMap<String, PathBuf>,
    pub rules: RuleSet,
    pub filters: CompiledFilters,
}

impl OrganizerSettings {
    /// Destination directory for `category`, with date placeholders filled in from `now`.
    pub fn category_dir(&self, category: &str, now: &DateTime<Local>) -> Option<PathBuf> {
        self.categories
            .get(category)
            .map(|template| render_dated_dir(template, now))
    }
}

impl OrganizerConfig {
    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ConfigNotFound` if file does not exist.
    /// Returns `ConfigError::ConfigInvalid` if TOML parsing fails.
    /// Returns `ConfigError::Io` if file cannot be read.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::ConfigNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|cause| ConfigError::Io {
            path: path.to_path_buf(),
            cause,
        })?;

        Self::parse(&content).map_err(|message| ConfigError::ConfigInvalid {
            path: path.to_path_buf(),
            message,
        })
    }

    /// Parses TOML text, returning the parser's message (with line and column) on failure.
    pub fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Validates the configuration and resolves relative paths against `app_dir`.
    ///
    /// # Errors
    ///
    /// Returns an error naming the offending field for bad durations, limits,
    /// unknown categories, and invalid glob or regex patterns.
    pub fn compile(self, app_dir: &Path) -> Result<OrganizerSettings, ConfigError> {
        if self.watch_dir.trim().is_empty() {
            return Err(ConfigError::invalid("watch_dir", "must not be empty"));
        }
        let watch_dir = expand_path(&self.watch_dir, app_dir);
        let destination_root = match &self.destination_root {
            Some(root) => expand_path(root, app_dir),
            None => watch_dir.clone(),
        };

        let poll_interval = seconds("watch.poll_interval_secs", self.watch.poll_interval_secs)?;
        if poll_interval.is_zero() {
            return Err(ConfigError::invalid(
                "watch.poll_interval_secs",
                "must be greater than zero",
            ));
        }
        let debounce = seconds("watch.debounce_secs", self.watch.debounce_secs)?;
        let min_age = seconds("watch.min_age_secs", self.watch.min_age_secs)?;

        if self.mover.retry_attempts == 0 {
            return Err(ConfigError::invalid("mover.retry_attempts", "must be at least 1"));
        }
        if self.mover.max_plan_attempts == 0 {
            return Err(ConfigError::invalid(
                "mover.max_plan_attempts",
                "must be at least 1",
            ));
        }

        let mut categories = BTreeMap::new();
        for (label, subdir) in &self.categories {
            let field = format!("categories.{label}");
            if label.trim().is_empty() {
                return Err(ConfigError::invalid("categories", "labels must not be empty"));
            }
            if subdir.trim().is_empty() {
                return Err(ConfigError::invalid(field, "destination must not be empty"));
            }
            categories.insert(label.clone(), expand_path(subdir, &destination_root));
        }

        let rules = self
            .rules
            .iter()
            .enumerate()
            .map(|(index, raw)| Rule::compile(index, raw, &categories))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(OrganizerSettings {
            watch_dir,
            destination_root,
            poll_interval,
            debounce,
            min_age,
            retry: RetryPolicy {
                attempts: self.mover.retry_attempts,
                base_delay: Duration::from_millis(self.mover.retry_base_ms),
            },
            max_plan_attempts: self.mover.max_plan_attempts,
            categories,
            rules: RuleSet::new(rules),
            filters: CompiledFilters::new(self.filters)?,
        })
    }
}

fn seconds(field: &str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| ConfigError::invalid(field, format!("{value} is not a valid number of seconds")))
}

/// Compiled, optimized filter structures for efficient file matching.
///
/// This struct pre-processes all filter rules (glob patterns, regex patterns, etc.)
/// so that matching does not reparse patterns on each file.
#[derive(Debug)]
pub struct CompiledFilters {
    enable_hidden_files: bool,
    exclude_filenames: HashSet<String>,
    exclude_extensions: HashSet<String>,
    exclude_patterns: Vec<Pattern>,
    exclude_regexes: Vec<Regex>,
    include_patterns: Vec<Pattern>,
}

impl CompiledFilters {
    /// Create compiled filters from filter rules.
    ///
    /// # Errors
    ///
    /// Returns an error if any glob or regex patterns are invalid.
    pub fn new(rules: FilterRules) -> Result<Self, ConfigError> {
        let exclude_patterns = compile_globs("filters.exclude.patterns", &rules.exclude.patterns)?;
        let include_patterns = compile_globs("filters.include.patterns", &rules.include.patterns)?;
        let exclude_regexes = compile_regexes("filters.exclude.regex", &rules.exclude.regex)?;

        Ok(Self {
            enable_hidden_files: rules.enable_hidden_files,
            exclude_filenames: rules.exclude.filenames.into_iter().collect(),
            exclude_extensions: rules
                .exclude
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            exclude_patterns,
            exclude_regexes,
            include_patterns,
        })
    }

    /// Check if a file should be considered for organization.
    ///
    /// Checks are performed in this order, with early termination:
    /// 1. Include patterns (whitelist) - if matched, always include
    /// 2. Hidden file filter - if hidden and disabled, exclude
    /// 3. Exact filename match - if matched, exclude
    /// 4. File extension match - if matched, exclude
    /// 5. Glob pattern match - if matched, exclude
    /// 6. Regex pattern match - if matched, exclude
    /// 7. Default: include
    pub fn should_include(&self, file_path: &Path) -> bool {
        let file_name = file_path
            .file_name()
            .map(|n| n.to_string_lossy())
            .unwrap_or_default();

        if self.include_patterns.iter().any(|p| p.matches_path(file_path)) {
            return true;
        }

        if !self.enable_hidden_files && file_name.starts_with('.') {
            return false;
        }

        if self.exclude_filenames.contains(file_name.as_ref()) {
            return false;
        }

        if let Some(ext) = file_path.extension() {
            let ext_lower = ext.to_string_lossy().to_lowercase();
            if self.exclude_extensions.contains(&ext_lower) {
                return false;
            }
        }

        if self.exclude_patterns.iter().any(|p| p.matches_path(file_path)) {
            return false;
        }

        !self.exclude_regexes.iter().any(|r| r.is_match(&file_name))
    }
}

pub(crate) fn compile_globs(field: &str, patterns: &[String]) -> Result<Vec<Pattern>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Pattern::new(pattern).map_err(|_| ConfigError::InvalidGlobPattern {
                field: field.to_string(),
                pattern: pattern.clone(),
            })
        })
        .collect()
}

pub(crate) fn compile_regexes(field: &str, patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|e| ConfigError::InvalidRegexPattern {
                field: field.to_string(),
                pattern: pattern.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}
