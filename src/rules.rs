//! Rule matching: decides which category a file belongs to.
//!
//! Rules are evaluated in configured order and the first one that matches wins.
//! Classification is a pure function of the path, the metadata the caller
//! observed, and the evaluation instant, so it never touches the filesystem.
//!
//! # Examples
//!
//! ```
//! use dorg::config::RuleConfig;
//! use dorg::rules::{Classification, FileMeta, Rule, RuleSet};
//! use std::collections::BTreeMap;
//! use std::path::{Path, PathBuf};
//! use std::time::SystemTime;
//!
//! let mut categories = BTreeMap::new();
//! categories.insert("Documents".to_string(), PathBuf::from("/dl/Documents"));
//! let raw = RuleConfig {
//!     category: "Documents".to_string(),
//!     extensions: vec!["pdf".to_string()],
//!     ..Default::default()
//! };
//! let rules = RuleSet::new(vec![Rule::compile(0, &raw, &categories).unwrap()]);
//!
//! let now = SystemTime::now();
//! let meta = FileMeta { size: 10, modified: now, mime: None };
//! match rules.classify(Path::new("/dl/report.PDF"), &meta, now) {
//!     Classification::Matched(rule) => assert_eq!(rule.category(), "Documents"),
//!     Classification::Unmatched => unreachable!(),
//! }
//! ```

use crate::config::{ConfigError, RuleConfig, compile_globs, compile_regexes};
use chrono::{DateTime, Local};
use glob::{MatchOptions, Pattern};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Characters that are not allowed in file names on Windows.
const FORBIDDEN_NAME_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const GLOB_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Metadata the matcher may look at, gathered by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub size: u64,
    pub modified: SystemTime,
    /// MIME type sniffed from the file content, when available.
    pub mime: Option<String>,
}

/// Result of classifying a file.
#[derive(Debug, Clone, Copy)]
pub enum Classification<'a> {
    Matched(&'a Rule),
    Unmatched,
}

/// A compiled, immutable classification rule.
#[derive(Debug, Clone)]
pub struct Rule {
    name: String,
    category: String,
    extensions: HashSet<String>,
    globs: Vec<Pattern>,
    regexes: Vec<Regex>,
    mime_prefixes: Vec<String>,
    match_all: bool,
    older_than: Option<Duration>,
    rename: Option<String>,
}

impl Rule {
    /// Compiles the rule at position `index` of the configuration.
    ///
    /// # Errors
    ///
    /// Fails when the category is not declared in `categories`, when the rule
    /// has no matcher at all, or when a pattern does not compile.
    pub fn compile(
        index: usize,
        raw: &RuleConfig,
        categories: &BTreeMap<String, PathBuf>,
    ) -> Result<Self, ConfigError> {
        let field = |name: &str| format!("rules[{index}].{name}");

        if !categories.contains_key(&raw.category) {
            return Err(ConfigError::invalid(
                field("category"),
                format!("unknown category '{}'", raw.category),
            ));
        }

        let has_name_matcher = raw.match_all
            || !raw.extensions.is_empty()
            || !raw.globs.is_empty()
            || !raw.regex.is_empty()
            || !raw.mime.is_empty();
        if !has_name_matcher && raw.older_than_days.is_none() {
            return Err(ConfigError::invalid(
                format!("rules[{index}]"),
                "needs at least one of extensions, globs, regex, mime, match_all or older_than_days",
            ));
        }

        if let Some(template) = &raw.rename
            && template.trim().is_empty()
        {
            return Err(ConfigError::invalid(field("rename"), "must not be empty"));
        }

        Ok(Self {
            name: raw
                .name
                .clone()
                .unwrap_or_else(|| format!("rule #{}", index + 1)),
            category: raw.category.clone(),
            extensions: raw
                .extensions
                .iter()
                .map(|ext| ext.trim_start_matches('.').to_lowercase())
                .collect(),
            globs: compile_globs(&field("globs"), &raw.globs)?,
            regexes: compile_regexes(&field("regex"), &raw.regex)?,
            mime_prefixes: raw.mime.iter().map(|m| m.to_lowercase()).collect(),
            match_all: raw.match_all || !has_name_matcher,
            older_than: raw
                .older_than_days
                .map(|days| Duration::from_secs(days.saturating_mul(SECS_PER_DAY))),
            rename: raw.rename.clone(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Category label this rule sends files to.
    pub fn category(&self) -> &str {
        &self.category
    }

    /// Whether evaluating this rule needs the sniffed MIME type.
    pub fn uses_mime(&self) -> bool {
        !self.mime_prefixes.is_empty()
    }

    /// Returns true when `path` with metadata `meta` satisfies this rule at `now`.
    pub fn matches(&self, path: &Path, meta: &FileMeta, now: SystemTime) -> bool {
        if let Some(threshold) = self.older_than {
            let age = now.duration_since(meta.modified).unwrap_or(Duration::ZERO);
            if age < threshold {
                return false;
            }
        }

        self.match_all || self.matches_name(path, meta)
    }

    fn matches_name(&self, path: &Path, meta: &FileMeta) -> bool {
        let Some(file_name) = path.file_name().map(|n| n.to_string_lossy()) else {
            return false;
        };

        if let Some(ext) = path.extension()
            && self
                .extensions
                .contains(&ext.to_string_lossy().to_lowercase())
        {
            return true;
        }

        if self
            .globs
            .iter()
            .any(|glob| glob.matches_with(&file_name, GLOB_OPTIONS))
        {
            return true;
        }

        if self.regexes.iter().any(|regex| regex.is_match(&file_name)) {
            return true;
        }

        match &meta.mime {
            Some(mime) => {
                let mime = mime.to_lowercase();
                self.mime_prefixes
                    .iter()
                    .any(|prefix| mime.starts_with(prefix.as_str()))
            }
            None => false,
        }
    }

    /// File name the source should have at its destination.
    ///
    /// Without a rename template this is the source's own name. With one,
    /// `{stem}`, `{ext}`, `{date}` and `{time}` are substituted, characters
    /// that are illegal in file names are replaced by `_`, and the original
    /// extension is appended.
    pub fn target_name(&self, source: &Path, now: &DateTime<Local>) -> Option<OsString> {
        let file_name = source.file_name()?;
        let Some(template) = &self.rename else {
            return Some(file_name.to_os_string());
        };

        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = source
            .extension()
            .map(|e| e.to_string_lossy().into_owned());

        let rendered = template
            .replace("{stem}", &stem)
            .replace("{ext}", ext.as_deref().unwrap_or(""))
            .replace("{date}", &now.format("%Y%m%d").to_string())
            .replace("{time}", &now.format("%H%M%S").to_string());
        let mut name: String = rendered
            .chars()
            .map(|c| if FORBIDDEN_NAME_CHARS.contains(&c) { '_' } else { c })
            .collect();
        if name.trim().is_empty() {
            name = stem;
        }

        let mut target = OsString::from(name);
        if let Some(ext) = ext {
            target.push(".");
            target.push(ext);
        }
        Some(target)
    }
}

/// The ordered rule list.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Whether any rule needs the MIME type, so callers can skip sniffing otherwise.
    pub fn needs_mime(&self) -> bool {
        self.rules.iter().any(Rule::uses_mime)
    }

    /// Returns the first rule, in configured order, that matches.
    pub fn classify(&self, path: &Path, meta: &FileMeta, now: SystemTime) -> Classification<'_> {
        self.rules
            .iter()
            .find(|rule| rule.matches(path, meta, now))
            .map_or(Classification::Unmatched, Classification::Matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn categories(labels: &[&str]) -> BTreeMap<String, PathBuf> {
        labels
            .iter()
            .map(|label| (label.to_string(), PathBuf::from("/dest").join(label)))
            .collect()
    }

    fn rule_set(raws: &[RuleConfig]) -> RuleSet {
        let cats = categories(&["Documents", "Images", "Archives", "Old", "Everything"]);
        RuleSet::new(
            raws.iter()
                .enumerate()
                .map(|(i, raw)| Rule::compile(i, raw, &cats).expect("rule compiles"))
                .collect(),
        )
    }

    fn ext_rule(category: &str, exts: &[&str]) -> RuleConfig {
        RuleConfig {
            category: category.to_string(),
            extensions: exts.iter().map(|e| e.to_string()).collect(),
            ..Default::default()
        }
    }

    fn meta_at(modified: SystemTime) -> FileMeta {
        FileMeta {
            size: 1,
            modified,
            mime: None,
        }
    }

    fn category_of(rules: &RuleSet, name: &str, meta: &FileMeta, now: SystemTime) -> Option<String> {
        match rules.classify(Path::new(name), meta, now) {
            Classification::Matched(rule) => Some(rule.category().to_string()),
            Classification::Unmatched => None,
        }
    }

    #[test]
    fn test_first_match_wins() {
        let rules = rule_set(&[
            ext_rule("Documents", &["pdf"]),
            RuleConfig {
                category: "Everything".to_string(),
                match_all: true,
                ..Default::default()
            },
        ]);
        let now = SystemTime::now();
        let meta = meta_at(now);

        assert_eq!(category_of(&rules, "a.pdf", &meta, now).as_deref(), Some("Documents"));
        assert_eq!(category_of(&rules, "a.exe", &meta, now).as_deref(), Some("Everything"));
    }

    #[test]
    fn test_order_is_significant() {
        let rules = rule_set(&[
            RuleConfig {
                category: "Everything".to_string(),
                match_all: true,
                ..Default::default()
            },
            ext_rule("Documents", &["pdf"]),
        ]);
        let now = SystemTime::now();
        assert_eq!(
            category_of(&rules, "a.pdf", &meta_at(now), now).as_deref(),
            Some("Everything")
        );
    }

    #[test]
    fn test_unmatched() {
        let rules = rule_set(&[ext_rule("Documents", &["pdf"])]);
        let now = SystemTime::now();
        assert_eq!(category_of(&rules, "song.mp3", &meta_at(now), now), None);
        assert_eq!(category_of(&rules, "noextension", &meta_at(now), now), None);
    }

    #[test]
    fn test_extension_match_is_case_insensitive_and_ignores_dot() {
        let rules = rule_set(&[ext_rule("Images", &[".JPG", "png"])]);
        let now = SystemTime::now();
        let meta = meta_at(now);
        assert!(category_of(&rules, "photo.jpg", &meta, now).is_some());
        assert!(category_of(&rules, "photo.PNG", &meta, now).is_some());
    }

    #[test]
    fn test_glob_and_regex_match_file_name() {
        let rules = rule_set(&[RuleConfig {
            category: "Documents".to_string(),
            globs: vec!["Invoice_*".to_string()],
            regex: vec![r"^scan_\d+".to_string()],
            ..Default::default()
        }]);
        let now = SystemTime::now();
        let meta = meta_at(now);
        assert!(category_of(&rules, "/dl/invoice_march.txt", &meta, now).is_some());
        assert!(category_of(&rules, "/dl/scan_0042.jpg", &meta, now).is_some());
        assert!(category_of(&rules, "/dl/scan_me.jpg", &meta, now).is_none());
    }

    #[test]
    fn test_mime_prefix_uses_supplied_metadata() {
        let rules = rule_set(&[RuleConfig {
            category: "Images".to_string(),
            mime: vec!["image/".to_string()],
            ..Default::default()
        }]);
        assert!(rules.needs_mime());

        let now = SystemTime::now();
        let mut meta = meta_at(now);
        assert!(category_of(&rules, "blob", &meta, now).is_none());
        meta.mime = Some("image/png".to_string());
        assert!(category_of(&rules, "blob", &meta, now).is_some());
    }

    #[test]
    fn test_age_threshold() {
        let rules = rule_set(&[RuleConfig {
            category: "Old".to_string(),
            older_than_days: Some(30),
            ..Default::default()
        }]);
        assert!(!rules.needs_mime());

        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(100 * SECS_PER_DAY);
        let fresh = meta_at(now - Duration::from_secs(29 * SECS_PER_DAY));
        let stale = meta_at(now - Duration::from_secs(31 * SECS_PER_DAY));
        let future = meta_at(now + Duration::from_secs(60));

        assert!(category_of(&rules, "x.bin", &fresh, now).is_none());
        assert_eq!(category_of(&rules, "x.bin", &stale, now).as_deref(), Some("Old"));
        assert!(category_of(&rules, "x.bin", &future, now).is_none());
    }

    #[test]
    fn test_age_threshold_combines_with_extension() {
        let rules = rule_set(&[RuleConfig {
            category: "Archives".to_string(),
            extensions: vec!["zip".to_string()],
            older_than_days: Some(1),
            ..Default::default()
        }]);
        let now = SystemTime::UNIX_EPOCH + Duration::from_secs(10 * SECS_PER_DAY);
        let stale = meta_at(now - Duration::from_secs(2 * SECS_PER_DAY));

        assert!(category_of(&rules, "a.zip", &stale, now).is_some());
        assert!(category_of(&rules, "a.rar", &stale, now).is_none());
        assert!(category_of(&rules, "a.zip", &meta_at(now), now).is_none());
    }

    #[test]
    fn test_classification_is_deterministic() {
        let rules = rule_set(&[ext_rule("Documents", &["pdf"]), ext_rule("Images", &["pdf"])]);
        let now = SystemTime::now();
        let meta = meta_at(now);
        for _ in 0..10 {
            assert_eq!(category_of(&rules, "a.pdf", &meta, now).as_deref(), Some("Documents"));
        }
    }

    #[test]
    fn test_rule_without_matcher_is_rejected() {
        let raw = RuleConfig {
            category: "Documents".to_string(),
            ..Default::default()
        };
        let err = Rule::compile(3, &raw, &categories(&["Documents"])).unwrap_err();
        assert!(err.to_string().starts_with("rules[3]"));
    }

    #[test]
    fn test_invalid_glob_in_rule_names_field() {
        let raw = RuleConfig {
            category: "Documents".to_string(),
            globs: vec!["[oops".to_string()],
            ..Default::default()
        };
        let err = Rule::compile(1, &raw, &categories(&["Documents"])).unwrap_err();
        assert!(err.to_string().contains("rules[1].globs"));
    }

    #[test]
    fn test_target_name_with_and_without_template() {
        let now = Local
            .with_ymd_and_hms(2024, 5, 6, 7, 8, 9)
            .single()
            .expect("unambiguous local time");
        let cats = categories(&["Documents"]);

        let plain = Rule::compile(0, &ext_rule("Documents", &["pdf"]), &cats).expect("compile");
        assert_eq!(
            plain.target_name(Path::new("/dl/Report.pdf"), &now),
            Some(OsString::from("Report.pdf"))
        );

        let renaming = Rule::compile(
            0,
            &RuleConfig {
                rename: Some("{stem}_{date}:{time}".to_string()),
                ..ext_rule("Documents", &["pdf"])
            },
            &cats,
        )
        .expect("compile");
        assert_eq!(
            renaming.target_name(Path::new("/dl/Report.pdf"), &now),
            Some(OsString::from("Report_20240506_070809.pdf"))
        );
        assert_eq!(
            renaming.target_name(Path::new("/dl/README"), &now),
            Some(OsString::from("README_20240506_070809"))
        );
    }
}
