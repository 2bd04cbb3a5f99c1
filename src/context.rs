//! Process-wide context: resolved application paths and the compiled configuration.
//!
//! Everything the organizer needs to know about where it lives is computed once
//! at startup, relative to the directory that holds the executable, and passed
//! by reference from there on.

use crate::config::{ConfigError, OrganizerConfig, OrganizerSettings};
use chrono::{DateTime, Local};
use regex::{Captures, Regex};
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

/// Default configuration file name, looked up next to the executable.
pub const CONFIG_FILE_NAME: &str = "config.toml";
/// Directory (next to the executable) that receives the log file.
pub const LOG_DIR_NAME: &str = "logs";
/// Log file name inside [`LOG_DIR_NAME`].
pub const LOG_FILE_NAME: &str = "organizer.log";
/// Undo journal file name, next to the executable.
pub const HISTORY_FILE_NAME: &str = "history.json";

static PERCENT_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"%([A-Za-z0-9_]+)%").expect("valid %VAR% pattern"));
static BRACE_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z0-9_]+)\}").expect("valid ${VAR} pattern"));

/// Immutable set of paths anchored at the application directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// Directory containing the executable.
    pub app_dir: PathBuf,
    /// Configuration file to load.
    pub config_file: PathBuf,
    /// Directory for the append-only log.
    pub log_dir: PathBuf,
    /// Undo journal.
    pub history_file: PathBuf,
}

impl AppPaths {
    /// Builds paths anchored at `app_dir`. A relative `config_override` is
    /// resolved against `app_dir` as well.
    pub fn new(app_dir: impl Into<PathBuf>, config_override: Option<&Path>) -> Self {
        let app_dir = app_dir.into();
        let config_file = match config_override {
            Some(path) => resolve_against(&app_dir, path),
            None => app_dir.join(CONFIG_FILE_NAME),
        };

        Self {
            log_dir: app_dir.join(LOG_DIR_NAME),
            history_file: app_dir.join(HISTORY_FILE_NAME),
            config_file,
            app_dir,
        }
    }

    /// Anchors paths at the directory of the running executable.
    pub fn from_current_exe(config_override: Option<&Path>) -> std::io::Result<Self> {
        let exe = std::env::current_exe()?;
        let app_dir = exe
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| std::io::Error::other("executable has no parent directory"))?;
        Ok(Self::new(app_dir, config_override))
    }

    /// Full path of the log file.
    pub fn log_file(&self) -> PathBuf {
        self.log_dir.join(LOG_FILE_NAME)
    }
}

/// The explicit context object handed to every component.
#[derive(Debug)]
pub struct AppContext {
    pub paths: AppPaths,
    pub settings: OrganizerSettings,
}

impl AppContext {
    /// Loads and compiles the configuration named by `paths`.
    ///
    /// # Errors
    ///
    /// Any [`ConfigError`]; all of them are fatal at startup.
    pub fn load(paths: AppPaths) -> Result<Self, ConfigError> {
        let config = OrganizerConfig::load(&paths.config_file)?;
        let settings = config.compile(&paths.app_dir)?;
        Ok(Self { paths, settings })
    }
}

/// Expands `~`, `%VAR%` and `${VAR}` in `raw` and resolves the result against `base`
/// when it is relative. Unknown variables are left untouched.
pub fn expand_path(raw: &str, base: &Path) -> PathBuf {
    let expanded = expand_vars(raw);
    let expanded = expand_home(&expanded);
    resolve_against(base, &expanded)
}

fn resolve_against(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

fn expand_vars(raw: &str) -> String {
    let lookup = |caps: &Captures| {
        std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
    };
    let once = PERCENT_VAR.replace_all(raw, lookup);
    BRACE_VAR.replace_all(&once, lookup).into_owned()
}

fn expand_home(raw: &str) -> PathBuf {
    let rest = if raw == "~" {
        Some("")
    } else {
        raw.strip_prefix("~/").or_else(|| raw.strip_prefix("~\\"))
    };

    match (rest, home_dir()) {
        (Some(rest), Some(home)) if rest.is_empty() => home,
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(raw),
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Replaces `{YYYY}`, `{MM}`, `{DD}`, `{date}` and `{time}` with values from `now`.
pub fn expand_date_placeholders(template: &str, now: &DateTime<Local>) -> String {
    template
        .replace("{YYYY}", &now.format("%Y").to_string())
        .replace("{MM}", &now.format("%m").to_string())
        .replace("{DD}", &now.format("%d").to_string())
        .replace("{date}", &now.format("%Y%m%d").to_string())
        .replace("{time}", &now.format("%H%M%S").to_string())
}

/// Applies [`expand_date_placeholders`] to every UTF-8 component of `template`.
pub fn render_dated_dir(template: &Path, now: &DateTime<Local>) -> PathBuf {
    template
        .components()
        .map(|component| match component {
            Component::Normal(part) => match part.to_str() {
                Some(text) => PathBuf::from(expand_date_placeholders(text, now)),
                None => PathBuf::from(part),
            },
            other => PathBuf::from(other.as_os_str()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2024, 3, 7, 9, 5, 1)
            .single()
            .expect("unambiguous local time")
    }

    #[test]
    fn test_app_paths_are_anchored_at_app_dir() {
        let paths = AppPaths::new("/opt/dorg", None);
        assert_eq!(paths.config_file, PathBuf::from("/opt/dorg/config.toml"));
        assert_eq!(paths.log_file(), PathBuf::from("/opt/dorg/logs/organizer.log"));
        assert_eq!(paths.history_file, PathBuf::from("/opt/dorg/history.json"));
    }

    #[test]
    fn test_relative_config_override_resolves_against_app_dir() {
        let paths = AppPaths::new("/opt/dorg", Some(Path::new("alt.toml")));
        assert_eq!(paths.config_file, PathBuf::from("/opt/dorg/alt.toml"));
    }

    #[test]
    fn test_expand_path_relative_and_unknown_vars() {
        let base = Path::new("/base");
        assert_eq!(expand_path("inbox", base), PathBuf::from("/base/inbox"));
        assert_eq!(
            expand_path("%DORG_SURELY_UNSET_VAR%/x", base),
            PathBuf::from("/base/%DORG_SURELY_UNSET_VAR%/x")
        );
    }

    #[test]
    fn test_expand_path_known_var() {
        let Ok(path) = std::env::var("PATH") else {
            return;
        };
        let expanded = expand_vars("${PATH}");
        assert_eq!(expanded, path);
    }

    #[test]
    fn test_date_placeholders() {
        let now = fixed_now();
        assert_eq!(
            expand_date_placeholders("Images/{YYYY}-{MM}-{DD}", &now),
            "Images/2024-03-07"
        );
        assert_eq!(expand_date_placeholders("{date}_{time}", &now), "20240307_090501");
    }

    #[test]
    fn test_render_dated_dir_keeps_root() {
        let now = fixed_now();
        let rendered = render_dated_dir(Path::new("/data/{YYYY}/{MM}"), &now);
        assert_eq!(rendered, PathBuf::from("/data/2024/03"));
    }
}
