//! Configuration, home and artifact paths
//!
//! Scenario documents describe install folders relative to the home
//! directory, so everything that touches user paths goes through here.

use std::io;
use std::path::{Component, Path, PathBuf};

/// Name used for the configuration directory
const APP_NAME: &str = "installer-harness";

/// Directory below the build-info directory that holds scenario logs
const LOGS_DIR: &str = "logs";

/// Get the current user's home directory
pub fn home_dir() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|dirs| dirs.home_dir().to_path_buf())
}

/// Resolve a scenario folder against a home directory
///
/// Absolute paths are kept as-is, a leading `~` is replaced by `home`, and
/// every other relative path is joined onto `home`. The result has its `.`
/// and `..` segments folded.
pub fn resolve_in_home(folder: &str, home: &Path) -> PathBuf {
    let trimmed = folder.trim();
    if let Some(rest) = trimmed.strip_prefix('~') {
        let rest = rest.trim_start_matches(['/', '\\']);
        return if rest.is_empty() {
            normalize(home)
        } else {
            normalize(&home.join(rest))
        };
    }

    let path = PathBuf::from(trimmed);
    if path.is_absolute() {
        normalize(&path)
    } else {
        normalize(&home.join(path))
    }
}

/// Fold `.` and `..` segments without touching the filesystem
///
/// `..` never climbs above a root or prefix.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match out.components().next_back() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => out.push(".."),
            },
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/installer-harness/`
/// - macOS: `~/Library/Application Support/installer-harness/`
/// - Windows: `%APPDATA%\installer-harness\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Directory holding per-scenario logs for a run
pub fn log_dir(build_info_dir: &Path) -> PathBuf {
    build_info_dir.join(LOGS_DIR)
}

/// Log file capturing the installer output of one scenario
pub fn scenario_log_path(build_info_dir: &Path, id: u32) -> PathBuf {
    log_dir(build_info_dir).join(format!("scenario-{}.log", id))
}

/// Structured result file for a run
pub fn report_path(build_info_dir: &Path) -> PathBuf {
    build_info_dir.join("test-report.json")
}

/// Ensure the artifact directories exist
pub fn ensure_log_dir(build_info_dir: &Path) -> io::Result<PathBuf> {
    let dir = log_dir(build_info_dir);
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Whether `path` is a location cleanup must never remove
///
/// Both sides are resolved first (symlinks included when the path exists),
/// so `<home>/../home` or `x/../..` are caught. A path is protected when it
/// is a filesystem root, the home directory, or one of its ancestors.
pub fn is_protected(path: &Path, home: &Path) -> bool {
    let path = resolved(path);
    let home = resolved(home);
    path.parent().is_none() || home.starts_with(&path)
}

fn resolved(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| normalize(path))
}
