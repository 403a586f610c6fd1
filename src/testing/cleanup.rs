//! Best-effort removal of install and tools folders
//!
//! Runs after verification only. Failures end up in the report but never
//! change a scenario's verdict.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::common::{paths, Error, ErrorRecord};

use super::scenario::Expectation;

/// What happened to one folder
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupEntry {
    pub path: String,
    pub removed: bool,
    /// Set when the folder was not there to begin with
    pub missing: bool,
    pub error: Option<ErrorRecord>,
}

/// Cleanup result of one scenario
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub entries: Vec<CleanupEntry>,
}

impl CleanupReport {
    pub fn failures(&self) -> impl Iterator<Item = &CleanupEntry> {
        self.entries.iter().filter(|entry| entry.error.is_some())
    }
}

/// Remove the install folder and, when distinct, the tools folder
pub fn run(expectation: &Expectation, home: &Path) -> CleanupReport {
    let mut targets: Vec<PathBuf> = vec![expectation.install_dir.clone()];
    if expectation.tools_dir_is_distinct() {
        targets.push(expectation.tools_dir.clone());
    }

    CleanupReport {
        entries: targets.iter().map(|path| remove(path, home)).collect(),
    }
}

fn remove(path: &Path, home: &Path) -> CleanupEntry {
    let entry = |removed, missing, error: Option<Error>| CleanupEntry {
        path: path.display().to_string(),
        removed,
        missing,
        error: error.as_ref().map(ErrorRecord::from),
    };

    if paths::is_protected(path, home) {
        let error = Error::cleanup(path, "refusing to delete the home directory or a filesystem root");
        tracing::error!("{}", error);
        return entry(false, false, Some(error));
    }

    if !path.exists() {
        tracing::debug!("Nothing to clean at {}", path.display());
        return entry(false, true, None);
    }

    match std::fs::remove_dir_all(path) {
        Ok(()) => {
            tracing::info!("Removed {}", path.display());
            entry(true, false, None)
        }
        Err(e) => {
            let error = Error::cleanup(path, e);
            tracing::warn!("{}", error);
            entry(false, false, Some(error))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::ErrorKind;

    fn expectation(install: &Path, tools: &Path) -> Expectation {
        Expectation {
            install_dir: install.to_path_buf(),
            tools_dir: tools.to_path_buf(),
            versions: vec!["v5.4".to_string()],
            targets: vec!["esp32".to_string()],
        }
    }

    #[test]
    fn test_removes_install_and_distinct_tools() {
        let home = tempfile::tempdir().unwrap();
        let install = home.path().join("esp");
        let tools = home.path().join("tools");
        std::fs::create_dir_all(install.join("v5.4")).unwrap();
        std::fs::create_dir_all(&tools).unwrap();

        let report = run(&expectation(&install, &tools), home.path());
        assert_eq!(report.entries.len(), 2);
        assert!(report.entries.iter().all(|e| e.removed));
        assert!(!install.exists());
        assert!(!tools.exists());
    }

    #[test]
    fn test_nested_tools_removed_with_install() {
        let home = tempfile::tempdir().unwrap();
        let install = home.path().join(".espressif");
        std::fs::create_dir_all(install.join("tools")).unwrap();

        let report = run(&expectation(&install, &install.join("tools")), home.path());
        assert_eq!(report.entries.len(), 1);
        assert!(!install.exists());
    }

    #[test]
    fn test_missing_folder_is_not_an_error() {
        let home = tempfile::tempdir().unwrap();
        let install = home.path().join("never-created");
        let report = run(&expectation(&install, &install.join("tools")), home.path());
        assert!(report.entries[0].missing);
        assert_eq!(report.failures().count(), 0);
    }

    #[test]
    fn test_refuses_home_directory() {
        let home = tempfile::tempdir().unwrap();
        let report = run(&expectation(home.path(), &home.path().join("tools")), home.path());
        let failure = report.failures().next().unwrap();
        assert_eq!(failure.error.as_ref().unwrap().kind, ErrorKind::Infrastructure);
        assert!(home.path().exists());
    }

    #[test]
    fn test_refuses_home_reached_through_parent_segments() {
        let root = tempfile::tempdir().unwrap();
        let home = root.path().join("home");
        std::fs::create_dir_all(home.join(".espressif")).unwrap();

        // An unnormalized path pointing back at home
        let sneaky = home.join("..").join("home");
        let report = run(&expectation(&sneaky, &sneaky.join("tools")), &home);
        assert_eq!(report.failures().count(), 1);
        assert!(!report.entries[0].removed);
        assert!(home.join(".espressif").exists());

        let above = home.join("x").join("..").join("..");
        let report = run(&expectation(&above, &above.join("tools")), &home);
        assert_eq!(report.failures().count(), 1);
        assert!(home.exists());
    }
}
