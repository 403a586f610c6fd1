//! Run context
//!
//! Everything a scenario may read but never change: the platform profile,
//! the mirror table, the version catalog, timeouts and the installer under
//! test. Built once before the first scenario and passed by reference.

pub mod catalog;
pub mod mirrors;
pub mod platform;

use std::path::{Path, PathBuf};

use crate::common::config::Config;
use crate::common::{Error, Result};

pub use catalog::{CatalogSource, VersionCatalog};
pub use mirrors::{MirrorEntry, MirrorFamily, MirrorTable};
pub use platform::{PathQuoting, Platform, PlatformProfile};

/// Settings sourced from the environment / command line
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Installer executable under test
    pub installer: PathBuf,
    /// Version label the installer is expected to report
    pub installer_version: Option<String>,
    /// Replaces the compiled-in fallback default version
    pub default_idf_version: Option<String>,
    /// Pass maximum verbosity to the installer and log at debug level
    pub debug: bool,
    /// Directory receiving logs, the report and offline archives
    pub build_info_dir: PathBuf,
    /// Manifest URL override
    pub versions_url: Option<String>,
}

/// Immutable context shared by every scenario of a run
#[derive(Debug)]
pub struct RunContext {
    pub platform: PlatformProfile,
    pub mirrors: MirrorTable,
    pub catalog: VersionCatalog,
    pub config: Config,
    pub installer: PathBuf,
    pub installer_version: Option<String>,
    pub debug: bool,
    pub build_info_dir: PathBuf,
}

impl RunContext {
    /// Detect the platform, locate the installer and load the catalog
    pub async fn build(settings: RunSettings, config: Config) -> Result<Self> {
        let platform = PlatformProfile::detect()?;
        let installer = locate_installer(&platform, &settings.installer)?;

        let url = settings
            .versions_url
            .clone()
            .unwrap_or_else(|| config.catalog.url.clone());
        let catalog = VersionCatalog::fetch(
            &url,
            std::time::Duration::from_secs(config.catalog.fetch_timeout_secs),
            settings.default_idf_version.as_deref(),
        )
        .await;

        tracing::info!(
            "Installer {} on {} ({}), default version {}",
            installer.display(),
            platform.platform,
            platform.arch,
            catalog.default_version
        );

        Ok(Self::new(platform, MirrorTable::builtin(), catalog, config, settings, installer))
    }

    /// Assemble a context from already resolved parts
    pub fn new(
        platform: PlatformProfile,
        mirrors: MirrorTable,
        catalog: VersionCatalog,
        config: Config,
        settings: RunSettings,
        installer: PathBuf,
    ) -> Self {
        Self {
            platform,
            mirrors,
            catalog,
            config,
            installer,
            installer_version: settings.installer_version,
            debug: settings.debug,
            build_info_dir: settings.build_info_dir,
        }
    }
}

/// Find the installer binary
///
/// Paths are taken as given (plus the platform executable suffix); a bare
/// name is looked up on `PATH`.
pub fn locate_installer(platform: &PlatformProfile, requested: &Path) -> Result<PathBuf> {
    let candidate = platform.executable(requested);
    if candidate.is_file() {
        return Ok(candidate);
    }

    let is_bare_name = requested.components().count() == 1;
    if is_bare_name {
        if let Ok(found) = which::which(requested) {
            return Ok(found);
        }
    }

    Err(Error::InstallerNotFound(candidate.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate_missing_installer() {
        let platform = PlatformProfile::for_platform(Platform::Linux, "x86_64", PathBuf::from("/tmp"));
        let err = locate_installer(&platform, Path::new("/definitely/not/here/eim")).unwrap_err();
        assert!(matches!(err, Error::InstallerNotFound(_)));
    }

    #[test]
    fn test_locate_existing_installer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("eim");
        std::fs::write(&path, "").unwrap();
        let platform = PlatformProfile::for_platform(Platform::Linux, "x86_64", PathBuf::from("/tmp"));
        assert_eq!(locate_installer(&platform, &path).unwrap(), path);
    }
}
