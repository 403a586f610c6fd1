//! Configuration file handling

use serde::Deserialize;
use std::time::Duration;

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Remote version catalog settings
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Proxy settings
    #[serde(default)]
    pub proxy: ProxyConfig,
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Timeout for each `--version` / `--help` style check
    #[serde(default = "default_argument_check")]
    pub argument_check_secs: u64,

    /// Timeout for the prerequisites check
    #[serde(default = "default_prerequisites")]
    pub prerequisites_secs: u64,

    /// Timeout for each version management command (list, select)
    #[serde(default = "default_version_command")]
    pub version_command_secs: u64,

    /// Timeout for a full installation
    #[serde(default = "default_install")]
    pub install_secs: u64,

    /// Grace period between asking the installer to stop and killing it
    #[serde(default = "default_kill_grace")]
    pub kill_grace_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            argument_check_secs: default_argument_check(),
            prerequisites_secs: default_prerequisites(),
            version_command_secs: default_version_command(),
            install_secs: default_install(),
            kill_grace_secs: default_kill_grace(),
        }
    }
}

fn default_argument_check() -> u64 {
    20
}
fn default_prerequisites() -> u64 {
    20
}
fn default_version_command() -> u64 {
    60
}
fn default_install() -> u64 {
    6000
}
fn default_kill_grace() -> u64 {
    5
}

impl Timeouts {
    pub fn argument_check(&self) -> Duration {
        Duration::from_secs(self.argument_check_secs)
    }

    pub fn prerequisites(&self) -> Duration {
        Duration::from_secs(self.prerequisites_secs)
    }

    pub fn version_command(&self) -> Duration {
        Duration::from_secs(self.version_command_secs)
    }

    pub fn install(&self) -> Duration {
        Duration::from_secs(self.install_secs)
    }

    pub fn kill_grace(&self) -> Duration {
        Duration::from_secs(self.kill_grace_secs)
    }
}

/// Remote version catalog configuration
#[derive(Debug, Deserialize)]
pub struct CatalogConfig {
    /// Manifest URL
    #[serde(default = "default_catalog_url")]
    pub url: String,

    /// How long to wait for the manifest before falling back
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout_secs: u64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            url: default_catalog_url(),
            fetch_timeout_secs: default_fetch_timeout(),
        }
    }
}

fn default_catalog_url() -> String {
    "https://dl.espressif.com/dl/esp-idf/idf_versions.json".to_string()
}
fn default_fetch_timeout() -> u64 {
    10
}

/// Proxy configuration
#[derive(Debug, Deserialize)]
pub struct ProxyConfig {
    /// Timeout for connecting to an upstream host
    #[serde(default = "default_upstream_connect")]
    pub upstream_connect_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstream_connect_secs: default_upstream_connect(),
        }
    }
}

fn default_upstream_connect() -> u64 {
    15
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                let content = std::fs::read_to_string(&path).map_err(|e| {
                    super::Error::FileRead {
                        path: path.display().to_string(),
                        error: e.to_string(),
                    }
                })?;
                return Self::parse(&content);
            }
        }
        Ok(Self::default())
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }
}
