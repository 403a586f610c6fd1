//! CLI command definitions
//!
//! Defines the clap commands for the installer harness.

use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a scenario document against the installer
    Run {
        /// Path to the scenario document (JSON, or YAML by extension)
        script: PathBuf,

        /// Run only these scenario ids; can be given multiple times
        #[arg(long = "only", value_name = "ID")]
        only: Vec<u32>,

        #[command(flatten)]
        settings: RunArgs,
    },

    /// Parse a scenario document and check every entry without running it
    Validate {
        /// Path to the scenario document
        script: PathBuf,

        /// Installer path used to render command lines
        #[arg(long, env = "EIM_CLI_PATH", default_value = "eim")]
        installer: PathBuf,

        /// Directory holding offline archives
        #[arg(long, env = "BUILD_INFO_DIR", default_value = "build-info")]
        build_info_dir: PathBuf,
    },

    /// List the built-in mirrors
    Mirrors {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the detected platform profile
    Platform {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fetch the version catalog and show the resolved defaults
    Versions {
        /// Manifest URL
        #[arg(long, env = "EIM_VERSIONS_URL")]
        url: Option<String>,

        /// Fallback default version when the manifest is unavailable
        #[arg(long, env = "EIM_IDF_VERSION")]
        idf_version: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Settings for a run, read once from flags or the environment
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Installer executable under test
    #[arg(long, env = "EIM_CLI_PATH", default_value = "eim")]
    pub installer: PathBuf,

    /// Version label the installer is expected to print
    #[arg(long, env = "EIM_CLI_VERSION")]
    pub installer_version: Option<String>,

    /// Default toolchain version when the manifest is unavailable
    #[arg(long, env = "EIM_IDF_VERSION")]
    pub idf_version: Option<String>,

    /// Maximum installer verbosity and debug logging
    #[arg(
        long,
        env = "DEBUG",
        action = clap::ArgAction::SetTrue,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub debug: bool,

    /// Directory for logs, the report and offline archives
    #[arg(long, env = "BUILD_INFO_DIR", default_value = "build-info")]
    pub build_info_dir: PathBuf,

    /// Manifest URL override
    #[arg(long, env = "EIM_VERSIONS_URL")]
    pub versions_url: Option<String>,
}
