//! Installer command-line construction
//!
//! Turns resolved scenario data into the installer's flag list. Flags are
//! emitted only for fields the scenario actually set so the installer's own
//! defaults stay in effect otherwise.

use std::path::{Path, PathBuf};

use crate::common::Result;
use crate::context::{MirrorFamily, MirrorTable, PlatformProfile};

use super::scenario::ResolvedData;

/// A fully built installer call
#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Extra environment, e.g. proxy variables
    pub env: Vec<(String, String)>,
}

impl Invocation {
    pub fn new(program: &Path, args: Vec<String>) -> Self {
        Self {
            program: program.to_path_buf(),
            args,
            env: Vec::new(),
        }
    }

    /// Same call with additional environment variables
    pub fn with_env(mut self, env: &[(String, String)]) -> Self {
        self.env.extend(env.iter().cloned());
        self
    }

    /// Command line as a user would type it on this platform
    pub fn render(&self, platform: &PlatformProfile) -> String {
        platform.render_command_line(&self.program, &self.args)
    }
}

/// Build the `install` flag list
///
/// Lists are joined with commas, mirror keys become URLs. An unknown mirror
/// key fails the whole build, so nothing is spawned for that scenario.
pub fn build_install_args(
    mirrors: &MirrorTable,
    data: &ResolvedData,
    debug: bool,
) -> Result<Vec<String>> {
    let mut args = vec!["install".to_string()];

    if let Some(dir) = &data.install_dir {
        args.push("-p".to_string());
        args.push(dir.display().to_string());
    }
    if let Some(targets) = &data.targets {
        args.push("-t".to_string());
        args.push(targets.join(","));
    }
    if let Some(versions) = &data.versions {
        args.push("-i".to_string());
        args.push(versions.join(","));
    }
    if let Some(key) = &data.idf_mirror {
        args.push("--idf-mirror".to_string());
        args.push(mirrors.resolve(MirrorFamily::Idf, key)?.to_string());
    }
    if let Some(key) = &data.tools_mirror {
        args.push("-m".to_string());
        args.push(mirrors.resolve(MirrorFamily::Tools, key)?.to_string());
    }
    if let Some(key) = &data.pypi_mirror {
        args.push("--pypi-mirror".to_string());
        args.push(mirrors.resolve(MirrorFamily::Pypi, key)?.to_string());
    }
    if let Some(recursive) = data.recursive {
        args.push("-r".to_string());
        args.push(recursive.to_string());
    }
    if let Some(non_interactive) = data.non_interactive {
        args.push("-n".to_string());
        args.push(non_interactive.to_string());
    }
    if let Some(archive) = &data.local_archive {
        args.push("--use-local-archive".to_string());
        args.push(archive.display().to_string());
    }
    if debug {
        args.push("-vvv".to_string());
    }

    tracing::debug!("Installer flags: {:?}", args);
    Ok(args)
}
