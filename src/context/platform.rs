//! Platform profile
//!
//! Resolves where the installer puts things by default on the current OS
//! and how paths are written on its command line.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::common::{paths, Error, Result};

/// Supported platforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Linux,
    MacOS,
    Windows,
}

impl Platform {
    /// Get the current platform
    pub fn current() -> Self {
        #[cfg(target_os = "linux")]
        return Platform::Linux;

        #[cfg(target_os = "macos")]
        return Platform::MacOS;

        #[cfg(target_os = "windows")]
        return Platform::Windows;

        #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
        return Platform::Linux; // Default fallback
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Platform::Linux => write!(f, "linux"),
            Platform::MacOS => write!(f, "macos"),
            Platform::Windows => write!(f, "windows"),
        }
    }
}

/// Get current architecture string
pub fn arch_str() -> &'static str {
    #[cfg(target_arch = "x86_64")]
    return "x86_64";

    #[cfg(target_arch = "aarch64")]
    return "aarch64";

    #[cfg(target_arch = "x86")]
    return "i686";

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "x86")))]
    return "unknown";
}

/// How a path with spaces is written on a command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathQuoting {
    /// `'my dir'`, embedded single quotes become `'\''`
    PosixSingle,
    /// `"my dir"`, embedded double quotes become `\"`
    WindowsDouble,
}

impl PathQuoting {
    /// Quote `value` if it contains whitespace, otherwise borrow it unchanged
    pub fn quote<'a>(&self, value: &'a str) -> Cow<'a, str> {
        if !value.chars().any(char::is_whitespace) {
            return Cow::Borrowed(value);
        }
        match self {
            PathQuoting::PosixSingle => Cow::Owned(format!("'{}'", value.replace('\'', r"'\''"))),
            PathQuoting::WindowsDouble => Cow::Owned(format!("\"{}\"", value.replace('"', "\\\""))),
        }
    }
}

/// Everything platform-specific the harness needs, computed once per run
#[derive(Debug, Clone, serde::Serialize)]
pub struct PlatformProfile {
    pub platform: Platform,
    pub arch: String,
    /// Human readable OS description for the report
    pub os_description: String,
    pub home_dir: PathBuf,
    /// Where the installer puts versions when no path is given
    pub default_install_dir: PathBuf,
    /// Where the installer puts tool binaries
    pub default_tools_dir: PathBuf,
    pub exe_suffix: &'static str,
    pub quoting: PathQuoting,
}

impl PlatformProfile {
    /// Detect the profile for the running machine
    pub fn detect() -> Result<Self> {
        let home = paths::home_dir()
            .ok_or_else(|| Error::Config("Cannot determine the home directory".to_string()))?;
        let mut profile = Self::for_platform(Platform::current(), arch_str(), home);
        profile.os_description = os_info::get().to_string();
        Ok(profile)
    }

    /// Build the profile of a given platform with an explicit home directory
    pub fn for_platform(platform: Platform, arch: &str, home: PathBuf) -> Self {
        let (default_install_dir, default_tools_dir, exe_suffix, quoting) = match platform {
            Platform::Windows => (
                PathBuf::from(r"C:\esp"),
                PathBuf::from(r"C:\Espressif\tools"),
                ".exe",
                PathQuoting::WindowsDouble,
            ),
            Platform::Linux | Platform::MacOS => (
                home.join(".espressif"),
                home.join(".espressif").join("tools"),
                "",
                PathQuoting::PosixSingle,
            ),
        };

        Self {
            platform,
            arch: arch.to_string(),
            os_description: platform.to_string(),
            home_dir: home,
            default_install_dir,
            default_tools_dir,
            exe_suffix,
            quoting,
        }
    }

    /// Resolve a scenario `installFolder` value, or the default when absent
    pub fn install_dir_for(&self, folder: Option<&str>) -> PathBuf {
        match folder {
            Some(folder) if !folder.trim().is_empty() => paths::resolve_in_home(folder, &self.home_dir),
            _ => self.default_install_dir.clone(),
        }
    }

    /// Append the executable suffix when the path does not carry it yet
    pub fn executable(&self, path: &Path) -> PathBuf {
        if self.exe_suffix.is_empty() {
            return path.to_path_buf();
        }
        let has_suffix = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case(self.exe_suffix.trim_start_matches('.')))
            .unwrap_or(false);
        if has_suffix {
            path.to_path_buf()
        } else {
            let mut raw = path.as_os_str().to_os_string();
            raw.push(self.exe_suffix);
            PathBuf::from(raw)
        }
    }

    /// Activation script the installer writes for `version`
    ///
    /// Scripts land in the tools folder whatever install path was chosen.
    pub fn activation_script(&self, tools_dir: &Path, version: &str) -> PathBuf {
        match self.platform {
            Platform::Windows => tools_dir.join(format!("Microsoft.{}.PowerShell_profile.ps1", version)),
            Platform::Linux | Platform::MacOS => tools_dir.join(format!("activate_idf_{}.sh", version)),
        }
    }

    /// Suffix identifying offline archives built for this platform
    pub fn archive_tag(&self) -> String {
        let arch = match self.arch.as_str() {
            "x86_64" => "x64",
            other => other,
        };
        format!("{}-{}", self.platform, arch)
    }

    /// Render a command line for logs, quoting arguments with spaces
    pub fn render_command_line(&self, program: &Path, args: &[String]) -> String {
        let program = program.display().to_string();
        std::iter::once(self.quoting.quote(&program).into_owned())
            .chain(args.iter().map(|arg| self.quoting.quote(arg).into_owned()))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linux() -> PlatformProfile {
        PlatformProfile::for_platform(Platform::Linux, "x86_64", PathBuf::from("/home/tester"))
    }

    fn windows() -> PlatformProfile {
        PlatformProfile::for_platform(Platform::Windows, "x86_64", PathBuf::from(r"C:\Users\tester"))
    }

    #[test]
    fn test_posix_defaults() {
        let profile = linux();
        assert_eq!(profile.default_install_dir, PathBuf::from("/home/tester/.espressif"));
        assert_eq!(
            profile.default_tools_dir,
            PathBuf::from("/home/tester/.espressif/tools")
        );
        assert_eq!(profile.exe_suffix, "");
        assert_eq!(profile.archive_tag(), "linux-x64");
    }

    #[test]
    fn test_windows_defaults() {
        let profile = windows();
        assert_eq!(profile.default_install_dir, PathBuf::from(r"C:\esp"));
        assert_eq!(profile.exe_suffix, ".exe");
        assert_eq!(profile.quoting, PathQuoting::WindowsDouble);
        assert_eq!(profile.executable(Path::new("eim")), PathBuf::from("eim.exe"));
        assert_eq!(profile.executable(Path::new("eim.EXE")), PathBuf::from("eim.EXE"));
    }

    #[test]
    fn test_quoting_only_when_needed() {
        assert_eq!(PathQuoting::PosixSingle.quote("/opt/esp"), "/opt/esp");
        assert_eq!(PathQuoting::PosixSingle.quote("/opt/my esp"), "'/opt/my esp'");
        assert_eq!(PathQuoting::PosixSingle.quote("it's here"), r"'it'\''s here'");
        assert_eq!(
            PathQuoting::WindowsDouble.quote(r"C:\my esp"),
            r#""C:\my esp""#
        );
    }

    #[test]
    fn test_install_dir_for_scenario_folder() {
        let profile = linux();
        assert_eq!(
            profile.install_dir_for(Some(".espressif")),
            PathBuf::from("/home/tester/.espressif")
        );
        assert_eq!(
            profile.install_dir_for(Some("~/custom")),
            PathBuf::from("/home/tester/custom")
        );
        assert_eq!(profile.install_dir_for(None), profile.default_install_dir);
    }

    #[test]
    fn test_activation_script_locations() {
        let profile = linux();
        assert_eq!(
            profile.activation_script(&profile.default_tools_dir, "v5.4"),
            PathBuf::from("/home/tester/.espressif/tools/activate_idf_v5.4.sh")
        );
        let profile = windows();
        let script = profile.activation_script(&profile.default_tools_dir, "v5.4");
        assert_eq!(script, PathBuf::from(r"C:\Espressif\tools").join("Microsoft.v5.4.PowerShell_profile.ps1"));
    }

    #[test]
    fn test_render_command_line_quotes_spaces() {
        let profile = linux();
        let line = profile.render_command_line(
            Path::new("/usr/bin/eim"),
            &["install".to_string(), "-p".to_string(), "/tmp/my esp".to_string()],
        );
        assert_eq!(line, "/usr/bin/eim install -p '/tmp/my esp'");
    }
}
