//! Typed scenarios
//!
//! A [`TestCaseSpec`] is resolved against the run context into a
//! [`Scenario`]: `"default"` tokens are replaced by catalog values, folders
//! are made absolute, and each kind keeps only the fields it uses. The
//! scenario then yields its [`Step`]s, the installer calls to make, and an
//! [`Expectation`] describing the state to verify afterwards.

use std::path::PathBuf;
use std::time::Duration;

use crate::common::{split_pipe_list, Error, Result};
use crate::context::RunContext;

use super::config::{ScenarioData, TestCaseSpec};
use super::invocation::{build_install_args, Invocation};

/// Default marker for a passing prerequisites verdict
const PREREQUISITES_OK_MARKER: &str = "prerequisites are satisfied";

/// Lines that mean the prerequisites check did not pass
///
/// "not satisfied" also covers the negated form of the success marker.
const PREREQUISITES_FAILURE_MARKERS: &[&str] = &["not satisfied", "missing", "failed"];

/// Scenario data with defaults resolved
///
/// Fields stay `None` when the scenario left them out, so the builder only
/// emits flags that were asked for.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedData {
    pub install_dir: Option<PathBuf>,
    pub targets: Option<Vec<String>>,
    pub versions: Option<Vec<String>>,
    pub idf_mirror: Option<String>,
    pub tools_mirror: Option<String>,
    pub pypi_mirror: Option<String>,
    pub recursive: Option<bool>,
    pub non_interactive: Option<bool>,
    pub local_archive: Option<PathBuf>,
}

impl ResolvedData {
    /// Resolve lists and folders, substituting `"default"` tokens
    pub fn resolve(data: &ScenarioData, ctx: &RunContext) -> Self {
        let versions = data
            .idf_list
            .as_deref()
            .map(split_pipe_list)
            .filter(|list| !list.is_empty())
            .map(|list| list.iter().map(|v| ctx.catalog.resolve_version(v)).collect());
        let targets = data
            .target_list
            .as_deref()
            .map(split_pipe_list)
            .filter(|list| !list.is_empty())
            .map(|list| list.iter().map(|t| ctx.catalog.resolve_target(t)).collect());
        let install_dir = data
            .install_folder
            .as_deref()
            .filter(|folder| !folder.trim().is_empty())
            .map(|folder| ctx.platform.install_dir_for(Some(folder)));

        Self {
            install_dir,
            targets,
            versions,
            idf_mirror: data.idf_mirror.clone(),
            tools_mirror: data.tools_mirror.clone(),
            pypi_mirror: data.pypi_mirror.clone(),
            recursive: data.recursive,
            non_interactive: data.non_interactive,
            local_archive: None,
        }
    }
}

/// State the installer is expected to leave behind
#[derive(Debug, Clone, PartialEq)]
pub struct Expectation {
    pub install_dir: PathBuf,
    pub tools_dir: PathBuf,
    pub versions: Vec<String>,
    pub targets: Vec<String>,
}

impl Expectation {
    /// Fill what the scenario left out with the run defaults
    pub fn from_resolved(data: &ResolvedData, ctx: &RunContext) -> Self {
        Self {
            install_dir: data
                .install_dir
                .clone()
                .unwrap_or_else(|| ctx.platform.default_install_dir.clone()),
            tools_dir: ctx.platform.default_tools_dir.clone(),
            versions: data
                .versions
                .clone()
                .unwrap_or_else(|| vec![ctx.catalog.default_version.clone()]),
            targets: data
                .targets
                .clone()
                .unwrap_or_else(|| vec![ctx.catalog.default_target.clone()]),
        }
    }

    /// Tools live outside the install folder and need their own checks
    pub fn tools_dir_is_distinct(&self) -> bool {
        !self.tools_dir.starts_with(&self.install_dir)
    }
}

/// A scenario with every kind-specific field resolved
#[derive(Debug, Clone)]
pub enum Scenario {
    Prerequisites {
        markers: Vec<String>,
    },
    Arguments {
        version_label: Option<String>,
        help_markers: Vec<String>,
    },
    Default {
        expectation: Expectation,
    },
    Custom {
        data: ResolvedData,
        expectation: Expectation,
    },
    Offline {
        data: ResolvedData,
        expectation: Expectation,
    },
    VersionManagement {
        expectation: Expectation,
    },
}

impl Scenario {
    /// Resolve a test case against the run context
    pub fn resolve(spec: &TestCaseSpec, ctx: &RunContext) -> Result<Self> {
        use super::config::ScenarioType;

        let data = ResolvedData::resolve(&spec.data, ctx);
        let scenario = match spec.kind {
            ScenarioType::Prerequisites => Scenario::Prerequisites {
                markers: if spec.data.expect_output.is_empty() {
                    vec![PREREQUISITES_OK_MARKER.to_string()]
                } else {
                    spec.data.expect_output.clone()
                },
            },
            ScenarioType::Arguments => Scenario::Arguments {
                version_label: ctx.installer_version.clone(),
                help_markers: spec.data.expect_output.clone(),
            },
            ScenarioType::Default => Scenario::Default {
                expectation: Expectation::from_resolved(&ResolvedData::default(), ctx),
            },
            ScenarioType::Custom => Scenario::Custom {
                expectation: Expectation::from_resolved(&data, ctx),
                data,
            },
            ScenarioType::Offline => {
                let expectation = Expectation::from_resolved(&data, ctx);
                let archive = offline_archive(&spec.data, &expectation, ctx);
                if !archive.is_file() {
                    return Err(Error::OfflineArchiveMissing(archive));
                }
                let data = ResolvedData {
                    non_interactive: data.non_interactive.or(Some(true)),
                    local_archive: Some(archive),
                    ..data
                };
                Scenario::Offline { data, expectation }
            }
            ScenarioType::VersionManagement => Scenario::VersionManagement {
                expectation: Expectation::from_resolved(&data, ctx),
            },
        };
        Ok(scenario)
    }

    /// Installer calls to make, in order
    ///
    /// Fails before anything is spawned when the flags cannot be built.
    pub fn plan(&self, ctx: &RunContext) -> Result<Vec<Step>> {
        let timeouts = &ctx.config.timeouts;
        let installer = ctx.installer.as_path();
        let debug_flag = |mut args: Vec<String>| {
            if ctx.debug {
                args.push("-vvv".to_string());
            }
            args
        };

        let steps = match self {
            Scenario::Prerequisites { markers } => vec![Step {
                label: "prerequisites".to_string(),
                invocation: Invocation::new(installer, debug_flag(strings(&["install", "-n", "true"]))),
                timeout: timeouts.prerequisites(),
                stop_on: markers.clone(),
                fail_on: strings(PREREQUISITES_FAILURE_MARKERS),
                expect_output: markers.clone(),
            }],
            Scenario::Arguments {
                version_label,
                help_markers,
            } => {
                let mut help = vec!["Usage".to_string()];
                help.extend(help_markers.iter().cloned());
                vec![
                    Step::check(installer, &["--version"], version_label.iter().cloned().collect(), timeouts.argument_check()),
                    Step::check(installer, &["--help"], help, timeouts.argument_check()),
                    Step::check(
                        installer,
                        &["install", "--help"],
                        vec!["--idf-versions".to_string()],
                        timeouts.argument_check(),
                    ),
                ]
            }
            Scenario::Default { .. } => {
                let data = ResolvedData {
                    non_interactive: Some(true),
                    ..Default::default()
                };
                vec![Step::install(installer, build_install_args(&ctx.mirrors, &data, ctx.debug)?, timeouts.install())]
            }
            Scenario::Custom { data, .. } | Scenario::Offline { data, .. } => {
                vec![Step::install(installer, build_install_args(&ctx.mirrors, data, ctx.debug)?, timeouts.install())]
            }
            Scenario::VersionManagement { expectation } => {
                let first = expectation
                    .versions
                    .first()
                    .cloned()
                    .unwrap_or_else(|| ctx.catalog.default_version.clone());
                vec![
                    Step::check(installer, &["list"], expectation.versions.clone(), timeouts.version_command()),
                    Step::check(installer, &["select", first.as_str()], Vec::new(), timeouts.version_command()),
                ]
            }
        };
        Ok(steps)
    }

    /// Filesystem state to inspect once the steps are done
    pub fn expectation(&self) -> Option<&Expectation> {
        match self {
            Scenario::Prerequisites { .. } | Scenario::Arguments { .. } => None,
            Scenario::Default { expectation }
            | Scenario::Custom { expectation, .. }
            | Scenario::Offline { expectation, .. }
            | Scenario::VersionManagement { expectation } => Some(expectation),
        }
    }
}

/// One installer call within a scenario
#[derive(Debug, Clone)]
pub struct Step {
    pub label: String,
    pub invocation: Invocation,
    pub timeout: Duration,
    /// Stop the installer once all of these were printed
    pub stop_on: Vec<String>,
    /// End the step as failed as soon as any of these is printed
    pub fail_on: Vec<String>,
    /// Substrings the captured output must contain
    pub expect_output: Vec<String>,
}

impl Step {
    fn install(installer: &std::path::Path, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            label: "install".to_string(),
            invocation: Invocation::new(installer, args),
            timeout,
            stop_on: Vec::new(),
            fail_on: Vec::new(),
            expect_output: Vec::new(),
        }
    }

    fn check(installer: &std::path::Path, args: &[&str], expect_output: Vec<String>, timeout: Duration) -> Self {
        Self {
            label: args.join(" "),
            invocation: Invocation::new(installer, strings(args)),
            timeout,
            stop_on: Vec::new(),
            fail_on: Vec::new(),
            expect_output,
        }
    }
}

/// `<buildInfoDir>/archive_<version>_<suffix>.zst`
fn offline_archive(data: &ScenarioData, expectation: &Expectation, ctx: &RunContext) -> PathBuf {
    let version = expectation
        .versions
        .first()
        .cloned()
        .unwrap_or_else(|| ctx.catalog.default_version.clone());
    let suffix = data
        .offline_package_name
        .clone()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| ctx.platform.archive_tag());
    ctx.build_info_dir
        .join(format!("archive_{}_{}.zst", version, suffix))
}

fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::common::config::Config;
    use crate::context::{MirrorTable, Platform, PlatformProfile, RunSettings, VersionCatalog};
    use crate::testing::config::{DocumentFormat, ScenarioDocument};
    use std::path::Path;

    pub(crate) fn context(home: &Path, build_info: &Path) -> RunContext {
        let platform = PlatformProfile::for_platform(Platform::Linux, "x86_64", home.to_path_buf());
        let settings = RunSettings {
            installer: PathBuf::from("/opt/eim"),
            installer_version: Some("0.2.0".to_string()),
            default_idf_version: None,
            debug: false,
            build_info_dir: build_info.to_path_buf(),
            versions_url: None,
        };
        RunContext::new(
            platform,
            MirrorTable::builtin(),
            VersionCatalog::fallback(Some("v5.4.1")),
            Config::default(),
            settings,
            PathBuf::from("/opt/eim"),
        )
    }

    fn spec(raw: &str) -> TestCaseSpec {
        let doc = ScenarioDocument::parse(raw, DocumentFormat::Json).unwrap();
        let spec = doc.valid().next().cloned().unwrap();
        spec
    }

    #[test]
    fn test_default_token_resolves_identically_in_flags_and_expectation() {
        let ctx = context(Path::new("/home/u"), Path::new("/tmp/bi"));
        let spec = spec(r#"[{"id": 1, "type": "custom", "data": {"idfList": "default|v5.3.2", "targetList": "default"}}]"#);
        let scenario = Scenario::resolve(&spec, &ctx).unwrap();

        let steps = scenario.plan(&ctx).unwrap();
        let args = &steps[0].invocation.args;
        let i = args.iter().position(|a| a == "-i").unwrap();
        assert_eq!(args[i + 1], "v5.4.1,v5.3.2");

        let expectation = scenario.expectation().unwrap();
        assert_eq!(expectation.versions, vec!["v5.4.1", "v5.3.2"]);
        assert_eq!(expectation.targets, vec!["esp32"]);
    }

    #[test]
    fn test_missing_lists_fall_back_for_expectation_only() {
        let ctx = context(Path::new("/home/u"), Path::new("/tmp/bi"));
        let spec = spec(r#"[{"id": 2, "type": "custom", "data": {"installFolder": ".espressif"}}]"#);
        let scenario = Scenario::resolve(&spec, &ctx).unwrap();

        let args = &scenario.plan(&ctx).unwrap()[0].invocation.args;
        assert_eq!(args, &strings(&["install", "-p", "/home/u/.espressif"]));

        let expectation = scenario.expectation().unwrap();
        assert_eq!(expectation.install_dir, PathBuf::from("/home/u/.espressif"));
        assert_eq!(expectation.versions, vec!["v5.4.1"]);
        assert!(!expectation.tools_dir_is_distinct());
    }

    #[test]
    fn test_default_scenario_plan() {
        let ctx = context(Path::new("/home/u"), Path::new("/tmp/bi"));
        let scenario = Scenario::resolve(&spec(r#"[{"id": 3, "type": "default"}]"#), &ctx).unwrap();
        let steps = scenario.plan(&ctx).unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].invocation.args, strings(&["install", "-n", "true"]));
        assert_eq!(steps[0].timeout, Duration::from_secs(6000));
        assert_eq!(scenario.expectation().unwrap().install_dir, PathBuf::from("/home/u/.espressif"));
    }

    #[test]
    fn test_arguments_plan() {
        let ctx = context(Path::new("/home/u"), Path::new("/tmp/bi"));
        let scenario = Scenario::resolve(&spec(r#"[{"id": 4, "type": "arguments"}]"#), &ctx).unwrap();
        let steps = scenario.plan(&ctx).unwrap();
        let labels: Vec<_> = steps.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["--version", "--help", "install --help"]);
        assert_eq!(steps[0].expect_output, vec!["0.2.0"]);
        assert_eq!(steps[2].expect_output, vec!["--idf-versions"]);
        assert!(steps.iter().all(|s| s.timeout == Duration::from_secs(20)));
        assert!(scenario.expectation().is_none());
    }

    #[test]
    fn test_prerequisites_plan_stops_on_markers() {
        let ctx = context(Path::new("/home/u"), Path::new("/tmp/bi"));
        let scenario = Scenario::resolve(&spec(r#"[{"id": 5, "type": "prerequisites"}]"#), &ctx).unwrap();
        let steps = scenario.plan(&ctx).unwrap();
        assert_eq!(steps[0].stop_on, vec!["prerequisites are satisfied"]);
        assert_eq!(steps[0].expect_output, steps[0].stop_on);
        assert!(steps[0].fail_on.iter().any(|m| m == "not satisfied"));
        assert_eq!(steps[0].timeout, Duration::from_secs(20));

        // Custom markers replace the success marker, failure markers stay
        let scenario = Scenario::resolve(
            &spec(r#"[{"id": 5, "type": "prerequisites", "data": {"expectOutput": ["ready"]}}]"#),
            &ctx,
        )
        .unwrap();
        let steps = scenario.plan(&ctx).unwrap();
        assert_eq!(steps[0].stop_on, vec!["ready"]);
        assert!(!steps[0].fail_on.is_empty());
    }

    #[test]
    fn test_offline_requires_archive() {
        let build_info = tempfile::tempdir().unwrap();
        let ctx = context(Path::new("/home/u"), build_info.path());
        let raw = r#"[{"id": 6, "type": "offline", "data": {"idfList": "v5.4.1"}}]"#;

        let err = Scenario::resolve(&spec(raw), &ctx).unwrap_err();
        assert!(matches!(err, Error::OfflineArchiveMissing(_)));

        let archive = build_info.path().join("archive_v5.4.1_linux-x64.zst");
        std::fs::write(&archive, b"zst").unwrap();
        let scenario = Scenario::resolve(&spec(raw), &ctx).unwrap();
        let args = &scenario.plan(&ctx).unwrap()[0].invocation.args;
        let tail: Vec<_> = args[args.len() - 4..].to_vec();
        assert_eq!(
            tail,
            vec![
                "-n".to_string(),
                "true".to_string(),
                "--use-local-archive".to_string(),
                archive.display().to_string()
            ]
        );
    }

    #[test]
    fn test_version_management_plan() {
        let ctx = context(Path::new("/home/u"), Path::new("/tmp/bi"));
        let scenario = Scenario::resolve(
            &spec(r#"[{"id": 7, "type": "version-management", "data": {"idfList": "v5.3.2|v5.4"}}]"#),
            &ctx,
        )
        .unwrap();
        let steps = scenario.plan(&ctx).unwrap();
        assert_eq!(steps[0].invocation.args, strings(&["list"]));
        assert_eq!(steps[0].expect_output, vec!["v5.3.2", "v5.4"]);
        assert_eq!(steps[1].invocation.args, strings(&["select", "v5.3.2"]));
    }

    #[test]
    fn test_unknown_mirror_fails_plan() {
        let ctx = context(Path::new("/home/u"), Path::new("/tmp/bi"));
        let scenario = Scenario::resolve(
            &spec(r#"[{"id": 8, "type": "custom", "data": {"toolsMirror": "nonexistent"}}]"#),
            &ctx,
        )
        .unwrap();
        assert!(matches!(scenario.plan(&ctx), Err(Error::UnknownMirror { .. })));
    }
}
