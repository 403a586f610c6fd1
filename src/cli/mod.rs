//! CLI command handling
//!
//! Dispatches CLI commands and formats their output.

mod signals;

use std::path::Path;

use colored::Colorize;

use crate::commands::{Commands, RunArgs};
use crate::common::config::Config;
use crate::common::{paths, Error, Result};
use crate::context::{MirrorFamily, MirrorTable, PlatformProfile, RunContext, RunSettings, VersionCatalog};
use crate::testing::{self, ScenarioDocument, ScenarioEntry, ScenarioFilter};

/// Overall verdict of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Passed,
    /// The command ran, but scenarios or checks failed
    Failed,
}

/// Dispatch a CLI command
pub async fn dispatch(command: Commands) -> Result<Verdict> {
    match command {
        Commands::Run {
            script,
            only,
            settings,
        } => run(&script, only, settings).await,

        Commands::Validate {
            script,
            installer,
            build_info_dir,
        } => validate(&script, installer, build_info_dir).await,

        Commands::Mirrors { json } => {
            let table = MirrorTable::builtin();
            if json {
                println!("{}", serde_json::to_string_pretty(table.entries())?);
            } else {
                for family in [MirrorFamily::Idf, MirrorFamily::Tools, MirrorFamily::Pypi] {
                    println!("{}", format!("{} mirrors:", family).cyan());
                    for entry in table.entries().iter().filter(|e| e.family == family) {
                        println!("  {:<14} {}", entry.key, entry.url.dimmed());
                    }
                }
            }
            Ok(Verdict::Passed)
        }

        Commands::Platform { json } => {
            let profile = PlatformProfile::detect()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&profile)?);
            } else {
                println!("Platform:      {} ({})", profile.platform, profile.arch);
                println!("OS:            {}", profile.os_description);
                println!("Install dir:   {}", profile.default_install_dir.display());
                println!("Tools dir:     {}", profile.default_tools_dir.display());
                println!("Archive tag:   {}", profile.archive_tag());
                let suffix = if profile.exe_suffix.is_empty() {
                    "(none)"
                } else {
                    profile.exe_suffix
                };
                println!("Exe suffix:    {}", suffix);
            }
            Ok(Verdict::Passed)
        }

        Commands::Versions {
            url,
            idf_version,
            json,
        } => {
            let config = Config::load()?;
            let url = url.unwrap_or_else(|| config.catalog.url.clone());
            let timeout = std::time::Duration::from_secs(config.catalog.fetch_timeout_secs);
            let catalog = VersionCatalog::fetch(&url, timeout, idf_version.as_deref()).await;
            if json {
                println!("{}", serde_json::to_string_pretty(&catalog)?);
            } else {
                println!("Source:          {:?}", catalog.source);
                println!("Default version: {}", catalog.default_version.green());
                println!("Default target:  {}", catalog.default_target);
                println!("Versions:        {}", catalog.versions.join(", "));
                println!("Targets:         {}", catalog.targets.join(", "));
            }
            Ok(Verdict::Passed)
        }
    }
}

async fn run(script: &Path, only: Vec<u32>, args: RunArgs) -> Result<Verdict> {
    let document = ScenarioDocument::load(script)?;
    let config = Config::load()?;

    paths::ensure_log_dir(&args.build_info_dir).map_err(|e| {
        Error::Config(format!(
            "Build-info directory '{}' is not writable: {}",
            args.build_info_dir.display(),
            e
        ))
    })?;

    let settings = RunSettings {
        installer: args.installer,
        installer_version: args.installer_version,
        default_idf_version: args.idf_version,
        debug: args.debug,
        build_info_dir: args.build_info_dir,
        versions_url: args.versions_url,
    };
    let ctx = RunContext::build(settings, config).await?;

    let (handle, signal) = testing::cancel::channel();
    let listener = tokio::spawn(signals::cancel_on_signal(handle));

    let report = testing::run_document(&document, &ctx, &ScenarioFilter::only(only), signal).await;
    listener.abort();

    let report_path = paths::report_path(&ctx.build_info_dir);
    report.write(&report_path)?;
    println!("\nReport: {}", report_path.display());

    if report.has_failures() || report.was_cancelled() {
        Ok(Verdict::Failed)
    } else {
        Ok(Verdict::Passed)
    }
}

async fn validate(
    script: &Path,
    installer: std::path::PathBuf,
    build_info_dir: std::path::PathBuf,
) -> Result<Verdict> {
    let document = ScenarioDocument::load(script)?;
    let platform = PlatformProfile::detect()?;
    let installer = platform.executable(&installer);
    let settings = RunSettings {
        installer: installer.clone(),
        installer_version: None,
        default_idf_version: None,
        debug: false,
        build_info_dir,
        versions_url: None,
    };
    // Offline check: the compiled-in catalog stands in for the manifest
    let ctx = RunContext::new(
        platform,
        MirrorTable::builtin(),
        VersionCatalog::fallback(None),
        Config::load()?,
        settings,
        installer,
    );

    let mut problems = 0;
    for entry in &document.entries {
        match entry {
            ScenarioEntry::Invalid(invalid) => {
                problems += 1;
                println!("{} entry {}: {}", "✗".red(), invalid.index, invalid.error);
            }
            ScenarioEntry::Valid(spec) => {
                let planned = testing::Scenario::resolve(spec, &ctx).and_then(|s| s.plan(&ctx));
                match planned {
                    Ok(steps) => {
                        println!("{} #{} {} ({})", "✓".green(), spec.id, spec.display_name(), spec.kind);
                        for step in steps {
                            println!("    {}", step.invocation.render(&ctx.platform).dimmed());
                        }
                    }
                    Err(e) => {
                        problems += 1;
                        println!("{} #{} {}: {}", "✗".red(), spec.id, spec.display_name(), e);
                    }
                }
            }
        }
    }

    println!("\n{} entries, {} with problems", document.entries.len(), problems);
    Ok(if problems == 0 {
        Verdict::Passed
    } else {
        Verdict::Failed
    })
}
