//! Scenario dispatcher
//!
//! Runs the entries of a document strictly in order, one at a time. Every
//! failure stays inside its scenario: the loop always moves on to the next
//! entry, and only a cancellation stops it early.

use std::collections::BTreeSet;
use std::time::Duration;

use colored::Colorize;

use crate::common::{paths, Error};
use crate::context::RunContext;
use crate::proxy::{ProxyPolicy, ProxySession};

use super::cancel::CancelSignal;
use super::cleanup;
use super::config::{ScenarioDocument, ScenarioEntry, TestCaseSpec};
use super::process::{self, ProcessReport, RunOptions, ScenarioLog};
use super::report::{OutputCheck, RunReport, ScenarioResult, ScenarioStatus};
use super::scenario::{Scenario, Step};
use super::verifier;

/// Which scenarios of a document to run
#[derive(Debug, Clone, Default)]
pub struct ScenarioFilter {
    only: BTreeSet<u32>,
}

impl ScenarioFilter {
    /// Run only the given ids, or everything when empty
    pub fn only(ids: impl IntoIterator<Item = u32>) -> Self {
        Self {
            only: ids.into_iter().collect(),
        }
    }

    pub fn selects(&self, id: u32) -> bool {
        self.only.is_empty() || self.only.contains(&id)
    }
}

/// Run every entry of a document and collect the report
pub async fn run_document(
    document: &ScenarioDocument,
    ctx: &RunContext,
    filter: &ScenarioFilter,
    cancel: CancelSignal,
) -> RunReport {
    let mut report = RunReport::start(ctx);

    for entry in &document.entries {
        if cancel.is_cancelled() {
            report.scenarios.push(cancelled_result(entry));
            continue;
        }

        let result = match entry {
            // Only a salvaged id can be filtered; entries without one are still reported
            ScenarioEntry::Invalid(invalid) if invalid.id.is_some_and(|id| !filter.selects(id)) => {
                tracing::debug!("Malformed entry {} filtered out", invalid.index);
                ScenarioResult::skipped(invalid.id, invalid.name.clone(), None)
            }
            ScenarioEntry::Invalid(invalid) => {
                println!(
                    "\n{} entry {}: {}",
                    "✗".red(),
                    invalid.index,
                    invalid.error
                );
                tracing::error!("Skipping entry {}: {}", invalid.index, invalid.error);
                ScenarioResult::invalid(invalid.id, invalid.name.clone(), &invalid.error)
            }
            ScenarioEntry::Valid(spec) if !filter.selects(spec.id) => {
                tracing::debug!("Scenario {} filtered out", spec.id);
                ScenarioResult::skipped(Some(spec.id), Some(spec.name.clone()), Some(spec.kind))
            }
            ScenarioEntry::Valid(spec) => run_scenario(spec, ctx, cancel.clone()).await,
        };
        report.scenarios.push(result);
    }

    report.finish();
    print_summary(&report);
    report
}

fn cancelled_result(entry: &ScenarioEntry) -> ScenarioResult {
    match entry {
        ScenarioEntry::Valid(spec) => ScenarioResult::new(spec).with_status(ScenarioStatus::Cancelled),
        ScenarioEntry::Invalid(invalid) => {
            ScenarioResult::invalid(invalid.id, invalid.name.clone(), &invalid.error)
        }
    }
}

/// Run one scenario through install, verify and cleanup
pub async fn run_scenario(spec: &TestCaseSpec, ctx: &RunContext, mut cancel: CancelSignal) -> ScenarioResult {
    let mut result = ScenarioResult::new(spec);

    println!(
        "\n{} {} {}",
        "Running Scenario:".blue().bold(),
        format!("#{}", spec.id).dimmed(),
        spec.display_name().white().bold()
    );
    tracing::info!("Scenario {} ({}) started", spec.id, spec.kind);

    let scenario = match Scenario::resolve(spec, ctx) {
        Ok(scenario) => scenario,
        Err(e) => return fail(result, e),
    };
    let steps = match scenario.plan(ctx) {
        Ok(steps) => steps,
        Err(e) => return fail(result, e),
    };

    let log_path = paths::scenario_log_path(&ctx.build_info_dir, spec.id);
    let mut log = match ScenarioLog::create(&log_path).await {
        Ok(log) => log,
        Err(e) => return fail(result, e),
    };
    result.log_file = Some(log_path);

    // Install phase, wrapped by the proxy when one is requested
    let mode = spec.proxy_mode();
    let proxy = if mode.is_active() {
        let policy = ProxyPolicy::new(mode, spec.proxy_block_list.iter());
        let upstream = Duration::from_secs(ctx.config.proxy.upstream_connect_secs);
        match ProxySession::start(policy, upstream).await {
            Ok(session) => Some(session),
            Err(e) => {
                let _ = log.note(&format!("proxy setup failed: {}", e)).await;
                return fail(result, e);
            }
        }
    } else {
        None
    };
    let proxy_env = proxy.as_ref().map(ProxySession::env_vars).unwrap_or_default();

    let mut cancelled = false;
    for step in &steps {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        match run_step(step, ctx, &proxy_env, &mut log, &mut cancel).await {
            Ok(report) => {
                cancelled = report.outcome == process::ProcessOutcome::Cancelled;
                record_step(&mut result, step, report);
                if cancelled {
                    break;
                }
            }
            Err(e) => {
                println!("  {} {}: {}", "✗".red(), step.label, e);
                let _ = log.note(&format!("{} failed to run: {}", step.label, e)).await;
                result.push_error(&e);
            }
        }
    }

    if let Some(session) = proxy {
        let summary = session.shutdown().await;
        println!(
            "  {} proxy ({}): {} allowed, {} blocked, {} failed",
            "•".cyan(),
            summary.mode,
            summary.allowed,
            summary.blocked,
            summary.failed
        );
        result.proxy = Some(summary);
    }

    if cancelled {
        let _ = log.note("scenario cancelled, verification and cleanup skipped").await;
        let _ = log.flush().await;
        println!("  {} {}", "⚠".yellow(), "Cancelled".yellow());
        result.push_error(&Error::Cancelled);
        return result.with_status(ScenarioStatus::Cancelled);
    }

    if let Some(expectation) = scenario.expectation() {
        let verification = verifier::inspect(&ctx.platform, expectation);
        for entry in &verification.entries {
            if entry.found {
                println!("  {} {} verified", "✓".green(), entry.expected_version);
            } else {
                println!(
                    "  {} {} not verified: {}",
                    "✗".red(),
                    entry.expected_version,
                    entry.details.join("; ").dimmed()
                );
            }
        }
        result.verification = Some(verification);

        if spec.delete_after_test {
            let report = cleanup::run(expectation, &ctx.platform.home_dir);
            for failure in report.failures() {
                println!("  {} cleanup of {} failed", "⚠".yellow(), failure.path);
            }
            result.cleanup = Some(report);
        } else {
            tracing::info!("Keeping {} for later scenarios", expectation.install_dir.display());
        }
    }

    let _ = log.flush().await;
    result.conclude();
    match result.status {
        ScenarioStatus::Passed => println!("  {} {}", "✓".green().bold(), "Scenario Passed".green().bold()),
        _ => println!("  {} {}", "✗".red().bold(), "Scenario Failed".red().bold()),
    }
    tracing::info!("Scenario {} finished: {:?}", spec.id, result.status);
    result
}

async fn run_step(
    step: &Step,
    ctx: &RunContext,
    proxy_env: &[(String, String)],
    log: &mut ScenarioLog,
    cancel: &mut CancelSignal,
) -> crate::common::Result<ProcessReport> {
    let invocation = step.invocation.clone().with_env(proxy_env);
    let options = RunOptions {
        label: step.label.clone(),
        command_line: invocation.render(&ctx.platform),
        timeout: step.timeout,
        kill_grace: ctx.config.timeouts.kill_grace(),
        stop_on: step.stop_on.clone(),
        fail_on: step.fail_on.clone(),
    };
    process::run(&invocation, &options, log, cancel).await
}

/// Fold a finished step into the scenario result
fn record_step(result: &mut ScenarioResult, step: &Step, report: ProcessReport) {
    let output = report.output.to_lowercase();
    for expected in &step.expect_output {
        let found = output.contains(&expected.to_lowercase());
        if !found {
            result.push_error(&Error::OutputMismatch(format!("'{}' in {}", expected, step.label)));
        }
        result.output_checks.push(OutputCheck {
            step: step.label.clone(),
            expected: expected.clone(),
            found,
        });
    }

    match report.error() {
        Some(Error::Cancelled) => {}
        Some(e) => {
            println!("  {} {}: {}", "✗".red(), step.label, e);
            result.push_error(&e);
        }
        None => println!("  {} {}", "✓".green(), step.label.dimmed()),
    }
    result.steps.push(report);
}

fn fail(mut result: ScenarioResult, error: Error) -> ScenarioResult {
    println!("  {} {}", "✗".red(), error);
    tracing::error!("Scenario {:?} failed: {}", result.id, error);
    result.push_error(&error);
    result.with_status(ScenarioStatus::Failed)
}

fn print_summary(report: &RunReport) {
    let passed = report.count(ScenarioStatus::Passed);
    let failed = report.count(ScenarioStatus::Failed);
    let skipped = report.count(ScenarioStatus::Skipped);
    let cancelled = report.count(ScenarioStatus::Cancelled);

    println!("\n{}", "Summary:".cyan());
    for scenario in &report.scenarios {
        let marker = match scenario.status {
            ScenarioStatus::Passed => "✓".green(),
            ScenarioStatus::Failed => "✗".red(),
            ScenarioStatus::Skipped => "-".dimmed(),
            ScenarioStatus::Cancelled => "⚠".yellow(),
        };
        let id = scenario.id.map(|id| format!("#{}", id)).unwrap_or_else(|| "#?".to_string());
        println!(
            "  {} {} {}",
            marker,
            id.dimmed(),
            scenario.name.as_deref().unwrap_or("")
        );
    }
    println!(
        "\n{} passed, {} failed, {} skipped, {} cancelled",
        passed.to_string().green().bold(),
        failed.to_string().red().bold(),
        skipped,
        cancelled
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::cancel;
    use crate::testing::config::DocumentFormat;
    use crate::testing::scenario::tests::context;

    #[test]
    fn test_filter() {
        let all = ScenarioFilter::default();
        assert!(all.selects(42));
        let some = ScenarioFilter::only([1, 3]);
        assert!(some.selects(3));
        assert!(!some.selects(2));
    }

    #[tokio::test]
    async fn test_configuration_errors_do_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), dir.path());
        let document = ScenarioDocument::parse(
            r#"[
                {"id": 1, "type": "teleport", "name": "bogus"},
                {"id": 2, "type": "custom", "name": "bad mirror", "data": {"toolsMirror": "nonexistent"}},
                {"id": 3, "type": "custom", "name": "filtered"}
            ]"#,
            DocumentFormat::Json,
        )
        .unwrap();

        let report = run_document(&document, &ctx, &ScenarioFilter::only([1, 2]), CancelSignal::never()).await;
        let statuses: Vec<_> = report.scenarios.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![ScenarioStatus::Failed, ScenarioStatus::Failed, ScenarioStatus::Skipped]
        );
        // Nothing was spawned for the bad mirror, so no steps and no log
        assert!(report.scenarios[1].steps.is_empty());
        assert!(report.scenarios[1].log_file.is_none());
        assert_eq!(report.scenarios[1].errors[0].kind, crate::common::ErrorKind::Configuration);
    }

    #[tokio::test]
    async fn test_filter_applies_to_malformed_entries_with_an_id() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), dir.path());
        let document = ScenarioDocument::parse(
            r#"[
                {"id": 1, "type": "teleport", "name": "not selected"},
                {"type": "teleport", "name": "no id"},
                {"id": 3, "type": "teleport", "name": "selected"}
            ]"#,
            DocumentFormat::Json,
        )
        .unwrap();

        let report = run_document(&document, &ctx, &ScenarioFilter::only([3]), CancelSignal::never()).await;
        let statuses: Vec<_> = report.scenarios.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![ScenarioStatus::Skipped, ScenarioStatus::Failed, ScenarioStatus::Failed]
        );
        assert!(report.scenarios[0].errors.is_empty());

        let report = run_document(
            &ScenarioDocument::parse(r#"[{"id": 1, "type": "teleport"}]"#, DocumentFormat::Json).unwrap(),
            &ctx,
            &ScenarioFilter::only([2]),
            CancelSignal::never(),
        )
        .await;
        assert!(!report.has_failures());
    }

    #[tokio::test]
    async fn test_cancelled_before_start_marks_everything_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), dir.path());
        let document = ScenarioDocument::parse(
            r#"[{"id": 1, "type": "default"}, {"id": 2, "type": "custom"}]"#,
            DocumentFormat::Json,
        )
        .unwrap();

        let (handle, signal) = cancel::channel();
        handle.cancel();
        let report = run_document(&document, &ctx, &ScenarioFilter::default(), signal).await;
        assert!(report.scenarios.iter().all(|s| s.status == ScenarioStatus::Cancelled));
        assert!(report.was_cancelled());
    }
}
