//! Run report
//!
//! One JSON file per run, one entry per document entry, meant for an
//! external report generator.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::common::{Error, ErrorRecord, Result};
use crate::context::{CatalogSource, RunContext};
use crate::proxy::ProxySummary;

use super::cleanup::CleanupReport;
use super::config::{ScenarioType, TestCaseSpec};
use super::process::ProcessReport;
use super::verifier::VerificationReport;

/// Verdict of one scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    Skipped,
    Cancelled,
}

/// Output check against one step's captured output
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputCheck {
    pub step: String,
    pub expected: String,
    pub found: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub id: Option<u32>,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<ScenarioType>,
    pub status: ScenarioStatus,
    pub log_file: Option<PathBuf>,
    pub steps: Vec<ProcessReport>,
    pub output_checks: Vec<OutputCheck>,
    pub verification: Option<VerificationReport>,
    pub proxy: Option<ProxySummary>,
    pub cleanup: Option<CleanupReport>,
    pub errors: Vec<ErrorRecord>,
}

impl ScenarioResult {
    pub fn new(spec: &TestCaseSpec) -> Self {
        Self::blank(Some(spec.id), Some(spec.name.clone()), Some(spec.kind))
    }

    /// Result for an entry that never became a test case
    pub fn invalid(id: Option<u32>, name: Option<String>, error: &Error) -> Self {
        let mut result = Self::blank(id, name, None);
        result.push_error(error);
        result.status = ScenarioStatus::Failed;
        result
    }

    /// Result for an entry left out by the id filter, valid or not
    pub fn skipped(id: Option<u32>, name: Option<String>, kind: Option<ScenarioType>) -> Self {
        Self::blank(id, name, kind).with_status(ScenarioStatus::Skipped)
    }

    pub fn with_status(mut self, status: ScenarioStatus) -> Self {
        self.status = status;
        self
    }

    fn blank(id: Option<u32>, name: Option<String>, kind: Option<ScenarioType>) -> Self {
        Self {
            id,
            name,
            kind,
            status: ScenarioStatus::Failed,
            log_file: None,
            steps: Vec::new(),
            output_checks: Vec::new(),
            verification: None,
            proxy: None,
            cleanup: None,
            errors: Vec::new(),
        }
    }

    pub fn push_error(&mut self, error: &Error) {
        self.errors.push(ErrorRecord::from(error));
    }

    /// Decide pass/fail from everything recorded so far
    ///
    /// Cleanup problems are housekeeping and do not count.
    pub fn conclude(&mut self) {
        let passed = self.errors.is_empty()
            && self.output_checks.iter().all(|check| check.found)
            && self.verification.as_ref().map_or(true, VerificationReport::passed);
        self.status = if passed {
            ScenarioStatus::Passed
        } else {
            ScenarioStatus::Failed
        };
    }
}

/// Structured result of a whole run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub installer: String,
    pub installer_version: Option<String>,
    pub platform: String,
    pub arch: String,
    pub os: String,
    pub default_version: String,
    pub catalog_source: CatalogSource,
    pub scenarios: Vec<ScenarioResult>,
}

impl RunReport {
    pub fn start(ctx: &RunContext) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            installer: ctx.installer.display().to_string(),
            installer_version: ctx.installer_version.clone(),
            platform: ctx.platform.platform.to_string(),
            arch: ctx.platform.arch.clone(),
            os: ctx.platform.os_description.clone(),
            default_version: ctx.catalog.default_version.clone(),
            catalog_source: ctx.catalog.source,
            scenarios: Vec::new(),
        }
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn count(&self, status: ScenarioStatus) -> usize {
        self.scenarios.iter().filter(|s| s.status == status).count()
    }

    pub fn has_failures(&self) -> bool {
        self.count(ScenarioStatus::Failed) > 0
    }

    pub fn was_cancelled(&self) -> bool {
        self.count(ScenarioStatus::Cancelled) > 0
    }

    /// Write the report as pretty JSON
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!("Report written to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::verifier::VerificationEntry;

    fn verification(found: &[bool]) -> VerificationReport {
        VerificationReport {
            install_dir: "/tmp/esp".to_string(),
            tools_dir: None,
            entries: found
                .iter()
                .enumerate()
                .map(|(i, found)| VerificationEntry {
                    expected_version: format!("v5.{}", i),
                    expected_targets: vec!["esp32".to_string()],
                    found: *found,
                    details: Vec::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_conclude() {
        let mut result = ScenarioResult::blank(Some(1), None, Some(ScenarioType::Custom));
        result.verification = Some(verification(&[true, true]));
        result.conclude();
        assert_eq!(result.status, ScenarioStatus::Passed);

        result.verification = Some(verification(&[true, false]));
        result.conclude();
        assert_eq!(result.status, ScenarioStatus::Failed);

        let mut result = ScenarioResult::blank(Some(2), None, Some(ScenarioType::Arguments));
        result.output_checks.push(OutputCheck {
            step: "--help".to_string(),
            expected: "Usage".to_string(),
            found: false,
        });
        result.conclude();
        assert_eq!(result.status, ScenarioStatus::Failed);
    }

    #[test]
    fn test_invalid_entry_serializes_error_kind() {
        let result = ScenarioResult::invalid(
            Some(9),
            Some("bogus".to_string()),
            &Error::ScenarioParse {
                index: 0,
                message: "unknown variant `teleport`".to_string(),
            },
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["type"], serde_json::Value::Null);
        assert_eq!(json["errors"][0]["kind"], "configuration");
    }

    #[test]
    fn test_write_report() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = crate::testing::scenario::tests::context(dir.path(), dir.path());
        let mut report = RunReport::start(&ctx);
        report.scenarios.push(
            ScenarioResult::blank(Some(1), Some("a".to_string()), Some(ScenarioType::Default))
                .with_status(ScenarioStatus::Skipped),
        );
        report.finish();

        let path = dir.path().join("test-report.json");
        report.write(&path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["catalogSource"], "fallback");
        assert_eq!(json["defaultVersion"], "v5.4.1");
        assert_eq!(json["scenarios"][0]["status"], "skipped");
        assert!(!report.has_failures());
    }
}
