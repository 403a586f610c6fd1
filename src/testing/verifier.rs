//! Post-install filesystem inspection
//!
//! Checks each expected version on its own so a partial install shows up
//! as individual failed entries instead of one collapsed verdict.

use std::path::Path;

use serde::Serialize;

use crate::context::PlatformProfile;

use super::scenario::Expectation;

/// Toolchain directory for Xtensa based chips
const XTENSA_TOOLCHAIN: &str = "xtensa-esp-elf";
/// Toolchain directory for RISC-V based chips
const RISCV_TOOLCHAIN: &str = "riscv32-esp-elf";

/// Chips built with the Xtensa toolchain, everything else is RISC-V
const XTENSA_CHIPS: &[&str] = &["esp32", "esp32s2", "esp32s3"];

/// Result for one expected version
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationEntry {
    pub expected_version: String,
    pub expected_targets: Vec<String>,
    pub found: bool,
    /// One line per failed check, empty when found
    pub details: Vec<String>,
}

/// Verification result of one scenario, in expectation order
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub install_dir: String,
    pub tools_dir: Option<String>,
    pub entries: Vec<VerificationEntry>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.entries.iter().all(|entry| entry.found)
    }

    pub fn missing(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|entry| !entry.found)
            .map(|entry| entry.expected_version.as_str())
            .collect()
    }
}

/// Inspect the filesystem against an expectation
pub fn inspect(platform: &PlatformProfile, expectation: &Expectation) -> VerificationReport {
    let tools_dir = expectation
        .tools_dir_is_distinct()
        .then_some(expectation.tools_dir.as_path());

    let entries = expectation
        .versions
        .iter()
        .map(|version| inspect_version(platform, expectation, version, tools_dir))
        .collect();

    VerificationReport {
        install_dir: expectation.install_dir.display().to_string(),
        tools_dir: tools_dir.map(|dir| dir.display().to_string()),
        entries,
    }
}

fn inspect_version(
    platform: &PlatformProfile,
    expectation: &Expectation,
    version: &str,
    tools_dir: Option<&Path>,
) -> VerificationEntry {
    let install_dir = &expectation.install_dir;
    let version_dir = install_dir.join(version);
    let mut details = Vec::new();

    if !version_dir.is_dir() {
        details.push(format!("version directory {} is missing", version_dir.display()));
    }

    let idf_py = version_dir.join("esp-idf").join("tools").join("idf.py");
    if !idf_py.is_file() {
        details.push(format!("source checkout marker {} is missing", idf_py.display()));
    }

    let script = platform.activation_script(&expectation.tools_dir, version);
    if !script.is_file() {
        details.push(format!("activation script {} is missing", script.display()));
    }

    if let Some(tools_dir) = tools_dir {
        details.extend(check_toolchains(tools_dir, &expectation.targets));
    }

    let found = details.is_empty();
    if found {
        tracing::debug!("Verified {} in {}", version, install_dir.display());
    } else {
        tracing::warn!("{} not verified: {}", version, details.join("; "));
    }

    VerificationEntry {
        expected_version: version.to_string(),
        expected_targets: expectation.targets.clone(),
        found,
        details,
    }
}

/// Toolchain directories missing for the requested chips
fn check_toolchains(tools_dir: &Path, targets: &[String]) -> Vec<String> {
    let present = |name: &str| tools_dir.join(name).is_dir();
    let mut missing = Vec::new();

    for target in targets {
        if target.eq_ignore_ascii_case("all") {
            if !present(XTENSA_TOOLCHAIN) && !present(RISCV_TOOLCHAIN) {
                missing.push(format!(
                    "no toolchain ({} or {}) in {}",
                    XTENSA_TOOLCHAIN,
                    RISCV_TOOLCHAIN,
                    tools_dir.display()
                ));
            }
            continue;
        }

        let toolchain = toolchain_for(target);
        if !present(toolchain) && !missing.iter().any(|m: &String| m.contains(toolchain)) {
            missing.push(format!(
                "toolchain {} for {} is missing in {}",
                toolchain,
                target,
                tools_dir.display()
            ));
        }
    }
    missing
}

fn toolchain_for(target: &str) -> &'static str {
    if XTENSA_CHIPS.iter().any(|chip| chip.eq_ignore_ascii_case(target)) {
        XTENSA_TOOLCHAIN
    } else {
        RISCV_TOOLCHAIN
    }
}
