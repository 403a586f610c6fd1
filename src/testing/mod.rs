//! Scenario execution engine
//!
//! Reads a scenario document, resolves each entry against the run context
//! and drives the installer through install, verify and cleanup. Results
//! are collected as structured data and written as one report per run.

pub mod cancel;
pub mod cleanup;
pub mod config;
pub mod invocation;
pub mod process;
pub mod report;
pub mod runner;
pub mod scenario;
pub mod verifier;

pub use cancel::{CancelHandle, CancelSignal};
pub use config::{ScenarioData, ScenarioDocument, ScenarioEntry, ScenarioType, TestCaseSpec};
pub use invocation::{build_install_args, Invocation};
pub use report::{RunReport, ScenarioResult, ScenarioStatus};
pub use runner::{run_document, run_scenario, ScenarioFilter};
pub use scenario::{Expectation, ResolvedData, Scenario};
pub use verifier::{VerificationEntry, VerificationReport};
