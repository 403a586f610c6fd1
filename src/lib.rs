//! Installer Harness - test orchestration for the toolchain installer
//!
//! This library reads declarative scenario documents, drives the installer
//! through install, verify and cleanup phases, and can route its traffic
//! through an intercepting proxy.

pub mod cli;
pub mod commands;
pub mod common;
pub mod context;
pub mod proxy;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use context::RunContext;
pub use testing::{RunReport, ScenarioDocument, ScenarioStatus};
