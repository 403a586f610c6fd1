//! Error types for the installer harness
//!
//! Every error knows which class of failure it belongs to so the run report
//! can tell configuration mistakes apart from installer misbehavior.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the installer harness
#[derive(Error, Debug)]
pub enum Error {
    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Unknown {family} mirror '{key}'. Known mirrors: {known}")]
    UnknownMirror {
        family: String,
        key: String,
        known: String,
    },

    #[error("Invalid scenario at position {index}: {message}")]
    ScenarioParse { index: usize, message: String },

    #[error("Scenario id {0} is used more than once in this document")]
    DuplicateScenarioId(u32),

    #[error("Offline archive not found at '{}'", .0.display())]
    OfflineArchiveMissing(PathBuf),

    #[error("Installer executable not found: {0}")]
    InstallerNotFound(String),

    // === Execution Errors ===
    #[error("Failed to start installer '{program}': {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Installer did not finish within {0} seconds")]
    ProcessTimeout(u64),

    #[error("Installer exited with code {0}")]
    ProcessFailed(i32),

    #[error("Installer was terminated by a signal")]
    ProcessKilled,

    #[error("Installer reported a failure: '{0}'")]
    FailureReported(String),

    #[error("Run cancelled by user")]
    Cancelled,

    // === Verification Errors ===
    #[error("Expected output not found: {0}")]
    OutputMismatch(String),

    // === Infrastructure Errors ===
    #[error("Proxy error: {0}")]
    Proxy(String),

    #[error("Version catalog unavailable: {0}")]
    Catalog(String),

    #[error("Cleanup of '{path}' failed: {reason}")]
    Cleanup { path: String, reason: String },

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure class reported for each scenario error
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input: unknown mirror, unknown scenario type, malformed entry
    Configuration,
    /// The installer process misbehaved: spawn failure, non-zero exit, timeout
    Execution,
    /// The installer finished but the expected state is missing
    Verification,
    /// Harness plumbing: proxy, catalog, filesystem
    Infrastructure,
}

impl Error {
    /// Create an unknown mirror error listing the keys that would have worked
    pub fn unknown_mirror<S: AsRef<str>>(family: &str, key: &str, known: &[S]) -> Self {
        Self::UnknownMirror {
            family: family.to_string(),
            key: key.to_string(),
            known: known.iter().map(|s| s.as_ref()).collect::<Vec<_>>().join(", "),
        }
    }

    /// Create a spawn failure error
    pub fn spawn_failed(program: &str, reason: impl ToString) -> Self {
        Self::SpawnFailed {
            program: program.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a cleanup failure error
    pub fn cleanup(path: &std::path::Path, reason: impl ToString) -> Self {
        Self::Cleanup {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Classify this error for the run report
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_)
            | Error::ConfigParse(_)
            | Error::UnknownMirror { .. }
            | Error::ScenarioParse { .. }
            | Error::DuplicateScenarioId(_)
            | Error::OfflineArchiveMissing(_)
            | Error::InstallerNotFound(_) => ErrorKind::Configuration,
            Error::SpawnFailed { .. }
            | Error::ProcessTimeout(_)
            | Error::ProcessFailed(_)
            | Error::ProcessKilled
            | Error::FailureReported(_)
            | Error::Cancelled => ErrorKind::Execution,
            Error::OutputMismatch(_) => ErrorKind::Verification,
            Error::Proxy(_)
            | Error::Catalog(_)
            | Error::Cleanup { .. }
            | Error::Io(_)
            | Error::FileRead { .. }
            | Error::Json(_) => ErrorKind::Infrastructure,
        }
    }
}

/// Serializable error record stored in the run report
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for ErrorRecord {
    fn from(e: &Error) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_mirror_is_configuration_error() {
        let err = Error::unknown_mirror("tools", "nonexistent", &["github", "espressifcom"]);
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("nonexistent"));
        assert!(err.to_string().contains("github, espressifcom"));
    }

    #[test]
    fn test_error_record_carries_kind() {
        let record = ErrorRecord::from(&Error::ProcessTimeout(20));
        assert_eq!(record.kind, ErrorKind::Execution);
        assert_eq!(record.message, "Installer did not finish within 20 seconds");
    }
}
