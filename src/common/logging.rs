//! Logging and tracing configuration
//!
//! The harness logs to stderr for the operator and, once the build-info
//! directory is known, to `harness.log` next to the scenario logs so CI
//! archives carry the full trace.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use super::paths;

/// Name of the harness trace file inside the log directory
const HARNESS_LOG: &str = "harness.log";

fn default_filter(debug: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if debug {
            EnvFilter::new("harness=debug,info")
        } else {
            EnvFilter::new("harness=info,warn")
        }
    })
}

/// Initialize tracing for informational subcommands (stderr only)
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies.
pub fn init_cli(debug: bool) {
    tracing_subscriber::registry()
        .with(default_filter(debug))
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}

/// Initialize tracing for a test run (file + stderr logging)
///
/// Returns the appender guard; it must stay alive for the whole run or
/// buffered file output is lost.
pub fn init_run(build_info_dir: &Path, debug: bool) -> Option<WorkerGuard> {
    let filter = default_filter(debug);

    match paths::ensure_log_dir(build_info_dir) {
        Ok(log_dir) => {
            let appender = tracing_appender::rolling::never(log_dir, HARNESS_LOG);
            let (writer, guard) = tracing_appender::non_blocking(appender);

            // File logging with full details
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .with_span_events(FmtSpan::CLOSE);

            let stderr_layer = fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .compact();

            tracing_subscriber::registry()
                .with(filter)
                .with(file_layer)
                .with(stderr_layer)
                .init();

            Some(guard)
        }
        Err(e) => {
            eprintln!("Warning: Could not create log directory: {}", e);

            // Fallback: stderr only
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .with_writer(std::io::stderr)
                        .with_target(true)
                        .compact(),
                )
                .init();

            None
        }
    }
}
