//! Installer Harness - runs scenario documents against the installer
//!
//! Each scenario drives the installer executable and inspects what it left
//! on disk; results go to per-scenario logs and a JSON report.

use clap::Parser;
use commands::Commands;
use harness::cli::{self, Verdict};
use harness::common::logging;
use harness::commands;

#[derive(Parser)]
#[command(name = "installer-harness", about = "Scenario runner for the toolchain installer")]
#[command(version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Exit code when scenarios ran but some failed
const EXIT_SCENARIOS_FAILED: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Keep the appender guard alive until the run is over
    let guard = match &cli.command {
        Commands::Run { settings, .. } => logging::init_run(&settings.build_info_dir, settings.debug),
        _ => {
            logging::init_cli(false);
            None
        }
    };

    let code = match cli::dispatch(cli.command).await {
        Ok(Verdict::Passed) => 0,
        Ok(Verdict::Failed) => EXIT_SCENARIOS_FAILED,
        Err(e) => {
            eprintln!("Error: {e}");
            1
        }
    };

    // Flush the file log before exiting
    drop(guard);
    std::process::exit(code);
}
