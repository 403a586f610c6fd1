//! Installer process execution
//!
//! Runs one installer call as a cancellable task. Output from both streams
//! goes to the scenario log as it arrives; the first of process exit,
//! timeout, cancellation, "every stop marker seen" or "a failure marker
//! seen" ends the call. The child is always reaped before this module
//! returns.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, BufWriter};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::common::{Error, Result};

use super::cancel::CancelSignal;
use super::invocation::Invocation;

/// How long to keep reading output after the child is gone
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Which pipe a line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    Stdout,
    Stderr,
}

#[derive(Debug)]
struct OutputLine {
    stream: Stream,
    text: String,
}

/// Per-scenario log of raw installer output
///
/// Only ever appended to; nothing in the harness deletes it.
pub struct ScenarioLog {
    path: PathBuf,
    writer: BufWriter<tokio::fs::File>,
}

impl ScenarioLog {
    pub async fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let file = tokio::fs::File::create(path).await?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a harness note, visually distinct from installer output
    pub async fn note(&mut self, text: &str) -> Result<()> {
        self.writer.write_all(format!("### {}\n", text).as_bytes()).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn line(&mut self, line: &OutputLine) -> Result<()> {
        if line.stream == Stream::Stderr {
            self.writer.write_all(b"[stderr] ").await?;
        }
        self.writer.write_all(line.text.as_bytes()).await?;
        self.writer.write_all(b"\n").await?;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// How an installer call ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// The process exited, or was stopped after printing every stop marker
    #[serde(rename_all = "camelCase")]
    Completed {
        exit_code: Option<i32>,
        stopped_on_marker: bool,
    },
    /// A failure marker was printed and the process was stopped
    #[serde(rename_all = "camelCase")]
    FailureReported {
        exit_code: Option<i32>,
        marker: String,
    },
    TimedOut,
    Cancelled,
}

/// Result of one installer call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessReport {
    pub label: String,
    pub command_line: String,
    pub outcome: ProcessOutcome,
    pub timeout_secs: u64,
    pub duration_ms: u64,
    /// Combined captured output, kept for output checks only
    #[serde(skip)]
    pub output: String,
}

impl ProcessReport {
    /// Execution error this outcome stands for, if any
    pub fn error(&self) -> Option<Error> {
        match &self.outcome {
            ProcessOutcome::Completed {
                stopped_on_marker: true,
                ..
            } => None,
            ProcessOutcome::Completed {
                exit_code: Some(0), ..
            } => None,
            ProcessOutcome::Completed {
                exit_code: Some(code),
                ..
            } => Some(Error::ProcessFailed(*code)),
            ProcessOutcome::Completed { exit_code: None, .. } => Some(Error::ProcessKilled),
            ProcessOutcome::FailureReported { marker, .. } => Some(Error::FailureReported(marker.clone())),
            ProcessOutcome::TimedOut => Some(Error::ProcessTimeout(self.timeout_secs)),
            ProcessOutcome::Cancelled => Some(Error::Cancelled),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error().is_none()
    }
}

/// Options for one installer call
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub label: String,
    pub command_line: String,
    pub timeout: Duration,
    /// Grace period between SIGTERM and kill
    pub kill_grace: Duration,
    pub stop_on: Vec<String>,
    /// Any of these on a line ends the call as failed
    pub fail_on: Vec<String>,
}

/// Tracks which stop markers were printed
struct MarkerSet {
    pending: Vec<String>,
    armed: bool,
}

impl MarkerSet {
    fn new(markers: &[String]) -> Self {
        Self {
            pending: markers.iter().map(|m| m.to_lowercase()).collect(),
            armed: !markers.is_empty(),
        }
    }

    /// Returns true once every marker has been seen
    fn observe(&mut self, line: &str) -> bool {
        if !self.armed {
            return false;
        }
        let line = line.to_lowercase();
        self.pending.retain(|marker| !line.contains(marker.as_str()));
        self.pending.is_empty()
    }
}

/// First failure marker contained in `line`, compared case-insensitively
fn failure_marker<'a>(markers: &'a [String], line: &str) -> Option<&'a str> {
    let line = line.to_lowercase();
    markers
        .iter()
        .find(|marker| line.contains(&marker.to_lowercase()))
        .map(String::as_str)
}

/// What ended the wait loop
enum Stop {
    Exited(Option<i32>),
    Markers,
    Failure(String),
    Timeout,
    Cancel,
}

/// Run an installer call to one of its terminal outcomes
///
/// Errors only when the process cannot be started or the log cannot be
/// written; everything the installer itself does is in the report.
pub async fn run(
    invocation: &Invocation,
    options: &RunOptions,
    log: &mut ScenarioLog,
    cancel: &mut CancelSignal,
) -> Result<ProcessReport> {
    log.note(&format!("{}: {}", options.label, options.command_line)).await?;
    tracing::info!("Running {}", options.command_line);

    let started = Instant::now();
    let mut child = Command::new(&invocation.program)
        .args(&invocation.args)
        .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::spawn_failed(&invocation.program.display().to_string(), e))?;

    let (tx, mut rx) = mpsc::channel::<OutputLine>(256);
    if let Some(stdout) = child.stdout.take() {
        tokio::spawn(forward_lines(stdout, Stream::Stdout, tx.clone()));
    }
    if let Some(stderr) = child.stderr.take() {
        tokio::spawn(forward_lines(stderr, Stream::Stderr, tx.clone()));
    }
    drop(tx);

    let mut output = String::new();
    let mut markers = MarkerSet::new(&options.stop_on);
    let mut streams_open = true;
    let deadline = tokio::time::sleep(options.timeout);
    tokio::pin!(deadline);

    let stop = loop {
        tokio::select! {
            line = rx.recv(), if streams_open => match line {
                Some(line) => {
                    log.line(&line).await?;
                    output.push_str(&line.text);
                    output.push('\n');
                    if let Some(marker) = failure_marker(&options.fail_on, &line.text) {
                        break Stop::Failure(marker.to_string());
                    }
                    if markers.observe(&line.text) {
                        break Stop::Markers;
                    }
                }
                None => streams_open = false,
            },
            status = child.wait() => {
                let status = status?;
                break Stop::Exited(status.code());
            }
            _ = &mut deadline => break Stop::Timeout,
            _ = cancel.cancelled() => break Stop::Cancel,
        }
    };

    let outcome = match stop {
        Stop::Exited(exit_code) => ProcessOutcome::Completed {
            exit_code,
            stopped_on_marker: false,
        },
        Stop::Markers => {
            tracing::debug!("All stop markers seen, stopping {}", options.label);
            let exit_code = terminate(&mut child, options.kill_grace).await;
            ProcessOutcome::Completed {
                exit_code,
                stopped_on_marker: true,
            }
        }
        Stop::Failure(marker) => {
            tracing::warn!("{} reported '{}', stopping", options.label, marker);
            let exit_code = terminate(&mut child, options.kill_grace).await;
            ProcessOutcome::FailureReported { exit_code, marker }
        }
        Stop::Timeout => {
            tracing::warn!(
                "{} exceeded {}s, terminating",
                options.label,
                options.timeout.as_secs()
            );
            terminate(&mut child, options.kill_grace).await;
            ProcessOutcome::TimedOut
        }
        Stop::Cancel => {
            tracing::warn!("Cancellation requested, terminating {}", options.label);
            terminate(&mut child, options.kill_grace).await;
            ProcessOutcome::Cancelled
        }
    };

    // Grandchildren may keep the pipes open, so the drain is bounded
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while let Some(line) = rx.recv().await {
            log.line(&line).await?;
            output.push_str(&line.text);
            output.push('\n');
        }
        Ok::<(), Error>(())
    })
    .await;
    if let Ok(Err(e)) = drained {
        return Err(e);
    }

    let report = ProcessReport {
        label: options.label.clone(),
        command_line: options.command_line.clone(),
        outcome,
        timeout_secs: options.timeout.as_secs(),
        duration_ms: started.elapsed().as_millis() as u64,
        output,
    };
    log.note(&format!("{} finished: {:?}", options.label, report.outcome)).await?;
    Ok(report)
}

async fn forward_lines<R>(reader: R, stream: Stream, tx: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {
                let text = String::from_utf8_lossy(&raw)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if tx.send(OutputLine { stream, text }).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("Output stream closed: {}", e);
                break;
            }
        }
    }
}

/// Ask the child to stop, kill it after the grace period, and reap it
async fn terminate(child: &mut Child, grace: Duration) -> Option<i32> {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SIGTERM first so the installer can remove partial downloads
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
        if let Ok(Ok(status)) = tokio::time::timeout(grace, child.wait()).await {
            return status.code();
        }
    }
    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        tracing::warn!("Failed to kill installer: {}", e);
    }
    child.try_wait().ok().flatten().and_then(|status| status.code())
}
