//! Intercepting proxy for the installer under test
//!
//! A scenario can route the installer's network traffic through a local
//! HTTP proxy that logs every request, denies everything, or denies only a
//! list of hosts. The session is a guard: dropping it on any path tears
//! the proxy down.

mod server;

use std::collections::BTreeSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::common::{Error, Result};

/// How the proxy treats the installer's traffic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyMode {
    /// No proxy, direct network access
    Off,
    /// Forward everything, record every request
    Log,
    /// Deny every request
    Block,
    /// Deny requests to hosts on the block list, forward the rest
    BlockList,
}

impl ProxyMode {
    pub fn is_active(&self) -> bool {
        !matches!(self, ProxyMode::Off)
    }
}

impl fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyMode::Off => write!(f, "off"),
            ProxyMode::Log => write!(f, "log"),
            ProxyMode::Block => write!(f, "block"),
            ProxyMode::BlockList => write!(f, "block-list"),
        }
    }
}

/// Verdict for a single request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Block,
}

/// Mode plus normalized block list
#[derive(Debug, Clone)]
pub struct ProxyPolicy {
    mode: ProxyMode,
    block_list: BTreeSet<String>,
}

impl ProxyPolicy {
    pub fn new<'a>(mode: ProxyMode, block_list: impl IntoIterator<Item = &'a String>) -> Self {
        Self {
            mode,
            block_list: block_list
                .into_iter()
                .filter_map(|entry| normalize_host(entry))
                .collect(),
        }
    }

    pub fn mode(&self) -> ProxyMode {
        self.mode
    }

    /// Decide whether a request to `host` may leave the machine
    ///
    /// In block-list mode an entry matches the host itself and all of its
    /// subdomains, so `github.com` also blocks `api.github.com`.
    pub fn decide(&self, host: &str) -> Decision {
        match self.mode {
            ProxyMode::Off | ProxyMode::Log => Decision::Allow,
            ProxyMode::Block => Decision::Block,
            ProxyMode::BlockList => {
                let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
                let blocked = self.block_list.iter().any(|entry| {
                    host == *entry
                        || host
                            .strip_suffix(entry.as_str())
                            .map(|prefix| prefix.ends_with('.'))
                            .unwrap_or(false)
                });
                if blocked {
                    Decision::Block
                } else {
                    Decision::Allow
                }
            }
        }
    }
}

/// Reduce a block-list entry (host, URL or host:port) to a bare host
fn normalize_host(entry: &str) -> Option<String> {
    let mut host = entry.trim();
    if let Some((_, rest)) = host.split_once("://") {
        host = rest;
    }
    host = host.split(['/', '?', '#']).next().unwrap_or_default();
    if let Some(stripped) = host.strip_prefix('[') {
        host = stripped.split(']').next().unwrap_or_default();
    } else if let Some((name, port)) = host.rsplit_once(':') {
        if port.chars().all(|c| c.is_ascii_digit()) {
            host = name;
        }
    }
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// What happened to an intercepted request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "reason")]
pub enum RequestOutcome {
    /// Forwarded to the upstream host
    Allowed,
    /// Denied by policy
    Blocked,
    /// Allowed, but the upstream could not be reached
    Failed(String),
}

/// One intercepted request
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyLogEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub method: String,
    pub host: String,
    pub port: u16,
    pub outcome: RequestOutcome,
}

/// Request log shared between the accept loop and the session
pub(crate) type RequestLog = Arc<Mutex<Vec<ProxyLogEntry>>>;

pub(crate) fn record(log: &RequestLog, entry: ProxyLogEntry) {
    match &entry.outcome {
        RequestOutcome::Allowed => {
            tracing::debug!("proxy: {} {}:{} allowed", entry.method, entry.host, entry.port)
        }
        RequestOutcome::Blocked => {
            tracing::info!("proxy: {} {}:{} blocked", entry.method, entry.host, entry.port)
        }
        RequestOutcome::Failed(reason) => tracing::warn!(
            "proxy: {} {}:{} failed: {}",
            entry.method,
            entry.host,
            entry.port,
            reason
        ),
    }
    log.lock().unwrap_or_else(|e| e.into_inner()).push(entry);
}

/// Per-scenario proxy report
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxySummary {
    pub mode: ProxyMode,
    pub address: String,
    pub allowed: usize,
    pub blocked: usize,
    pub failed: usize,
    /// Distinct hosts the installer tried to reach
    pub hosts: BTreeSet<String>,
    pub requests: Vec<ProxyLogEntry>,
}

impl ProxySummary {
    fn from_log(mode: ProxyMode, address: SocketAddr, requests: Vec<ProxyLogEntry>) -> Self {
        let count = |f: fn(&RequestOutcome) -> bool| requests.iter().filter(|r| f(&r.outcome)).count();
        Self {
            mode,
            address: address.to_string(),
            allowed: count(|o| matches!(o, RequestOutcome::Allowed)),
            blocked: count(|o| matches!(o, RequestOutcome::Blocked)),
            failed: count(|o| matches!(o, RequestOutcome::Failed(_))),
            hosts: requests.iter().map(|r| r.host.clone()).collect(),
            requests,
        }
    }
}

/// A running proxy bound to one scenario
pub struct ProxySession {
    addr: SocketAddr,
    mode: ProxyMode,
    log: RequestLog,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl ProxySession {
    /// Bind a loopback port and start accepting connections
    pub async fn start(policy: ProxyPolicy, upstream_timeout: Duration) -> Result<Self> {
        if !policy.mode().is_active() {
            return Err(Error::Proxy("proxy mode is off".to_string()));
        }

        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| Error::Proxy(format!("Failed to bind proxy listener: {}", e)))?;
        let addr = listener
            .local_addr()
            .map_err(|e| Error::Proxy(format!("Failed to read proxy address: {}", e)))?;

        let mode = policy.mode();
        let log: RequestLog = Arc::new(Mutex::new(Vec::new()));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(server::serve(
            listener,
            Arc::new(policy),
            log.clone(),
            upstream_timeout,
            shutdown_rx,
        ));

        tracing::info!("Proxy listening on {} in {} mode", addr, mode);

        Ok(Self {
            addr,
            mode,
            log,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Environment that routes the installer through this proxy
    pub fn env_vars(&self) -> Vec<(String, String)> {
        let url = self.url();
        let mut vars = Vec::new();
        for name in ["HTTP_PROXY", "HTTPS_PROXY", "ALL_PROXY"] {
            vars.push((name.to_string(), url.clone()));
            vars.push((name.to_ascii_lowercase(), url.clone()));
        }
        vars.push(("NO_PROXY".to_string(), String::new()));
        vars.push(("no_proxy".to_string(), String::new()));
        vars
    }

    /// Requests seen so far
    pub fn requests(&self) -> Vec<ProxyLogEntry> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Stop accepting, close open tunnels and return the request log
    pub async fn shutdown(mut self) -> ProxySummary {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(Duration::from_secs(5), task).await.is_err() {
                tracing::warn!("Proxy on {} did not stop in time", self.addr);
            }
        }
        tracing::debug!("Proxy on {} stopped", self.addr);
        ProxySummary::from_log(self.mode, self.addr, self.requests())
    }
}

impl Drop for ProxySession {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
            tracing::debug!("Proxy on {} torn down", self.addr);
        }
    }
}
