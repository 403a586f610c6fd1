//! Proxy accept loop and per-connection handling
//!
//! Connections are served by hyper. Two request shapes are understood:
//! `CONNECT` tunnels for HTTPS and absolute-form requests for plain HTTP.
//! Every decision is taken before an upstream socket is opened, so a denied
//! host is never contacted.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use http_body_util::{combinators::BoxBody, BodyExt, Empty};
use hyper::body::{Bytes, Incoming};
use hyper::header::{HeaderMap, HeaderValue, CONNECTION, HOST};
use hyper::http::uri::{Authority, Uri};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;

use super::{record, Decision, ProxyLogEntry, ProxyPolicy, RequestLog, RequestOutcome};

/// Headers meant for the proxy itself, never forwarded
const HOP_HEADERS: &[&str] = &["proxy-connection", "proxy-authorization", "connection", "keep-alive"];

type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// State every connection handler reads
struct Shared {
    policy: Arc<ProxyPolicy>,
    log: RequestLog,
    upstream_timeout: Duration,
    /// Flips to true when the proxy stops; open tunnels close with it
    closing: watch::Receiver<bool>,
}

/// Accept connections until shutdown is signalled
pub(super) async fn serve(
    listener: TcpListener,
    policy: Arc<ProxyPolicy>,
    log: RequestLog,
    upstream_timeout: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let (closing_tx, closing) = watch::channel(false);
    let shared = Arc::new(Shared {
        policy,
        log,
        upstream_timeout,
        closing,
    });
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                break;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        tracing::trace!("proxy: connection from {}", peer);
                        connections.spawn(handle_connection(stream, shared.clone()));
                    }
                    Err(e) => {
                        tracing::warn!("proxy: accept error: {}", e);
                    }
                }
            }
            Some(finished) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = finished {
                    if e.is_panic() {
                        tracing::error!("proxy: connection handler panicked");
                    }
                }
            }
        }
    }

    let _ = closing_tx.send(true);
    connections.abort_all();
}

async fn handle_connection(stream: TcpStream, shared: Arc<Shared>) {
    let service = service_fn(move |req| proxy(req, shared.clone()));
    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await
    {
        tracing::trace!("proxy: connection closed: {}", e);
    }
}

/// Where a request wants to go
#[derive(Debug, PartialEq, Eq)]
struct Target {
    host: String,
    port: u16,
}

impl Target {
    /// Read the destination from a CONNECT authority, an absolute URI or
    /// the Host header
    fn of<B>(req: &Request<B>) -> Result<Self, String> {
        if Method::CONNECT == req.method() {
            let authority = req
                .uri()
                .authority()
                .ok_or("CONNECT without an authority")?;
            return Ok(Self::from_authority(authority, 443));
        }

        let uri = req.uri();
        let default_port = if uri.scheme_str() == Some("https") { 443 } else { 80 };
        if let Some(authority) = uri.authority() {
            return Ok(Self::from_authority(authority, default_port));
        }

        // Origin-form request sent to a proxy: fall back to the Host header
        let host = req
            .headers()
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .ok_or("origin-form request without Host header")?;
        let authority: Authority = host
            .parse()
            .map_err(|e| format!("invalid Host header '{}': {}", host, e))?;
        Ok(Self::from_authority(&authority, default_port))
    }

    fn from_authority(authority: &Authority, default_port: u16) -> Self {
        Self {
            host: authority
                .host()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .to_string(),
            port: authority.port_u16().unwrap_or(default_port),
        }
    }
}

async fn proxy(req: Request<Incoming>, shared: Arc<Shared>) -> Result<Response<ProxyBody>, Infallible> {
    let target = match Target::of(&req) {
        Ok(target) => target,
        Err(message) => {
            tracing::debug!("proxy: bad request: {}", message);
            return Ok(status(StatusCode::BAD_REQUEST));
        }
    };

    let method = req.method().to_string();
    let entry = |outcome| ProxyLogEntry {
        timestamp: chrono::Utc::now(),
        method: method.clone(),
        host: target.host.clone(),
        port: target.port,
        outcome,
    };

    if shared.policy.decide(&target.host) == Decision::Block {
        record(&shared.log, entry(RequestOutcome::Blocked));
        return Ok(status(StatusCode::FORBIDDEN));
    }

    let connect = TcpStream::connect((target.host.as_str(), target.port));
    let upstream = match tokio::time::timeout(shared.upstream_timeout, connect).await {
        Ok(Ok(upstream)) => upstream,
        Ok(Err(e)) => {
            record(&shared.log, entry(RequestOutcome::Failed(e.to_string())));
            return Ok(status(StatusCode::BAD_GATEWAY));
        }
        Err(_) => {
            record(&shared.log, entry(RequestOutcome::Failed("connect timed out".to_string())));
            return Ok(status(StatusCode::GATEWAY_TIMEOUT));
        }
    };

    record(&shared.log, entry(RequestOutcome::Allowed));

    if Method::CONNECT == req.method() {
        tokio::spawn(tunnel(req, upstream, target, shared.closing.clone()));
        return Ok(Response::new(empty()));
    }

    Ok(forward(req, upstream, &target).await)
}

/// Splice the upgraded client connection onto the upstream socket
async fn tunnel(req: Request<Incoming>, mut upstream: TcpStream, target: Target, mut closing: watch::Receiver<bool>) {
    let upgraded = match hyper::upgrade::on(req).await {
        Ok(upgraded) => upgraded,
        Err(e) => {
            tracing::debug!("proxy: upgrade to {}:{} failed: {}", target.host, target.port, e);
            return;
        }
    };
    let mut client = TokioIo::new(upgraded);

    tokio::select! {
        copied = tokio::io::copy_bidirectional(&mut client, &mut upstream) => {
            if let Err(e) = copied {
                tracing::trace!("proxy: tunnel to {}:{} closed: {}", target.host, target.port, e);
            }
        }
        _ = closing.wait_for(|closing| *closing) => {
            tracing::trace!("proxy: tunnel to {}:{} closed by shutdown", target.host, target.port);
        }
    }
}

/// Send an absolute-form request to the origin in origin form
async fn forward(mut req: Request<Incoming>, upstream: TcpStream, target: &Target) -> Response<ProxyBody> {
    let (mut sender, connection) = match hyper::client::conn::http1::handshake(TokioIo::new(upstream)).await {
        Ok(parts) => parts,
        Err(e) => {
            tracing::debug!("proxy: handshake with {}:{} failed: {}", target.host, target.port, e);
            return status(StatusCode::BAD_GATEWAY);
        }
    };
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::trace!("proxy: upstream connection closed: {}", e);
        }
    });

    *req.uri_mut() = origin_form(req.uri());
    strip_hop_headers(req.headers_mut());
    if !req.headers().contains_key(HOST) {
        let host = if target.port == 80 {
            target.host.clone()
        } else {
            format!("{}:{}", target.host, target.port)
        };
        if let Ok(value) = HeaderValue::from_str(&host) {
            req.headers_mut().insert(HOST, value);
        }
    }

    match sender.send_request(req).await {
        Ok(response) => {
            let mut response = response.map(|body| body.boxed());
            // One request per client connection keeps the log one-to-one
            strip_hop_headers(response.headers_mut());
            response
                .headers_mut()
                .insert(CONNECTION, HeaderValue::from_static("close"));
            response
        }
        Err(e) => {
            tracing::debug!("proxy: request to {}:{} failed: {}", target.host, target.port, e);
            status(StatusCode::BAD_GATEWAY)
        }
    }
}

/// Path and query only, `/` when the URI has neither
fn origin_form(uri: &Uri) -> Uri {
    uri.path_and_query()
        .map(|pq| Uri::from(pq.clone()))
        .unwrap_or_else(|| Uri::from_static("/"))
}

fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in HOP_HEADERS {
        headers.remove(*name);
    }
}

fn empty() -> ProxyBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed()
}

/// Bodyless response that closes the client connection
fn status(code: StatusCode) -> Response<ProxyBody> {
    let mut response = Response::new(empty());
    *response.status_mut() = code;
    response
        .headers_mut()
        .insert(CONNECTION, HeaderValue::from_static("close"));
    response
        .headers_mut()
        .insert("x-harness-proxy", HeaderValue::from(code.as_u16()));
    response
}
