//! Loopback HTTP control and status API.
//!
//! `GET /health`, `GET /session` (latest session) and `GET /session/<id>`
//! are open to loopback clients. `POST /session/start` and
//! `POST /session/stop` need the bearer capability token generated when the
//! server starts.

use crate::config::SessionConfig;
use crate::error::MonitorError;
use crate::session::{Monitor, SessionId};
use anyhow::{anyhow, Result};
use rand::RngCore;
use serde::Serialize;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

const MAX_REQUEST_BYTES: usize = 8192;

#[derive(Clone, Debug)]
pub struct ApiConfig {
    pub addr: String,
    pub token_path: Option<PathBuf>,
    /// Configuration used for sessions started through the API.
    pub session: SessionConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            token_path: None,
            session: SessionConfig::default(),
        }
    }
}

#[derive(Debug)]
pub struct ApiHandle {
    pub addr: SocketAddr,
    pub token: String,
    pub token_path: Option<PathBuf>,
    shutdown: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl ApiHandle {
    pub fn stop(mut self) -> Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            join.join()
                .map_err(|_| anyhow!("api server thread panicked"))?;
        }
        Ok(())
    }
}

/// 32-byte random bearer token, fixed for the lifetime of the server.
#[derive(Clone, Debug)]
pub struct CapabilityToken {
    token: [u8; 32],
}

impl CapabilityToken {
    pub fn generate() -> Self {
        let mut token = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut token);
        Self { token }
    }

    pub fn token_hex(&self) -> String {
        hex::encode(self.token)
    }

    pub fn validate(&self, presented: &str) -> Result<()> {
        let presented = hex::decode(presented)?;
        if presented.as_slice() != self.token.as_slice() {
            return Err(anyhow!("capability token invalid"));
        }
        Ok(())
    }
}

pub struct ApiServer {
    cfg: ApiConfig,
    monitor: Monitor,
}

impl ApiServer {
    pub fn new(cfg: ApiConfig, monitor: Monitor) -> Self {
        Self { cfg, monitor }
    }

    pub fn spawn(self) -> Result<ApiHandle> {
        let configured_addr: SocketAddr = self.cfg.addr.parse()?;
        let listener = TcpListener::bind(configured_addr)?;
        let addr = listener.local_addr()?;
        if configured_addr.ip().is_loopback() && !addr.ip().is_loopback() {
            return Err(anyhow!(
                "api configured for loopback address '{}', but bound to non-loopback address '{}'",
                configured_addr,
                addr
            ));
        }
        listener.set_nonblocking(true)?;

        let capability = CapabilityToken::generate();
        let token = capability.token_hex();
        if let Some(path) = &self.cfg.token_path {
            write_token_file(path, &token)?;
        }

        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_thread = shutdown.clone();
        let token_path = self.cfg.token_path.clone();
        let ctx = ApiContext {
            cfg: self.cfg,
            monitor: self.monitor,
            capability,
        };
        let join = std::thread::spawn(move || {
            if let Err(err) = run_api(listener, &ctx, shutdown_thread) {
                log::error!("control api stopped: {}", err);
            }
        });

        Ok(ApiHandle {
            addr,
            token,
            token_path,
            shutdown,
            join: Some(join),
        })
    }
}

struct ApiContext {
    cfg: ApiConfig,
    monitor: Monitor,
    capability: CapabilityToken,
}

fn run_api(listener: TcpListener, ctx: &ApiContext, shutdown: Arc<AtomicBool>) -> Result<()> {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }
        match listener.accept() {
            Ok((stream, _)) => {
                if let Err(err) = handle_connection(stream, ctx) {
                    log::warn!("control api request rejected: {}", err);
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(50));
                continue;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

fn handle_connection(mut stream: TcpStream, ctx: &ApiContext) -> Result<()> {
    stream.set_nonblocking(false)?;
    let peer = stream.peer_addr()?;
    let local = stream.local_addr()?;
    if local.ip().is_loopback() && !peer.ip().is_loopback() {
        return respond_error(&mut stream, 403, "forbidden");
    }

    let request = read_request(&mut stream)?;
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/health") => {
            let active = ctx.monitor.active_session()?;
            respond(
                &mut stream,
                200,
                &serde_json::json!({ "status": "ok", "active_session": active }),
            )
        }
        ("GET", "/session") => match ctx.monitor.latest_status()? {
            Some(status) => respond(&mut stream, 200, &status),
            None => respond_error(&mut stream, 404, "no_session"),
        },
        ("GET", path) if path.starts_with("/session/") => {
            let id = SessionId::from(&path["/session/".len()..]);
            match ctx.monitor.get_session_status(&id) {
                Ok(status) => respond(&mut stream, 200, &status),
                Err(_) => respond_error(&mut stream, 404, "unknown_session"),
            }
        }
        ("POST", "/session/start") | ("POST", "/session/stop") => {
            if request.has_query_token() {
                return respond_error(&mut stream, 400, "token_query_param_not_allowed");
            }
            let Some(token) = request.bearer_token() else {
                return respond_error(&mut stream, 401, "missing_token");
            };
            if let Err(err) = ctx.capability.validate(token) {
                respond_error(&mut stream, 401, "invalid_token")?;
                return Err(err);
            }
            if request.path == "/session/start" {
                handle_start(&mut stream, ctx)
            } else {
                handle_stop(&mut stream, ctx)
            }
        }
        (_, "/health") | (_, "/session") | (_, "/session/start") | (_, "/session/stop") => {
            respond_error(&mut stream, 405, "method_not_allowed")
        }
        _ => respond_error(&mut stream, 404, "not_found"),
    }
}

fn handle_start(stream: &mut TcpStream, ctx: &ApiContext) -> Result<()> {
    match ctx.monitor.start_session(ctx.cfg.session.clone()) {
        Ok(id) => {
            log::info!("control api: session {} started", id);
            respond(stream, 200, &serde_json::json!({ "session_id": id }))
        }
        Err(err) => respond_monitor_error(stream, &err),
    }
}

fn handle_stop(stream: &mut TcpStream, ctx: &ApiContext) -> Result<()> {
    let Some(id) = ctx.monitor.active_session()? else {
        return respond_error(stream, 409, "no_running_session");
    };
    match ctx.monitor.stop_session(&id) {
        Ok(()) => {
            log::info!("control api: session {} stopped", id);
            respond(stream, 200, &serde_json::json!({ "session_id": id }))
        }
        Err(err) => respond_monitor_error(stream, &err),
    }
}

fn respond_monitor_error(stream: &mut TcpStream, err: &MonitorError) -> Result<()> {
    let status = match err {
        MonitorError::InvalidState { .. } => 409,
        MonitorError::InvalidRegion { .. } | MonitorError::InvalidConfig(_) => 400,
        _ => 500,
    };
    respond(stream, status, &serde_json::json!({ "error": err.to_string() }))
}

/// Request line plus the only header the routes look at.
#[derive(Debug)]
struct HttpRequest {
    method: String,
    path: String,
    query: Option<String>,
    authorization: Option<String>,
}

impl HttpRequest {
    fn parse(head: &str) -> Result<Self> {
        let mut lines = head.split("\r\n");
        let mut request_line = lines
            .next()
            .ok_or_else(|| anyhow!("empty request"))?
            .split_whitespace();
        let method = request_line.next().ok_or_else(|| anyhow!("missing method"))?;
        let target = request_line.next().ok_or_else(|| anyhow!("missing path"))?;
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };
        let authorization = lines
            .take_while(|line| !line.is_empty())
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("authorization"))
            .map(|(_, value)| value.trim().to_string());
        Ok(Self {
            method: method.to_string(),
            path: path.to_string(),
            query,
            authorization,
        })
    }

    fn bearer_token(&self) -> Option<&str> {
        let (scheme, token) = self.authorization.as_deref()?.split_once(' ')?;
        scheme
            .eq_ignore_ascii_case("bearer")
            .then(|| token.trim())
            .filter(|token| !token.is_empty())
    }

    fn has_query_token(&self) -> bool {
        self.query.as_deref().is_some_and(|query| {
            query
                .split('&')
                .any(|pair| pair.split('=').next() == Some("token"))
        })
    }
}

fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(2)))?;
    let mut buf = [0u8; 1024];
    let mut data = Vec::new();
    while !data.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!("request too large"));
        }
    }
    HttpRequest::parse(&String::from_utf8_lossy(&data))
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        _ => "Internal Server Error",
    }
}

/// Every response is JSON and closes the connection.
fn respond<T: Serialize>(stream: &mut TcpStream, status: u16, body: &T) -> Result<()> {
    let body = serde_json::to_vec(body)?;
    let header = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nCache-Control: no-store\r\nConnection: close\r\n\r\n",
        status,
        reason_phrase(status),
        body.len()
    );
    stream.write_all(header.as_bytes())?;
    stream.write_all(&body)?;
    Ok(())
}

fn respond_error(stream: &mut TcpStream, status: u16, code: &str) -> Result<()> {
    respond(stream, status, &serde_json::json!({ "error": code }))
}

/// Token file readable by the owner only.
fn write_token_file(path: &Path, token: &str) -> Result<()> {
    std::fs::write(path, format!("{token}\n"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    Ok(())
}
