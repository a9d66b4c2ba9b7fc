use anyhow::Result;
use serde_json::Value;
use std::io::{Read, Write};
use std::net::TcpStream;

use cvd_tracker::api::{ApiConfig, ApiHandle, ApiServer};
use cvd_tracker::config::SessionConfig;
use cvd_tracker::{Monitor, SessionId, SessionState};

fn read_response(stream: &mut TcpStream) -> Result<(String, String)> {
    let mut response = String::new();
    stream.read_to_string(&mut response)?;
    let mut parts = response.splitn(2, "\r\n\r\n");
    let headers = parts.next().unwrap_or("").to_string();
    let body = parts.next().unwrap_or("").to_string();
    Ok((headers, body))
}

struct TestApi {
    monitor: Monitor,
    api_handle: Option<ApiHandle>,
}

impl TestApi {
    fn new() -> Result<Self> {
        let monitor = Monitor::new();
        let api_config = ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            session: SessionConfig::default(),
            ..ApiConfig::default()
        };
        let api_handle = ApiServer::new(api_config, monitor.clone()).spawn()?;
        Ok(Self {
            monitor,
            api_handle: Some(api_handle),
        })
    }

    fn handle(&self) -> &ApiHandle {
        self.api_handle
            .as_ref()
            .expect("test API handle should be initialized")
    }

    fn request(&self, method: &str, path: &str, token: Option<&str>) -> Result<(String, String)> {
        let mut stream = TcpStream::connect(self.handle().addr)?;
        let auth = token
            .map(|t| format!("Authorization: Bearer {t}\r\n"))
            .unwrap_or_default();
        let request = format!("{method} {path} HTTP/1.1\r\nHost: localhost\r\n{auth}\r\n");
        stream.write_all(request.as_bytes())?;
        read_response(&mut stream)
    }
}

impl Drop for TestApi {
    fn drop(&mut self) {
        if let Some(handle) = self.api_handle.take() {
            handle.stop().expect("failed to stop API server");
        }
    }
}

#[test]
fn health_endpoint_is_public() -> Result<()> {
    let api = TestApi::new()?;
    let (headers, body) = api.request("GET", "/health", None)?;
    assert!(headers.contains("200 OK"));
    let value: Value = serde_json::from_str(&body)?;
    assert_eq!(value["status"], "ok");
    assert!(value["active_session"].is_null());
    Ok(())
}

#[test]
fn control_requires_bearer_token() -> Result<()> {
    let api = TestApi::new()?;

    let (headers, _) = api.request("POST", "/session/start", None)?;
    assert!(headers.contains("401 Unauthorized"));

    let wrong = "00".repeat(32);
    let (headers, body) = api.request("POST", "/session/start", Some(&wrong))?;
    assert!(headers.contains("401 Unauthorized"));
    assert!(body.contains("invalid_token"));

    let token = api.handle().token.clone();
    let (headers, _) = api.request("POST", &format!("/session/start?token={token}"), None)?;
    assert!(headers.contains("400 Bad Request"));

    assert_eq!(api.monitor.active_session()?, None);
    Ok(())
}

#[test]
fn start_status_stop_round_trip() -> Result<()> {
    let api = TestApi::new()?;
    let token = api.handle().token.clone();

    let (headers, _) = api.request("GET", "/session", None)?;
    assert!(headers.contains("404 Not Found"));

    let (headers, body) = api.request("POST", "/session/start", Some(&token))?;
    assert!(headers.contains("200 OK"));
    let started: Value = serde_json::from_str(&body)?;
    let id = started["session_id"].as_str().unwrap().to_string();
    assert_eq!(api.monitor.active_session()?, Some(SessionId::from(id.as_str())));

    // Only one session may run at a time.
    let (headers, _) = api.request("POST", "/session/start", Some(&token))?;
    assert!(headers.contains("409 Conflict"));

    let (headers, body) = api.request("GET", &format!("/session/{id}"), None)?;
    assert!(headers.contains("200 OK"));
    let status: Value = serde_json::from_str(&body)?;
    assert_eq!(status["state"], "running");
    assert_eq!(status["alert_fired"], false);
    assert_eq!(status["config"]["alert_delay_seconds"], 300);

    let (headers, _) = api.request("POST", "/session/stop", Some(&token))?;
    assert!(headers.contains("200 OK"));
    let (headers, _) = api.request("POST", "/session/stop", Some(&token))?;
    assert!(headers.contains("409 Conflict"));

    let (_, body) = api.request("GET", "/session", None)?;
    let latest: Value = serde_json::from_str(&body)?;
    assert_eq!(latest["id"], id.as_str());
    assert_eq!(latest["state"], "stopped");
    assert_eq!(latest["stop_reason"], "requested");
    assert_eq!(
        api.monitor
            .get_session_status(&SessionId::from(id.as_str()))?
            .state,
        SessionState::Stopped
    );
    Ok(())
}

#[test]
fn unknown_routes_and_sessions() -> Result<()> {
    let api = TestApi::new()?;
    let (headers, _) = api.request("GET", "/session/session-nope", None)?;
    assert!(headers.contains("404 Not Found"));
    let (headers, _) = api.request("GET", "/events", None)?;
    assert!(headers.contains("404 Not Found"));
    let (headers, _) = api.request("DELETE", "/session", None)?;
    assert!(headers.contains("405 Method Not Allowed"));
    Ok(())
}

#[test]
fn token_file_holds_owner_only_token() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let token_path = dir.path().join("api.token");
    let handle = ApiServer::new(
        ApiConfig {
            addr: "127.0.0.1:0".to_string(),
            token_path: Some(token_path.clone()),
            session: SessionConfig::default(),
        },
        Monitor::new(),
    )
    .spawn()?;

    let written = std::fs::read_to_string(&token_path)?;
    assert_eq!(written.trim_end(), handle.token);
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&token_path)?.permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
    handle.stop()?;
    Ok(())
}
