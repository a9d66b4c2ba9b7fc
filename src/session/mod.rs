//! Monitoring sessions: the silence state machine and the registry that
//! serializes access to it.

mod controller;
mod monitor;

use rand::RngCore;
use serde::Serialize;
use std::fmt;

pub use controller::{silence_alert_due, FrameOutcome, SessionController, SessionStatus};
pub use monitor::{AnalyzerFactory, Monitor, RETAINED_SESSIONS};

/// Opaque session identifier (`session-<12 hex chars>`).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 6];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(format!("session-{}", hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Running,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Why a session left `Running`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StopReason {
    Requested,
    Timeout,
    Failed,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            StopReason::Requested => "requested",
            StopReason::Timeout => "timeout",
            StopReason::Failed => "failed",
        };
        f.write_str(label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_distinct_and_prefixed() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("session-"));
        assert_eq!(a.as_str().len(), "session-".len() + 12);
    }

    #[test]
    fn states_serialize_lowercase() {
        assert_eq!(
            serde_json::to_string(&SessionState::Running).unwrap(),
            "\"running\""
        );
        assert_eq!(serde_json::to_string(&StopReason::Timeout).unwrap(), "\"timeout\"");
        assert_eq!(
            serde_json::to_string(&SessionId::from("session-1")).unwrap(),
            "\"session-1\""
        );
    }
}
