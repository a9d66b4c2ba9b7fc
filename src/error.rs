//! Error taxonomy for the motion/session core.
//!
//! Plumbing around the core (config files, sinks, the control API, binaries)
//! uses `anyhow`. Everything a caller of the core must be able to match on is
//! a `MonitorError`.

use std::time::SystemTime;

use thiserror::Error;

use crate::config::Roi;
use crate::session::{SessionId, SessionState};

#[derive(Clone, Debug, Error, PartialEq)]
pub enum MonitorError {
    /// The region of interest does not fit inside the frame.
    #[error("region of interest {roi} does not fit a {width}x{height} frame")]
    InvalidRegion { roi: Roi, width: u32, height: u32 },

    /// The analysis region changed size while a background model was live.
    #[error(
        "region is {actual_width}x{actual_height} but the background model is {expected_width}x{expected_height}"
    )]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        actual_width: u32,
        actual_height: u32,
    },

    /// A control or frame call was made against a session in the wrong state.
    /// `session` is `None` when no session with the requested id exists.
    #[error("cannot {operation}: session {} is {state}", display_session(.session))]
    InvalidState {
        session: Option<SessionId>,
        state: SessionState,
        operation: &'static str,
    },

    /// Pixel buffer does not match the declared dimensions and format.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Frame capture time precedes the last processed frame.
    #[error("frame captured at {received:?} precedes last processed frame at {previous:?}")]
    OutOfOrder {
        previous: SystemTime,
        received: SystemTime,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Alert delivery failed. Never changes session state.
    #[error("alert dispatch failed: {0}")]
    Dispatch(String),

    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

impl MonitorError {
    /// Errors that corrupt the background model and terminate the session.
    ///
    /// `InvalidFrame` is included for `MotionAnalyzer` implementations that
    /// decode their own input and reject a frame mid-session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MonitorError::InvalidRegion { .. }
                | MonitorError::DimensionMismatch { .. }
                | MonitorError::InvalidFrame(_)
        )
    }
}

fn display_session(session: &Option<SessionId>) -> String {
    match session {
        Some(id) => id.to_string(),
        None => "<none>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_errors_are_pipeline_errors_only() {
        let region = MonitorError::InvalidRegion {
            roi: Roi::new(0, 0, 10, 10),
            width: 5,
            height: 5,
        };
        assert!(region.is_fatal());
        assert!(MonitorError::DimensionMismatch {
            expected_width: 1,
            expected_height: 1,
            actual_width: 2,
            actual_height: 2,
        }
        .is_fatal());

        let state = MonitorError::InvalidState {
            session: None,
            state: SessionState::Idle,
            operation: "process frame",
        };
        assert!(!state.is_fatal());
        assert!(!MonitorError::Dispatch("smtp down".into()).is_fatal());
        assert!(MonitorError::InvalidFrame("truncated nv12 plane".into()).is_fatal());
        assert!(!MonitorError::InvalidConfig("sensitivity".into()).is_fatal());
    }

    #[test]
    fn invalid_state_names_missing_session() {
        let err = MonitorError::InvalidState {
            session: None,
            state: SessionState::Idle,
            operation: "stop session",
        };
        assert_eq!(err.to_string(), "cannot stop session: session <none> is idle");
    }
}
