use serde::Serialize;
use std::time::{Duration, SystemTime};

use crate::alert::{AlertEvent, DispatchStatus};
use crate::config::SessionConfig;
use crate::error::MonitorError;
use crate::frame::Frame;
use crate::motion::{MotionAnalyzer, MotionDecision};

use super::{SessionId, SessionState, StopReason};

/// Whether a silence alert fires at `now`.
///
/// True once silence (`now - last_motion`) reaches `alert_delay`, unless an
/// alert already fired for the current silence episode. A `now` earlier than
/// `last_motion` counts as zero silence.
pub fn silence_alert_due(
    now: SystemTime,
    last_motion: SystemTime,
    alert_delay: Duration,
    alert_fired: bool,
) -> bool {
    !alert_fired && elapsed(last_motion, now) >= alert_delay
}

fn elapsed(from: SystemTime, to: SystemTime) -> Duration {
    to.duration_since(from).unwrap_or(Duration::ZERO)
}

/// Result of feeding one frame to a running session.
#[derive(Clone, Debug)]
pub struct FrameOutcome {
    pub decision: MotionDecision,
    /// Silence alert raised by this frame, at most one per silence episode.
    pub alert: Option<AlertEvent>,
    /// Set when this frame ended the session (timeout).
    pub stopped: Option<StopReason>,
}

/// Point-in-time view of a session for status reporting.
#[derive(Clone, Debug, Serialize)]
pub struct SessionStatus {
    pub id: SessionId,
    pub state: SessionState,
    #[serde(with = "crate::timefmt::option")]
    pub started_at: Option<SystemTime>,
    #[serde(with = "crate::timefmt::option")]
    pub stopped_at: Option<SystemTime>,
    #[serde(with = "crate::timefmt::option")]
    pub last_motion_time: Option<SystemTime>,
    #[serde(with = "crate::timefmt::option")]
    pub last_frame_at: Option<SystemTime>,
    pub alert_fired: bool,
    pub frames_processed: u64,
    pub alerts_emitted: u64,
    pub silence_seconds: Option<u64>,
    /// Seconds until the silence alert fires, while one can still fire.
    pub alert_countdown_seconds: Option<u64>,
    pub timeout_remaining_seconds: Option<u64>,
    pub last_decision: Option<MotionDecision>,
    pub stop_reason: Option<StopReason>,
    pub error: Option<String>,
    pub config: SessionConfig,
    pub dispatch: Option<DispatchStatus>,
}

/// Silence state machine for one session: `Idle -> Running -> Stopped`.
///
/// Owns the session's motion analyzer, so the background model lives and
/// dies with the session. Time is taken from frame capture timestamps and
/// from the `now` passed to control calls; there is no timer thread.
pub struct SessionController {
    id: SessionId,
    config: SessionConfig,
    analyzer: Box<dyn MotionAnalyzer>,
    state: SessionState,
    started_at: Option<SystemTime>,
    stopped_at: Option<SystemTime>,
    stop_reason: Option<StopReason>,
    last_motion_time: Option<SystemTime>,
    last_frame_at: Option<SystemTime>,
    last_decision: Option<MotionDecision>,
    alert_fired: bool,
    frames_processed: u64,
    alerts_emitted: u64,
    error: Option<MonitorError>,
}

impl SessionController {
    pub fn new(id: SessionId, config: SessionConfig, analyzer: Box<dyn MotionAnalyzer>) -> Self {
        Self {
            id,
            config,
            analyzer,
            state: SessionState::Idle,
            started_at: None,
            stopped_at: None,
            stop_reason: None,
            last_motion_time: None,
            last_frame_at: None,
            last_decision: None,
            alert_fired: false,
            frames_processed: 0,
            alerts_emitted: 0,
            error: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn last_motion_time(&self) -> Option<SystemTime> {
        self.last_motion_time
    }

    pub fn alert_fired(&self) -> bool {
        self.alert_fired
    }

    fn invalid_state(&self, operation: &'static str) -> MonitorError {
        MonitorError::InvalidState {
            session: Some(self.id.clone()),
            state: self.state,
            operation,
        }
    }

    /// `Idle -> Running`. Validates the configuration snapshot first; a bad
    /// ROI or value leaves the session `Idle`.
    pub fn start(&mut self, now: SystemTime) -> Result<(), MonitorError> {
        if self.state != SessionState::Idle {
            return Err(self.invalid_state("start session"));
        }
        self.config.validate()?;

        self.analyzer.reset();
        self.state = SessionState::Running;
        self.started_at = Some(now);
        self.last_motion_time = Some(now);
        self.alert_fired = false;
        log::info!(
            "session {} started (camera {}, roi {}, sensitivity {}, alert delay {}s, analyzer {})",
            self.id,
            self.config.camera_index,
            self.config.motion.roi,
            self.config.motion.sensitivity,
            self.config.alert_delay_seconds,
            self.analyzer.name()
        );
        Ok(())
    }

    /// `Running -> Stopped`. Irreversible.
    pub fn stop(&mut self, now: SystemTime, reason: StopReason) -> Result<(), MonitorError> {
        if self.state != SessionState::Running {
            return Err(self.invalid_state("stop session"));
        }
        self.state = SessionState::Stopped;
        self.stopped_at = Some(now);
        self.stop_reason = Some(reason);
        log::info!(
            "session {} stopped ({}) after {} frames, {} alerts",
            self.id,
            reason,
            self.frames_processed,
            self.alerts_emitted
        );
        Ok(())
    }

    /// Run one frame through the analyzer and advance the silence state.
    ///
    /// Rejections (`InvalidState`, `OutOfOrder`) leave the session untouched.
    /// Pipeline failures stop the session and are returned.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameOutcome, MonitorError> {
        if self.state != SessionState::Running {
            return Err(self.invalid_state("process frame"));
        }
        let now = frame.captured_at();
        if let Some(previous) = self.last_frame_at {
            if now < previous {
                return Err(MonitorError::OutOfOrder {
                    previous,
                    received: now,
                });
            }
        }

        let decision = match self.analyzer.analyze(frame) {
            Ok(decision) => decision,
            Err(err) => {
                if err.is_fatal() {
                    log::error!("session {} aborted: {}", self.id, err);
                    self.error = Some(err.clone());
                    self.stop(now, StopReason::Failed)?;
                }
                return Err(err);
            }
        };

        self.last_frame_at = Some(now);
        self.frames_processed += 1;
        self.last_decision = Some(decision);

        let started_at = self.started_at.unwrap_or(now);
        let last_motion = self.last_motion_time.unwrap_or(started_at);
        let mut alert = None;

        if decision.detected {
            self.last_motion_time = Some(last_motion.max(now));
            if self.alert_fired {
                log::info!("session {}: motion resumed, alert re-armed", self.id);
                self.alert_fired = false;
            }
        } else if silence_alert_due(now, last_motion, self.config.alert_delay(), self.alert_fired)
        {
            self.alert_fired = true;
            self.alerts_emitted += 1;
            let event = AlertEvent {
                session_id: self.id.clone(),
                timestamp: now,
                last_motion_time: last_motion,
                camera_index: self.config.camera_index,
                sensitivity: self.config.motion.sensitivity,
                roi_enabled: self.config.motion.roi.enabled,
                silence_seconds: elapsed(last_motion, now).as_secs(),
            };
            log::warn!(
                "session {}: no motion for {}s, raising silence alert",
                self.id,
                event.silence_seconds
            );
            alert = Some(event);
        } else {
            log::debug!(
                "session {}: no motion (score {}), silent for {}s",
                self.id,
                decision.score,
                elapsed(last_motion, now).as_secs()
            );
        }

        let mut stopped = None;
        if let Some(timeout) = self.config.session_timeout() {
            if elapsed(started_at, now) >= timeout {
                self.stop(now, StopReason::Timeout)?;
                stopped = Some(StopReason::Timeout);
            }
        }

        Ok(FrameOutcome {
            decision,
            alert,
            stopped,
        })
    }

    /// Status as of `now`. Silence and countdown freeze at the stop time.
    pub fn status(&self, now: SystemTime) -> SessionStatus {
        let reference = self.stopped_at.unwrap_or(now);
        let silence = self.last_motion_time.map(|last| elapsed(last, reference));
        let running = self.state == SessionState::Running;

        let alert_countdown_seconds = match silence {
            Some(silence) if running && !self.alert_fired => Some(
                self.config
                    .alert_delay()
                    .saturating_sub(silence)
                    .as_secs(),
            ),
            _ => None,
        };
        let timeout_remaining_seconds = match (self.config.session_timeout(), self.started_at) {
            (Some(timeout), Some(started)) if running => {
                Some(timeout.saturating_sub(elapsed(started, now)).as_secs())
            }
            _ => None,
        };

        SessionStatus {
            id: self.id.clone(),
            state: self.state,
            started_at: self.started_at,
            stopped_at: self.stopped_at,
            last_motion_time: self.last_motion_time,
            last_frame_at: self.last_frame_at,
            alert_fired: self.alert_fired,
            frames_processed: self.frames_processed,
            alerts_emitted: self.alerts_emitted,
            silence_seconds: silence.map(|s| s.as_secs()),
            alert_countdown_seconds,
            timeout_remaining_seconds,
            last_decision: self.last_decision,
            stop_reason: self.stop_reason,
            error: self.error.as_ref().map(|e| e.to_string()),
            config: self.config.clone(),
            dispatch: None,
        }
    }
}
