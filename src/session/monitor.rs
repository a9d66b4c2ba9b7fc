use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use crate::alert::{AlertJob, DispatchHandle};
use crate::config::SessionConfig;
use crate::error::MonitorError;
use crate::frame::Frame;
use crate::motion::{MotionAnalyzer, MotionDecision, MotionDetector};

use super::{SessionController, SessionId, SessionState, SessionStatus, StopReason};

/// Stopped sessions kept around for status queries.
pub const RETAINED_SESSIONS: usize = 16;

/// Builds a fresh analyzer for each session.
pub type AnalyzerFactory = Arc<dyn Fn(&SessionConfig) -> Box<dyn MotionAnalyzer> + Send + Sync>;

/// Session registry shared by the frame loop and the control API.
///
/// Every operation takes the registry lock, so start/stop requests and frame
/// decisions on a session are serialized. At most one session is `Running`.
#[derive(Clone)]
pub struct Monitor {
    sessions: Arc<Mutex<VecDeque<SessionController>>>,
    factory: AnalyzerFactory,
    dispatch: Option<DispatchHandle>,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    /// Monitor using the background-subtraction detector.
    pub fn new() -> Self {
        Self::with_analyzer_factory(Arc::new(|config: &SessionConfig| {
            Box::new(MotionDetector::new(config.motion.clone())) as Box<dyn MotionAnalyzer>
        }))
    }

    pub fn with_analyzer_factory(factory: AnalyzerFactory) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(VecDeque::new())),
            factory,
            dispatch: None,
        }
    }

    /// Route silence alerts to a dispatch queue.
    pub fn with_dispatch(mut self, dispatch: DispatchHandle) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    fn lock(&self) -> Result<MutexGuard<'_, VecDeque<SessionController>>, MonitorError> {
        self.sessions
            .lock()
            .map_err(|_| MonitorError::LockPoisoned("session registry"))
    }

    pub fn start_session(&self, config: SessionConfig) -> Result<SessionId, MonitorError> {
        self.start_session_at(config, SystemTime::now())
    }

    /// Start a session with an explicit start time.
    pub fn start_session_at(
        &self,
        config: SessionConfig,
        now: SystemTime,
    ) -> Result<SessionId, MonitorError> {
        let mut sessions = self.lock()?;
        if let Some(active) = sessions
            .iter()
            .find(|s| s.state() == SessionState::Running)
        {
            return Err(MonitorError::InvalidState {
                session: Some(active.id().clone()),
                state: SessionState::Running,
                operation: "start session",
            });
        }

        let analyzer = (self.factory)(&config);
        let mut session = SessionController::new(SessionId::generate(), config, analyzer);
        session.start(now)?;
        let id = session.id().clone();
        sessions.push_back(session);
        while sessions.len() > RETAINED_SESSIONS {
            sessions.pop_front();
        }
        Ok(id)
    }

    pub fn stop_session(&self, id: &SessionId) -> Result<(), MonitorError> {
        self.stop_session_at(id, SystemTime::now())
    }

    pub fn stop_session_at(&self, id: &SessionId, now: SystemTime) -> Result<(), MonitorError> {
        let mut sessions = self.lock()?;
        let session = find_mut(&mut sessions, id, "stop session")?;
        session.stop(now, StopReason::Requested)
    }

    /// Feed one frame to a running session and return its decision.
    ///
    /// A silence alert raised by the frame is queued for dispatch after the
    /// registry lock is released.
    pub fn process_frame(
        &self,
        id: &SessionId,
        frame: &Frame,
    ) -> Result<MotionDecision, MonitorError> {
        let (outcome, attach) = {
            let mut sessions = self.lock()?;
            let session = find_mut(&mut sessions, id, "process frame")?;
            let attach = session.config().attach_snapshot;
            (session.process_frame(frame)?, attach)
        };

        if let Some(event) = outcome.alert {
            match &self.dispatch {
                Some(dispatch) => {
                    let job = AlertJob {
                        event,
                        snapshot: attach.then(|| frame.clone()),
                    };
                    if let Err(err) = dispatch.submit(job) {
                        log::error!("session {}: {}", id, err);
                        dispatch.ledger().record_failure(id, err.to_string());
                    }
                }
                None => log::warn!(
                    "session {}: silence alert raised but no dispatcher is configured",
                    id
                ),
            }
        }
        Ok(outcome.decision)
    }

    pub fn get_session_status(&self, id: &SessionId) -> Result<SessionStatus, MonitorError> {
        self.get_session_status_at(id, SystemTime::now())
    }

    pub fn get_session_status_at(
        &self,
        id: &SessionId,
        now: SystemTime,
    ) -> Result<SessionStatus, MonitorError> {
        let sessions = self.lock()?;
        let session = sessions
            .iter()
            .find(|s| s.id() == id)
            .ok_or_else(|| unknown_session("get session status"))?;
        Ok(self.with_dispatch_status(session.status(now)))
    }

    /// Id of the running session, if any.
    pub fn active_session(&self) -> Result<Option<SessionId>, MonitorError> {
        let sessions = self.lock()?;
        Ok(sessions
            .iter()
            .find(|s| s.state() == SessionState::Running)
            .map(|s| s.id().clone()))
    }

    /// Status of the most recently started session.
    pub fn latest_status(&self) -> Result<Option<SessionStatus>, MonitorError> {
        let now = SystemTime::now();
        let sessions = self.lock()?;
        Ok(sessions
            .back()
            .map(|s| self.with_dispatch_status(s.status(now))))
    }

    fn with_dispatch_status(&self, mut status: SessionStatus) -> SessionStatus {
        if let Some(dispatch) = &self.dispatch {
            status.dispatch = dispatch.ledger().status(&status.id);
        }
        status
    }
}

/// Unknown ids are reported as an idle, nonexistent session.
fn unknown_session(operation: &'static str) -> MonitorError {
    MonitorError::InvalidState {
        session: None,
        state: SessionState::Idle,
        operation,
    }
}

fn find_mut<'a>(
    sessions: &'a mut VecDeque<SessionController>,
    id: &SessionId,
    operation: &'static str,
) -> Result<&'a mut SessionController, MonitorError> {
    sessions
        .iter_mut()
        .find(|s| s.id() == id)
        .ok_or_else(|| unknown_session(operation))
}
