//! Silence alerts: the event raised by a session and the asynchronous
//! dispatch path that delivers it.
//!
//! Sessions never block on delivery. `Monitor` hands each alert to a
//! `DispatchHandle`, a worker thread fans it out to every configured
//! `AlertDispatcher`, and per-session outcomes land in a `DispatchLedger`
//! that session status reads back.

pub mod mqtt;
pub mod sinks;
pub mod template;

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime};

use crate::error::MonitorError;
use crate::frame::Frame;
use crate::session::SessionId;

pub use mqtt::MqttDispatcher;
pub use sinks::{LogDispatcher, SnapshotWriter};
pub use template::AlertTemplate;

/// Raised once per silence episode.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AlertEvent {
    pub session_id: SessionId,
    #[serde(with = "crate::timefmt")]
    pub timestamp: SystemTime,
    #[serde(with = "crate::timefmt")]
    pub last_motion_time: SystemTime,
    pub camera_index: u32,
    pub sensitivity: f64,
    pub roi_enabled: bool,
    pub silence_seconds: u64,
}

/// A notification sink.
pub trait AlertDispatcher: Send {
    fn name(&self) -> &str;

    /// Deliver one alert. `snapshot` is the frame that raised it, when the
    /// session was configured to attach one.
    fn dispatch(&mut self, event: &AlertEvent, snapshot: Option<&Frame>) -> Result<()>;
}

/// Queued unit of work for the dispatch worker.
#[derive(Clone, Debug)]
pub struct AlertJob {
    pub event: AlertEvent,
    pub snapshot: Option<Frame>,
}

/// Delivery outcomes for one session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStatus {
    pub delivered: u64,
    /// Dropped by the cooldown.
    pub suppressed: u64,
    pub failed: u64,
    pub last_error: Option<String>,
}

#[derive(Clone, Default)]
pub struct DispatchLedger {
    inner: Arc<Mutex<HashMap<SessionId, DispatchStatus>>>,
}

impl DispatchLedger {
    pub fn status(&self, id: &SessionId) -> Option<DispatchStatus> {
        match self.inner.lock() {
            Ok(map) => map.get(id).cloned(),
            Err(_) => {
                log::error!("dispatch ledger lock poisoned");
                None
            }
        }
    }

    /// Count an alert that never reached the worker.
    pub fn record_failure(&self, id: &SessionId, error: impl Into<String>) {
        let error = error.into();
        self.record(id, |s| {
            s.failed += 1;
            s.last_error = Some(error);
        });
    }

    fn record(&self, id: &SessionId, update: impl FnOnce(&mut DispatchStatus)) {
        match self.inner.lock() {
            Ok(mut map) => update(map.entry(id.clone()).or_default()),
            Err(_) => log::error!("dispatch ledger lock poisoned"),
        }
    }
}

enum Command {
    Alert(AlertJob),
    Shutdown,
}

/// Cloneable sender side of a `DispatchQueue`.
#[derive(Clone)]
pub struct DispatchHandle {
    sender: mpsc::Sender<Command>,
    ledger: DispatchLedger,
}

impl DispatchHandle {
    /// Queue an alert without waiting for delivery.
    pub fn submit(&self, job: AlertJob) -> Result<(), MonitorError> {
        self.sender
            .send(Command::Alert(job))
            .map_err(|_| MonitorError::Dispatch("dispatch worker is not running".to_string()))
    }

    pub fn ledger(&self) -> &DispatchLedger {
        &self.ledger
    }
}

/// Worker thread that delivers alerts to every sink, in submission order.
///
/// Alerts whose timestamp falls within `cooldown` of the last delivered
/// alert are suppressed. Failures are logged and recorded, never retried.
pub struct DispatchQueue {
    handle: DispatchHandle,
    worker: Option<JoinHandle<()>>,
}

impl DispatchQueue {
    pub fn spawn(sinks: Vec<Box<dyn AlertDispatcher>>, cooldown: Duration) -> Self {
        let (sender, receiver) = mpsc::channel();
        let ledger = DispatchLedger::default();
        let worker_ledger = ledger.clone();
        let worker = std::thread::spawn(move || {
            let mut worker = Worker {
                sinks,
                cooldown,
                ledger: worker_ledger,
                last_delivered: None,
            };
            for command in receiver {
                match command {
                    Command::Alert(job) => worker.deliver(&job),
                    Command::Shutdown => break,
                }
            }
        });
        Self {
            handle: DispatchHandle { sender, ledger },
            worker: Some(worker),
        }
    }

    pub fn handle(&self) -> DispatchHandle {
        self.handle.clone()
    }

    /// Deliver everything already queued, then stop the worker.
    pub fn shutdown(mut self) {
        let _ = self.handle.sender.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("alert dispatch worker panicked");
            }
        }
    }
}

struct Worker {
    sinks: Vec<Box<dyn AlertDispatcher>>,
    cooldown: Duration,
    ledger: DispatchLedger,
    last_delivered: Option<SystemTime>,
}

impl Worker {
    fn in_cooldown(&self, at: SystemTime) -> bool {
        match self.last_delivered {
            Some(last) => at
                .duration_since(last)
                .map(|since| since < self.cooldown)
                .unwrap_or(true),
            None => false,
        }
    }

    fn deliver(&mut self, job: &AlertJob) {
        let event = &job.event;
        if self.in_cooldown(event.timestamp) {
            log::info!(
                "session {}: alert suppressed, cooldown of {}s still active",
                event.session_id,
                self.cooldown.as_secs()
            );
            self.ledger.record(&event.session_id, |s| s.suppressed += 1);
            return;
        }

        let mut errors = Vec::new();
        let mut delivered = 0usize;
        for sink in self.sinks.iter_mut() {
            match sink.dispatch(event, job.snapshot.as_ref()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    log::error!(
                        "session {}: alert sink {} failed: {:#}",
                        event.session_id,
                        sink.name(),
                        err
                    );
                    errors.push(format!("{}: {:#}", sink.name(), err));
                }
            }
        }

        if delivered > 0 || self.sinks.is_empty() {
            self.last_delivered = Some(event.timestamp);
        }
        self.ledger.record(&event.session_id, |s| {
            if errors.is_empty() {
                s.delivered += 1;
            } else {
                s.failed += 1;
                s.last_error = Some(errors.join("; "));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::time::UNIX_EPOCH;

    struct Recording {
        seen: Arc<Mutex<Vec<SystemTime>>>,
        fail: bool,
    }

    impl AlertDispatcher for Recording {
        fn name(&self) -> &str {
            "recording"
        }

        fn dispatch(&mut self, event: &AlertEvent, _snapshot: Option<&Frame>) -> Result<()> {
            if self.fail {
                return Err(anyhow!("mail server unreachable"));
            }
            self.seen.lock().unwrap().push(event.timestamp);
            Ok(())
        }
    }

    fn event(id: &str, secs: u64) -> AlertEvent {
        AlertEvent {
            session_id: SessionId::from(id),
            timestamp: UNIX_EPOCH + Duration::from_secs(secs),
            last_motion_time: UNIX_EPOCH,
            camera_index: 0,
            sensitivity: 0.5,
            roi_enabled: false,
            silence_seconds: secs,
        }
    }

    fn job(id: &str, secs: u64) -> AlertJob {
        AlertJob {
            event: event(id, secs),
            snapshot: None,
        }
    }

    #[test]
    fn delivers_and_applies_cooldown() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let queue = DispatchQueue::spawn(
            vec![Box::new(Recording {
                seen: seen.clone(),
                fail: false,
            })],
            Duration::from_secs(300),
        );
        let handle = queue.handle();
        handle.submit(job("session-a", 1000)).unwrap();
        handle.submit(job("session-a", 1100)).unwrap();
        handle.submit(job("session-a", 1300)).unwrap();
        queue.shutdown();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                UNIX_EPOCH + Duration::from_secs(1000),
                UNIX_EPOCH + Duration::from_secs(1300)
            ]
        );
        let status = handle.ledger().status(&SessionId::from("session-a")).unwrap();
        assert_eq!(status.delivered, 2);
        assert_eq!(status.suppressed, 1);
        assert_eq!(status.failed, 0);
    }

    #[test]
    fn failures_are_recorded_per_session() {
        let queue = DispatchQueue::spawn(
            vec![Box::new(Recording {
                seen: Arc::new(Mutex::new(Vec::new())),
                fail: true,
            })],
            Duration::ZERO,
        );
        let handle = queue.handle();
        handle.submit(job("session-b", 10)).unwrap();
        handle.submit(job("session-b", 20)).unwrap();
        queue.shutdown();

        let status = handle.ledger().status(&SessionId::from("session-b")).unwrap();
        assert_eq!(status.failed, 2);
        assert_eq!(status.delivered, 0);
        assert!(status.last_error.unwrap().contains("mail server unreachable"));
        assert_eq!(handle.ledger().status(&SessionId::from("session-c")), None);
    }

    #[test]
    fn submit_after_shutdown_is_a_dispatch_error() {
        let queue = DispatchQueue::spawn(Vec::new(), Duration::ZERO);
        let handle = queue.handle();
        queue.shutdown();
        assert!(matches!(
            handle.submit(job("session-d", 1)),
            Err(MonitorError::Dispatch(_))
        ));
    }

    #[test]
    fn record_failure_counts_and_keeps_last_error() {
        let ledger = DispatchLedger::default();
        let id = SessionId::from("session-e");
        ledger.record_failure(&id, "first");
        ledger.record_failure(&id, "second");
        let status = ledger.status(&id).unwrap();
        assert_eq!(status.failed, 2);
        assert_eq!(status.delivered, 0);
        assert_eq!(status.last_error.as_deref(), Some("second"));
    }
}
