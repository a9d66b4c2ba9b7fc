//! CVD tracker: silence monitoring for a single camera.
//!
//! A camera watches a region of interest. Each frame is reduced to a
//! "motion present" decision, and a monitoring session raises an alert when
//! no motion has been seen for longer than the configured delay. One alert
//! fires per silence episode; motion re-arms it.
//!
//! # Pipeline
//!
//! ```text
//! Frame -> motion::prepare -> BackgroundModel::update -> classify -> MotionDecision
//!       -> SessionController -> AlertEvent -> DispatchQueue -> AlertDispatcher(s)
//! ```
//!
//! # Module Structure
//!
//! - `frame`: immutable frames and pixel format conversion
//! - `motion`: preprocessing, background model, classifier, detector
//! - `session`: silence state machine and the `Monitor` registry
//! - `alert`: alert events, templating, dispatch queue and sinks
//! - `config`: per-session snapshot and daemon configuration
//! - `ingest`: frame source seam and the synthetic `stub://` source
//! - `api`: loopback control/status API

pub mod alert;
pub mod api;
pub mod config;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod motion;
pub mod session;
pub mod timefmt;

pub use alert::{
    AlertDispatcher, AlertEvent, AlertJob, AlertTemplate, DispatchHandle, DispatchLedger,
    DispatchQueue, DispatchStatus,
};
pub use config::{MotionSettings, Roi, SessionConfig, TrackerConfig};
pub use error::MonitorError;
pub use frame::{Frame, PixelFormat};
pub use motion::{MotionAnalyzer, MotionDecision, MotionDetector};
pub use session::{
    silence_alert_due, Monitor, SessionController, SessionId, SessionState, SessionStatus,
    StopReason,
};
