use crate::config::MotionSettings;
use crate::error::MonitorError;
use crate::frame::Frame;

use super::background::{clean_mask, BackgroundModel};
use super::classifier::{classify, MotionDecision};
use super::preprocess::prepare;

/// Turns frames into motion decisions, one frame at a time, in capture order.
///
/// Implementations keep per-session state (the background model), so a
/// session owns exactly one analyzer and resets it on start.
pub trait MotionAnalyzer: Send {
    /// Analyzer identifier for logs.
    fn name(&self) -> &'static str;

    fn analyze(&mut self, frame: &Frame) -> Result<MotionDecision, MonitorError>;

    /// Drop learned state before a new session.
    fn reset(&mut self);
}

/// Background-subtraction motion detector:
/// `prepare` -> `BackgroundModel::update` -> `classify`.
pub struct MotionDetector {
    settings: MotionSettings,
    background: BackgroundModel,
    frames_seen: u64,
}

impl MotionDetector {
    pub fn new(settings: MotionSettings) -> Self {
        let background =
            BackgroundModel::new(settings.background_learning_rate, settings.noise_threshold);
        Self {
            settings,
            background,
            frames_seen: 0,
        }
    }

    pub fn settings(&self) -> &MotionSettings {
        &self.settings
    }

    fn warming_up(&self) -> bool {
        self.frames_seen <= self.settings.warmup_frames as u64
    }
}

impl MotionAnalyzer for MotionDetector {
    fn name(&self) -> &'static str {
        "background-subtraction"
    }

    fn analyze(&mut self, frame: &Frame) -> Result<MotionDecision, MonitorError> {
        let region = prepare(frame, &self.settings.roi, self.settings.blur_sigma)?;
        let update = self.background.update(&region)?;
        self.frames_seen += 1;

        let mask = clean_mask(
            &update.mask,
            self.settings.mask_open_radius,
            self.settings.mask_close_radius,
        );
        let decision = classify(
            &mask,
            self.settings.sensitivity,
            self.settings.min_contour_area,
            frame.captured_at(),
        );

        if decision.detected && self.warming_up() {
            log::debug!(
                "motion ignored during background warm-up (frame {} of {}, score {})",
                self.frames_seen,
                self.settings.warmup_frames,
                decision.score
            );
            return Ok(MotionDecision {
                detected: false,
                ..decision
            });
        }
        Ok(decision)
    }

    fn reset(&mut self) {
        self.background.reset();
        self.frames_seen = 0;
    }
}
