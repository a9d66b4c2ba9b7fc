use anyhow::{anyhow, Context, Result};
use std::time::{Duration, SystemTime};

use crate::frame::{Frame, PixelFormat};

use super::{FrameSource, SourceStats};

const BACKGROUND_DARK: u8 = 60;
const BACKGROUND_LIGHT: u8 = 80;
const OBJECT: u8 = 230;

/// Synthetic scene parameters.
///
/// URL form: `stub://<name>[?motion=on|off][&motion_frames=N]`.
/// `motion_frames` limits the moving object to the first N frames; after
/// that the scene is still.
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticConfig {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub motion: bool,
    pub motion_frames: Option<u64>,
    /// When set, frame `n` is stamped `start + n / fps` instead of wall time.
    pub simulated_start: Option<SystemTime>,
}

impl SyntheticConfig {
    pub fn from_url(url: &str, width: u32, height: u32, fps: u32) -> Result<Self> {
        if width == 0 || height == 0 || fps == 0 {
            return Err(anyhow!("synthetic source needs non-zero size and fps"));
        }
        let mut config = Self {
            url: url.to_string(),
            width,
            height,
            fps,
            motion: true,
            motion_frames: None,
            simulated_start: None,
        };
        if let Some((_, query)) = url.split_once('?') {
            for pair in query.split('&').filter(|p| !p.is_empty()) {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                match key {
                    "motion" => {
                        config.motion = match value {
                            "on" | "true" | "1" => true,
                            "off" | "false" | "0" => false,
                            other => return Err(anyhow!("invalid motion value '{}'", other)),
                        }
                    }
                    "motion_frames" => {
                        config.motion_frames = Some(
                            value
                                .parse()
                                .with_context(|| format!("invalid motion_frames '{}'", value))?,
                        )
                    }
                    other => return Err(anyhow!("unknown stub option '{}'", other)),
                }
            }
        }
        Ok(config)
    }

    pub fn with_simulated_clock(mut self, start: SystemTime) -> Self {
        self.simulated_start = Some(start);
        self
    }
}

/// Checkerboard scene with an optional bright square sweeping across it.
/// Frames are BGR like a UVC webcam.
pub struct SyntheticSource {
    config: SyntheticConfig,
    frame_count: u64,
    object_x: u32,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            object_x: 0,
        }
    }

    fn object_size(&self) -> u32 {
        (self.config.width.min(self.config.height) / 4).max(1)
    }

    fn moving(&self) -> bool {
        self.config.motion
            && self
                .config
                .motion_frames
                .map_or(true, |limit| self.frame_count <= limit)
    }

    fn capture_time(&self) -> SystemTime {
        match self.config.simulated_start {
            Some(start) => {
                let nanos = (self.frame_count as u128 * 1_000_000_000) / self.config.fps as u128;
                start + Duration::from_nanos(nanos as u64)
            }
            None => SystemTime::now(),
        }
    }

    fn render(&self) -> Vec<u8> {
        let (width, height) = (self.config.width, self.config.height);
        let size = self.object_size();
        let top = (height - size) / 2;
        let show_object = self.config.motion;

        let mut pixels = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                let inside = show_object
                    && x >= self.object_x
                    && x < self.object_x + size
                    && y >= top
                    && y < top + size;
                let value = if inside {
                    OBJECT
                } else if ((x / 8) + (y / 8)) % 2 == 0 {
                    BACKGROUND_DARK
                } else {
                    BACKGROUND_LIGHT
                };
                pixels.extend_from_slice(&[value, value, value]);
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn connect(&mut self) -> Result<()> {
        log::info!("frame source connected to {} (synthetic)", self.config.url);
        Ok(())
    }

    fn next_frame(&mut self) -> Result<Frame> {
        if self.moving() && self.frame_count > 0 {
            let span = self.config.width - self.object_size();
            let step = (self.object_size() / 2).max(1);
            self.object_x = if span == 0 {
                0
            } else {
                (self.object_x + step) % (span + 1)
            };
        }
        let captured_at = self.capture_time();
        self.frame_count += 1;
        Frame::new(
            self.render(),
            self.config.width,
            self.config.height,
            PixelFormat::Bgr24,
            captured_at,
        )
        .map_err(Into::into)
    }

    fn is_healthy(&self) -> bool {
        true
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            url: self.config.url.clone(),
        }
    }
}
