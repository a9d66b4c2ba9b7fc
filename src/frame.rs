//! Immutable video frames.
//!
//! - `Frame`: pixel grid plus capture timestamp. Pixels are private and shared
//!   behind an `Arc`, so cloning a frame (e.g. to attach it to an alert) never
//!   copies or mutates the buffer.
//! - `PixelFormat`: layouts a camera can hand us.
//!
//! Conversion to single-channel intensity and to RGB lives in `normalize`.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use image::{GrayImage, RgbImage};

use crate::error::MonitorError;

mod normalize;

/// Pixel layout of a frame buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit single channel.
    Gray8,
    /// Packed 8-bit R, G, B.
    Rgb24,
    /// Packed 8-bit B, G, R (what most UVC capture stacks deliver).
    Bgr24,
    /// Y plane followed by interleaved half-resolution UV plane.
    Nv12,
}

impl PixelFormat {
    /// Expected buffer length for a `width` x `height` frame.
    pub fn buffer_len(self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize).checked_mul(height as usize)?;
        match self {
            PixelFormat::Gray8 => Some(pixels),
            PixelFormat::Rgb24 | PixelFormat::Bgr24 => pixels.checked_mul(3),
            PixelFormat::Nv12 => pixels.checked_add(pixels / 2),
        }
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Gray8 => "gray8",
            PixelFormat::Rgb24 => "rgb24",
            PixelFormat::Bgr24 => "bgr24",
            PixelFormat::Nv12 => "nv12",
        };
        f.write_str(name)
    }
}

/// Immutable frame. There is no mutable accessor; the pipeline only reads.
#[derive(Clone)]
pub struct Frame {
    data: Arc<[u8]>,
    width: u32,
    height: u32,
    format: PixelFormat,
    captured_at: SystemTime,
}

impl Frame {
    /// Wrap a pixel buffer. Fails when the buffer length does not match the
    /// dimensions and format.
    pub fn new(
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: PixelFormat,
        captured_at: SystemTime,
    ) -> Result<Self, MonitorError> {
        if width == 0 || height == 0 {
            return Err(MonitorError::InvalidFrame(format!(
                "frame dimensions must be non-zero (got {}x{})",
                width, height
            )));
        }
        if format == PixelFormat::Nv12 && (width % 2 != 0 || height % 2 != 0) {
            return Err(MonitorError::InvalidFrame(format!(
                "nv12 frames need even dimensions (got {}x{})",
                width, height
            )));
        }
        let expected = format.buffer_len(width, height).ok_or_else(|| {
            MonitorError::InvalidFrame(format!("{}x{} frame dimensions overflow", width, height))
        })?;
        if data.len() != expected {
            return Err(MonitorError::InvalidFrame(format!(
                "{} frame length mismatch: expected {}, got {}",
                format,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            data: data.into(),
            width,
            height,
            format,
            captured_at,
        })
    }

    /// Convenience constructor for single-channel frames.
    pub fn gray(
        data: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: SystemTime,
    ) -> Result<Self, MonitorError> {
        Self::new(data, width, height, PixelFormat::Gray8, captured_at)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn captured_at(&self) -> SystemTime {
        self.captured_at
    }

    /// Single-channel intensity image of the whole frame.
    pub fn to_luma(&self) -> GrayImage {
        normalize::to_luma(&self.data, self.width, self.height, self.format)
    }

    /// RGB rendering of the whole frame, for snapshots.
    pub fn to_rgb(&self) -> RgbImage {
        normalize::to_rgb(&self.data, self.width, self.height, self.format)
    }

    pub(crate) fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Debug for Frame {
    // Never prints pixel content.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("bytes", &self.byte_len())
            .field("captured_at", &self.captured_at)
            .finish()
    }
}
