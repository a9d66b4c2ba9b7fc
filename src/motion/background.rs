use image::GrayImage;
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};

use crate::error::MonitorError;

const FOREGROUND: u8 = 255;
const BACKGROUND: u8 = 0;

/// Output of one background update.
#[derive(Clone, Debug)]
pub struct BackgroundUpdate {
    /// 255 where the region differs from the reference by more than the
    /// noise threshold, 0 elsewhere.
    pub mask: GrayImage,
    /// Reference image after the update, rounded to 8 bits.
    pub background: GrayImage,
}

/// Slowly adapting reference image of the empty scene.
///
/// Gradual changes (daylight, auto exposure) are absorbed by the exponential
/// moving average; abrupt changes show up as foreground. No frame history is
/// stored, only the running float reference.
#[derive(Clone, Debug)]
pub struct BackgroundModel {
    learning_rate: f32,
    noise_threshold: f32,
    reference: Option<Reference>,
}

#[derive(Clone, Debug)]
struct Reference {
    width: u32,
    height: u32,
    pixels: Vec<f32>,
}

impl BackgroundModel {
    pub fn new(learning_rate: f32, noise_threshold: f32) -> Self {
        Self {
            learning_rate: learning_rate.clamp(0.0, 1.0),
            noise_threshold,
            reference: None,
        }
    }

    pub fn is_seeded(&self) -> bool {
        self.reference.is_some()
    }

    /// Forget the reference; the next update seeds a fresh one.
    pub fn reset(&mut self) {
        self.reference = None;
    }

    /// Feed one region image.
    ///
    /// The first call seeds the reference and yields an empty mask. Later
    /// calls compare the region against the reference built from earlier
    /// frames, then blend the region in:
    /// `background = (1 - a) * background + a * region`.
    pub fn update(&mut self, region: &GrayImage) -> Result<BackgroundUpdate, MonitorError> {
        let (width, height) = region.dimensions();

        let Some(reference) = self.reference.as_mut() else {
            let pixels = region.as_raw().iter().map(|&p| p as f32).collect();
            self.reference = Some(Reference {
                width,
                height,
                pixels,
            });
            return Ok(BackgroundUpdate {
                mask: GrayImage::new(width, height),
                background: region.clone(),
            });
        };

        if reference.width != width || reference.height != height {
            return Err(MonitorError::DimensionMismatch {
                expected_width: reference.width,
                expected_height: reference.height,
                actual_width: width,
                actual_height: height,
            });
        }

        let alpha = self.learning_rate;
        let threshold = self.noise_threshold;
        let mut mask = Vec::with_capacity(reference.pixels.len());
        for (bg, &px) in reference.pixels.iter_mut().zip(region.as_raw()) {
            let value = px as f32;
            mask.push(if (value - *bg).abs() > threshold {
                FOREGROUND
            } else {
                BACKGROUND
            });
            *bg = (1.0 - alpha) * *bg + alpha * value;
        }

        let snapshot: Vec<u8> = reference
            .pixels
            .iter()
            .map(|&v| v.round().clamp(0.0, 255.0) as u8)
            .collect();

        Ok(BackgroundUpdate {
            mask: GrayImage::from_raw(width, height, mask)
                .unwrap_or_else(|| GrayImage::new(width, height)),
            background: GrayImage::from_raw(width, height, snapshot)
                .unwrap_or_else(|| GrayImage::new(width, height)),
        })
    }
}

/// Morphological cleanup of a foreground mask.
///
/// Opening with a `(2r+1)` square drops speckle smaller than the element,
/// closing then merges fragments of one object back into a single blob.
/// A radius of zero skips that step.
pub fn clean_mask(mask: &GrayImage, open_radius: u8, close_radius: u8) -> GrayImage {
    let opened = if open_radius > 0 {
        open(mask, Norm::LInf, open_radius)
    } else {
        mask.clone()
    };
    if close_radius > 0 {
        close(&opened, Norm::LInf, close_radius)
    } else {
        opened
    }
}
