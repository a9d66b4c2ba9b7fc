use image::{GrayImage, Luma};
use imageproc::region_labelling::{connected_components, Connectivity};
use serde::Serialize;
use std::time::SystemTime;

/// Per-frame motion verdict.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct MotionDecision {
    pub detected: bool,
    /// Area in pixels of the largest 8-connected foreground blob.
    pub score: u64,
    /// Total foreground pixels in the mask (diagnostic).
    pub foreground_pixels: u64,
    #[serde(with = "crate::timefmt")]
    pub timestamp: SystemTime,
}

impl MotionDecision {
    pub fn none(timestamp: SystemTime) -> Self {
        Self {
            detected: false,
            score: 0,
            foreground_pixels: 0,
            timestamp,
        }
    }
}

/// Minimum blob area needed to declare motion.
///
/// `threshold = min_area_base * (1 - sensitivity)`, with sensitivity clamped
/// to [0, 1]. Monotonically non-increasing in sensitivity: 0 gives the full
/// base area, 1 gives zero (any foreground blob triggers).
pub fn area_threshold(min_area_base: u32, sensitivity: f64) -> f64 {
    min_area_base as f64 * (1.0 - sensitivity.clamp(0.0, 1.0))
}

/// Reduce a foreground mask to a single decision.
///
/// An empty mask is always `detected=false, score=0`, whatever the
/// sensitivity.
pub fn classify(
    mask: &GrayImage,
    sensitivity: f64,
    min_area_base: u32,
    timestamp: SystemTime,
) -> MotionDecision {
    let foreground_pixels = mask.as_raw().iter().filter(|&&p| p != 0).count() as u64;
    if foreground_pixels == 0 {
        return MotionDecision::none(timestamp);
    }

    let score = largest_blob_area(mask);
    let detected = score > 0 && score as f64 >= area_threshold(min_area_base, sensitivity);
    MotionDecision {
        detected,
        score,
        foreground_pixels,
        timestamp,
    }
}

fn largest_blob_area(mask: &GrayImage) -> u64 {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
    let mut areas: Vec<u64> = Vec::new();
    for label in labels.pixels().map(|p| p.0[0] as usize) {
        if label == 0 {
            continue;
        }
        if label >= areas.len() {
            areas.resize(label + 1, 0);
        }
        areas[label] += 1;
    }
    areas.into_iter().max().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn mask_with(width: u32, height: u32, points: &[(u32, u32)]) -> GrayImage {
        let mut mask = GrayImage::new(width, height);
        for &(x, y) in points {
            mask.put_pixel(x, y, Luma([255]));
        }
        mask
    }

    fn block(x0: u32, y0: u32, w: u32, h: u32) -> Vec<(u32, u32)> {
        (y0..y0 + h)
            .flat_map(|y| (x0..x0 + w).map(move |x| (x, y)))
            .collect()
    }

    #[test]
    fn empty_mask_never_detects() {
        let mask = GrayImage::new(32, 32);
        for sensitivity in [0.0, 0.3, 0.99, 1.0] {
            let decision = classify(&mask, sensitivity, 500, UNIX_EPOCH);
            assert!(!decision.detected);
            assert_eq!(decision.score, 0);
            assert_eq!(decision.foreground_pixels, 0);
        }
    }

    #[test]
    fn threshold_is_monotonic_in_sensitivity() {
        let mut previous = f64::INFINITY;
        for step in 0..=100 {
            let threshold = area_threshold(500, step as f64 / 100.0);
            assert!(threshold <= previous);
            previous = threshold;
        }
        assert_eq!(area_threshold(500, 0.0), 500.0);
        assert_eq!(area_threshold(500, 1.0), 0.0);
    }

    #[test]
    fn score_is_largest_blob_not_total() {
        // Two separate 3x3 blobs and one 4x4 blob.
        let mut points = block(0, 0, 3, 3);
        points.extend(block(10, 0, 3, 3));
        points.extend(block(0, 10, 4, 4));
        let mask = mask_with(20, 20, &points);
        let decision = classify(&mask, 0.0, 16, UNIX_EPOCH);
        assert_eq!(decision.score, 16);
        assert_eq!(decision.foreground_pixels, 34);
        assert!(decision.detected);

        let decision = classify(&mask, 0.0, 17, UNIX_EPOCH);
        assert!(!decision.detected);
    }

    #[test]
    fn diagonal_pixels_join_one_blob() {
        let mask = mask_with(4, 4, &[(0, 0), (1, 1), (2, 2), (3, 3)]);
        let decision = classify(&mask, 0.0, 4, UNIX_EPOCH);
        assert_eq!(decision.score, 4);
        assert!(decision.detected);
    }

    #[test]
    fn higher_sensitivity_triggers_on_smaller_blobs() {
        let mask = mask_with(20, 20, &block(5, 5, 5, 5));
        assert!(!classify(&mask, 0.5, 100, UNIX_EPOCH).detected);
        assert!(classify(&mask, 0.8, 100, UNIX_EPOCH).detected);
        assert!(classify(&mask, 1.0, 100, UNIX_EPOCH).detected);
    }
}
