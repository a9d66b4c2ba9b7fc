use image::imageops;
use image::GrayImage;

use crate::config::Roi;
use crate::error::MonitorError;
use crate::frame::Frame;

/// Crop to the ROI, reduce to intensity and smooth sensor noise.
///
/// Cropping happens before smoothing so pixels outside the ROI never bleed
/// into the analysis region. Pure: identical input gives identical output.
pub fn prepare(frame: &Frame, roi: &Roi, blur_sigma: f32) -> Result<GrayImage, MonitorError> {
    if !roi.fits(frame.width(), frame.height()) {
        return Err(MonitorError::InvalidRegion {
            roi: *roi,
            width: frame.width(),
            height: frame.height(),
        });
    }

    let luma = frame.to_luma();
    let region = if roi.enabled {
        imageops::crop_imm(&luma, roi.x, roi.y, roi.width, roi.height).to_image()
    } else {
        luma
    };

    if blur_sigma > 0.0 {
        Ok(imageproc::filter::gaussian_blur_f32(&region, blur_sigma))
    } else {
        Ok(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::UNIX_EPOCH;

    fn gradient_frame(width: u32, height: u32) -> Frame {
        let data = (0..width * height).map(|i| (i % 251) as u8).collect();
        Frame::gray(data, width, height, UNIX_EPOCH).unwrap()
    }

    #[test]
    fn crops_to_roi() {
        let frame = gradient_frame(20, 20);
        let region = prepare(&frame, &Roi::new(2, 3, 5, 4), 0.0).unwrap();
        assert_eq!(region.dimensions(), (5, 4));
        // Top-left of the crop is pixel (2, 3) of the frame.
        assert_eq!(region.get_pixel(0, 0).0[0], (3 * 20 + 2) as u8);
    }

    #[test]
    fn disabled_roi_uses_full_frame() {
        let frame = gradient_frame(8, 6);
        let region = prepare(&frame, &Roi::disabled(), 0.0).unwrap();
        assert_eq!(region.dimensions(), (8, 6));
    }

    #[test]
    fn roi_outside_frame_is_rejected() {
        let frame = gradient_frame(20, 20);
        let err = prepare(&frame, &Roi::new(15, 15, 10, 10), 1.1).unwrap_err();
        assert_eq!(
            err,
            MonitorError::InvalidRegion {
                roi: Roi::new(15, 15, 10, 10),
                width: 20,
                height: 20,
            }
        );
    }

    #[test]
    fn blur_keeps_flat_regions_flat() {
        let frame = Frame::gray(vec![90u8; 100], 10, 10, UNIX_EPOCH).unwrap();
        let region = prepare(&frame, &Roi::disabled(), 1.1).unwrap();
        assert!(region.pixels().all(|p| p.0[0].abs_diff(90) <= 1));
    }

    #[test]
    fn deterministic() {
        let frame = gradient_frame(16, 16);
        let a = prepare(&frame, &Roi::new(1, 1, 12, 12), 1.1).unwrap();
        let b = prepare(&frame, &Roi::new(1, 1, 12, 12), 1.1).unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
    }
}
