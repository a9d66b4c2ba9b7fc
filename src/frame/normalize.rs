use image::{GrayImage, RgbImage};

use super::PixelFormat;

// BT.601 luma weights, fixed point (sum = 256).
const LUMA_R: u32 = 77;
const LUMA_G: u32 = 150;
const LUMA_B: u32 = 29;

/// Reduce a validated pixel buffer to single-channel intensity.
///
/// Callers guarantee `pixels.len() == format.buffer_len(width, height)`.
pub(super) fn to_luma(pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> GrayImage {
    let plane = width as usize * height as usize;
    let luma = match format {
        PixelFormat::Gray8 => pixels.to_vec(),
        // NV12 already carries luma in its Y plane.
        PixelFormat::Nv12 => pixels[..plane].to_vec(),
        PixelFormat::Rgb24 => pixels
            .chunks_exact(3)
            .map(|px| weighted_luma(px[0], px[1], px[2]))
            .collect(),
        PixelFormat::Bgr24 => pixels
            .chunks_exact(3)
            .map(|px| weighted_luma(px[2], px[1], px[0]))
            .collect(),
    };
    GrayImage::from_raw(width, height, luma).unwrap_or_else(|| GrayImage::new(width, height))
}

/// Render a validated pixel buffer as RGB.
pub(super) fn to_rgb(pixels: &[u8], width: u32, height: u32, format: PixelFormat) -> RgbImage {
    let rgb = match format {
        PixelFormat::Rgb24 => pixels.to_vec(),
        PixelFormat::Bgr24 => pixels
            .chunks_exact(3)
            .flat_map(|px| [px[2], px[1], px[0]])
            .collect(),
        PixelFormat::Gray8 => pixels.iter().flat_map(|&v| [v, v, v]).collect(),
        PixelFormat::Nv12 => nv12_to_rgb(pixels, width, height),
    };
    RgbImage::from_raw(width, height, rgb).unwrap_or_else(|| RgbImage::new(width, height))
}

fn weighted_luma(r: u8, g: u8, b: u8) -> u8 {
    ((LUMA_R * r as u32 + LUMA_G * g as u32 + LUMA_B * b as u32 + 128) >> 8) as u8
}

fn nv12_to_rgb(pixels: &[u8], width: u32, height: u32) -> Vec<u8> {
    let w = width as usize;
    let h = height as usize;
    let y_plane = w * h;

    let mut rgb = vec![0u8; y_plane * 3];
    for j in 0..h {
        for i in 0..w {
            let y = pixels[j * w + i] as f32;
            let uv_index = y_plane + (j / 2) * w + (i / 2) * 2;
            let u = pixels[uv_index] as f32 - 128.0;
            let v = pixels[uv_index + 1] as f32 - 128.0;

            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;

            let offset = (j * w + i) * 3;
            rgb[offset] = clamp_to_u8(r);
            rgb[offset + 1] = clamp_to_u8(g);
            rgb[offset + 2] = clamp_to_u8(b);
        }
    }
    rgb
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nv12_conversion_produces_gray() {
        let y_plane = vec![128u8; 4];
        let uv_plane = vec![128u8; 2];
        let nv12 = [y_plane, uv_plane].concat();

        let rgb = to_rgb(&nv12, 2, 2, PixelFormat::Nv12);
        assert_eq!(rgb.as_raw(), &vec![128u8; 12]);
        let luma = to_luma(&nv12, 2, 2, PixelFormat::Nv12);
        assert_eq!(luma.as_raw(), &vec![128u8; 4]);
    }

    #[test]
    fn bgr_and_rgb_agree_on_luma() {
        let rgb = [200u8, 40, 10];
        let bgr = [10u8, 40, 200];
        let a = to_luma(&rgb, 1, 1, PixelFormat::Rgb24);
        let b = to_luma(&bgr, 1, 1, PixelFormat::Bgr24);
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn white_and_black_map_to_extremes() {
        let pixels = [255u8, 255, 255, 0, 0, 0];
        let luma = to_luma(&pixels, 2, 1, PixelFormat::Rgb24);
        assert_eq!(luma.as_raw(), &vec![255u8, 0]);
    }

    #[test]
    fn bgr_snapshot_swaps_channels() {
        let rgb = to_rgb(&[1u8, 2, 3], 1, 1, PixelFormat::Bgr24);
        assert_eq!(rgb.as_raw(), &vec![3u8, 2, 1]);
    }
}
