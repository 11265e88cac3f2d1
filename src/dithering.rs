use image::Rgba;

use crate::compose::Canvas;
use crate::packed::PackedBitmap;
use crate::{BADGE_HEIGHT, BADGE_WIDTH};

/// 4x4 Bayer matrix, tiled over the canvas by `(y % 4, x % 4)`.
pub const BAYER_4X4: [[u8; 4]; 4] = [[0, 8, 2, 10], [12, 4, 14, 6], [3, 11, 1, 9], [15, 7, 13, 5]];

/// Luma threshold for the pixel at `(x, y)`, in `68..=188`.
pub fn bayer_threshold(x: u32, y: u32) -> i32 {
    // matrix value scaled to 0..240, then centred around mid-grey at half strength
    let t = BAYER_4X4[(y % 4) as usize][(x % 4) as usize] as i32 * 16;
    128 + (t - 120) / 2
}

/// Luma of one pixel in `0..=255` after the global gamma. Alpha is ignored.
pub fn luma(pixel: &Rgba<u8>, gamma: f32) -> i32 {
    let [r, g, b, _] = pixel.0;
    let lum = (0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64) / 255.0;
    let lum = lum.clamp(0.0, 1.0).powf(1.0 / gamma as f64);
    (lum * 255.0) as i32
}

/// Ordered-dithers the canvas into the badge framebuffer.
///
/// - `canvas`: composed screen
/// - `gamma`: global gamma, applied to luma before thresholding
///
/// A pixel becomes black (bit set) iff its luma is below the Bayer threshold.
/// Pure: the same canvas and gamma always produce the same bytes.
pub fn quantize(canvas: &Canvas, gamma: f32) -> PackedBitmap {
    let img = canvas.image();
    let mut out = PackedBitmap::blank();
    for y in 0..BADGE_HEIGHT {
        for x in 0..BADGE_WIDTH {
            if luma(img.get_pixel(x, y), gamma) < bayer_threshold(x, y) {
                out.set(x, y, true);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FB_BYTES;
    use image::RgbaImage;

    fn flat(value: u8) -> Canvas {
        let img = RgbaImage::from_pixel(BADGE_WIDTH, BADGE_HEIGHT, Rgba([value, value, value, 255]));
        Canvas::from_image(img).unwrap()
    }

    #[test]
    fn white_canvas_is_all_zero() {
        let packed = quantize(&flat(255), 1.0);
        assert_eq!(packed.as_bytes(), &[0u8; FB_BYTES][..]);
    }

    #[test]
    fn black_canvas_is_all_ones() {
        let packed = quantize(&flat(0), 1.0);
        assert!(packed.as_bytes().iter().all(|&b| b == 0xFF));
        assert_eq!(packed.as_bytes().len(), FB_BYTES);
    }

    #[test]
    fn thresholds_span_the_matrix() {
        assert_eq!(bayer_threshold(0, 0), 68);
        assert_eq!(bayer_threshold(0, 3), 188);
        assert_eq!(bayer_threshold(4, 4), bayer_threshold(0, 0));
        assert_eq!(bayer_threshold(1, 0), 132);
    }

    #[test]
    fn mid_grey_dithers_to_a_repeating_pattern() {
        let packed = quantize(&flat(128), 1.0);
        // 128 is black only where the threshold exceeds it: 8 of the 16 cells
        let black = packed.black_pixels();
        assert_eq!(black, (BADGE_WIDTH * BADGE_HEIGHT / 2) as usize);
        assert_eq!(packed.row(0), packed.row(4));
        assert_eq!(packed, quantize(&flat(128), 1.0));
    }

    #[test]
    fn gamma_brightens_midtones() {
        let plain = quantize(&flat(100), 1.0).black_pixels();
        let lifted = quantize(&flat(100), 2.2).black_pixels();
        assert!(lifted < plain);
    }
}
