use std::fmt;

use image::{Rgba, RgbaImage};

use crate::error::BitmapError;
use crate::{BADGE_HEIGHT, BADGE_WIDTH, FB_BYTES, ROW_BYTES};

/// The badge framebuffer: 1 bit per pixel, row-major, MSB = leftmost pixel.
/// A set bit is black, a clear bit is white. Always exactly [`FB_BYTES`] long.
#[derive(Clone, PartialEq, Eq)]
pub struct PackedBitmap(Vec<u8>);

impl PackedBitmap {
    /// An all-white screen.
    pub fn blank() -> Self {
        Self(vec![0u8; FB_BYTES])
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, BitmapError> {
        if bytes.len() != FB_BYTES {
            return Err(BitmapError::InvalidLength {
                expected: FB_BYTES,
                actual: bytes.len(),
            });
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Row `y` as [`ROW_BYTES`] packed bytes.
    pub fn row(&self, y: u32) -> &[u8] {
        let off = y as usize * ROW_BYTES;
        &self.0[off..off + ROW_BYTES]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        self.0.chunks_exact(ROW_BYTES)
    }

    pub fn is_black(&self, x: u32, y: u32) -> bool {
        let (idx, mask) = Self::locate(x, y);
        self.0[idx] & mask != 0
    }

    pub fn set(&mut self, x: u32, y: u32, black: bool) {
        let (idx, mask) = Self::locate(x, y);
        if black {
            self.0[idx] |= mask;
        } else {
            self.0[idx] &= !mask;
        }
    }

    pub fn black_pixels(&self) -> usize {
        self.0.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// Unpacks the bits into a black/white RGBA image, e.g. for previews.
    pub fn to_image(&self) -> RgbaImage {
        RgbaImage::from_fn(BADGE_WIDTH, BADGE_HEIGHT, |x, y| {
            if self.is_black(x, y) {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        })
    }

    fn locate(x: u32, y: u32) -> (usize, u8) {
        assert!(
            x < BADGE_WIDTH && y < BADGE_HEIGHT,
            "pixel ({x}, {y}) outside {BADGE_WIDTH}x{BADGE_HEIGHT}"
        );
        let idx = y as usize * ROW_BYTES + (x / 8) as usize;
        (idx, 0x80 >> (x % 8))
    }
}

impl Default for PackedBitmap {
    fn default() -> Self {
        Self::blank()
    }
}

impl AsRef<[u8]> for PackedBitmap {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl TryFrom<Vec<u8>> for PackedBitmap {
    type Error = BitmapError;

    fn try_from(bytes: Vec<u8>) -> Result<Self, Self::Error> {
        Self::from_bytes(bytes)
    }
}

impl fmt::Debug for PackedBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackedBitmap")
            .field("bytes", &self.0.len())
            .field("black", &self.black_pixels())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bits_are_msb_first_row_major() {
        let mut bmp = PackedBitmap::blank();
        bmp.set(0, 0, true);
        bmp.set(9, 1, true);
        assert_eq!(bmp.as_bytes()[0], 0x80);
        assert_eq!(bmp.as_bytes()[ROW_BYTES + 1], 0x40);
        assert!(bmp.is_black(9, 1));
        assert!(!bmp.is_black(8, 1));

        bmp.set(9, 1, false);
        assert_eq!(bmp.black_pixels(), 1);
    }

    #[test]
    fn rejects_wrong_length() {
        let err = PackedBitmap::from_bytes(vec![0; FB_BYTES - 1]).unwrap_err();
        assert_eq!(
            err,
            BitmapError::InvalidLength {
                expected: FB_BYTES,
                actual: FB_BYTES - 1
            }
        );
        assert!(PackedBitmap::try_from(vec![0xFF; FB_BYTES]).is_ok());
    }

    #[test]
    fn preview_unpacks_every_bit() {
        let mut bmp = PackedBitmap::blank();
        bmp.set(127, 295, true);
        let img = bmp.to_image();
        assert_eq!(img.dimensions(), (BADGE_WIDTH, BADGE_HEIGHT));
        assert_eq!(img.get_pixel(127, 295), &Rgba([0, 0, 0, 255]));
        assert_eq!(img.get_pixel(126, 295), &Rgba([255, 255, 255, 255]));
        assert_eq!(bmp.rows().count(), BADGE_HEIGHT as usize);
    }
}
