//! Narrow BMP support: uncompressed, 1 bit per pixel, white/black palette.
//!
//! Decoding never fails loudly. Anything outside the accepted variant is "no match"
//! (`None`) and the caller falls back to treating the file as an ordinary image.

use std::io::Write;

use crate::packed::PackedBitmap;
use crate::{BADGE_HEIGHT, BADGE_WIDTH};

pub const FILE_HEADER_LEN: usize = 14;
pub const INFO_HEADER_LEN: usize = 40;
pub const PALETTE_LEN: usize = 8;
/// Offset of the pixel rows in files we write.
pub const PIXEL_OFFSET: usize = FILE_HEADER_LEN + INFO_HEADER_LEN + PALETTE_LEN;
/// 72 DPI in pixels per metre.
pub const PIXELS_PER_METRE: u32 = 2835;

const SIGNATURE: &[u8; 2] = b"BM";
const WHITE_BGRA: [u8; 4] = [0xFF, 0xFF, 0xFF, 0x00];
const BLACK_BGRA: [u8; 4] = [0x00, 0x00, 0x00, 0x00];

/// Tightly packed rows (no padding), top row first, MSB = leftmost pixel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedBitmap {
    pub packed: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

pub fn row_bytes(width: u32) -> usize {
    (width as usize).div_ceil(8)
}

/// Row length in the file, padded to 4 bytes.
pub fn row_stride(width: u32) -> usize {
    row_bytes(width).div_ceil(4) * 4
}

fn u16_at(bytes: &[u8], off: usize) -> Option<u16> {
    Some(u16::from_le_bytes(bytes.get(off..off + 2)?.try_into().ok()?))
}

fn u32_at(bytes: &[u8], off: usize) -> Option<u32> {
    Some(u32::from_le_bytes(bytes.get(off..off + 4)?.try_into().ok()?))
}

fn i32_at(bytes: &[u8], off: usize) -> Option<i32> {
    Some(i32::from_le_bytes(bytes.get(off..off + 4)?.try_into().ok()?))
}

fn is_near_white(bgr: &[u8]) -> bool {
    bgr.iter().all(|&c| c > 200)
}

fn is_near_black(bgr: &[u8]) -> bool {
    bgr.iter().all(|&c| c < 55)
}

/// Decodes a 1-bpp file of exactly `expect_w` x `expect_h` pixels.
///
/// - `bytes`: the whole file
/// - `expect_w`, `expect_h`: required dimensions
///
/// Returns the tightly packed top-down rows, or `None` on any mismatch.
/// Bottom-up (positive height) and top-down (negative height) files are both
/// accepted. The palette must map index 0 to white and index 1 to black; an
/// inverted palette is rejected rather than flipped.
pub fn decode(bytes: &[u8], expect_w: u32, expect_h: u32) -> Option<DecodedBitmap> {
    let reject = |reason: &'static str| {
        tracing::debug!(reason, "not a native 1-bit bitmap");
        None
    };

    if bytes.len() < PIXEL_OFFSET {
        return reject("file too short");
    }
    if &bytes[0..2] != SIGNATURE {
        return reject("bad signature");
    }
    let pixel_offset = u32_at(bytes, 10)? as usize;
    let header_size = u32_at(bytes, 14)? as usize;
    if header_size < INFO_HEADER_LEN {
        return reject("header smaller than BITMAPINFOHEADER");
    }
    let width = i32_at(bytes, 18)?;
    let raw_height = i32_at(bytes, 22)?;
    if u16_at(bytes, 26)? != 1 {
        return reject("planes != 1");
    }
    if u16_at(bytes, 28)? != 1 {
        return reject("not 1 bit per pixel");
    }
    if u32_at(bytes, 30)? != 0 {
        return reject("compressed");
    }
    if width < 0 || width as u32 != expect_w {
        return reject("width mismatch");
    }
    let top_down = raw_height < 0;
    let height = raw_height.unsigned_abs();
    if height != expect_h {
        return reject("height mismatch");
    }

    // 0 means "all 2^bpp colours", which for 1 bpp is the same two entries
    let colors_used = u32_at(bytes, 46)?;
    if colors_used != 0 && colors_used != 2 {
        return reject("palette must have 0 or 2 entries");
    }
    let palette_off = FILE_HEADER_LEN.checked_add(header_size)?;
    let palette = bytes.get(palette_off..palette_off.checked_add(PALETTE_LEN)?)?;
    if !(is_near_white(&palette[0..3]) && is_near_black(&palette[4..7])) {
        return reject("palette is not index0=white, index1=black");
    }

    let row_len = row_bytes(width as u32);
    let stride = row_stride(width as u32);
    let data_end = pixel_offset.checked_add(stride.checked_mul(height as usize)?)?;
    if data_end > bytes.len() {
        return reject("pixel data truncated");
    }

    let mut packed = Vec::with_capacity(row_len * height as usize);
    for row in 0..height as usize {
        let src_row = if top_down { row } else { height as usize - 1 - row };
        let start = pixel_offset + src_row * stride;
        packed.extend_from_slice(&bytes[start..start + row_len]);
    }
    Some(DecodedBitmap {
        packed,
        width: width as u32,
        height,
    })
}

/// Decodes a file that matches the badge geometry exactly.
pub fn decode_native(bytes: &[u8]) -> Option<PackedBitmap> {
    let decoded = decode(bytes, BADGE_WIDTH, BADGE_HEIGHT)?;
    PackedBitmap::from_bytes(decoded.packed).ok()
}

/// Encodes tightly packed rows as a top-down 1-bpp BMP with a white/black palette.
///
/// # Panics
/// If `packed` does not hold exactly `row_bytes(width) * height` bytes.
pub fn encode(packed: &[u8], width: u32, height: u32) -> Vec<u8> {
    let row_len = row_bytes(width);
    let stride = row_stride(width);
    let image_size = stride * height as usize;
    let file_size = PIXEL_OFFSET + image_size;
    assert_eq!(
        packed.len(),
        row_len * height as usize,
        "packed rows do not match {width}x{height}"
    );

    let mut out = Vec::with_capacity(file_size);
    out.extend_from_slice(SIGNATURE);
    out.extend_from_slice(&(file_size as u32).to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&(PIXEL_OFFSET as u32).to_le_bytes());

    out.extend_from_slice(&(INFO_HEADER_LEN as u32).to_le_bytes());
    out.extend_from_slice(&(width as i32).to_le_bytes());
    // negative height: rows are stored top to bottom
    out.extend_from_slice(&(-(height as i32)).to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // planes
    out.extend_from_slice(&1u16.to_le_bytes()); // bits per pixel
    out.extend_from_slice(&0u32.to_le_bytes()); // BI_RGB
    out.extend_from_slice(&(image_size as u32).to_le_bytes());
    out.extend_from_slice(&PIXELS_PER_METRE.to_le_bytes());
    out.extend_from_slice(&PIXELS_PER_METRE.to_le_bytes());
    out.extend_from_slice(&2u32.to_le_bytes()); // colours used
    out.extend_from_slice(&0u32.to_le_bytes()); // important colours

    out.extend_from_slice(&WHITE_BGRA);
    out.extend_from_slice(&BLACK_BGRA);

    let pad = [0u8; 3];
    for row in packed.chunks_exact(row_len) {
        out.extend_from_slice(row);
        out.extend_from_slice(&pad[..stride - row_len]);
    }
    out
}

pub fn encode_native(bitmap: &PackedBitmap) -> Vec<u8> {
    encode(bitmap.as_bytes(), BADGE_WIDTH, BADGE_HEIGHT)
}

/// Persists the framebuffer as a BMP file into `sink`.
pub fn write_native<W: Write>(bitmap: &PackedBitmap, mut sink: W) -> std::io::Result<()> {
    sink.write_all(&encode_native(bitmap))?;
    sink.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FB_BYTES, ROW_BYTES};

    fn checkerboard() -> PackedBitmap {
        let mut bmp = PackedBitmap::blank();
        for y in 0..BADGE_HEIGHT {
            for x in 0..BADGE_WIDTH {
                bmp.set(x, y, (x / 3 + y / 5) % 2 == 0);
            }
        }
        bmp
    }

    /// Hand-built bottom-up file with an arbitrary palette and padding garbage.
    fn bottom_up_file(rows: &[Vec<u8>], width: i32, palette: [[u8; 4]; 2], colors_used: u32) -> Vec<u8> {
        let stride = row_stride(width as u32);
        let mut out = Vec::new();
        out.extend_from_slice(b"BM");
        out.extend_from_slice(&((PIXEL_OFFSET + stride * rows.len()) as u32).to_le_bytes());
        out.extend_from_slice(&[0; 4]);
        out.extend_from_slice(&(PIXEL_OFFSET as u32).to_le_bytes());
        out.extend_from_slice(&40u32.to_le_bytes());
        out.extend_from_slice(&width.to_le_bytes());
        out.extend_from_slice(&(rows.len() as i32).to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&((stride * rows.len()) as u32).to_le_bytes());
        out.extend_from_slice(&[0; 8]);
        out.extend_from_slice(&colors_used.to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&palette[0]);
        out.extend_from_slice(&palette[1]);
        for row in rows.iter().rev() {
            out.extend_from_slice(row);
            out.resize(out.len() + stride - row.len(), 0xAA);
        }
        out
    }

    fn rows_of(bmp: &PackedBitmap) -> Vec<Vec<u8>> {
        bmp.rows().map(<[u8]>::to_vec).collect()
    }

    #[test]
    fn round_trip_is_exact() {
        let bmp = checkerboard();
        let file = encode_native(&bmp);
        assert_eq!(decode_native(&file), Some(bmp));

        let blank = PackedBitmap::blank();
        assert_eq!(decode_native(&encode_native(&blank)), Some(blank));
    }

    #[test]
    fn header_layout() {
        let file = encode_native(&PackedBitmap::blank());
        let stride = row_stride(BADGE_WIDTH);
        assert_eq!(stride, ROW_BYTES);
        assert_eq!(file.len(), PIXEL_OFFSET + FB_BYTES);
        assert_eq!(&file[0..2], b"BM");
        assert_eq!(u32_at(&file, 2), Some(file.len() as u32));
        assert_eq!(u32_at(&file, 10), Some(62));
        assert_eq!(u32_at(&file, 14), Some(40));
        assert_eq!(i32_at(&file, 18), Some(128));
        assert_eq!(i32_at(&file, 22), Some(-296));
        assert_eq!(u32_at(&file, 34), Some(FB_BYTES as u32));
        assert_eq!(u32_at(&file, 38), Some(2835));
        assert_eq!(u32_at(&file, 46), Some(2));
        assert_eq!(&file[54..62], &[0xFF, 0xFF, 0xFF, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn odd_widths_are_padded() {
        // 20 px -> 3 bytes per row, 4 in the file
        let packed = vec![0xF0, 0x0F, 0x80, 0x01, 0x02, 0x30];
        let file = encode(&packed, 20, 2);
        assert_eq!(file.len(), PIXEL_OFFSET + 8);
        assert_eq!(&file[PIXEL_OFFSET..], &[0xF0, 0x0F, 0x80, 0, 0x01, 0x02, 0x30, 0]);
        let decoded = decode(&file, 20, 2).unwrap();
        assert_eq!(decoded.packed, packed);
        assert_eq!((decoded.width, decoded.height), (20, 2));
    }

    #[test]
    fn bottom_up_files_are_flipped() {
        let bmp = checkerboard();
        let file = bottom_up_file(&rows_of(&bmp), 128, [WHITE_BGRA, BLACK_BGRA], 2);
        let decoded = decode_native(&file).unwrap();
        assert_eq!(decoded, bmp);

        // re-encoding keeps every pixel, though the bytes differ from the source file
        let again = encode_native(&decoded);
        assert_ne!(again, file);
        assert_eq!(decode_native(&again), Some(bmp));
    }

    #[test]
    fn implicit_palette_size_and_near_colours_accepted() {
        let bmp = checkerboard();
        let palette = [[0xF0, 0xEE, 0xFA, 0x00], [0x10, 0x20, 0x30, 0x00]];
        let file = bottom_up_file(&rows_of(&bmp), 128, palette, 0);
        assert_eq!(decode_native(&file), Some(bmp));
    }

    #[test]
    fn wrong_width_is_no_match() {
        let rows = vec![vec![0u8; 17]; BADGE_HEIGHT as usize];
        let file = bottom_up_file(&rows, 136, [WHITE_BGRA, BLACK_BGRA], 2);
        assert!(decode(&file, 136, BADGE_HEIGHT).is_some());
        assert_eq!(decode_native(&file), None);
    }

    #[test]
    fn inverted_palette_is_no_match() {
        let bmp = checkerboard();
        let file = bottom_up_file(&rows_of(&bmp), 128, [BLACK_BGRA, WHITE_BGRA], 2);
        assert_eq!(decode_native(&file), None);
    }

    #[test]
    fn malformed_headers_are_no_match() {
        let good = encode_native(&checkerboard());

        let mut compressed = good.clone();
        compressed[30] = 1;
        assert_eq!(decode_native(&compressed), None);

        let mut deep = good.clone();
        deep[28] = 8;
        assert_eq!(decode_native(&deep), None);

        let mut planes = good.clone();
        planes[26] = 2;
        assert_eq!(decode_native(&planes), None);

        let mut small_header = good.clone();
        small_header[14] = 12;
        assert_eq!(decode_native(&small_header), None);

        let mut colours = good.clone();
        colours[46] = 16;
        assert_eq!(decode_native(&colours), None);

        let mut signature = good.clone();
        signature[0] = b'P';
        assert_eq!(decode_native(&signature), None);

        assert_eq!(decode_native(&good[..good.len() - 1]), None);
        assert_eq!(decode_native(&good[..20]), None);
        assert_eq!(decode_native(&[]), None);
    }

    #[test]
    fn writes_to_a_sink() {
        let bmp = checkerboard();
        let mut sink = Vec::new();
        write_native(&bmp, &mut sink).unwrap();
        assert_eq!(sink, encode_native(&bmp));
    }
}
