//! Lays content blocks out top-down onto the fixed badge canvas.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use image::imageops::{self, FilterType};
use image::{GrayImage, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::bmp;
use crate::error::ConfigError;
use crate::font::{Alignment, FontBook, FontFamily};
use crate::packed::PackedBitmap;
use crate::{BADGE_HEIGHT, BADGE_WIDTH};

/// Vertical offset of the first block.
pub const TOP_MARGIN: u32 = 6;
/// Horizontal padding on both sides.
pub const PADDING_X: u32 = 6;
/// Gap left below every block.
pub const BLOCK_SPACING: u32 = 6;
/// Layout stops once the cursor is within this distance of the bottom edge.
pub const BOTTOM_GUARD: u32 = 4;
/// Smallest effective image scale.
pub const MIN_IMAGE_SCALE: f32 = 0.05;
/// Images are always fitted into at least this much height.
const MIN_FIT_HEIGHT: f32 = 20.0;
/// Upper bound on either edge of a scaled image. Anything past the canvas is clipped anyway.
pub const MAX_SCALED_EDGE: u32 = 4 * BADGE_HEIGHT;
/// Largest pixel size a text block is rendered at.
pub const MAX_TEXT_PX: f32 = BADGE_HEIGHT as f32;

/// RGBA scratch buffer of exactly `BADGE_WIDTH` x `BADGE_HEIGHT`.
#[derive(Debug, Clone, PartialEq)]
pub struct Canvas {
    pixels: RgbaImage,
}

impl Canvas {
    /// A fresh, opaque white canvas.
    pub fn new() -> Self {
        Self {
            pixels: RgbaImage::from_pixel(BADGE_WIDTH, BADGE_HEIGHT, Rgba([255, 255, 255, 255])),
        }
    }

    /// Wraps an image, or `None` if it does not match the badge geometry.
    pub fn from_image(pixels: RgbaImage) -> Option<Self> {
        (pixels.dimensions() == (BADGE_WIDTH, BADGE_HEIGHT)).then_some(Self { pixels })
    }

    pub fn image(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn into_image(self) -> RgbaImage {
        self.pixels
    }

    fn blit(&mut self, src: &RgbaImage, x: i64, y: i64) {
        // overlay clips to the canvas and alpha-blends over what is underneath
        imageops::overlay(&mut self.pixels, src, x, y);
    }

    fn blit_ink(&mut self, ink: &GrayImage, x: u32, y: u32) {
        for (ix, iy, p) in ink.enumerate_pixels() {
            let (cx, cy) = (x + ix, y + iy);
            if p[0] == 0 && cx < BADGE_WIDTH && cy < BADGE_HEIGHT {
                self.pixels.put_pixel(cx, cy, Rgba([0, 0, 0, 255]));
            }
        }
    }
}

impl Default for Canvas {
    fn default() -> Self {
        Self::new()
    }
}

fn default_point_size() -> f32 {
    24.0
}

fn unity() -> f32 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub text: String,
    #[serde(default = "default_point_size")]
    pub point_size: f32,
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub alignment: Alignment,
    #[serde(default)]
    pub font: FontFamily,
}

impl TextBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            point_size: default_point_size(),
            bold: false,
            alignment: Alignment::default(),
            font: FontFamily::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageBlock {
    /// Reference resolved through an [`ImageSource`].
    pub source: String,
    #[serde(default = "unity")]
    pub scale: f32,
    #[serde(default = "unity")]
    pub gamma: f32,
    /// Set when `source` is already a native badge bitmap. Never read from layout files.
    #[serde(skip)]
    pub native: Option<PackedBitmap>,
}

impl ImageBlock {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            scale: 1.0,
            gamma: 1.0,
            native: None,
        }
    }

    /// Checks whether the referenced file is a native 1-bit badge bitmap and, if so,
    /// keeps its bits for passthrough. Returns whether it was.
    pub fn detect_native(&mut self, images: &dyn ImageSource) -> bool {
        self.native = images
            .open(&self.source)
            .ok()
            .and_then(|bytes| bmp::decode_native(&bytes));
        if self.native.is_some() {
            tracing::info!(source = %self.source, "native badge bitmap, will pass through unchanged");
        }
        self.native.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text(TextBlock),
    Image(ImageBlock),
}

impl ContentBlock {
    fn native(&self) -> Option<&PackedBitmap> {
        match self {
            ContentBlock::Image(img) => img.native.as_ref(),
            ContentBlock::Text(_) => None,
        }
    }
}

/// The first native bitmap carried by any image block.
pub fn native_screen(blocks: &[ContentBlock]) -> Option<&PackedBitmap> {
    blocks.iter().find_map(ContentBlock::native)
}

/// Where image blocks get their raw bytes from.
pub trait ImageSource {
    fn open(&self, reference: &str) -> std::io::Result<Vec<u8>>;
}

/// Resolves references as paths relative to a directory.
#[derive(Debug, Clone)]
pub struct DirImageSource {
    root: PathBuf,
}

impl DirImageSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl ImageSource for DirImageSource {
    fn open(&self, reference: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.root.join(reference))
    }
}

impl ImageSource for HashMap<String, Vec<u8>> {
    fn open(&self, reference: &str) -> std::io::Result<Vec<u8>> {
        self.get(reference)
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, reference.to_string()))
    }
}

/// A block list as stored on disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Layout {
    #[serde(default)]
    pub blocks: Vec<ContentBlock>,
}

impl Layout {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Reads a layout file and returns it together with an image source rooted at
    /// the file's directory. Native bitmaps are detected on the way in.
    pub fn load(path: &Path) -> Result<(Self, DirImageSource), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut layout = Self::from_toml_str(&text)?;
        let images = DirImageSource::new(path.parent().unwrap_or_else(|| Path::new(".")));
        layout.detect_native(&images);
        Ok((layout, images))
    }

    pub fn detect_native(&mut self, images: &dyn ImageSource) {
        for block in &mut self.blocks {
            if let ContentBlock::Image(img) = block {
                img.detect_native(images);
            }
        }
    }
}

/// Multiplies each colour channel by `255 * (c / 255)^(1 / gamma)`, clamped. Alpha is kept.
pub fn apply_gamma(src: &RgbaImage, gamma: f32) -> RgbaImage {
    if gamma == 1.0 || !gamma.is_finite() || gamma <= 0.0 {
        return src.clone();
    }
    let inv = 1.0 / gamma as f64;
    let mut lut = [0u8; 256];
    for (c, slot) in lut.iter_mut().enumerate() {
        *slot = ((c as f64 / 255.0).powf(inv) * 255.0).clamp(0.0, 255.0) as u8;
    }
    imageproc::map::map_colors(src, |p: Rgba<u8>| {
        Rgba([lut[p[0] as usize], lut[p[1] as usize], lut[p[2] as usize], p[3]])
    })
}

/// Renders block lists onto a [`Canvas`].
pub struct Compositor<'a> {
    fonts: &'a FontBook,
    images: &'a dyn ImageSource,
    text_scale: f32,
}

impl<'a> Compositor<'a> {
    pub fn new(fonts: &'a FontBook, images: &'a dyn ImageSource) -> Self {
        Self {
            fonts,
            images,
            text_scale: 1.0,
        }
    }

    /// Pixels per point used for text blocks.
    pub fn with_text_scale(mut self, text_scale: f32) -> Self {
        self.text_scale = text_scale;
        self
    }

    /// Lays the blocks out in order. A native bitmap in any image block replaces
    /// everything else; blocks that start past the bottom guard are dropped.
    pub fn compose(&self, blocks: &[ContentBlock]) -> Canvas {
        if let Some(native) = native_screen(blocks) {
            return Canvas {
                pixels: native.to_image(),
            };
        }

        let mut canvas = Canvas::new();
        let mut y = TOP_MARGIN;
        for (idx, block) in blocks.iter().enumerate() {
            let advance = match block {
                ContentBlock::Text(text) => self.draw_text(&mut canvas, text, y),
                ContentBlock::Image(img) => self.draw_image(&mut canvas, img, y),
            };
            if let Some(h) = advance {
                y = y.saturating_add(h).saturating_add(BLOCK_SPACING);
            }
            if y >= BADGE_HEIGHT - BOTTOM_GUARD {
                let dropped = blocks.len() - idx - 1;
                if dropped > 0 {
                    tracing::debug!(dropped, "canvas full, remaining blocks dropped");
                }
                break;
            }
        }
        canvas
    }

    fn draw_text(&self, canvas: &mut Canvas, block: &TextBlock, y: u32) -> Option<u32> {
        let width = BADGE_WIDTH - 2 * PADDING_X;
        let px_size = block.point_size * self.text_scale;
        if !(px_size > 0.0) || !px_size.is_finite() {
            tracing::warn!(point_size = block.point_size, "text block with unusable size skipped");
            return None;
        }
        let px_size = px_size.min(MAX_TEXT_PX);
        let Some(ink) =
            self.fonts
                .rasterize(&block.text, block.font, block.bold, block.alignment, px_size, width)
        else {
            tracing::warn!("no fonts registered, text block skipped");
            return None;
        };
        canvas.blit_ink(&ink, PADDING_X, y);
        Some(ink.height())
    }

    fn draw_image(&self, canvas: &mut Canvas, block: &ImageBlock, y: u32) -> Option<u32> {
        let decoded = self
            .images
            .open(&block.source)
            .map_err(|e| e.to_string())
            .and_then(|bytes| image::load_from_memory(&bytes).map_err(|e| e.to_string()));
        let src = match decoded {
            Ok(img) => img.to_rgba8(),
            Err(error) => {
                tracing::warn!(source = %block.source, %error, "image block skipped");
                return None;
            }
        };

        // gamma before scaling so the downscale averages corrected values
        let src = apply_gamma(&src, block.gamma);
        let (w0, h0) = src.dimensions();
        let (w, h) = fitted_size(w0, h0, y, block.scale);
        let scaled = imageops::resize(&src, w, h, FilterType::Triangle);
        let left = (BADGE_WIDTH as i64 - w as i64) / 2;
        canvas.blit(&scaled, left, y as i64);
        Some(h)
    }
}

/// Size of an image scaled to fit the space left below `cursor_y`, times the user scale.
///
/// - `width`, `height`: source image size
/// - `cursor_y`: top edge the image will be drawn at
/// - `user_scale`: multiplier on the fit; non-finite or non-positive means 1.0
///
/// Returns the scaled size, at least 1x1 and at most [`MAX_SCALED_EDGE`] on either edge.
pub fn fitted_size(width: u32, height: u32, cursor_y: u32, user_scale: f32) -> (u32, u32) {
    let user_scale = if user_scale.is_finite() && user_scale > 0.0 {
        user_scale
    } else {
        1.0
    };
    let (width, height) = (width.max(1) as f32, height.max(1) as f32);
    let max_h = MIN_FIT_HEIGHT.max(BADGE_HEIGHT as f32 - cursor_y as f32 - BLOCK_SPACING as f32);
    let max_w = (BADGE_WIDTH - 2 * PADDING_X) as f32;
    let fit = (max_w / width).min(max_h / height);
    let cap = MAX_SCALED_EDGE as f32 / width.max(height);
    let s = (fit * user_scale).max(MIN_IMAGE_SCALE).min(cap);
    let w = ((width * s) as u32).clamp(1, MAX_SCALED_EDGE);
    let h = ((height * s) as u32).clamp(1, MAX_SCALED_EDGE);
    (w, h)
}
