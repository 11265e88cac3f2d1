use std::collections::HashMap;
use std::path::Path;

use image::{GrayImage, Luma};
use rusttype::{point, Font, PositionedGlyph, Scale};
use serde::{Deserialize, Serialize};

use crate::config::FontsConfig;
use crate::error::{ConfigError, FontError};

/// Glyph coverage at or above this turns a pixel black. Anything below stays white,
/// so rendered text carries no grey edges into the 1-bit threshold.
const COVERAGE_CUTOFF: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontFamily {
    #[default]
    Sans,
    Serif,
    Mono,
}

impl FontFamily {
    pub const ALL: [FontFamily; 3] = [FontFamily::Sans, FontFamily::Serif, FontFamily::Mono];
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Alignment {
    Left,
    #[default]
    Center,
    Right,
}

struct FontFace {
    regular: Font<'static>,
    bold: Option<Font<'static>>,
}

/// Typefaces available to text blocks, one regular and optional bold face per family.
#[derive(Default)]
pub struct FontBook {
    faces: HashMap<FontFamily, FontFace>,
}

impl FontBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a family from raw TTF/OTF bytes.
    pub fn insert(
        &mut self,
        family: FontFamily,
        regular: Vec<u8>,
        bold: Option<Vec<u8>>,
    ) -> Result<(), FontError> {
        let regular = Font::try_from_vec(regular).ok_or(FontError::InvalidFace)?;
        let bold = match bold {
            Some(data) => Some(Font::try_from_vec(data).ok_or(FontError::InvalidFace)?),
            None => None,
        };
        self.faces.insert(family, FontFace { regular, bold });
        Ok(())
    }

    pub fn from_config(config: &FontsConfig) -> Result<Self, ConfigError> {
        let mut book = Self::new();
        for (family, files) in config.entries() {
            let regular = read_font(&files.regular)?;
            let bold = match &files.bold {
                Some(path) => Some(read_font(path)?),
                None => None,
            };
            book.insert(family, regular, bold)
                .map_err(|source| ConfigError::Font {
                    path: files.regular.clone(),
                    source,
                })?;
            tracing::debug!(?family, path = %files.regular.display(), "font registered");
        }
        Ok(book)
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Picks a face for `family`, falling back to any registered family.
    /// The flag is true when bold was asked for but only a regular face exists.
    fn select(&self, family: FontFamily, bold: bool) -> Option<(&Font<'static>, bool)> {
        let face = self.faces.get(&family).or_else(|| {
            FontFamily::ALL
                .iter()
                .find_map(|f| self.faces.get(f))
        })?;
        match (&face.bold, bold) {
            (Some(b), true) => Some((b, false)),
            (None, true) => Some((&face.regular, true)),
            _ => Some((&face.regular, false)),
        }
    }

    /// Shapes `text` into lines no wider than `width` and rasterizes them without
    /// antialiasing.
    ///
    /// - `family`: requested family, any registered one is used if it is missing
    /// - `bold`: bold face if registered, synthetic bold otherwise
    /// - `px_size`: glyph height in pixels
    /// - `width`: output image width in pixels
    ///
    /// Returns a `width`-wide GrayImage (0=black, 255=white), or `None` when no face is registered
    pub fn rasterize(
        &self,
        text: &str,
        family: FontFamily,
        bold: bool,
        alignment: Alignment,
        px_size: f32,
        width: u32,
    ) -> Option<GrayImage> {
        let (font, fake_bold) = self.select(family, bold)?;
        Some(rasterize_text(font, text, px_size, alignment, width, fake_bold))
    }
}

fn read_font(path: &Path) -> Result<Vec<u8>, ConfigError> {
    std::fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn rasterize_text(
    font: &Font<'static>,
    text: &str,
    px_size: f32,
    alignment: Alignment,
    width: u32,
    fake_bold: bool,
) -> GrayImage {
    let scale = Scale::uniform(px_size);
    let v_metrics = font.v_metrics(scale);
    let line_height = (v_metrics.ascent - v_metrics.descent + v_metrics.line_gap).ceil() as u32;
    let measure = |s: &str| text_pixel_width(font, s, scale);

    let lines = wrap_lines(text, width as f32, &measure);
    let height = (lines.len().max(1) as u32 * line_height).max(1);
    let mut out = GrayImage::from_pixel(width.max(1), height, Luma([255]));

    for (line_idx, line) in lines.iter().enumerate() {
        let x0 = line_offset(alignment, width as f32, measure(line));
        let y_baseline = (line_idx as u32 * line_height) as f32 + v_metrics.ascent;
        let glyphs: Vec<PositionedGlyph> = font.layout(line, scale, point(x0, y_baseline)).collect();
        for glyph in glyphs {
            let Some(bb) = glyph.pixel_bounding_box() else {
                continue;
            };
            glyph.draw(|gx, gy, v| {
                if v < COVERAGE_CUTOFF {
                    return;
                }
                let px = bb.min.x + gx as i32;
                let py = bb.min.y + gy as i32;
                put_black(&mut out, px, py);
                if fake_bold {
                    put_black(&mut out, px + 1, py);
                }
            });
        }
    }
    out
}

fn put_black(img: &mut GrayImage, x: i32, y: i32) {
    if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
        img.put_pixel(x as u32, y as u32, Luma([0]));
    }
}

fn text_pixel_width(font: &Font<'static>, s: &str, scale: Scale) -> f32 {
    s.chars()
        .map(|ch| font.glyph(ch).scaled(scale).h_metrics().advance_width)
        .sum()
}

/// Left edge of a line of width `line_width` inside `avail` pixels.
pub fn line_offset(alignment: Alignment, avail: f32, line_width: f32) -> f32 {
    let slack = (avail - line_width).max(0.0);
    match alignment {
        Alignment::Left => 0.0,
        Alignment::Center => (slack / 2.0).floor(),
        Alignment::Right => slack.floor(),
    }
}

/// Greedy word wrap. Explicit newlines always break; a word wider than the whole
/// line is split between characters.
pub fn wrap_lines(text: &str, max_width: f32, measure: &dyn Fn(&str) -> f32) -> Vec<String> {
    let mut lines = Vec::new();
    for raw_line in text.lines() {
        let mut cur = String::new();
        for word in raw_line.split_whitespace() {
            let trial = if cur.is_empty() {
                word.to_string()
            } else {
                format!("{cur} {word}")
            };
            if measure(&trial) <= max_width {
                cur = trial;
                continue;
            }
            if !cur.is_empty() {
                lines.push(std::mem::take(&mut cur));
            }
            if measure(word) <= max_width {
                cur = word.to_string();
                continue;
            }
            for ch in word.chars() {
                let mut next = cur.clone();
                next.push(ch);
                if !cur.is_empty() && measure(&next) > max_width {
                    lines.push(std::mem::take(&mut cur));
                    cur.push(ch);
                } else {
                    cur = next;
                }
            }
        }
        lines.push(cur);
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    // every char is 10px wide, spaces included
    fn mono10(s: &str) -> f32 {
        s.chars().count() as f32 * 10.0
    }

    #[test]
    fn wraps_on_word_boundaries() {
        let lines = wrap_lines("aaa bbb ccc", 70.0, &mono10);
        assert_eq!(lines, vec!["aaa bbb", "ccc"]);
    }

    #[test]
    fn honours_explicit_newlines() {
        let lines = wrap_lines("one\ntwo", 1000.0, &mono10);
        assert_eq!(lines, vec!["one", "two"]);
    }

    #[test]
    fn breaks_overlong_words() {
        let lines = wrap_lines("hi abcdefghij", 40.0, &mono10);
        assert_eq!(lines, vec!["hi", "abcd", "efgh", "ij"]);
    }

    #[test]
    fn empty_text_has_no_lines() {
        assert!(wrap_lines("", 100.0, &mono10).is_empty());
    }

    #[test]
    fn alignment_offsets() {
        assert_eq!(line_offset(Alignment::Left, 116.0, 40.0), 0.0);
        assert_eq!(line_offset(Alignment::Center, 116.0, 40.0), 38.0);
        assert_eq!(line_offset(Alignment::Right, 116.0, 40.0), 76.0);
        assert_eq!(line_offset(Alignment::Right, 116.0, 200.0), 0.0);
    }

    #[test]
    fn empty_book_cannot_rasterize() {
        let book = FontBook::new();
        assert!(book.is_empty());
        assert!(book
            .rasterize("hi", FontFamily::Mono, true, Alignment::Left, 12.0, 116)
            .is_none());
    }

    #[test]
    fn garbage_font_is_rejected() {
        let mut book = FontBook::new();
        let err = book.insert(FontFamily::Sans, vec![1, 2, 3], None).unwrap_err();
        assert!(matches!(err, FontError::InvalidFace));
    }
}
