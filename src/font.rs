//! Font raster: a FreeType monospace face at a fixed pixel size.
//!
//! Cell metrics are probed once from the glyph for `M` and stay fixed for
//! the lifetime of the process. Coverage bitmaps are rendered on demand per
//! codepoint; there is no glyph cache.

use std::path::{Path, PathBuf};

use freetype::face::LoadFlag;
use freetype::{Bitmap, Face, Library};
use thiserror::Error;
use tracing::info;

use crate::config::{Config, FONT_FALLBACKS};

#[derive(Debug, Error)]
pub enum FontError {
    #[error(
        "no monospace font found; install JetBrains Mono, Fira Code, \
         DejaVu Sans Mono, or Liberation Mono"
    )]
    NotFound,

    #[error("font metrics invalid: {cw}x{ch}")]
    BadMetrics { cw: i32, ch: i32 },

    #[error("freetype: {0}")]
    Freetype(#[from] freetype::Error),
}

/// A rendered glyph: an 8-bit coverage grid plus placement metrics.
pub struct RasterGlyph {
    pub bitmap: Bitmap,
    /// Horizontal bearing in pixels; may be negative.
    pub left: i32,
    /// Distance from baseline to the bitmap's top row, in pixels.
    pub top: i32,
    pub advance_px: i32,
}

pub struct FontRaster {
    // Keeps the FreeType library alive for as long as the face.
    _library: Library,
    face: Face,
    cell_w: i32,
    cell_h: i32,
    ascender: i32,
}

impl FontRaster {
    /// Load the configured font, or the first readable fallback, at the
    /// configured pixel size.
    pub fn load(cfg: &Config) -> Result<Self, FontError> {
        let library = Library::init()?;
        let path = pick_font_path(cfg).ok_or(FontError::NotFound)?;
        let face = library.new_face(&path, 0)?;
        face.set_pixel_sizes(0, cfg.font_size)?;

        face.load_char('M' as usize, LoadFlag::DEFAULT)?;
        let cell_w = (face.glyph().advance().x >> 6) as i32;
        let metrics = face
            .size_metrics()
            .ok_or(FontError::BadMetrics { cw: cell_w, ch: 0 })?;
        let cell_h = (metrics.height >> 6) as i32;
        let ascender = (metrics.ascender >> 6) as i32;
        if cell_w <= 0 || cell_h <= 0 {
            return Err(FontError::BadMetrics {
                cw: cell_w,
                ch: cell_h,
            });
        }

        info!(
            "font: {} @ {}px cell {}x{} (asc={})",
            path.display(),
            cfg.font_size,
            cell_w,
            cell_h,
            ascender
        );
        Ok(Self {
            _library: library,
            face,
            cell_w,
            cell_h,
            ascender,
        })
    }

    /// Advance width of one cell in pixels.
    pub fn cell_w(&self) -> i32 {
        self.cell_w
    }

    /// Line height in pixels.
    pub fn cell_h(&self) -> i32 {
        self.cell_h
    }

    /// Baseline offset from the cell top in pixels.
    pub fn ascender(&self) -> i32 {
        self.ascender
    }

    /// Render the coverage bitmap for one codepoint.
    pub fn raster(&self, ch: char) -> Result<RasterGlyph, FontError> {
        self.face.load_char(ch as usize, LoadFlag::RENDER)?;
        let glyph = self.face.glyph();
        Ok(RasterGlyph {
            bitmap: glyph.bitmap(),
            left: glyph.bitmap_left(),
            top: glyph.bitmap_top(),
            advance_px: (glyph.advance().x >> 6) as i32,
        })
    }
}

fn pick_font_path(cfg: &Config) -> Option<PathBuf> {
    if let Some(configured) = &cfg.font {
        if configured.exists() {
            return Some(configured.clone());
        }
    }
    FONT_FALLBACKS
        .iter()
        .map(Path::new)
        .find(|p| p.exists())
        .map(Path::to_path_buf)
}
