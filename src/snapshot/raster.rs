//! Raster buffer — the local freehand drawing surface.
//!
//! DESIGN
//! ======
//! Pixels are straight RGBA8, row-major, origin top-left. Strokes are
//! rasterized as capsules (round joins and caps) by testing each pixel
//! center against the segment distance. Snapshots travel as PNG data URLs,
//! the same shape a browser canvas produces from `toDataURL("image/png")`.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::presence::Position;

pub const PNG_DATA_URL_PREFIX: &str = "data:image/png;base64,";

#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("png encode failed: {0}")]
    Encode(#[from] png::EncodingError),
    #[error("png decode failed: {0}")]
    Decode(#[from] png::DecodingError),
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unsupported image data: {0}")]
    Unsupported(String),
}

impl crate::frame::ErrorCode for RasterError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Encode(_) => "E_RASTER_ENCODE",
            Self::Decode(_) | Self::Base64(_) | Self::Unsupported(_) => "E_RASTER_DECODE",
        }
    }
}

/// Encoded raster payload as stored and broadcast. Opaque to the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImageData(String);

impl ImageData {
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

// =============================================================================
// PEN
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba(pub [u8; 4]);

impl Rgba {
    pub const TRANSPARENT: Self = Self([0, 0, 0, 0]);
    pub const BLACK: Self = Self([0, 0, 0, 255]);

    /// Parse `#rrggbb` or `#rrggbbaa`.
    #[must_use]
    pub fn from_hex(hex: &str) -> Option<Self> {
        let digits = hex.strip_prefix('#')?;
        if !digits.is_ascii() || !(digits.len() == 6 || digits.len() == 8) {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16).ok();
        let alpha = if digits.len() == 8 { channel(6)? } else { 255 };
        Some(Self([channel(0)?, channel(2)?, channel(4)?, alpha]))
    }
}

/// One completed freehand stroke in surface-local pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Stroke {
    pub points: Vec<Position>,
    pub color: Rgba,
    pub width: f64,
}

// =============================================================================
// BUFFER
// =============================================================================

/// Largest width or height a raster is allocated or decoded with.
pub const MAX_RASTER_DIM: u32 = 16_384;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RasterBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl RasterBuffer {
    /// A fully transparent buffer. Each dimension is clamped to
    /// [`MAX_RASTER_DIM`].
    #[must_use]
    pub fn blank(width: u32, height: u32) -> Self {
        let (width, height) = (width.min(MAX_RASTER_DIM), height.min(MAX_RASTER_DIM));
        let Some(len) = (width as usize)
            .checked_mul(height as usize)
            .and_then(|n| n.checked_mul(4))
        else {
            return Self { width: 0, height: 0, pixels: Vec::new() };
        };
        Self { width, height, pixels: vec![0; len] }
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.pixels.iter().all(|&b| b == 0)
    }

    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = self.index(x, y);
        Some(Rgba([self.pixels[i], self.pixels[i + 1], self.pixels[i + 2], self.pixels[i + 3]]))
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    fn put(&mut self, x: u32, y: u32, color: Rgba) {
        let i = self.index(x, y);
        self.pixels[i..i + 4].copy_from_slice(&color.0);
    }

    /// Paint a stroke. A single-point stroke paints a dot.
    pub fn draw_stroke(&mut self, stroke: &Stroke) {
        let radius = (stroke.width / 2.0).max(0.5);
        match stroke.points.as_slice() {
            [] => {}
            [only] => self.fill_capsule(*only, *only, radius, stroke.color),
            points => {
                for pair in points.windows(2) {
                    self.fill_capsule(pair[0], pair[1], radius, stroke.color);
                }
            }
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn fill_capsule(&mut self, a: Position, b: Position, radius: f64, color: Rgba) {
        if self.width == 0 || self.height == 0 {
            return;
        }
        let max_x = f64::from(self.width - 1);
        let max_y = f64::from(self.height - 1);
        let x0 = (a.x.min(b.x) - radius).floor().clamp(0.0, max_x) as u32;
        let x1 = (a.x.max(b.x) + radius).ceil().clamp(0.0, max_x) as u32;
        let y0 = (a.y.min(b.y) - radius).floor().clamp(0.0, max_y) as u32;
        let y1 = (a.y.max(b.y) + radius).ceil().clamp(0.0, max_y) as u32;

        let (dx, dy) = (b.x - a.x, b.y - a.y);
        let len_sq = dx * dx + dy * dy;
        let r_sq = radius * radius;

        for py in y0..=y1 {
            for px in x0..=x1 {
                let cx = f64::from(px) + 0.5;
                let cy = f64::from(py) + 0.5;
                let t = if len_sq == 0.0 { 0.0 } else { (((cx - a.x) * dx + (cy - a.y) * dy) / len_sq).clamp(0.0, 1.0) };
                let (nx, ny) = (a.x + t * dx - cx, a.y + t * dy - cy);
                if nx * nx + ny * ny <= r_sq {
                    self.put(px, py, color);
                }
            }
        }
    }

    /// Clear to transparent, then copy `source` in at the origin, clipped to
    /// this buffer's dimensions.
    pub fn replace_with(&mut self, source: &RasterBuffer) {
        self.pixels.fill(0);
        let rows = self.height.min(source.height);
        let row_bytes = self.width.min(source.width) as usize * 4;
        for y in 0..rows {
            let dst = self.index(0, y);
            let src = source.index(0, y);
            self.pixels[dst..dst + row_bytes].copy_from_slice(&source.pixels[src..src + row_bytes]);
        }
    }

    // =========================================================================
    // CODEC
    // =========================================================================

    /// Encode as a PNG data URL.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::Encode`] if the PNG writer fails.
    pub fn encode(&self) -> Result<ImageData, RasterError> {
        let mut png_bytes = Vec::new();
        {
            let mut encoder = png::Encoder::new(&mut png_bytes, self.width, self.height);
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut writer = encoder.write_header()?;
            writer.write_image_data(&self.pixels)?;
            writer.finish()?;
        }
        Ok(ImageData(format!("{PNG_DATA_URL_PREFIX}{}", STANDARD.encode(&png_bytes))))
    }

    /// Decode a PNG data URL into a buffer of the image's own dimensions.
    ///
    /// # Errors
    ///
    /// Returns an error for non-PNG data URLs, bad base64, corrupt PNG, or
    /// an image larger than [`MAX_RASTER_DIM`] on either side.
    pub fn decode(image: &ImageData) -> Result<Self, RasterError> {
        let Some(encoded) = image.as_str().strip_prefix(PNG_DATA_URL_PREFIX) else {
            let head: String = image.as_str().chars().take(32).collect();
            return Err(RasterError::Unsupported(format!("expected png data url, got {head:?}")));
        };
        let png_bytes = STANDARD.decode(encoded.trim())?;

        let mut decoder = png::Decoder::new(Cursor::new(png_bytes));
        decoder.set_transformations(png::Transformations::normalize_to_color8());
        let mut reader = decoder.read_info()?;
        let (width, height) = (reader.info().width, reader.info().height);
        if width > MAX_RASTER_DIM || height > MAX_RASTER_DIM {
            return Err(RasterError::Unsupported(format!("{width}x{height} exceeds {MAX_RASTER_DIM}px")));
        }
        let mut buf = vec![0; reader.output_buffer_size()];
        let info = reader.next_frame(&mut buf)?;
        let data = &buf[..info.buffer_size()];

        let pixels = match info.color_type {
            png::ColorType::Rgba => data.to_vec(),
            png::ColorType::Rgb => data.chunks_exact(3).flat_map(|p| [p[0], p[1], p[2], 255]).collect(),
            png::ColorType::GrayscaleAlpha => data.chunks_exact(2).flat_map(|p| [p[0], p[0], p[0], p[1]]).collect(),
            png::ColorType::Grayscale => data.iter().flat_map(|&g| [g, g, g, 255]).collect(),
            png::ColorType::Indexed => {
                return Err(RasterError::Unsupported("indexed png after expansion".into()));
            }
        };

        Ok(Self { width: info.width, height: info.height, pixels })
    }
}

#[cfg(test)]
#[path = "raster_test.rs"]
mod tests;
