//! Tile image decoding and encoding.
//!
//! Raw tile bytes are decoded to RGBA bitmaps with the `image` crate. The
//! format is sniffed from the payload, so PNG and JPEG providers work with
//! the same decoder.
//!
//! Decoding runs under an allocation limit. Exceeding it is reported as
//! [`TileError::OutOfMemory`], which callers treat as memory pressure rather
//! than a broken tile.

use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use image::error::LimitErrorKind;
use image::{ImageError, ImageFormat, ImageReader, Limits, RgbaImage};

use crate::error::TileError;
use crate::tile::TileImage;

/// Default ceiling on what a single decode may allocate (512 MiB).
pub const DEFAULT_MAX_DECODE_ALLOC: u64 = 512 * 1024 * 1024;

// =============================================================================
// TileDecoder Trait
// =============================================================================

/// Turns fetched bytes into a bitmap.
pub trait TileDecoder: Send + Sync {
    /// Decode `bytes` fetched from `locator`.
    ///
    /// Returns [`TileError::OutOfMemory`] when decoding needs more memory than
    /// is available, and [`TileError::Decode`] for anything else.
    fn decode(&self, locator: &str, bytes: &[u8]) -> Result<TileImage, TileError>;
}

// =============================================================================
// ImageDecoder
// =============================================================================

/// [`TileDecoder`] backed by the `image` crate.
#[derive(Debug, Clone)]
pub struct ImageDecoder {
    max_alloc: u64,
}

impl ImageDecoder {
    pub fn new() -> Self {
        Self::with_max_alloc(DEFAULT_MAX_DECODE_ALLOC)
    }

    /// Create a decoder that refuses to allocate more than `max_alloc` bytes
    /// per image.
    pub fn with_max_alloc(max_alloc: u64) -> Self {
        Self { max_alloc }
    }

    pub fn max_alloc(&self) -> u64 {
        self.max_alloc
    }
}

impl Default for ImageDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl TileDecoder for ImageDecoder {
    fn decode(&self, locator: &str, bytes: &[u8]) -> Result<TileImage, TileError> {
        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| TileError::Decode {
                locator: locator.to_string(),
                message: e.to_string(),
            })?;

        let mut limits = Limits::default();
        limits.max_alloc = Some(self.max_alloc);
        reader.limits(limits);

        let image = reader
            .decode()
            .map_err(|e| classify_decode_error(locator, e))?;

        Ok(Arc::new(image.into_rgba8()))
    }
}

fn classify_decode_error(locator: &str, error: ImageError) -> TileError {
    match &error {
        ImageError::Limits(limit) if matches!(limit.kind(), LimitErrorKind::InsufficientMemory) => {
            TileError::OutOfMemory {
                locator: locator.to_string(),
            }
        }
        _ => TileError::Decode {
            locator: locator.to_string(),
            message: error.to_string(),
        },
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode a bitmap as PNG.
pub fn encode_png(image: &RgbaImage) -> Result<Bytes, TileError> {
    let mut output = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
        .map_err(|e| TileError::Render {
            message: format!("PNG encoding failed: {e}"),
        })?;
    Ok(Bytes::from(output))
}
