//! Load strategies plugged into a [`TileFactory`](super::TileFactory).
//!
//! The factory owns the retry budget, priority handling and notifications.
//! A [`TileLoader`] performs exactly one attempt per call:
//!
//! - `Ok(Some(image))`: the tile loaded
//! - `Ok(None)`: a soft failure the loader already reported to the error
//!   handler and recorded on the tile (bytes that did not decode)
//! - `Err(error)`: any other failure; `TileError::OutOfMemory` is treated as
//!   memory pressure and does not consume the retry budget

use std::sync::Arc;

use async_trait::async_trait;
use image::{Rgba, RgbaImage};

use super::handler::TileErrorHandler;
use crate::cache::ImageCache;
use crate::error::TileError;
use crate::io::{ImageDecoder, TileDecoder, TileSource};
use crate::tile::{Tile, TileCoord, TileImage};

/// Per-attempt collaborators handed to a loader by its factory.
#[derive(Clone)]
pub struct LoadContext {
    pub cache: Arc<ImageCache>,
    pub error_handler: Arc<dyn TileErrorHandler>,
    pub tile_size: u32,
}

/// One load attempt for one tile.
#[async_trait]
pub trait TileLoader: Send + Sync {
    async fn load(&self, tile: &Tile, ctx: &LoadContext) -> Result<Option<TileImage>, TileError>;

    /// Image to complete the tile with once every attempt failed.
    ///
    /// `None` (the default) leaves the tile unloaded and announces an
    /// unrecoverable error instead.
    fn fallback_image(&self, _tile: &Tile, _ctx: &LoadContext) -> Option<TileImage> {
        None
    }
}

async fn blocking<T, F>(work: F) -> Result<T, TileError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| TileError::Worker {
            message: e.to_string(),
        })
}

// =============================================================================
// FetchLoader
// =============================================================================

/// Loads tiles from the image cache, falling back to fetch and decode.
pub struct FetchLoader<S> {
    source: S,
    decoder: Arc<dyn TileDecoder>,
}

impl<S: TileSource> FetchLoader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            decoder: Arc::new(ImageDecoder::new()),
        }
    }

    pub fn with_decoder(mut self, decoder: Arc<dyn TileDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

#[async_trait]
impl<S: TileSource> TileLoader for FetchLoader<S> {
    async fn load(&self, tile: &Tile, ctx: &LoadContext) -> Result<Option<TileImage>, TileError> {
        let locator: Arc<str> = Arc::from(tile.locator());

        let cached = {
            let cache = ctx.cache.clone();
            let locator = locator.clone();
            blocking(move || cache.get(&locator)).await??
        };
        if cached.is_some() {
            return Ok(cached);
        }

        let data = self.source.fetch(&locator).await?;

        let decoded = {
            let decoder = self.decoder.clone();
            let locator = locator.clone();
            let data = data.clone();
            blocking(move || decoder.decode(&locator, &data)).await?
        };

        match decoded {
            Ok(image) => {
                ctx.cache.put(&locator, data, image.clone());
                // Hand out the cached instance so every holder shares it
                Ok(Some(ctx.cache.get_decoded(&locator).unwrap_or(image)))
            }
            Err(e) if e.is_memory_pressure() => Err(e),
            Err(e) => {
                ctx.error_handler.decode_failed(tile, &data);
                tile.set_error(Some(e));
                Ok(None)
            }
        }
    }
}

// =============================================================================
// RenderLoader
// =============================================================================

/// Paints a tile locally instead of fetching it.
pub trait TileRenderer: Send + Sync {
    fn render(&self, coord: TileCoord, tile_size: u32) -> Result<RgbaImage, TileError>;
}

impl<F> TileRenderer for F
where
    F: Fn(TileCoord, u32) -> Result<RgbaImage, TileError> + Send + Sync,
{
    fn render(&self, coord: TileCoord, tile_size: u32) -> Result<RgbaImage, TileError> {
        self(coord, tile_size)
    }
}

/// Loads tiles from a [`TileRenderer`].
///
/// The image cache is bypassed: rendered layers are usually composited, and
/// the composite is what gets cached. A tile whose every attempt fails is
/// completed with [`error_image`].
pub struct RenderLoader<R> {
    renderer: Arc<R>,
}

impl<R: TileRenderer + 'static> RenderLoader<R> {
    pub fn new(renderer: R) -> Self {
        Self {
            renderer: Arc::new(renderer),
        }
    }
}

#[async_trait]
impl<R: TileRenderer + 'static> TileLoader for RenderLoader<R> {
    async fn load(&self, tile: &Tile, ctx: &LoadContext) -> Result<Option<TileImage>, TileError> {
        let renderer = self.renderer.clone();
        let coord = tile.coord();
        let tile_size = ctx.tile_size;
        let image = blocking(move || renderer.render(coord, tile_size)).await??;
        Ok(Some(Arc::new(image)))
    }

    fn fallback_image(&self, _tile: &Tile, ctx: &LoadContext) -> Option<TileImage> {
        Some(Arc::new(error_image(ctx.tile_size)))
    }
}

/// Transparent square with a red border and a red cross corner to corner.
pub fn error_image(size: u32) -> RgbaImage {
    let red = Rgba([255, 0, 0, 255]);
    let mut image = RgbaImage::new(size, size);
    if size == 0 {
        return image;
    }
    let last = size - 1;
    for i in 0..size {
        image.put_pixel(i, 0, red);
        image.put_pixel(i, last, red);
        image.put_pixel(0, i, red);
        image.put_pixel(last, i, red);
        image.put_pixel(i, i, red);
        image.put_pixel(i, last - i, red);
    }
    image
}
