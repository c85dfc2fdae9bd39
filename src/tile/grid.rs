//! Tile grid geometry.
//!
//! The pipeline only needs three pure functions of zoom and coordinates:
//! how many tiles span the world horizontally, how large a tile is, and
//! whether a coordinate addresses a real tile. Projection math and map sizing
//! live outside this crate; [`TileGrid`] is the seam.

use std::fmt;

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

/// Deepest zoom level a [`GridInfo`] accepts (2^30 tiles per axis).
pub const MAX_SUPPORTED_ZOOM: u32 = 30;

// =============================================================================
// Tile Coordinates
// =============================================================================

/// Integer tile address.
///
/// `x` and `y` are signed because callers may ask for tiles left of the
/// antimeridian or above the map; the factory wraps `x` and rejects bad `y`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    pub x: i32,
    pub y: i32,
    pub zoom: u32,
}

impl TileCoord {
    pub fn new(x: i32, y: i32, zoom: u32) -> Self {
        Self { x, y, zoom }
    }
}

impl fmt::Display for TileCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

// =============================================================================
// TileGrid Trait
// =============================================================================

/// Grid geometry consumed by tile factories.
pub trait TileGrid: Send + Sync {
    /// Number of tiles spanning the world horizontally at `zoom`.
    fn tiles_wide(&self, zoom: u32) -> u32;

    /// Number of tiles spanning the world vertically at `zoom`.
    fn tiles_high(&self, zoom: u32) -> u32 {
        self.tiles_wide(zoom)
    }

    /// Edge length of a tile at `zoom`, in pixels.
    fn tile_size(&self, zoom: u32) -> u32;

    /// Whether `(x, y, zoom)` addresses a tile inside the grid.
    fn is_valid_tile(&self, x: i32, y: i32, zoom: u32) -> bool;

    /// Wrap `x` horizontally into `[0, tiles_wide(zoom))`.
    fn wrap_x(&self, x: i32, zoom: u32) -> i32 {
        let wide = i64::from(self.tiles_wide(zoom).max(1));
        i64::from(x).rem_euclid(wide) as i32
    }
}

// =============================================================================
// GridInfo
// =============================================================================

/// Slippy-map grid: `2^zoom` tiles per axis, square tiles of fixed size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridInfo {
    min_zoom: u32,
    max_zoom: u32,
    tile_size: u32,
}

impl GridInfo {
    /// Create a grid covering `min_zoom..=max_zoom`.
    ///
    /// Zoom levels are clamped to [`MAX_SUPPORTED_ZOOM`] and swapped if given
    /// in reverse order.
    pub fn new(min_zoom: u32, max_zoom: u32, tile_size: u32) -> Self {
        let (lo, hi) = if min_zoom <= max_zoom {
            (min_zoom, max_zoom)
        } else {
            (max_zoom, min_zoom)
        };
        Self {
            min_zoom: lo.min(MAX_SUPPORTED_ZOOM),
            max_zoom: hi.min(MAX_SUPPORTED_ZOOM),
            tile_size: tile_size.max(1),
        }
    }

    pub fn min_zoom(&self) -> u32 {
        self.min_zoom
    }

    pub fn max_zoom(&self) -> u32 {
        self.max_zoom
    }
}

impl Default for GridInfo {
    fn default() -> Self {
        Self::new(0, 19, DEFAULT_TILE_SIZE)
    }
}

impl TileGrid for GridInfo {
    fn tiles_wide(&self, zoom: u32) -> u32 {
        1u32 << zoom.min(MAX_SUPPORTED_ZOOM)
    }

    fn tile_size(&self, _zoom: u32) -> u32 {
        self.tile_size
    }

    fn is_valid_tile(&self, x: i32, y: i32, zoom: u32) -> bool {
        if zoom < self.min_zoom || zoom > self.max_zoom {
            return false;
        }
        if x < 0 || y < 0 {
            return false;
        }
        (x as u32) < self.tiles_wide(zoom) && (y as u32) < self.tiles_high(zoom)
    }
}
