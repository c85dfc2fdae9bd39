//! Read-side view shared by plain and composite tiles.

use std::sync::Arc;

use super::event::{ListenerId, TileListener};
use super::grid::TileCoord;
use super::state::{Priority, Tile, TileImage};
use crate::error::TileError;

/// What a renderer needs from a tile, whether fetched or composited.
pub trait MapTile: Send + Sync {
    fn coord(&self) -> TileCoord;

    fn locator(&self) -> &str;

    fn is_loaded(&self) -> bool;

    fn is_loading(&self) -> bool;

    /// The image to draw, if one is available right now.
    fn image(&self) -> Option<TileImage>;

    fn priority(&self) -> Priority;

    fn set_priority(&self, priority: Priority);

    fn error(&self) -> Option<TileError>;

    fn set_error(&self, error: Option<TileError>);

    fn subscribe(&self, listener: TileListener) -> ListenerId;

    fn unsubscribe(&self, id: ListenerId) -> bool;
}

impl MapTile for Tile {
    fn coord(&self) -> TileCoord {
        Tile::coord(self)
    }

    fn locator(&self) -> &str {
        Tile::locator(self)
    }

    fn is_loaded(&self) -> bool {
        Tile::is_loaded(self)
    }

    fn is_loading(&self) -> bool {
        Tile::is_loading(self)
    }

    fn image(&self) -> Option<TileImage> {
        Tile::image(self)
    }

    fn priority(&self) -> Priority {
        Tile::priority(self)
    }

    fn set_priority(&self, priority: Priority) {
        Tile::set_priority(self, priority)
    }

    fn error(&self) -> Option<TileError> {
        Tile::error(self)
    }

    fn set_error(&self, error: Option<TileError>) {
        Tile::set_error(self, error)
    }

    fn subscribe(&self, listener: TileListener) -> ListenerId {
        Tile::subscribe(self, listener)
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        Tile::unsubscribe(self, id)
    }
}

/// Upcast a plain tile for APIs that accept any [`MapTile`].
pub fn as_map_tile(tile: Arc<Tile>) -> Arc<dyn MapTile> {
    tile
}
