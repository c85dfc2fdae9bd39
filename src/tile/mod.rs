//! Tile model.
//!
//! Everything a tile factory hands out, and everything a renderer observes,
//! is defined here:
//!
//! ```text
//!   (x, y, zoom) ──► TileGrid ──► LocatorTemplate ──► locator
//!                                                       │
//!                                                       ▼
//!                       TileQueue ◄── Tile ──► listeners (via EventDispatcher)
//! ```
//!
//! # Components
//!
//! - [`TileGrid`] / [`GridInfo`]: horizontal extent, tile size and validity per zoom
//! - [`LocatorTemplate`] / [`UrlTemplate`]: coordinates to resource locator
//! - [`Tile`]: load state, image, error and listeners of one tile
//! - [`TileQueue`]: two-level priority queue of pending tiles
//! - [`EventDispatcher`]: the single context notifications are delivered on
//! - [`MapTile`]: read-side view implemented by plain and composite tiles

mod event;
mod grid;
mod locator;
mod queue;
mod state;
mod view;

pub use event::{
    DispatchLoop, EventDispatcher, ListenerId, TileEvent, TileEventKind, TileListener, LOADED,
    LOADING_ERROR, UNRECOVERABLE_ERROR,
};
pub(crate) use event::Listeners;
pub use grid::{GridInfo, TileCoord, TileGrid, DEFAULT_TILE_SIZE, MAX_SUPPORTED_ZOOM};
pub use locator::{LocatorTemplate, UrlTemplate};
pub use queue::TileQueue;
pub use state::{Priority, Tile, TileImage, TileScheduler};
pub use view::{as_map_tile, MapTile};
