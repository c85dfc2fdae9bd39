//! Compositing layer: one base tile plus overlay tiles merged into a single
//! image.
//!
//! ```text
//!                       ┌─► base TileFactory ───► Tile (High) ──┐
//! CompoundTileFactory ──┤                                      ├──► CompoundTile
//!   (LRU of composites) └─► layer TileFactory ─► Tile (Low) ───┘     image() composites
//! ```
//!
//! A [`CompoundTile`] listens to every tile it is built from. When one of
//! them loads or gives up, the composite marks itself dirty and tells its own
//! listeners, and the next [`CompoundTile::image`] call recomposites.

mod composite;
mod factory;
mod overlay;

pub use composite::{CompoundTile, MISSING_BASE_COLOR};
pub use factory::CompoundTileFactory;
pub use overlay::{format_percent, LOADING_VEIL, TEXT_COLOR};
