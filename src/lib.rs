//! # mapview-tiles
//!
//! Fetch, decode, prioritize, cache and composite map image tiles addressed
//! by `(x, y, zoom)`.
//!
//! A renderer asks a [`TileFactory`] for the tiles of its viewport. Cached
//! tiles come back ready to draw; missing ones come back immediately as
//! unloaded tiles that a bounded worker pool fetches in the background,
//! visible tiles first. Listeners hear about every completion and failure on
//! a single dispatch context, so the renderer knows when to repaint.
//!
//! ## Features
//!
//! - **Non-blocking requests**: `get_tile` only enqueues; I/O happens on workers
//! - **Priorities**: `High` tiles are always loaded before `Low` ones, and a
//!   queued tile can be promoted when it scrolls into view
//! - **Two-tier cache**: decoded images and fetched bytes, each bounded in
//!   bytes and evicted least recently used first
//! - **Retries**: three attempts per tile; memory pressure clears the decoded
//!   tier instead of failing
//! - **Compositing**: overlay layers merged onto a base layer, recomposited
//!   lazily as their tiles arrive
//!
//! ## Architecture
//!
//! - [`tile`] - Tile state, grid geometry, locators, priority queue and events
//! - [`cache`] - Two-tier image cache and the generic LRU cache
//! - [`io`] - Byte sources (HTTP, files) and the image decoder
//! - [`factory`] - Tile factories, worker pool and load strategies
//! - [`compound`] - Composite tiles and their factory
//! - [`config`] - CLI configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use mapview_tiles::{factory::presets, EventDispatcher, TileEvent};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let dispatcher = EventDispatcher::spawn();
//!     let factory = presets::openstreetmap(dispatcher).expect("HTTP client");
//!
//!     let tile = factory.get_tile(4, 5, 4);
//!     tile.subscribe(Arc::new(|event: &TileEvent| {
//!         println!("{} {}", event.coord, event.name());
//!     }));
//! }
//! ```

pub mod cache;
pub mod compound;
pub mod config;
pub mod error;
pub mod factory;
pub mod io;
pub mod tile;

// Re-export commonly used types
pub use cache::{
    decoded_size, Cache, CacheStats, ImageCache, LeastRecentlyUsedCache, TierStats,
    DEFAULT_COMPRESSED_CEILING, DEFAULT_DECODED_CEILING, DEFAULT_LRU_CAPACITY,
};
pub use compound::{CompoundTile, CompoundTileFactory};
pub use config::{Cli, Command, CompositeConfig, FetchConfig};
pub use error::{FetchError, PoolError, TemplateError, TileError};
pub use factory::{
    error_image, FetchLoader, LoadContext, LoggingErrorHandler, PoolConfig, RenderLoader,
    TileErrorHandler, TileFactory, TileFactoryBuilder, TileLoader, TileRenderer, WorkerPool,
    MAX_LOAD_ATTEMPTS,
};
pub use io::{
    encode_png, FileTileSource, HttpTileSource, ImageDecoder, TileDecoder, TileSource,
    UriTileSource,
};
pub use tile::{
    as_map_tile, DispatchLoop, EventDispatcher, GridInfo, ListenerId, LocatorTemplate, MapTile,
    Priority, Tile, TileCoord, TileEvent, TileEventKind, TileGrid, TileImage, TileListener,
    UrlTemplate,
};
