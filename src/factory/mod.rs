//! Tile factories and the machinery that loads their tiles.
//!
//! ```text
//!            ┌──────────────────────── TileFactory ─────────────────────────┐
//! get_tile ─►│ identity map ─► TileQueue ─► WorkerPool job ─► TileLoader   │
//!            │                                                   │          │
//!            │                         ImageCache ◄──────────────┤          │
//!            │                         TileErrorHandler ◄────────┘          │
//!            └─────────────────────────────┬────────────────────────────────┘
//!                                          ▼
//!                                   EventDispatcher ─► tile listeners
//! ```
//!
//! - [`TileFactory`]: hands out tiles and drives the retry loop
//! - [`WorkerPool`]: elastic tokio task pool, shareable between factories
//! - [`TileLoader`]: one load attempt; [`FetchLoader`] fetches and decodes,
//!   [`RenderLoader`] paints locally
//! - [`TileErrorHandler`]: told about every failed attempt
//! - [`presets`]: factories for public tile providers

mod handler;
mod loader;
mod pool;
pub mod presets;
mod tile_factory;

pub use handler::{LoggingErrorHandler, TileErrorHandler};
pub use loader::{
    error_image, FetchLoader, LoadContext, RenderLoader, TileLoader, TileRenderer,
};
pub use pool::{
    Job, PoolConfig, RejectionHandler, WorkerPool, DEFAULT_IDLE_TIMEOUT, DEFAULT_MIN_WORKERS,
    DEFAULT_QUEUE_CAPACITY,
};
pub use tile_factory::{TileFactory, TileFactoryBuilder, MAX_LOAD_ATTEMPTS, MAX_MEMORY_RELIEFS};
