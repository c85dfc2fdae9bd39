//! Caches used by the tile pipeline.
//!
//! - [`ImageCache`]: two-tier, size-bounded cache of decoded images and
//!   fetched bytes, shared by a factory's workers
//! - [`LeastRecentlyUsedCache`]: entry-count-bounded [`Cache`] used to keep
//!   composite tiles alive

mod image_cache;
mod lru_cache;

pub use image_cache::{
    decoded_size, CacheStats, ImageCache, TierStats, DEFAULT_COMPRESSED_CEILING,
    DEFAULT_DECODED_CEILING,
};
pub use lru_cache::{Cache, LeastRecentlyUsedCache, DEFAULT_LRU_CAPACITY};
