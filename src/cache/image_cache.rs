//! Two-tier tile image cache.
//!
//! Tiles are cached twice, keyed by locator:
//!
//! - the **decoded tier** holds ready-to-draw bitmaps, accounted at
//!   `width × height × 4` bytes each
//! - the **compressed tier** holds the fetched bytes, accounted at their length
//!
//! Each tier has its own ceiling and its own lock. Before an entry is stored,
//! least-recently-used entries are evicted until the new entry fits, so a
//! tier's running total never exceeds its ceiling once an insertion returns.
//! A ceiling of zero disables the tier.
//!
//! A decoded-tier miss that hits the compressed tier decodes the bytes again
//! and promotes the result back into the decoded tier. Under memory pressure
//! [`ImageCache::need_more_memory`] drops the decoded tier wholesale; the
//! compressed tier survives so tiles can be rebuilt without a refetch.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::error::TileError;
use crate::io::{ImageDecoder, TileDecoder};
use crate::tile::TileImage;

/// Default ceiling of the decoded tier: 50 MB.
pub const DEFAULT_DECODED_CEILING: usize = 50_000_000;

/// Default ceiling of the compressed tier: 50 MB.
pub const DEFAULT_COMPRESSED_CEILING: usize = 50_000_000;

/// Accounting size of a decoded image.
pub fn decoded_size(image: &TileImage) -> usize {
    let (width, height) = image.dimensions();
    (width as usize) * (height as usize) * 4
}

// =============================================================================
// Sized LRU tier
// =============================================================================

struct Tier<V> {
    entries: LruCache<Arc<str>, (V, usize)>,
    size: usize,
    ceiling: usize,
}

impl<V: Clone> Tier<V> {
    fn new(ceiling: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            size: 0,
            ceiling,
        }
    }

    fn get(&mut self, key: &str) -> Option<V> {
        self.entries.get(key).map(|(value, _)| value.clone())
    }

    fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    /// Store `value`, evicting until it fits. Returns `false` if the value
    /// alone exceeds the ceiling and was not stored.
    fn insert(&mut self, key: Arc<str>, value: V, size: usize) -> bool {
        if let Some((_, old_size)) = self.entries.pop(&key) {
            self.size -= old_size;
        }
        if size > self.ceiling {
            return false;
        }
        self.evict_until(self.ceiling - size);
        self.entries.put(key, (value, size));
        self.size += size;
        true
    }

    fn remove(&mut self, key: &str) {
        if let Some((_, size)) = self.entries.pop(key) {
            self.size -= size;
        }
    }

    fn evict_until(&mut self, target: usize) {
        while self.size > target {
            match self.entries.pop_lru() {
                Some((_, (_, size))) => self.size -= size,
                None => {
                    self.size = 0;
                    break;
                }
            }
        }
    }

    fn set_ceiling(&mut self, ceiling: usize) {
        self.ceiling = ceiling;
        self.evict_until(ceiling);
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.size = 0;
    }

    fn stats(&self) -> TierStats {
        TierStats {
            entries: self.entries.len(),
            size: self.size,
            ceiling: self.ceiling,
        }
    }
}

// =============================================================================
// Stats
// =============================================================================

/// Occupancy of one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TierStats {
    pub entries: usize,
    pub size: usize,
    pub ceiling: usize,
}

/// Occupancy of both tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub decoded: TierStats,
    pub compressed: TierStats,
}

// =============================================================================
// ImageCache
// =============================================================================

/// Two-tier LRU cache of tile images.
pub struct ImageCache {
    decoded: Mutex<Tier<TileImage>>,
    compressed: Mutex<Tier<Bytes>>,
    decoder: Arc<dyn TileDecoder>,
}

impl ImageCache {
    /// Create a cache with the default ceilings.
    pub fn new() -> Self {
        Self::with_ceilings(DEFAULT_DECODED_CEILING, DEFAULT_COMPRESSED_CEILING)
    }

    /// Create a cache with explicit tier ceilings, in bytes.
    pub fn with_ceilings(decoded: usize, compressed: usize) -> Self {
        Self {
            decoded: Mutex::new(Tier::new(decoded)),
            compressed: Mutex::new(Tier::new(compressed)),
            decoder: Arc::new(ImageDecoder::new()),
        }
    }

    /// A cache that retains nothing.
    pub fn disabled() -> Self {
        Self::with_ceilings(0, 0)
    }

    /// Replace the decoder used to rebuild images from the compressed tier.
    pub fn with_decoder(mut self, decoder: Arc<dyn TileDecoder>) -> Self {
        self.decoder = decoder;
        self
    }

    /// Store both the fetched bytes and the decoded image under `locator`.
    pub fn put(&self, locator: &str, raw: Bytes, image: TileImage) {
        let key: Arc<str> = Arc::from(locator);
        let raw_size = raw.len();
        self.compressed.lock().insert(key.clone(), raw, raw_size);
        let image_size = decoded_size(&image);
        self.decoded.lock().insert(key, image, image_size);
    }

    /// Look up a decoded image.
    ///
    /// Falls back to decoding the compressed tier and promoting the result.
    /// `Ok(None)` means the locator is in neither tier. Compressed bytes that
    /// no longer decode are dropped and the decode error returned.
    pub fn get(&self, locator: &str) -> Result<Option<TileImage>, TileError> {
        if let Some(image) = self.decoded.lock().get(locator) {
            return Ok(Some(image));
        }

        let Some(raw) = self.compressed.lock().get(locator) else {
            return Ok(None);
        };

        let image = match self.decoder.decode(locator, &raw) {
            Ok(image) => image,
            Err(e) => {
                if !e.is_memory_pressure() {
                    self.compressed.lock().remove(locator);
                }
                return Err(e);
            }
        };

        let size = decoded_size(&image);
        self.decoded
            .lock()
            .insert(Arc::from(locator), image.clone(), size);
        Ok(Some(image))
    }

    /// Look up the decoded tier only. Never decodes.
    pub fn get_decoded(&self, locator: &str) -> Option<TileImage> {
        self.decoded.lock().get(locator)
    }

    /// Drop the entire decoded tier, keeping compressed bytes.
    pub fn need_more_memory(&self) {
        let mut decoded = self.decoded.lock();
        debug!(
            entries = decoded.entries.len(),
            size = decoded.size,
            "Clearing decoded tile tier"
        );
        decoded.clear();
    }

    /// Empty both tiers.
    pub fn clear(&self) {
        self.decoded.lock().clear();
        self.compressed.lock().clear();
    }

    pub fn contains_decoded(&self, locator: &str) -> bool {
        self.decoded.lock().contains(locator)
    }

    pub fn contains_compressed(&self, locator: &str) -> bool {
        self.compressed.lock().contains(locator)
    }

    pub fn decoded_ceiling(&self) -> usize {
        self.decoded.lock().ceiling
    }

    pub fn compressed_ceiling(&self) -> usize {
        self.compressed.lock().ceiling
    }

    /// Change the decoded tier's ceiling, evicting immediately if it shrank.
    pub fn set_decoded_ceiling(&self, ceiling: usize) {
        self.decoded.lock().set_ceiling(ceiling);
    }

    /// Change the compressed tier's ceiling, evicting immediately if it shrank.
    pub fn set_compressed_ceiling(&self, ceiling: usize) {
        self.compressed.lock().set_ceiling(ceiling);
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            decoded: self.decoded.lock().stats(),
            compressed: self.compressed.lock().stats(),
        }
    }
}

impl Default for ImageCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ImageCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageCache")
            .field("stats", &self.stats())
            .finish()
    }
}
