//! Factory producing [`CompoundTile`]s from a base factory and layer factories.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::composite::CompoundTile;
use crate::cache::{Cache, LeastRecentlyUsedCache, DEFAULT_LRU_CAPACITY};
use crate::error::TileError;
use crate::factory::TileFactory;
use crate::tile::{MapTile, Tile, TileCoord, TileImage};

/// Cache key of a composite. `layers` fingerprints the ordered layer set, so
/// changing the layers makes earlier composites unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CompoundTileKey {
    x: i32,
    y: i32,
    zoom: u32,
    layers: u64,
}

impl CompoundTileKey {
    fn new(x: i32, y: i32, zoom: u32, layers: &[Arc<TileFactory>]) -> Self {
        let mut hasher = DefaultHasher::new();
        for factory in layers {
            factory.id().hash(&mut hasher);
        }
        Self {
            x,
            y,
            zoom,
            layers: hasher.finish(),
        }
    }
}

/// What the composite cache holds for a key.
#[derive(Clone)]
enum CachedTile {
    Composite(Arc<CompoundTile>),
    Placeholder(Arc<Tile>),
}

impl CachedTile {
    /// A composite holding a tile its factory dropped in a cache reset.
    /// Such a tile never loads, so the composite has to be rebuilt.
    fn is_orphaned(&self) -> bool {
        let CachedTile::Composite(composite) = self else {
            return false;
        };
        std::iter::once(composite.base())
            .chain(composite.layers())
            .any(|tile| matches!(tile.error(), Some(TileError::CacheReset)))
    }

    fn into_map_tile(self) -> Arc<dyn MapTile> {
        match self {
            CachedTile::Composite(tile) => tile,
            CachedTile::Placeholder(tile) => tile,
        }
    }
}

/// Layers tiles of several factories on top of a base factory's tiles.
///
/// Geometry comes from the base factory. Base tiles are requested at `High`
/// priority and layer tiles at `Low`, so overlays never hold up the map
/// itself.
pub struct CompoundTileFactory {
    base: Arc<TileFactory>,
    layers: RwLock<Vec<Arc<TileFactory>>>,
    cache: Mutex<LeastRecentlyUsedCache<CompoundTileKey, CachedTile>>,
    loading_image: RwLock<Option<TileImage>>,
    show_percent: AtomicBool,
}

impl CompoundTileFactory {
    pub fn new(base: Arc<TileFactory>) -> Self {
        Self::with_capacity(base, DEFAULT_LRU_CAPACITY)
    }

    /// Keep at most `capacity` composites alive.
    pub fn with_capacity(base: Arc<TileFactory>, capacity: usize) -> Self {
        Self {
            base,
            layers: RwLock::new(Vec::new()),
            cache: Mutex::new(LeastRecentlyUsedCache::new(capacity)),
            loading_image: RwLock::new(None),
            show_percent: AtomicBool::new(false),
        }
    }

    pub fn base(&self) -> &Arc<TileFactory> {
        &self.base
    }

    /// Composite at `(x, y, zoom)`, or a blank placeholder outside the grid.
    ///
    /// The lookup and construction happen under one lock, so each key gets a
    /// single composite.
    pub fn get_tile(&self, x: i32, y: i32, zoom: u32) -> Arc<dyn MapTile> {
        self.lookup(x, y, zoom).into_map_tile()
    }

    /// Like [`get_tile`](Self::get_tile), but typed; `None` outside the grid.
    pub fn get_compound_tile(&self, x: i32, y: i32, zoom: u32) -> Option<Arc<CompoundTile>> {
        match self.lookup(x, y, zoom) {
            CachedTile::Composite(tile) => Some(tile),
            CachedTile::Placeholder(_) => None,
        }
    }

    fn lookup(&self, x: i32, y: i32, zoom: u32) -> CachedTile {
        let grid = self.base.grid();
        let x = grid.wrap_x(x, zoom);
        let layers = self.layers.read().clone();
        let key = CompoundTileKey::new(x, y, zoom, &layers);

        let mut cache = self.cache.lock();
        if let Some(tile) = cache.get(&key) {
            if !tile.is_orphaned() {
                return tile;
            }
            debug!(x, y, zoom, "Rebuilding composite after a cache reset");
        }

        let tile = if grid.is_valid_tile(x, y, zoom) {
            let base = self.base.get_tile(x, y, zoom);
            let layer_tiles = layers
                .iter()
                .map(|factory| factory.get_tile_lazy(x, y, zoom))
                .collect();
            CachedTile::Composite(CompoundTile::new(
                grid.tile_size(zoom),
                base,
                layer_tiles,
                self.loading_image(),
                self.show_loading_percent(),
            ))
        } else {
            CachedTile::Placeholder(Tile::placeholder(TileCoord::new(x, y, zoom)))
        };

        cache.put(key, tile.clone());
        tile
    }

    /// Replace the layer factories, drawn in the given order.
    pub fn set_layer_factories(&self, factories: Vec<Arc<TileFactory>>) {
        debug!(layers = factories.len(), "Compound layers changed");
        *self.layers.write() = factories;
    }

    pub fn layer_factories(&self) -> Vec<Arc<TileFactory>> {
        self.layers.read().clone()
    }

    /// Forget every cached composite.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }

    /// Number of composites currently cached.
    pub fn cached_tiles(&self) -> usize {
        self.cache.lock().len()
    }

    /// Image drawn over composites still missing tiles. Applies to
    /// composites created afterwards.
    pub fn set_loading_image(&self, image: Option<TileImage>) {
        *self.loading_image.write() = image;
    }

    pub fn loading_image(&self) -> Option<TileImage> {
        self.loading_image.read().clone()
    }

    /// Draw the share of painted tiles over incomplete composites. Applies
    /// to composites created afterwards.
    pub fn set_show_loading_percent(&self, show: bool) {
        self.show_percent.store(show, Ordering::Relaxed);
    }

    pub fn show_loading_percent(&self) -> bool {
        self.show_percent.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for CompoundTileFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompoundTileFactory")
            .field("base", &self.base.id())
            .field("layers", &self.layers.read().len())
            .field("cached", &self.cached_tiles())
            .finish()
    }
}
