//! Tile identity and load state.
//!
//! # Ownership contract
//!
//! A tile is owned by the factory that created it. The `loading` flag is the
//! only concurrency contract for mutating a tile's load state: a worker must
//! win [`Tile::try_begin_loading`] before it touches the tile, and only that
//! worker may record errors or complete the tile until it releases the flag.
//! Priority is the one field changed outside that contract, by promotion,
//! and only under the owning factory's lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use image::RgbaImage;
use parking_lot::Mutex;

use super::event::{ListenerId, Listeners, TileEvent, TileListener};
use super::grid::TileCoord;
use crate::error::TileError;

/// A decoded, ready-to-render tile bitmap.
pub type TileImage = Arc<RgbaImage>;

/// Load priority. `High` tiles are always dequeued before `Low` tiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Priority {
    #[default]
    High,
    Low,
}

/// Something that can (re)schedule a tile for loading.
///
/// Implemented by the factory that owns the tile; tiles keep only a weak
/// reference back to it.
pub trait TileScheduler: Send + Sync {
    fn start_loading(&self, tile: &Arc<Tile>);
}

/// A map tile addressed by `(x, y, zoom)`.
pub struct Tile {
    coord: TileCoord,
    locator: Arc<str>,
    loading: AtomicBool,
    loaded: AtomicBool,
    reclaimed: AtomicBool,
    priority: Mutex<Priority>,
    error: Mutex<Option<TileError>>,
    image: Mutex<Option<TileImage>>,
    listeners: Listeners,
    scheduler: Option<Weak<dyn TileScheduler>>,
    self_ref: Weak<Tile>,
}

impl Tile {
    pub(crate) fn new(
        coord: TileCoord,
        locator: Arc<str>,
        priority: Priority,
        scheduler: Option<Weak<dyn TileScheduler>>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| Self {
            coord,
            locator,
            loading: AtomicBool::new(false),
            loaded: AtomicBool::new(false),
            reclaimed: AtomicBool::new(false),
            priority: Mutex::new(priority),
            error: Mutex::new(None),
            image: Mutex::new(None),
            listeners: Listeners::default(),
            scheduler,
            self_ref: self_ref.clone(),
        })
    }

    /// A blank tile for coordinates outside the grid.
    ///
    /// Placeholders have an empty locator, are permanently loaded, carry no
    /// image, and are never enqueued.
    pub fn placeholder(coord: TileCoord) -> Arc<Self> {
        let tile = Self::new(coord, Arc::from(""), Priority::High, None);
        tile.loaded.store(true, Ordering::Release);
        tile
    }

    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    pub fn x(&self) -> i32 {
        self.coord.x
    }

    pub fn y(&self) -> i32 {
        self.coord.y
    }

    pub fn zoom(&self) -> u32 {
        self.coord.zoom
    }

    /// Resource locator; empty for placeholders.
    pub fn locator(&self) -> &str {
        &self.locator
    }

    pub(crate) fn locator_arc(&self) -> Arc<str> {
        self.locator.clone()
    }

    pub fn is_placeholder(&self) -> bool {
        self.locator.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    pub fn priority(&self) -> Priority {
        *self.priority.lock()
    }

    pub fn set_priority(&self, priority: Priority) {
        *self.priority.lock() = priority;
    }

    /// The most recent load error, if any.
    pub fn error(&self) -> Option<TileError> {
        self.error.lock().clone()
    }

    pub fn set_error(&self, error: Option<TileError>) {
        *self.error.lock() = error;
    }

    /// The decoded image, if loaded.
    ///
    /// If the image was reclaimed under memory pressure, the first call
    /// afterwards asks the owning factory to load the tile again.
    pub fn image(&self) -> Option<TileImage> {
        let image = self.image.lock().clone();
        if image.is_none() && self.reclaimed.swap(false, Ordering::AcqRel) {
            self.reschedule();
        }
        image
    }

    /// Drop the decoded image of a loaded tile.
    ///
    /// Returns `true` if an image was released. The tile reverts to not
    /// loaded and is reloaded the next time its image is requested.
    pub fn reclaim_image(&self) -> bool {
        if self.is_placeholder() {
            return false;
        }
        // Flags change under the image lock, same as in `complete`
        let mut image = self.image.lock();
        if self.is_loading() || !self.is_loaded() || image.take().is_none() {
            return false;
        }
        self.loaded.store(false, Ordering::Release);
        self.reclaimed.store(true, Ordering::Release);
        drop(image);
        true
    }

    /// Subscribe to this tile's notifications.
    pub fn subscribe(&self, listener: TileListener) -> ListenerId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    // -------------------------------------------------------------------------
    // Worker-side transitions
    // -------------------------------------------------------------------------

    /// Claim the single-owner token. Fails if the tile is loaded or another
    /// worker already owns it.
    pub(crate) fn try_begin_loading(&self) -> bool {
        if self.is_loaded() || self.is_placeholder() {
            return false;
        }
        self.loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn finish_loading(&self) {
        self.loading.store(false, Ordering::Release);
    }

    /// Store the image and move to `Loaded`. `loading` is cleared first so the
    /// two flags are never both set.
    pub(crate) fn complete(&self, image: TileImage) {
        let mut slot = self.image.lock();
        *slot = Some(image);
        self.reclaimed.store(false, Ordering::Release);
        self.loading.store(false, Ordering::Release);
        self.loaded.store(true, Ordering::Release);
    }

    pub(crate) fn notify(&self, event: &TileEvent) {
        self.listeners.notify(event);
    }

    fn reschedule(&self) {
        let scheduler = self.scheduler.as_ref().and_then(Weak::upgrade);
        if let (Some(scheduler), Some(tile)) = (scheduler, self.self_ref.upgrade()) {
            scheduler.start_loading(&tile);
        }
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("coord", &self.coord)
            .field("locator", &self.locator)
            .field("loading", &self.is_loading())
            .field("loaded", &self.is_loaded())
            .field("priority", &self.priority())
            .field("error", &self.error())
            .finish()
    }
}
