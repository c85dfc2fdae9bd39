//! Tile factory: identity map, priority queue and the per-tile load loop.
//!
//! # Request path
//!
//! ```text
//! get_tile(x, y, z) ──► wrap x ──► valid? ──no──► placeholder (never queued)
//!                                    │
//!                                   yes
//!                                    ▼
//!                          known locator? ──yes──► promote if Low ──► tile
//!                                    │
//!                                    no
//!                                    ▼
//!                      register + enqueue + submit job ──► tile
//! ```
//!
//! `get_tile` never blocks on I/O and never fails; load failures are recorded
//! on the tile and announced through its listeners.
//!
//! # Load loop
//!
//! Each pool job pops the highest-priority tile and gives it up to
//! [`MAX_LOAD_ATTEMPTS`] attempts through the factory's [`TileLoader`].
//! Memory pressure does not use up an attempt: the factory relieves memory
//! and tries again, at most [`MAX_MEMORY_RELIEFS`] times per tile.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace, warn};

use super::handler::{LoggingErrorHandler, TileErrorHandler};
use super::loader::{LoadContext, TileLoader};
use super::pool::{Job, RejectionHandler, WorkerPool};
use crate::cache::ImageCache;
use crate::error::{PoolError, TileError};
use crate::tile::{
    EventDispatcher, LocatorTemplate, Priority, Tile, TileCoord, TileEvent, TileGrid, TileImage,
    TileQueue, TileScheduler,
};

/// Attempts a tile gets before it is given up on.
pub const MAX_LOAD_ATTEMPTS: u32 = 3;

/// Memory-pressure retries a tile gets on top of its attempts.
pub const MAX_MEMORY_RELIEFS: u32 = 3;

static NEXT_FACTORY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct FactoryState {
    tiles: HashMap<Arc<str>, Arc<Tile>>,
    queue: TileQueue,
}

/// Produces tiles for one grid and one source, loading them in the background.
///
/// Built with [`TileFactory::builder`] and always held in an `Arc`; tiles and
/// the worker pool keep weak references back to it.
pub struct TileFactory {
    id: u64,
    grid: Arc<dyn TileGrid>,
    locator: Arc<dyn LocatorTemplate>,
    loader: Arc<dyn TileLoader>,
    pool: Arc<WorkerPool>,
    dispatcher: EventDispatcher,
    cache: RwLock<Arc<ImageCache>>,
    error_handler: RwLock<Arc<dyn TileErrorHandler>>,
    state: Mutex<FactoryState>,
    generation: AtomicU64,
    self_ref: Weak<TileFactory>,
}

// =============================================================================
// Builder
// =============================================================================

/// Configures a [`TileFactory`].
pub struct TileFactoryBuilder {
    grid: Arc<dyn TileGrid>,
    locator: Arc<dyn LocatorTemplate>,
    loader: Arc<dyn TileLoader>,
    pool: Option<Arc<WorkerPool>>,
    dispatcher: EventDispatcher,
    cache: Option<Arc<ImageCache>>,
    error_handler: Option<Arc<dyn TileErrorHandler>>,
}

impl TileFactoryBuilder {
    /// Share an existing pool. Without one the factory gets its own
    /// default-sized pool.
    pub fn pool(mut self, pool: Arc<WorkerPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn cache(mut self, cache: Arc<ImageCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn error_handler(mut self, handler: Arc<dyn TileErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn build(self) -> Arc<TileFactory> {
        let pool = self.pool.unwrap_or_default();
        let factory = Arc::new_cyclic(|self_ref| TileFactory {
            id: NEXT_FACTORY_ID.fetch_add(1, Ordering::Relaxed),
            grid: self.grid,
            locator: self.locator,
            loader: self.loader,
            pool,
            dispatcher: self.dispatcher,
            cache: RwLock::new(self.cache.unwrap_or_default()),
            error_handler: RwLock::new(
                self.error_handler
                    .unwrap_or_else(|| Arc::new(LoggingErrorHandler)),
            ),
            state: Mutex::new(FactoryState::default()),
            generation: AtomicU64::new(0),
            self_ref: self_ref.clone(),
        });

        let handler: Weak<TileFactory> = Arc::downgrade(&factory);
        let handler: Weak<dyn RejectionHandler> = handler;
        factory.pool.register(handler);
        debug!(factory = factory.id, "Tile factory created");
        factory
    }
}

// =============================================================================
// TileFactory
// =============================================================================

impl TileFactory {
    /// Start configuring a factory.
    ///
    /// Notifications for its tiles are delivered through `dispatcher`.
    pub fn builder(
        grid: impl TileGrid + 'static,
        locator: impl LocatorTemplate + 'static,
        loader: impl TileLoader + 'static,
        dispatcher: EventDispatcher,
    ) -> TileFactoryBuilder {
        TileFactoryBuilder {
            grid: Arc::new(grid),
            locator: Arc::new(locator),
            loader: Arc::new(loader),
            pool: None,
            dispatcher,
            cache: None,
            error_handler: None,
        }
    }

    /// Unique identity of this factory within the process.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn grid(&self) -> &dyn TileGrid {
        self.grid.as_ref()
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    /// Tile at `(x, y, zoom)`, requested at `High` priority.
    pub fn get_tile(&self, x: i32, y: i32, zoom: u32) -> Arc<Tile> {
        self.request(x, y, zoom, Priority::High)
    }

    /// Tile at `(x, y, zoom)`, requested at `Low` priority so it does not
    /// compete with tiles the viewport needs first.
    pub fn get_tile_lazy(&self, x: i32, y: i32, zoom: u32) -> Arc<Tile> {
        self.request(x, y, zoom, Priority::Low)
    }

    fn request(&self, x: i32, y: i32, zoom: u32, priority: Priority) -> Arc<Tile> {
        let x = self.grid.wrap_x(x, zoom);
        let coord = TileCoord::new(x, y, zoom);
        if !self.grid.is_valid_tile(x, y, zoom) {
            return Tile::placeholder(coord);
        }

        let locator: Arc<str> = Arc::from(self.locator.locator(x, y, zoom));
        let tile = {
            let mut state = self.state.lock();
            if let Some(existing) = state.tiles.get(&locator).cloned() {
                if priority == Priority::High
                    && existing.priority() == Priority::Low
                    && !existing.is_loaded()
                    && !state.queue.promote(&locator)
                {
                    existing.set_priority(Priority::High);
                }
                return existing;
            }

            let scheduler: Weak<dyn TileScheduler> = self.self_ref.clone();
            let tile = Tile::new(coord, locator.clone(), priority, Some(scheduler));
            state.tiles.insert(locator, tile.clone());
            state.queue.push(tile.clone());
            tile
        };

        trace!(factory = self.id, tile = %coord, ?priority, "Tile enqueued");
        self.submit_job();
        tile
    }

    /// Move a queued tile ahead of every `Low` tile. No-op if it is not
    /// queued or already `High`.
    pub fn promote(&self, tile: &Tile) -> bool {
        self.state.lock().queue.promote(tile.locator())
    }

    /// Enqueue `tile` afresh.
    ///
    /// This is how a tile that failed terminally gets another chance. No-op
    /// for placeholders and for tiles that are loading, loaded or queued.
    pub fn start_loading(&self, tile: &Arc<Tile>) {
        if tile.is_placeholder() || tile.is_loading() || tile.is_loaded() {
            return;
        }
        {
            let mut state = self.state.lock();
            if state.queue.contains(tile.locator()) {
                return;
            }
            state
                .tiles
                .entry(tile.locator_arc())
                .or_insert_with(|| tile.clone());
            state.queue.push(tile.clone());
        }
        self.submit_job();
    }

    /// The image cache currently in use.
    pub fn cache(&self) -> Arc<ImageCache> {
        self.cache.read().clone()
    }

    /// Swap the image cache.
    ///
    /// Forgets every tile: queued tiles are failed with
    /// [`TileError::CacheReset`], and results of loads already in flight are
    /// discarded.
    pub fn set_cache(&self, cache: Arc<ImageCache>) {
        *self.cache.write() = cache;
        self.generation.fetch_add(1, Ordering::AcqRel);
        let drained = {
            let mut state = self.state.lock();
            state.tiles.clear();
            state.queue.drain()
        };
        debug!(factory = self.id, dropped = drained.len(), "Tile cache replaced");
        self.fail_all(drained, TileError::CacheReset);
    }

    pub fn set_error_handler(&self, handler: Arc<dyn TileErrorHandler>) {
        *self.error_handler.write() = handler;
    }

    pub fn error_handler(&self) -> Arc<dyn TileErrorHandler> {
        self.error_handler.read().clone()
    }

    /// Free memory: clear the cache's decoded tier and drop the images held by
    /// loaded tiles, which reload on their next `image()` call.
    ///
    /// Tile images are released on the dispatch context, or inline if the
    /// dispatch loop is gone.
    pub fn relieve_memory(&self) {
        self.cache().need_more_memory();
        let tiles: Vec<Arc<Tile>> = self.state.lock().tiles.values().cloned().collect();
        let factory = self.id;
        let reclaim = move || {
            let released = tiles.iter().filter(|tile| tile.reclaim_image()).count();
            debug!(factory, released, "Relieved memory pressure");
        };
        self.dispatcher.invoke_later_or_inline(reclaim);
    }

    /// Number of tiles waiting for a worker.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Number of tiles in the identity map.
    pub fn tile_count(&self) -> usize {
        self.state.lock().tiles.len()
    }

    // -------------------------------------------------------------------------
    // Worker side
    // -------------------------------------------------------------------------

    fn submit_job(&self) {
        let Some(factory) = self.self_ref.upgrade() else {
            return;
        };
        let job: Job = Box::pin(async move { factory.run_next().await });
        match self.pool.submit(job) {
            Ok(()) => {}
            // Registered handlers have already failed the queue
            Err(PoolError::Saturated { .. }) => {}
            Err(e) => {
                warn!(factory = self.id, error = %e, "Cannot schedule tile loads");
                let drained = self.drain_queue();
                self.fail_all(
                    drained,
                    TileError::Worker {
                        message: e.to_string(),
                    },
                );
            }
        }
    }

    async fn run_next(self: Arc<Self>) {
        let next = self.state.lock().queue.pop();
        let Some(tile) = next else {
            return;
        };
        if !tile.try_begin_loading() {
            return;
        }
        let generation = self.generation.load(Ordering::Acquire);
        self.load(tile, generation).await;
    }

    async fn load(&self, tile: Arc<Tile>, generation: u64) {
        let ctx = LoadContext {
            cache: self.cache(),
            error_handler: self.error_handler(),
            tile_size: self.grid.tile_size(tile.zoom()),
        };

        let mut attempts_left = MAX_LOAD_ATTEMPTS;
        let mut reliefs = 0;
        let mut last_error = None;

        while attempts_left > 0 {
            if self.is_stale(generation) {
                self.discard_stale(tile);
                return;
            }

            match self.loader.load(&tile, &ctx).await {
                Ok(Some(image)) => {
                    self.complete(tile, image, generation).await;
                    return;
                }
                Ok(None) => {
                    let error = tile.error().unwrap_or_else(|| TileError::Decode {
                        locator: tile.locator().to_string(),
                        message: "no image produced".to_string(),
                    });
                    self.announce_attempt_failure(&tile, error.clone());
                    last_error = Some(error);
                    attempts_left -= 1;
                }
                Err(e) if e.is_memory_pressure() && reliefs < MAX_MEMORY_RELIEFS => {
                    reliefs += 1;
                    warn!(locator = tile.locator(), "Out of memory decoding tile, clearing caches");
                    self.relieve_memory();
                }
                Err(e) => {
                    ctx.error_handler.load_failed(&tile, &e);
                    tile.set_error(Some(e.clone()));
                    self.announce_attempt_failure(&tile, e.clone());
                    last_error = Some(e);
                    attempts_left -= 1;
                }
            }
        }

        if self.is_stale(generation) {
            self.discard_stale(tile);
            return;
        }

        if let Some(image) = self.loader.fallback_image(&tile, &ctx) {
            self.complete(tile, image, generation).await;
            return;
        }

        let error = last_error.unwrap_or_else(|| TileError::Worker {
            message: "load attempts exhausted".to_string(),
        });
        debug!(locator = tile.locator(), error = %error, "Giving up on tile");
        tile.finish_loading();
        let event = TileEvent::unrecoverable(tile.coord(), tile.locator_arc(), error);
        self.dispatcher.fire(tile, event);
    }

    fn announce_attempt_failure(&self, tile: &Arc<Tile>, error: TileError) {
        let event = TileEvent::loading_error(tile.coord(), tile.locator_arc(), error);
        self.dispatcher.fire(tile.clone(), event);
    }

    /// Publish the image on the dispatch context, or inline if the dispatch
    /// loop is gone.
    async fn complete(&self, tile: Arc<Tile>, image: TileImage, generation: u64) {
        if self.is_stale(generation) {
            self.discard_stale(tile);
            return;
        }
        tile.set_error(None);
        let event = TileEvent::loaded(tile.coord(), tile.locator_arc());

        let publish = {
            let tile = tile.clone();
            let image = image.clone();
            let event = event.clone();
            move || {
                tile.complete(image);
                tile.notify(&event);
            }
        };
        if self.dispatcher.invoke_and_wait(publish).await.is_none() {
            tile.complete(image);
            tile.notify(&event);
        }
    }

    fn is_stale(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) != generation
    }

    /// Fail a tile whose load outlived a cache swap. Its result is dropped.
    fn discard_stale(&self, tile: Arc<Tile>) {
        trace!(factory = self.id, locator = tile.locator(), "Discarding load from replaced cache");
        self.fail_all(vec![tile], TileError::CacheReset);
    }

    fn drain_queue(&self) -> Vec<Arc<Tile>> {
        let mut state = self.state.lock();
        let drained = state.queue.drain();
        for tile in &drained {
            let registered = state
                .tiles
                .get(tile.locator())
                .is_some_and(|t| Arc::ptr_eq(t, tile));
            if registered {
                state.tiles.remove(tile.locator());
            }
        }
        drained
    }

    fn fail_all(&self, tiles: Vec<Arc<Tile>>, error: TileError) {
        for tile in tiles {
            tile.finish_loading();
            tile.set_error(Some(error.clone()));
            let event = TileEvent::unrecoverable(tile.coord(), tile.locator_arc(), error.clone());
            self.dispatcher.fire(tile, event);
        }
    }
}

impl TileScheduler for TileFactory {
    fn start_loading(&self, tile: &Arc<Tile>) {
        TileFactory::start_loading(self, tile);
    }
}

impl RejectionHandler for TileFactory {
    fn on_rejected(&self) {
        let drained = self.drain_queue();
        if !drained.is_empty() {
            warn!(factory = self.id, dropped = drained.len(), "Tile loads rejected");
        }
        self.fail_all(drained, TileError::Rejected);
    }
}

impl fmt::Debug for TileFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileFactory")
            .field("id", &self.id)
            .field("tiles", &self.tile_count())
            .field("pending", &self.pending())
            .finish()
    }
}
