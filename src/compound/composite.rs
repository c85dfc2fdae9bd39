//! A tile assembled from a base tile and any number of overlay tiles.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use image::imageops;
use image::{Rgba, RgbaImage};
use parking_lot::Mutex;
use tracing::trace;

use super::overlay::draw_loading_overlay;
use crate::error::TileError;
use crate::tile::{
    ListenerId, Listeners, MapTile, Priority, Tile, TileCoord, TileEvent, TileEventKind,
    TileImage, TileListener,
};

/// Fill used where the base tile has no image yet.
pub const MISSING_BASE_COLOR: Rgba<u8> = Rgba([128, 128, 128, 255]);

#[derive(Default)]
struct RenderState {
    buffer: Option<TileImage>,
    progress: (usize, usize),
}

/// Composite of one base tile and its layers, rebuilt lazily.
///
/// A compound tile never loads anything itself and always reports loaded.
/// The work happens in [`CompoundTile::image`]: layers that have no image
/// yet are skipped, and the result is kept until one of the upstream tiles
/// announces a change.
pub struct CompoundTile {
    coord: TileCoord,
    tile_size: u32,
    base: Arc<Tile>,
    layers: Vec<Arc<Tile>>,
    loading_image: Option<TileImage>,
    show_percent: bool,
    dirty: AtomicBool,
    render: Mutex<RenderState>,
    listeners: Listeners,
    subscriptions: Vec<(Arc<Tile>, ListenerId)>,
}

impl CompoundTile {
    pub fn new(
        tile_size: u32,
        base: Arc<Tile>,
        layers: Vec<Arc<Tile>>,
        loading_image: Option<TileImage>,
        show_percent: bool,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref: &Weak<CompoundTile>| {
            let subscriptions = std::iter::once(&base)
                .chain(layers.iter())
                .map(|upstream| {
                    let id = upstream.subscribe(upstream_listener(self_ref.clone()));
                    (upstream.clone(), id)
                })
                .collect();

            Self {
                coord: base.coord(),
                tile_size,
                base,
                layers,
                loading_image,
                show_percent,
                dirty: AtomicBool::new(true),
                render: Mutex::new(RenderState::default()),
                listeners: Listeners::default(),
                subscriptions,
            }
        })
    }

    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn base(&self) -> &Arc<Tile> {
        &self.base
    }

    pub fn layers(&self) -> &[Arc<Tile>] {
        &self.layers
    }

    /// Whether the next [`image`](Self::image) call recomposites.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// `(painted, total)` tiles of the last composite; `(0, 0)` before the
    /// first one.
    pub fn last_progress(&self) -> (usize, usize) {
        self.render.lock().progress
    }

    /// The composite image, rebuilt first if an upstream tile changed.
    pub fn image(&self) -> Option<TileImage> {
        let mut state = self.render.lock();
        if !self.is_dirty() {
            if let Some(buffer) = &state.buffer {
                return Some(buffer.clone());
            }
        }

        // Cleared before compositing so a change arriving mid-render is kept
        self.dirty.store(false, Ordering::Release);

        let mut canvas = RgbaImage::new(self.tile_size, self.tile_size);
        let total = 1 + self.layers.len();
        let mut painted = 0;

        match self.base.image() {
            Some(base) => {
                imageops::overlay(&mut canvas, &*base, 0, 0);
                painted += 1;
            }
            None => {
                for pixel in canvas.pixels_mut() {
                    *pixel = MISSING_BASE_COLOR;
                }
            }
        }
        for layer in &self.layers {
            if let Some(image) = layer.image() {
                imageops::overlay(&mut canvas, &*image, 0, 0);
                painted += 1;
            }
        }

        if painted < total && (self.loading_image.is_some() || self.show_percent) {
            draw_loading_overlay(
                &mut canvas,
                painted,
                total,
                self.loading_image.as_deref(),
                self.show_percent,
            );
        }

        trace!(tile = %self.coord, painted, total, "Composited tile");
        let image = Arc::new(canvas);
        state.buffer = Some(image.clone());
        state.progress = (painted, total);
        Some(image)
    }

    fn on_upstream(&self, event: &TileEvent) {
        let forwarded = match &event.kind {
            TileEventKind::Loaded => TileEvent::loaded(self.coord, self.base.locator_arc()),
            TileEventKind::UnrecoverableError(error) => {
                TileEvent::loading_error(self.coord, self.base.locator_arc(), error.clone())
            }
            TileEventKind::LoadingError(_) => return,
        };
        self.dirty.store(true, Ordering::Release);
        self.listeners.notify(&forwarded);
    }
}

fn upstream_listener(tile: Weak<CompoundTile>) -> TileListener {
    Arc::new(move |event: &TileEvent| {
        if let Some(tile) = tile.upgrade() {
            tile.on_upstream(event);
        }
    })
}

impl Drop for CompoundTile {
    fn drop(&mut self) {
        for (upstream, id) in &self.subscriptions {
            upstream.unsubscribe(*id);
        }
    }
}

impl MapTile for CompoundTile {
    fn coord(&self) -> TileCoord {
        self.coord
    }

    fn locator(&self) -> &str {
        self.base.locator()
    }

    fn is_loaded(&self) -> bool {
        true
    }

    fn is_loading(&self) -> bool {
        false
    }

    fn image(&self) -> Option<TileImage> {
        CompoundTile::image(self)
    }

    fn priority(&self) -> Priority {
        self.base.priority()
    }

    fn set_priority(&self, priority: Priority) {
        self.base.set_priority(priority)
    }

    fn error(&self) -> Option<TileError> {
        self.base.error()
    }

    fn set_error(&self, error: Option<TileError>) {
        self.base.set_error(error)
    }

    fn subscribe(&self, listener: TileListener) -> ListenerId {
        self.listeners.subscribe(listener)
    }

    fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }
}

impl fmt::Debug for CompoundTile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompoundTile")
            .field("coord", &self.coord)
            .field("base", &self.base.locator())
            .field("layers", &self.layers.len())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}
