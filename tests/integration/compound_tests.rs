//! Compound tile integration tests.
//!
//! Tests verify:
//! - A composite of a base alone reproduces the base
//! - Layers arriving late are composited in, with progress shown meanwhile
//! - Upstream failures are forwarded and do not hide the base
//! - Composites are cached per layer set

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use image::{Rgba, RgbaImage};

use mapview_tiles::compound::TEXT_COLOR;
use mapview_tiles::error::{FetchError, TileError};
use mapview_tiles::io::{encode_png, TileSource};
use mapview_tiles::tile::{EventDispatcher, GridInfo, MapTile, Priority, TileEventKind};
use mapview_tiles::{CompoundTileFactory, FetchLoader, ImageCache, TileFactory};

use super::test_utils::{
    locator, serial_pool, GatedSource, MemorySource, TileWatcher, EVENT_TIMEOUT, TEST_MAX_ZOOM,
};

const SIZE: u32 = 64;
const RED: [u8; 4] = [200, 0, 0, 255];
const BLUE: [u8; 4] = [0, 0, 255, 255];

fn factory<S: TileSource + 'static>(source: S, dispatcher: EventDispatcher) -> Arc<TileFactory> {
    TileFactory::builder(
        GridInfo::new(0, TEST_MAX_ZOOM, SIZE),
        locator,
        FetchLoader::new(source),
        dispatcher,
    )
    .pool(serial_pool())
    .cache(Arc::new(ImageCache::new()))
    .build()
}

fn base_source() -> MemorySource {
    let red = encode_png(&RgbaImage::from_pixel(SIZE, SIZE, Rgba(RED))).unwrap();
    MemorySource::new()
        .with_tile(locator(0, 0, 1), red.clone())
        .with_tile(locator(1, 0, 1), red)
}

/// Transparent tile with a blue top-left quarter.
fn corner_layer() -> Bytes {
    let mut image = RgbaImage::new(SIZE, SIZE);
    for y in 0..SIZE / 2 {
        for x in 0..SIZE / 2 {
            image.put_pixel(x, y, Rgba(BLUE));
        }
    }
    encode_png(&image).unwrap()
}

fn has_pixel(image: &RgbaImage, color: [u8; 4]) -> bool {
    image.pixels().any(|p| p.0 == color)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_base_only_composite_matches_base() {
    let (dispatcher, dispatch_loop) = EventDispatcher::new();
    let compound = CompoundTileFactory::new(factory(base_source(), dispatcher));

    let composite = compound.get_compound_tile(0, 0, 1).unwrap();
    let mut watcher = TileWatcher::watch(&*composite);
    tokio::spawn(dispatch_loop.run());

    watcher.wait_for("loaded").await;
    let image = composite.image().unwrap();
    assert_eq!(image.dimensions(), (SIZE, SIZE));
    assert!(image.pixels().all(|p| p.0 == RED));
    assert_eq!(composite.last_progress(), (1, 1));
    assert!(!composite.is_dirty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_late_layer_is_composited_in() {
    let (dispatcher, dispatch_loop) = EventDispatcher::new();
    let layer_source =
        GatedSource::new(MemorySource::new().with_tile(locator(0, 0, 1), corner_layer()));
    let layer = factory(layer_source.clone(), dispatcher.clone());

    let compound = CompoundTileFactory::new(factory(base_source(), dispatcher));
    compound.set_layer_factories(vec![layer.clone()]);
    compound.set_show_loading_percent(true);

    let composite = compound.get_compound_tile(0, 0, 1).unwrap();
    assert_eq!(composite.layers()[0].priority(), Priority::Low);
    let mut watcher = TileWatcher::watch(&*composite);
    tokio::spawn(dispatch_loop.run());

    // The layer is held at the gate, so this is the base
    watcher.wait_for("loaded").await;
    let partial = composite.image().unwrap();
    assert_eq!(composite.last_progress(), (1, 2));
    assert!(!has_pixel(&partial, RED));
    assert!(has_pixel(&partial, TEXT_COLOR.0));

    layer_source.release(1);
    watcher.wait_for("loaded").await;
    assert!(composite.is_dirty());

    let complete = composite.image().unwrap();
    assert_eq!(composite.last_progress(), (2, 2));
    assert_eq!(complete.get_pixel(0, 0).0, BLUE);
    assert_eq!(complete.get_pixel(SIZE - 1, SIZE - 1).0, RED);
    assert!(!has_pixel(&complete, TEXT_COLOR.0));
    assert!(!composite.is_dirty());
    assert!(Arc::ptr_eq(&complete, &composite.image().unwrap()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_loading_image_without_percent() {
    let (dispatcher, dispatch_loop) = EventDispatcher::new();
    let layer_source = GatedSource::new(MemorySource::new());
    let layer = factory(layer_source, dispatcher.clone());

    let compound = CompoundTileFactory::new(factory(base_source(), dispatcher));
    compound.set_layer_factories(vec![layer]);
    compound.set_loading_image(Some(Arc::new(RgbaImage::from_pixel(
        8,
        8,
        Rgba([0, 255, 0, 255]),
    ))));

    let composite = compound.get_compound_tile(1, 0, 1).unwrap();
    let mut watcher = TileWatcher::watch(&*composite);
    tokio::spawn(dispatch_loop.run());
    watcher.wait_for("loaded").await;

    let image = composite.image().unwrap();
    assert_eq!(image.get_pixel(SIZE / 2, SIZE / 2).0, [0, 255, 0, 255]);
    assert_ne!(image.get_pixel(0, 0).0, RED);
    assert!(!has_pixel(&image, TEXT_COLOR.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_layer_is_forwarded_and_base_still_drawn() {
    let (dispatcher, dispatch_loop) = EventDispatcher::new();
    // The layer source has no tiles at all
    let layer = factory(MemorySource::new(), dispatcher.clone());

    let compound = CompoundTileFactory::new(factory(base_source(), dispatcher));
    compound.set_layer_factories(vec![layer]);

    let composite = compound.get_compound_tile(0, 0, 1).unwrap();
    let mut watcher = TileWatcher::watch(&*composite);
    tokio::spawn(dispatch_loop.run());

    let mut forwarded = None;
    while forwarded.is_none() || !watcher.names().contains(&"loaded") {
        let event = watcher.next().await.expect("composite went quiet");
        if let TileEventKind::LoadingError(error) = event.kind {
            forwarded = Some(error);
        }
    }
    assert!(matches!(
        forwarded,
        Some(TileError::Fetch(FetchError::NotFound(_)))
    ));
    // Only the terminal layer failure is forwarded, not each attempt
    assert_eq!(
        watcher.names().iter().filter(|n| **n == "loading-error").count(),
        1
    );

    // No percent or loading image configured: no veil either
    let image = composite.image().unwrap();
    assert!(image.pixels().all(|p| p.0 == RED));
    assert_eq!(composite.last_progress(), (1, 2));
    assert!(composite.is_loaded());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_layer_set_change_yields_new_composite() {
    let dispatcher = EventDispatcher::spawn();
    let base = factory(base_source(), dispatcher.clone());
    let layer = factory(MemorySource::new(), dispatcher);
    let compound = CompoundTileFactory::new(base.clone());

    let plain = compound.get_compound_tile(0, 0, 1).unwrap();
    compound.set_layer_factories(vec![layer.clone()]);
    let layered = compound.get_compound_tile(0, 0, 1).unwrap();

    assert!(!Arc::ptr_eq(&plain, &layered));
    assert!(Arc::ptr_eq(plain.base(), layered.base()));
    assert!(plain.layers().is_empty());
    assert_eq!(layered.layers().len(), 1);

    compound.set_layer_factories(Vec::new());
    assert!(Arc::ptr_eq(&plain, &compound.get_compound_tile(0, 0, 1).unwrap()));

    // Outside the grid there is nothing to composite
    let outside = compound.get_tile(0, 2, 1);
    assert!(outside.is_loaded());
    assert!(outside.image().is_none());
    assert!(compound.get_compound_tile(0, 2, 1).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cache_reset_during_base_load_rebuilds_composite() {
    let (dispatcher, dispatch_loop) = EventDispatcher::new();
    let base_source = GatedSource::new(base_source());
    let base = factory(base_source.clone(), dispatcher);
    let compound = CompoundTileFactory::new(base.clone());

    let stale = compound.get_compound_tile(0, 0, 1).unwrap();
    let mut watcher = TileWatcher::watch(&*stale);
    tokio::spawn(dispatch_loop.run());
    base_source.wait_for_blocked(1).await;

    base.set_cache(Arc::new(ImageCache::new()));
    base_source.open();

    // The abandoned base load is reported through the composite
    let event = watcher.wait_for("loading-error").await;
    assert!(matches!(
        event.kind,
        TileEventKind::LoadingError(TileError::CacheReset)
    ));
    assert!(matches!(stale.base().error(), Some(TileError::CacheReset)));

    // The next request builds a composite over a live base
    let fresh = compound.get_compound_tile(0, 0, 1).unwrap();
    assert!(!Arc::ptr_eq(&stale, &fresh));
    assert!(!Arc::ptr_eq(stale.base(), fresh.base()));

    tokio::time::timeout(EVENT_TIMEOUT, async {
        while !fresh.base().is_loaded() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("fresh base never loaded");
    assert!(fresh.image().unwrap().pixels().all(|p| p.0 == RED));
    assert_eq!(fresh.last_progress(), (1, 1));
}
