//! Tile factory integration tests.
//!
//! Tests verify:
//! - Placeholders for coordinates outside the grid and horizontal wrapping
//! - High-priority tiles load before low-priority ones, and promotion
//! - Notifications for loads, retries and terminal failures
//! - Cache reset, pool rejection and memory relief

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use mapview_tiles::error::{FetchError, TileError};
use mapview_tiles::factory::{FetchLoader, PoolConfig, WorkerPool, MAX_LOAD_ATTEMPTS};
use mapview_tiles::io::ImageDecoder;
use mapview_tiles::tile::{EventDispatcher, GridInfo, Priority, TileEventKind};
use mapview_tiles::{ImageCache, TileFactory};

use super::test_utils::{
    fetch_factory, locator, png_tile, serial_pool, FlakySource, GatedSource, MemorySource,
    RecordingErrorHandler, TileWatcher, EVENT_TIMEOUT, TEST_MAX_ZOOM, TEST_TILE_SIZE,
};

const GREEN: [u8; 4] = [0, 200, 0, 255];

/// Memory source holding a green tile for every coordinate at `zoom`.
fn green_world(zoom: u32) -> MemorySource {
    let side = 1i32 << zoom;
    let mut source = MemorySource::new();
    for x in 0..side {
        for y in 0..side {
            source = source.with_tile(locator(x, y, zoom), png_tile(GREEN, TEST_TILE_SIZE));
        }
    }
    source
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(EVENT_TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition never became true");
}

// =============================================================================
// Identity and Placeholders
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_out_of_grid_tiles_are_loaded_placeholders() {
    let source = MemorySource::new();
    let factory = fetch_factory(
        source.clone(),
        EventDispatcher::spawn(),
        serial_pool(),
        Arc::new(ImageCache::new()),
    );

    let outside = [
        factory.get_tile(0, -1, 2),
        factory.get_tile(0, 4, 2),
        factory.get_tile(0, 0, TEST_MAX_ZOOM + 1),
    ];
    for tile in &outside {
        assert!(tile.is_loaded());
        assert!(!tile.is_loading());
        assert!(tile.image().is_none());
        assert!(tile.is_placeholder());
    }

    assert_eq!(factory.pending(), 0);
    assert_eq!(factory.tile_count(), 0);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(source.fetch_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_horizontal_wrap_shares_identity() {
    let factory = fetch_factory(
        green_world(2),
        EventDispatcher::spawn(),
        serial_pool(),
        Arc::new(ImageCache::new()),
    );
    let wide = factory.grid().tiles_wide(2) as i32;

    let left = factory.get_tile(-1, 1, 2);
    let right = factory.get_tile(wide - 1, 1, 2);
    let far = factory.get_tile(2 * wide - 1, 1, 2);

    assert!(Arc::ptr_eq(&left, &right));
    assert!(Arc::ptr_eq(&left, &far));
    assert_eq!(left.x(), wide - 1);
    assert_eq!(factory.tile_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_repeated_requests_fetch_once() {
    let source = green_world(1);
    let (dispatcher, dispatch_loop) = EventDispatcher::new();
    let factory = fetch_factory(
        source.clone(),
        dispatcher,
        serial_pool(),
        Arc::new(ImageCache::new()),
    );

    let tile = factory.get_tile(1, 0, 1);
    let mut watcher = TileWatcher::watch(&*tile);
    for _ in 0..5 {
        assert!(Arc::ptr_eq(&tile, &factory.get_tile(1, 0, 1)));
    }
    tokio::spawn(dispatch_loop.run());

    assert_eq!(watcher.terminal().await.name(), "loaded");
    assert!(Arc::ptr_eq(&tile, &factory.get_tile(1, 0, 1)));
    assert_eq!(source.fetch_count(), 1);
}

// =============================================================================
// Priorities
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_high_priority_dequeued_before_low() {
    let source = GatedSource::new(green_world(2));
    let factory = fetch_factory(
        source.clone(),
        EventDispatcher::spawn(),
        serial_pool(),
        Arc::new(ImageCache::disabled()),
    );

    // Occupy the only worker
    let first = factory.get_tile(0, 0, 2);
    source.wait_for_blocked(1).await;

    let low = factory.get_tile_lazy(1, 0, 2);
    let high = factory.get_tile(2, 0, 2);
    assert_eq!(low.priority(), Priority::Low);
    assert_eq!(factory.pending(), 2);

    source.open();
    wait_until(|| first.is_loaded() && low.is_loaded() && high.is_loaded()).await;

    assert_eq!(
        memory_fetches(&source),
        vec![locator(0, 0, 2), locator(2, 0, 2), locator(1, 0, 2)]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_promotion_moves_tile_ahead_of_low_tiles() {
    let source = GatedSource::new(green_world(2));
    let factory = fetch_factory(
        source.clone(),
        EventDispatcher::spawn(),
        serial_pool(),
        Arc::new(ImageCache::disabled()),
    );

    let first = factory.get_tile(0, 0, 2);
    source.wait_for_blocked(1).await;

    let a = factory.get_tile_lazy(1, 0, 2);
    let b = factory.get_tile_lazy(2, 0, 2);
    let c = factory.get_tile_lazy(3, 0, 2);

    // Promoting a tile that is not queued, or already High, does nothing
    assert!(!factory.promote(&first));
    assert!(factory.promote(&c));
    assert_eq!(c.priority(), Priority::High);
    assert!(!factory.promote(&c));

    // Asking for a queued Low tile at High priority promotes it as well
    let b_again = factory.get_tile(2, 0, 2);
    assert!(Arc::ptr_eq(&b, &b_again));
    assert_eq!(b.priority(), Priority::High);

    source.open();
    wait_until(|| [&first, &a, &b, &c].iter().all(|t| t.is_loaded())).await;

    assert_eq!(
        memory_fetches(&source),
        vec![
            locator(0, 0, 2),
            locator(3, 0, 2),
            locator(2, 0, 2),
            locator(1, 0, 2)
        ]
    );
}

fn memory_fetches(source: &GatedSource<MemorySource>) -> Vec<String> {
    source.inner().fetched()
}

// =============================================================================
// Notifications and Retries
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_loaded_notification_and_image() {
    let (dispatcher, dispatch_loop) = EventDispatcher::new();
    let factory = fetch_factory(
        green_world(0),
        dispatcher,
        serial_pool(),
        Arc::new(ImageCache::new()),
    );

    let tile = factory.get_tile(0, 0, 0);
    let mut watcher = TileWatcher::watch(&*tile);
    tokio::spawn(dispatch_loop.run());

    let event = watcher.terminal().await;
    assert!(matches!(event.kind, TileEventKind::Loaded));
    assert_eq!(event.coord, tile.coord());
    assert_eq!(&*event.locator, "mem://0/0/0");

    assert!(tile.is_loaded());
    assert!(!tile.is_loading());
    assert!(tile.error().is_none());
    let image = tile.image().unwrap();
    assert_eq!(image.dimensions(), (TEST_TILE_SIZE, TEST_TILE_SIZE));
    assert_eq!(image.get_pixel(3, 3).0, GREEN);
    assert!(factory.cache().contains_decoded("mem://0/0/0"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_retry_exhaustion_is_unrecoverable() {
    let source = FlakySource::always_failing();
    let handler = Arc::new(RecordingErrorHandler::default());
    let (dispatcher, dispatch_loop) = EventDispatcher::new();
    let factory = TileFactory::builder(
        GridInfo::new(0, TEST_MAX_ZOOM, TEST_TILE_SIZE),
        locator,
        FetchLoader::new(source.clone()),
        dispatcher,
    )
    .pool(serial_pool())
    .error_handler(handler.clone())
    .build();

    let tile = factory.get_tile(1, 1, 1);
    let mut watcher = TileWatcher::watch(&*tile);
    tokio::spawn(dispatch_loop.run());

    let event = watcher.terminal().await;
    assert!(matches!(
        event.kind,
        TileEventKind::UnrecoverableError(TileError::Fetch(FetchError::Connection(_)))
    ));
    assert_eq!(
        watcher.names(),
        vec![
            "loading-error",
            "loading-error",
            "loading-error",
            "unrecoverable-error"
        ]
    );

    assert_eq!(source.fetch_count(), MAX_LOAD_ATTEMPTS as usize);
    assert_eq!(handler.load_failures().len(), MAX_LOAD_ATTEMPTS as usize);
    assert!(!tile.is_loading());
    assert!(!tile.is_loaded());
    assert!(tile.error().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_transient_failures_recover_within_budget() {
    let source = FlakySource::new(png_tile(GREEN, TEST_TILE_SIZE), 2);
    let (dispatcher, dispatch_loop) = EventDispatcher::new();
    let factory = fetch_factory(
        source.clone(),
        dispatcher,
        serial_pool(),
        Arc::new(ImageCache::new()),
    );

    let tile = factory.get_tile(0, 0, 1);
    let mut watcher = TileWatcher::watch(&*tile);
    tokio::spawn(dispatch_loop.run());

    assert_eq!(watcher.terminal().await.name(), "loaded");
    assert_eq!(
        watcher.names(),
        vec!["loading-error", "loading-error", "loaded"]
    );
    assert_eq!(source.fetch_count(), 3);
    assert!(tile.error().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_undecodable_bytes_report_decode_failures() {
    let source =
        MemorySource::new().with_tile(locator(0, 0, 0), Bytes::from_static(b"<html>"));
    let handler = Arc::new(RecordingErrorHandler::default());
    let (dispatcher, dispatch_loop) = EventDispatcher::new();
    let factory = TileFactory::builder(
        GridInfo::new(0, TEST_MAX_ZOOM, TEST_TILE_SIZE),
        locator,
        FetchLoader::new(source.clone()),
        dispatcher,
    )
    .pool(serial_pool())
    .error_handler(handler.clone())
    .build();

    let tile = factory.get_tile(0, 0, 0);
    let mut watcher = TileWatcher::watch(&*tile);
    tokio::spawn(dispatch_loop.run());

    let event = watcher.terminal().await;
    assert!(matches!(
        event.kind,
        TileEventKind::UnrecoverableError(TileError::Decode { .. })
    ));
    assert_eq!(handler.decode_failures(), MAX_LOAD_ATTEMPTS as usize);
    assert!(handler.load_failures().is_empty());
    assert_eq!(watcher.names().len(), MAX_LOAD_ATTEMPTS as usize + 1);
    assert!(!factory.cache().contains_compressed(&locator(0, 0, 0)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_memory_pressure_does_not_use_attempts() {
    // A 128x128 tile cannot be decoded within 4 KiB
    let source = MemorySource::new().with_tile(locator(0, 0, 0), png_tile(GREEN, 128));
    let (dispatcher, dispatch_loop) = EventDispatcher::new();
    let factory = TileFactory::builder(
        GridInfo::new(0, TEST_MAX_ZOOM, TEST_TILE_SIZE),
        locator,
        FetchLoader::new(source.clone())
            .with_decoder(Arc::new(ImageDecoder::with_max_alloc(4096))),
        dispatcher,
    )
    .pool(serial_pool())
    .build();

    let tile = factory.get_tile(0, 0, 0);
    let mut watcher = TileWatcher::watch(&*tile);
    tokio::spawn(dispatch_loop.run());

    let event = watcher.terminal().await;
    assert!(matches!(
        event.kind,
        TileEventKind::UnrecoverableError(TileError::OutOfMemory { .. })
    ));
    // Three relieved attempts on top of the three counted ones
    assert_eq!(source.fetch_count(), 6);
    assert_eq!(watcher.names().len(), MAX_LOAD_ATTEMPTS as usize + 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_tile_can_be_loaded_again() {
    let source = FlakySource::new(png_tile(GREEN, TEST_TILE_SIZE), 3);
    let (dispatcher, dispatch_loop) = EventDispatcher::new();
    let factory = fetch_factory(
        source.clone(),
        dispatcher,
        serial_pool(),
        Arc::new(ImageCache::new()),
    );

    let tile = factory.get_tile(1, 0, 1);
    let mut watcher = TileWatcher::watch(&*tile);
    tokio::spawn(dispatch_loop.run());
    assert_eq!(watcher.terminal().await.name(), "unrecoverable-error");

    // Requesting it again returns the failed tile; only a fresh enqueue retries
    assert!(Arc::ptr_eq(&tile, &factory.get_tile(1, 0, 1)));
    factory.start_loading(&tile);

    assert_eq!(watcher.terminal().await.name(), "loaded");
    assert!(tile.is_loaded());
    assert_eq!(source.fetch_count(), 4);
}

// =============================================================================
// Cache Reset, Rejection and Memory Relief
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_set_cache_fails_queued_and_discards_in_flight() {
    let source = GatedSource::new(green_world(2));
    let factory = fetch_factory(
        source.clone(),
        EventDispatcher::spawn(),
        serial_pool(),
        Arc::new(ImageCache::new()),
    );

    let in_flight = factory.get_tile(0, 0, 2);
    let mut in_flight_watcher = TileWatcher::watch(&*in_flight);
    source.wait_for_blocked(1).await;
    let queued = factory.get_tile(1, 0, 2);
    let mut watcher = TileWatcher::watch(&*queued);

    factory.set_cache(Arc::new(ImageCache::new()));

    let event = watcher.terminal().await;
    assert!(matches!(
        event.kind,
        TileEventKind::UnrecoverableError(TileError::CacheReset)
    ));
    assert!(!queued.is_loading());
    assert_eq!(factory.pending(), 0);
    assert_eq!(factory.tile_count(), 0);

    // The in-flight result lands after the reset and is thrown away, but
    // the tile is still told it will never load
    source.open();
    let event = in_flight_watcher.terminal().await;
    assert!(matches!(
        event.kind,
        TileEventKind::UnrecoverableError(TileError::CacheReset)
    ));
    assert!(!in_flight.is_loading());
    assert!(!in_flight.is_loaded());
    assert!(matches!(in_flight.error(), Some(TileError::CacheReset)));
    assert!(!factory.cache().contains_decoded(&locator(0, 0, 2)));
    assert_eq!(
        in_flight_watcher.names().iter().filter(|n| n.ends_with("error")).count(),
        1
    );

    // A fresh request creates a fresh tile
    let fresh = factory.get_tile(1, 0, 2);
    assert!(!Arc::ptr_eq(&fresh, &queued));
    wait_until(|| fresh.is_loaded()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pool_rejection_fails_every_queued_tile() {
    let source = GatedSource::new(green_world(2));
    let pool = Arc::new(WorkerPool::new(
        PoolConfig {
            min_workers: 1,
            max_workers: 1,
            ..PoolConfig::default()
        }
        .queue_capacity(1),
    ));
    let factory = fetch_factory(
        source.clone(),
        EventDispatcher::spawn(),
        pool.clone(),
        Arc::new(ImageCache::new()),
    );

    let running = factory.get_tile(0, 0, 2);
    source.wait_for_blocked(1).await;

    let queued = factory.get_tile(1, 0, 2);
    let mut watcher = TileWatcher::watch(&*queued);
    assert_eq!(pool.queued_jobs(), 1);

    // The pool queue is full: this request triggers the drain
    let overflow = factory.get_tile(2, 0, 2);

    let event = watcher.terminal().await;
    assert!(matches!(
        event.kind,
        TileEventKind::UnrecoverableError(TileError::Rejected)
    ));
    assert!(matches!(overflow.error(), Some(TileError::Rejected)));
    assert!(!overflow.is_loading());
    assert_eq!(factory.pending(), 0);
    assert_eq!(pool.queued_jobs(), 0);

    // Drained tiles are forgotten, the running one is not
    assert!(!Arc::ptr_eq(&queued, &factory.get_tile(1, 0, 2)));
    assert!(Arc::ptr_eq(&running, &factory.get_tile(0, 0, 2)));

    source.open();
    wait_until(|| running.is_loaded()).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_relieved_tile_reloads_from_compressed_tier() {
    let source = green_world(1);
    let (dispatcher, dispatch_loop) = EventDispatcher::new();
    let factory = fetch_factory(
        source.clone(),
        dispatcher,
        serial_pool(),
        Arc::new(ImageCache::new()),
    );

    let tile = factory.get_tile(1, 1, 1);
    let mut watcher = TileWatcher::watch(&*tile);
    tokio::spawn(dispatch_loop.run());
    assert_eq!(watcher.terminal().await.name(), "loaded");

    factory.relieve_memory();
    // Images are released on the dispatch loop
    wait_until(|| !tile.is_loaded()).await;
    assert!(!factory.cache().contains_decoded(&locator(1, 1, 1)));

    // Asking for the image schedules the reload
    assert!(tile.image().is_none());
    assert_eq!(watcher.terminal().await.name(), "loaded");
    assert_eq!(tile.image().unwrap().get_pixel(0, 0).0, GREEN);
    assert_eq!(source.fetch_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_loaded_image_is_the_cached_instance() {
    let cache = Arc::new(ImageCache::new());
    let factory = fetch_factory(
        green_world(1),
        EventDispatcher::spawn(),
        serial_pool(),
        cache.clone(),
    );

    let tile = factory.get_tile(0, 1, 1);
    wait_until(|| tile.is_loaded()).await;

    let cached = cache.get_decoded(&locator(0, 1, 1)).unwrap();
    assert!(Arc::ptr_eq(&tile.image().unwrap(), &cached));

    // Without a decoded tier the freshly decoded image is used as is
    let uncached = fetch_factory(
        green_world(1),
        EventDispatcher::spawn(),
        serial_pool(),
        Arc::new(ImageCache::with_ceilings(0, 1 << 20)),
    );
    let tile = uncached.get_tile(0, 1, 1);
    wait_until(|| tile.is_loaded()).await;
    assert_eq!(tile.image().unwrap().get_pixel(0, 0).0, GREEN);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_shared_cache_serves_second_factory() {
    let cache = Arc::new(ImageCache::new());
    let first_source = green_world(0);
    let second_source = MemorySource::new();

    let first = fetch_factory(
        first_source.clone(),
        EventDispatcher::spawn(),
        serial_pool(),
        cache.clone(),
    );
    let tile = first.get_tile(0, 0, 0);
    wait_until(|| tile.is_loaded()).await;

    let second = fetch_factory(
        second_source.clone(),
        EventDispatcher::spawn(),
        serial_pool(),
        cache,
    );
    let cached = second.get_tile(0, 0, 0);
    wait_until(|| cached.is_loaded()).await;

    assert_eq!(second_source.fetch_count(), 0);
    assert!(Arc::ptr_eq(&tile.image().unwrap(), &cached.image().unwrap()));
}
