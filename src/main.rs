//! mapview-tiles - load and composite map tiles from the command line.
//!
//! This binary drives the library end to end: it requests a viewport of
//! tiles, waits for each one to load or give up, and reports the outcome.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mapview_tiles::{
    config::{
        parse_template, Cli, Command, CompositeConfig, FetchConfig, LoadArgs, ViewportArgs,
    },
    encode_png, CacheStats, CompoundTileFactory, EventDispatcher, FetchLoader, GridInfo,
    HttpTileSource, ImageCache, MapTile, PoolConfig, Tile, TileCoord, TileEvent, TileFactory,
    TileImage, UriTileSource, WorkerPool,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Fetch(config) => run_fetch(config).await,
        Command::Composite(config) => run_composite(config).await,
    }
}

// =============================================================================
// Run Summary
// =============================================================================

#[derive(Debug, Default, Serialize)]
struct RunSummary {
    requested: usize,
    loaded: usize,
    failed: usize,
    placeholders: usize,
    timed_out: usize,
    written: usize,
    elapsed_ms: u128,
    cache: Option<CacheStats>,
}

impl RunSummary {
    fn record(&mut self, outcome: &Outcome) {
        match outcome {
            Outcome::Loaded => self.loaded += 1,
            Outcome::Failed(_) => self.failed += 1,
            Outcome::Placeholder => self.placeholders += 1,
            Outcome::TimedOut => self.timed_out += 1,
        }
    }

    fn is_success(&self) -> bool {
        self.failed == 0 && self.timed_out == 0
    }

    fn print(&self, json: bool) {
        if json {
            match serde_json::to_string_pretty(self) {
                Ok(text) => println!("{}", text),
                Err(e) => error!("Failed to serialize summary: {}", e),
            }
            return;
        }

        println!("Tiles requested: {}", self.requested);
        println!("  loaded:        {}", self.loaded);
        println!("  failed:        {}", self.failed);
        println!("  placeholders:  {}", self.placeholders);
        if self.timed_out > 0 {
            println!("  timed out:     {}", self.timed_out);
        }
        if self.written > 0 {
            println!("PNG files written: {}", self.written);
        }
        if let Some(cache) = &self.cache {
            println!(
                "Cache: {} decoded ({} bytes), {} compressed ({} bytes)",
                cache.decoded.entries,
                cache.decoded.size,
                cache.compressed.entries,
                cache.compressed.size
            );
        }
        println!("Elapsed: {} ms", self.elapsed_ms);
    }
}

/// Terminal state of one tile.
#[derive(Debug)]
enum Outcome {
    Loaded,
    Failed(String),
    Placeholder,
    TimedOut,
}

// =============================================================================
// Fetch Command
// =============================================================================

async fn run_fetch(config: FetchConfig) -> ExitCode {
    init_logging(config.load.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let dispatcher = EventDispatcher::spawn();
    let factory = match build_factory(
        &config.template,
        &config.viewport,
        &config.load,
        None,
        dispatcher,
    ) {
        Ok(factory) => factory,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        template = %config.template,
        zoom = config.viewport.zoom,
        tiles = config.viewport.cols * config.viewport.rows,
        "Fetching viewport"
    );

    let started = Instant::now();
    let coords = config.viewport.coords();
    let tiles: Vec<Arc<Tile>> = coords
        .iter()
        .map(|c| factory.get_tile(c.x, c.y, c.zoom))
        .collect();

    let mut summary = RunSummary {
        requested: tiles.len(),
        ..RunSummary::default()
    };
    let deadline = tokio::time::Instant::now() + config.load.wait_timeout();

    for tile in &tiles {
        let outcome = wait_for_tile(tile, deadline).await;
        if let Outcome::Failed(reason) = &outcome {
            warn!(tile = %tile.coord(), error = %reason, "Tile failed");
        }
        summary.record(&outcome);

        if let (Outcome::Loaded, Some(dir)) = (&outcome, &config.load.output) {
            if let Some(image) = tile.image() {
                match write_png(dir, tile.coord(), &image).await {
                    Ok(()) => summary.written += 1,
                    Err(e) => error!(tile = %tile.coord(), "Failed to write tile: {}", e),
                }
            }
        }
    }

    summary.elapsed_ms = started.elapsed().as_millis();
    summary.cache = Some(factory.cache().stats());
    summary.print(config.load.json);
    factory.pool().shutdown();

    if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

// =============================================================================
// Composite Command
// =============================================================================

async fn run_composite(config: CompositeConfig) -> ExitCode {
    init_logging(config.load.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let dispatcher = EventDispatcher::spawn();
    let pool = Arc::new(WorkerPool::new(
        PoolConfig::with_workers(config.load.workers).name("layers"),
    ));

    let base = match build_factory(
        &config.base,
        &config.viewport,
        &config.load,
        None,
        dispatcher.clone(),
    ) {
        Ok(factory) => factory,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut layers = Vec::with_capacity(config.layers.len());
    for template in &config.layers {
        match build_factory(
            template,
            &config.viewport,
            &config.load,
            Some(pool.clone()),
            dispatcher.clone(),
        ) {
            Ok(factory) => layers.push(factory),
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        }
    }

    let compound = CompoundTileFactory::new(base.clone());
    compound.set_layer_factories(layers.clone());
    compound.set_show_loading_percent(config.show_percent);

    info!(
        base = %config.base,
        layers = layers.len(),
        zoom = config.viewport.zoom,
        "Compositing viewport"
    );

    let started = Instant::now();
    let coords = config.viewport.coords();
    let composites: Vec<(TileCoord, Arc<dyn MapTile>)> = coords
        .iter()
        .map(|c| (*c, compound.get_tile(c.x, c.y, c.zoom)))
        .collect();

    let mut summary = RunSummary {
        requested: composites.len(),
        ..RunSummary::default()
    };
    let deadline = tokio::time::Instant::now() + config.load.wait_timeout();

    for (coord, composite) in &composites {
        // Same identities the composite was built from
        let mut upstream = vec![base.get_tile(coord.x, coord.y, coord.zoom)];
        upstream.extend(
            layers
                .iter()
                .map(|layer| layer.get_tile_lazy(coord.x, coord.y, coord.zoom)),
        );

        let mut outcome = Outcome::Loaded;
        for tile in &upstream {
            match wait_for_tile(tile, deadline).await {
                Outcome::Loaded => {}
                Outcome::Placeholder => outcome = Outcome::Placeholder,
                failed => {
                    if let Outcome::Failed(reason) = &failed {
                        warn!(tile = %tile.coord(), locator = tile.locator(), error = %reason, "Layer tile failed");
                    }
                    outcome = failed;
                    break;
                }
            }
        }
        summary.record(&outcome);

        if matches!(outcome, Outcome::Placeholder) {
            continue;
        }
        if let (Some(dir), Some(image)) = (&config.load.output, composite.image()) {
            match write_png(dir, composite.coord(), &image).await {
                Ok(()) => summary.written += 1,
                Err(e) => error!(tile = %composite.coord(), "Failed to write composite: {}", e),
            }
        }
    }

    summary.elapsed_ms = started.elapsed().as_millis();
    summary.cache = Some(base.cache().stats());
    summary.print(config.load.json);
    base.pool().shutdown();
    pool.shutdown();

    if summary.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn tile_source(load: &LoadArgs) -> Result<UriTileSource, String> {
    let http = HttpTileSource::with_options(&load.user_agent, load.request_timeout())
        .map_err(|e| format!("Failed to create HTTP client: {}", e))?;
    Ok(UriTileSource::with_http(http))
}

/// Factory with a cache sized from the command line. Without `pool` it gets
/// a pool of its own.
fn build_factory(
    template: &str,
    viewport: &ViewportArgs,
    load: &LoadArgs,
    pool: Option<Arc<WorkerPool>>,
    dispatcher: EventDispatcher,
) -> Result<Arc<TileFactory>, String> {
    let template = parse_template(template)?;
    let grid = GridInfo::new(0, viewport.max_zoom, viewport.tile_size);
    let pool = pool.unwrap_or_else(|| {
        Arc::new(WorkerPool::new(
            PoolConfig::with_workers(load.workers).name("tiles"),
        ))
    });
    let cache = ImageCache::with_ceilings(load.decoded_cache, load.compressed_cache);

    Ok(TileFactory::builder(
        grid,
        template,
        FetchLoader::new(tile_source(load)?),
        dispatcher,
    )
    .pool(pool)
    .cache(Arc::new(cache))
    .build())
}

/// Wait until `tile` loads or gives up, or until `deadline`.
async fn wait_for_tile(tile: &Arc<Tile>, deadline: tokio::time::Instant) -> Outcome {
    if tile.is_placeholder() {
        return Outcome::Placeholder;
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let id = tile.subscribe(Arc::new(move |event: &TileEvent| {
        if event.is_terminal() {
            let _ = tx.send(event.error().map(ToString::to_string));
        }
    }));

    // Checked after subscribing so a completion in between is not missed
    let outcome = if tile.is_loaded() {
        Outcome::Loaded
    } else if let (false, Some(e)) = (tile.is_loading(), tile.error()) {
        Outcome::Failed(e.to_string())
    } else {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(None)) => Outcome::Loaded,
            Ok(Some(Some(reason))) => Outcome::Failed(reason),
            Ok(None) | Err(_) => Outcome::TimedOut,
        }
    };

    tile.unsubscribe(id);
    outcome
}

async fn write_png(dir: &Path, coord: TileCoord, image: &TileImage) -> Result<(), String> {
    let bytes = encode_png(image).map_err(|e| e.to_string())?;
    let tile_dir = dir.join(coord.zoom.to_string()).join(coord.x.to_string());
    tokio::fs::create_dir_all(&tile_dir)
        .await
        .map_err(|e| format!("{}: {}", tile_dir.display(), e))?;
    let path = tile_dir.join(format!("{}.png", coord.y));
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| format!("{}: {}", path.display(), e))
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "mapview_tiles=debug"
    } else {
        "mapview_tiles=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
