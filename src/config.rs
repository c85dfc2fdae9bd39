//! Command-line configuration for the `mapview-tiles` binary.
//!
//! Every option can also be set through an environment variable with the
//! `MAPTILES_` prefix:
//!
//! - `MAPTILES_TEMPLATE` - Locator template for `fetch` (default: OpenStreetMap)
//! - `MAPTILES_BASE` - Base layer template for `composite` (default: OpenStreetMap)
//! - `MAPTILES_ZOOM` - Zoom level of the viewport (required)
//! - `MAPTILES_WORKERS` - Minimum worker count; the pool bursts to twice this (default: 4)
//! - `MAPTILES_DECODED_CACHE` - Decoded tier ceiling in bytes (default: 50000000)
//! - `MAPTILES_COMPRESSED_CACHE` - Compressed tier ceiling in bytes (default: 50000000)
//! - `MAPTILES_TIMEOUT` - Per-request HTTP timeout in seconds (default: 30)
//! - `MAPTILES_WAIT` - Seconds to wait for the whole viewport (default: 120)
//! - `MAPTILES_USER_AGENT` - User agent sent to tile servers
//! - `MAPTILES_OUTPUT` - Directory PNGs are written to

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::cache::{DEFAULT_COMPRESSED_CEILING, DEFAULT_DECODED_CEILING};
use crate::factory::presets::{OSM_MAX_ZOOM, OSM_URL_TEMPLATE};
use crate::factory::DEFAULT_MIN_WORKERS;
use crate::io::DEFAULT_USER_AGENT;
use crate::tile::{TileCoord, UrlTemplate, DEFAULT_TILE_SIZE, MAX_SUPPORTED_ZOOM};

// =============================================================================
// Default Values
// =============================================================================

/// Default viewport width and height in tiles.
pub const DEFAULT_VIEWPORT_TILES: u32 = 3;

/// Largest viewport, in tiles, a single run may request.
pub const MAX_VIEWPORT_TILES: u32 = 1024;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default time to wait for the whole viewport, in seconds.
pub const DEFAULT_WAIT_SECS: u64 = 120;

// =============================================================================
// CLI Arguments
// =============================================================================

/// mapview-tiles - Fetch, cache and composite map tiles.
#[derive(Parser, Debug, Clone)]
#[command(name = "mapview-tiles")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Load a viewport of tiles from one locator template.
    Fetch(FetchConfig),

    /// Load a viewport from a base template and composite overlay layers on it.
    Composite(CompositeConfig),
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

/// Rectangle of tiles to load.
#[derive(Args, Debug, Clone)]
pub struct ViewportArgs {
    /// Zoom level.
    #[arg(short, long, env = "MAPTILES_ZOOM")]
    pub zoom: u32,

    /// Column of the top-left tile. Values outside the world wrap around.
    #[arg(short = 'x', long, default_value_t = 0, allow_negative_numbers = true)]
    pub x: i32,

    /// Row of the top-left tile.
    #[arg(short = 'y', long, default_value_t = 0, allow_negative_numbers = true)]
    pub y: i32,

    /// Viewport width in tiles.
    #[arg(long, default_value_t = DEFAULT_VIEWPORT_TILES)]
    pub cols: u32,

    /// Viewport height in tiles.
    #[arg(long, default_value_t = DEFAULT_VIEWPORT_TILES)]
    pub rows: u32,

    /// Edge length of a tile in pixels.
    #[arg(long, default_value_t = DEFAULT_TILE_SIZE)]
    pub tile_size: u32,

    /// Deepest zoom level the tile source serves.
    #[arg(long, default_value_t = OSM_MAX_ZOOM)]
    pub max_zoom: u32,
}

impl ViewportArgs {
    /// Coordinates of the viewport, row by row.
    pub fn coords(&self) -> Vec<TileCoord> {
        let mut coords = Vec::with_capacity((self.cols * self.rows) as usize);
        for row in 0..self.rows {
            for col in 0..self.cols {
                coords.push(TileCoord::new(
                    self.x.saturating_add(col as i32),
                    self.y.saturating_add(row as i32),
                    self.zoom,
                ));
            }
        }
        coords
    }

    fn validate(&self) -> Result<(), String> {
        if self.max_zoom > MAX_SUPPORTED_ZOOM {
            return Err(format!("max_zoom must be at most {}", MAX_SUPPORTED_ZOOM));
        }
        if self.zoom > self.max_zoom {
            return Err(format!(
                "zoom {} is deeper than max_zoom {}",
                self.zoom, self.max_zoom
            ));
        }
        if self.cols == 0 || self.rows == 0 {
            return Err("cols and rows must be greater than 0".to_string());
        }
        if self.cols.saturating_mul(self.rows) > MAX_VIEWPORT_TILES {
            return Err(format!(
                "viewport is limited to {} tiles",
                MAX_VIEWPORT_TILES
            ));
        }
        if self.tile_size == 0 {
            return Err("tile_size must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Worker, cache and output settings shared by all subcommands.
#[derive(Args, Debug, Clone)]
pub struct LoadArgs {
    /// Minimum number of workers; the pool bursts to twice this.
    #[arg(long, default_value_t = DEFAULT_MIN_WORKERS, env = "MAPTILES_WORKERS")]
    pub workers: usize,

    /// Decoded tier ceiling in bytes (0 disables the tier).
    #[arg(long, default_value_t = DEFAULT_DECODED_CEILING, env = "MAPTILES_DECODED_CACHE")]
    pub decoded_cache: usize,

    /// Compressed tier ceiling in bytes (0 disables the tier).
    #[arg(long, default_value_t = DEFAULT_COMPRESSED_CEILING, env = "MAPTILES_COMPRESSED_CACHE")]
    pub compressed_cache: usize,

    /// Per-request HTTP timeout in seconds.
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS, env = "MAPTILES_TIMEOUT")]
    pub timeout: u64,

    /// Seconds to wait for every tile to finish before giving up.
    #[arg(long, default_value_t = DEFAULT_WAIT_SECS, env = "MAPTILES_WAIT")]
    pub wait: u64,

    /// User agent sent to tile servers.
    #[arg(long, default_value = DEFAULT_USER_AGENT, env = "MAPTILES_USER_AGENT")]
    pub user_agent: String,

    /// Directory to write `{z}/{x}/{y}.png` files to.
    #[arg(short, long, env = "MAPTILES_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Print the run summary as JSON.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl LoadArgs {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait)
    }

    fn validate(&self) -> Result<(), String> {
        if self.workers == 0 {
            return Err("workers must be greater than 0".to_string());
        }
        if self.timeout == 0 {
            return Err("timeout must be greater than 0".to_string());
        }
        if self.wait == 0 {
            return Err("wait must be greater than 0".to_string());
        }
        if self.user_agent.trim().is_empty() {
            return Err("user_agent must not be empty".to_string());
        }
        Ok(())
    }
}

/// Arguments of the `fetch` subcommand.
#[derive(Args, Debug, Clone)]
pub struct FetchConfig {
    /// Locator template with `{z}`, `{x}` and `{y}` placeholders.
    #[arg(short, long, default_value = OSM_URL_TEMPLATE, env = "MAPTILES_TEMPLATE")]
    pub template: String,

    #[command(flatten)]
    pub viewport: ViewportArgs,

    #[command(flatten)]
    pub load: LoadArgs,
}

impl FetchConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.viewport.validate()?;
        self.load.validate()?;
        parse_template(&self.template)?;
        Ok(())
    }
}

/// Arguments of the `composite` subcommand.
#[derive(Args, Debug, Clone)]
pub struct CompositeConfig {
    /// Locator template of the base layer.
    #[arg(short, long, default_value = OSM_URL_TEMPLATE, env = "MAPTILES_BASE")]
    pub base: String,

    /// Locator template of an overlay layer. Repeat to stack several,
    /// bottom first.
    #[arg(short, long = "layer")]
    pub layers: Vec<String>,

    /// Draw the share of loaded tiles over incomplete composites.
    #[arg(long, default_value_t = false)]
    pub show_percent: bool,

    #[command(flatten)]
    pub viewport: ViewportArgs,

    #[command(flatten)]
    pub load: LoadArgs,
}

impl CompositeConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        self.viewport.validate()?;
        self.load.validate()?;
        parse_template(&self.base)?;
        for layer in &self.layers {
            parse_template(layer)?;
        }
        Ok(())
    }
}

/// Parse a locator template, turning the error into a message.
pub fn parse_template(template: &str) -> Result<UrlTemplate, String> {
    UrlTemplate::parse(template).map_err(|e| e.to_string())
}

// =============================================================================
// Tests
// =============================================================================
