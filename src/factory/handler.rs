use tracing::{error, info};

use crate::error::TileError;
use crate::tile::Tile;

/// Receives per-attempt load failures.
///
/// Called on worker tasks, not the dispatch context; implementations must not
/// block.
pub trait TileErrorHandler: Send + Sync {
    /// Bytes were fetched for `tile` but did not decode.
    fn decode_failed(&self, tile: &Tile, data: &[u8]);

    /// Any other failed attempt.
    fn load_failed(&self, tile: &Tile, error: &TileError);
}

/// Default handler: logs and carries on.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingErrorHandler;

impl TileErrorHandler for LoggingErrorHandler {
    fn decode_failed(&self, tile: &Tile, data: &[u8]) {
        info!(
            locator = tile.locator(),
            bytes = data.len(),
            "Failed to decode tile"
        );
    }

    fn load_failed(&self, tile: &Tile, error: &TileError) {
        error!(locator = tile.locator(), error = %error, "Failed to load tile");
    }
}
