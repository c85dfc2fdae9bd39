//! Ready-made factories for public tile providers.

use std::sync::Arc;

use super::loader::FetchLoader;
use super::pool::{PoolConfig, WorkerPool};
use super::tile_factory::TileFactory;
use crate::error::FetchError;
use crate::io::HttpTileSource;
use crate::tile::{EventDispatcher, GridInfo, UrlTemplate, DEFAULT_TILE_SIZE};

/// Standard OpenStreetMap tile server.
pub const OSM_URL_TEMPLATE: &str = "https://tile.openstreetmap.org/{z}/{x}/{y}.png";

/// Deepest zoom level served by the standard OpenStreetMap layer.
pub const OSM_MAX_ZOOM: u32 = 19;

/// The OpenStreetMap tile usage policy allows two connections per client.
pub const OSM_MAX_CONNECTIONS: usize = 2;

/// Factory for the standard OpenStreetMap layer.
///
/// Runs on its own pool of [`OSM_MAX_CONNECTIONS`] workers, never bursting
/// above it.
pub fn openstreetmap(dispatcher: EventDispatcher) -> Result<Arc<TileFactory>, FetchError> {
    let template = UrlTemplate::parse(OSM_URL_TEMPLATE).map_err(|e| FetchError::InvalidLocator {
        locator: OSM_URL_TEMPLATE.to_string(),
        reason: e.to_string(),
    })?;
    let config = PoolConfig {
        name: "openstreetmap".to_string(),
        min_workers: OSM_MAX_CONNECTIONS,
        max_workers: OSM_MAX_CONNECTIONS,
        ..PoolConfig::default()
    };

    Ok(TileFactory::builder(
        GridInfo::new(0, OSM_MAX_ZOOM, DEFAULT_TILE_SIZE),
        template,
        FetchLoader::new(HttpTileSource::new()?),
        dispatcher,
    )
    .pool(Arc::new(WorkerPool::new(config)))
    .build())
}
