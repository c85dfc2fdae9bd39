use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::trace;
use url::Url;

use crate::error::FetchError;

/// Default User-Agent sent with HTTP tile requests.
///
/// Public tile servers (OpenStreetMap among them) reject anonymous clients.
pub const DEFAULT_USER_AGENT: &str = concat!("mapview-tiles/", env!("CARGO_PKG_VERSION"));

/// Default per-request timeout for HTTP fetches.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens the byte stream behind a tile locator.
///
/// Implementations must be thread-safe; one source is shared by every worker
/// of a factory.
#[async_trait]
pub trait TileSource: Send + Sync {
    /// Fetch the complete payload addressed by `locator`.
    async fn fetch(&self, locator: &str) -> Result<Bytes, FetchError>;
}

#[async_trait]
impl<S: TileSource + ?Sized> TileSource for Arc<S> {
    async fn fetch(&self, locator: &str) -> Result<Bytes, FetchError> {
        (**self).fetch(locator).await
    }
}

// =============================================================================
// HTTP
// =============================================================================

/// Fetches tiles over HTTP(S).
#[derive(Clone)]
pub struct HttpTileSource {
    client: reqwest::Client,
}

impl HttpTileSource {
    /// Create a source with the default user agent and timeout.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_options(DEFAULT_USER_AGENT, DEFAULT_HTTP_TIMEOUT)
    }

    pub fn with_options(user_agent: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Connection(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an already configured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TileSource for HttpTileSource {
    async fn fetch(&self, locator: &str) -> Result<Bytes, FetchError> {
        trace!(locator, "HTTP tile fetch");
        let response = self
            .client
            .get(locator)
            .send()
            .await
            .map_err(|e| FetchError::Connection(format!("Request to {locator} failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound(locator.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::Http {
                locator: locator.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .bytes()
            .await
            .map_err(|e| FetchError::Connection(format!("Failed to read body of {locator}: {e}")))
    }
}

// =============================================================================
// Local files
// =============================================================================

/// Reads tiles from the local filesystem.
///
/// Accepts `file://` URLs and bare paths.
#[derive(Debug, Clone, Default)]
pub struct FileTileSource;

impl FileTileSource {
    pub fn new() -> Self {
        Self
    }

    fn resolve(locator: &str) -> Result<PathBuf, FetchError> {
        if locator.starts_with("file:") {
            let url = Url::parse(locator).map_err(|e| FetchError::InvalidLocator {
                locator: locator.to_string(),
                reason: e.to_string(),
            })?;
            return url.to_file_path().map_err(|_| FetchError::InvalidLocator {
                locator: locator.to_string(),
                reason: "not a local file URL".to_string(),
            });
        }
        Ok(Path::new(locator).to_path_buf())
    }
}

#[async_trait]
impl TileSource for FileTileSource {
    async fn fetch(&self, locator: &str) -> Result<Bytes, FetchError> {
        let path = Self::resolve(locator)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FetchError::NotFound(locator.to_string()))
            }
            Err(e) => Err(FetchError::Io(format!("{}: {e}", path.display()))),
        }
    }
}

// =============================================================================
// Scheme dispatch
// =============================================================================

/// Routes each locator to the HTTP or file source by its URI scheme.
///
/// Locators that do not parse as absolute URIs are treated as file paths.
#[derive(Clone)]
pub struct UriTileSource {
    http: HttpTileSource,
    file: FileTileSource,
}

impl UriTileSource {
    pub fn new() -> Result<Self, FetchError> {
        Ok(Self::with_http(HttpTileSource::new()?))
    }

    pub fn with_http(http: HttpTileSource) -> Self {
        Self {
            http,
            file: FileTileSource::new(),
        }
    }
}

#[async_trait]
impl TileSource for UriTileSource {
    async fn fetch(&self, locator: &str) -> Result<Bytes, FetchError> {
        let scheme = match Url::parse(locator) {
            Ok(url) => url.scheme().to_ascii_lowercase(),
            Err(url::ParseError::RelativeUrlWithoutBase) => return self.file.fetch(locator).await,
            Err(e) => {
                return Err(FetchError::InvalidLocator {
                    locator: locator.to_string(),
                    reason: e.to_string(),
                })
            }
        };

        match scheme.as_str() {
            "http" | "https" => self.http.fetch(locator).await,
            "file" => self.file.fetch(locator).await,
            other => Err(FetchError::UnsupportedScheme(other.to_string())),
        }
    }
}
