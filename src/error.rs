use thiserror::Error;

/// Errors raised while opening the byte stream behind a tile locator
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// The server answered with a non-success status
    #[error("HTTP {status} while fetching {locator}")]
    Http { locator: String, status: u16 },

    /// Network or connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Resource not found
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// The locator could not be interpreted as a URI or path
    #[error("Invalid locator {locator}: {reason}")]
    InvalidLocator { locator: String, reason: String },

    /// URI scheme with no registered source
    #[error("Unsupported locator scheme: {0}")]
    UnsupportedScheme(String),

    /// Local I/O error
    #[error("I/O error: {0}")]
    Io(String),
}

/// Errors recorded on a tile while it is loaded.
///
/// Callers of `get_tile` never receive these directly; they show up on the
/// tile's error field and inside `loading-error` / `unrecoverable-error`
/// notifications.
#[derive(Debug, Clone, Error)]
pub enum TileError {
    /// Fetching the raw bytes failed
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Bytes were fetched but could not be decoded to an image
    #[error("Failed to decode tile {locator}: {message}")]
    Decode { locator: String, message: String },

    /// Decoding needed more memory than the decoder is allowed to allocate
    #[error("Insufficient memory to decode tile {locator}")]
    OutOfMemory { locator: String },

    /// A locally rendered tile could not be painted
    #[error("Failed to render tile: {message}")]
    Render { message: String },

    /// The worker pool was saturated and dropped all queued work
    #[error("Tile load rejected: worker pool saturated")]
    Rejected,

    /// The factory's cache was replaced while the tile was queued
    #[error("Tile load cancelled: cache was reset")]
    CacheReset,

    /// A background task panicked or was cancelled
    #[error("Worker failure: {message}")]
    Worker { message: String },
}

impl TileError {
    /// Whether this error signals memory pressure rather than a real failure.
    pub fn is_memory_pressure(&self) -> bool {
        matches!(self, TileError::OutOfMemory { .. })
    }
}

/// Errors from the shared worker pool
#[derive(Debug, Clone, Error)]
pub enum PoolError {
    /// The pool was shut down and accepts no more work
    #[error("Worker pool has been shut down")]
    Shutdown,

    /// The job queue is full; queued work has been drained
    #[error("Worker pool saturated: {capacity} jobs already queued")]
    Saturated { capacity: usize },

    /// No tokio runtime is available to host the workers
    #[error("No tokio runtime available for the worker pool")]
    NoRuntime,
}

/// Errors when parsing locator templates
#[derive(Debug, Clone, Error)]
pub enum TemplateError {
    /// A required placeholder is absent
    #[error("Locator template {template} is missing the {placeholder} placeholder")]
    MissingPlaceholder {
        template: String,
        placeholder: &'static str,
    },
}
