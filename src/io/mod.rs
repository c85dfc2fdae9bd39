//! Byte sources and image codecs behind tile locators.

mod decode;
mod source;

pub use decode::{encode_png, ImageDecoder, TileDecoder, DEFAULT_MAX_DECODE_ALLOC};
pub use source::{
    FileTileSource, HttpTileSource, TileSource, UriTileSource, DEFAULT_HTTP_TIMEOUT,
    DEFAULT_USER_AGENT,
};
