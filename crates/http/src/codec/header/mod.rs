//! HTTP/1.x head processing.
//!
//! - [`HeaderDecoder`]: decodes request heads from raw bytes
//! - [`HeaderEncoder`]: encodes response heads to raw bytes

mod header_decoder;
mod header_encoder;

pub use header_decoder::HeaderDecoder;
pub use header_encoder::HeaderEncoder;
