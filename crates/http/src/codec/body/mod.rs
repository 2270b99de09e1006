//! HTTP/1.x request body framing: `Content-Length` and chunked transfer coding.

mod chunked_decoder;
mod length_decoder;
mod payload_decoder;

use bytes::Bytes;
pub use payload_decoder::PayloadDecoder;

/// One step of a decoded payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadItem {
    /// A chunk of payload data
    Chunk(Bytes),
    /// Marks the end of the payload
    Eof,
}
