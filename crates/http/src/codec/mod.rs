//! HTTP/1.x codec.
//!
//! - [`RequestDecoder`]: decodes a request head, frames its body (`Content-Length` or chunked)
//!   and yields a fully buffered `http::Request<Bytes>`
//! - [`ResponseEncoder`]: writes a buffered `http::Response<Bytes>` with a `Content-Length`
//!
//! Both implement the `tokio_util::codec` traits, so they can drive a raw buffer as well as
//! a `Framed` transport.

mod body;
mod header;
mod request_decoder;
mod response_encoder;

pub use request_decoder::{DEFAULT_MAX_BODY_SIZE, Message, RequestDecoder};
pub use response_encoder::ResponseEncoder;
