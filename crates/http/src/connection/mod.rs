//! Built in connection providers.
//!
//! - [`Http1ConnectionProvider`]: HTTP/1.0 and HTTP/1.1 over the crate's own codec, one request
//!   at a time per connection
//! - [`Http2ConnectionProvider`]: prior-knowledge or ALPN negotiated HTTP/2, served by `hyper`
//!   with every stream dispatched on its own task

mod http1;
mod http2;

pub use http1::{Http1Config, Http1Connection, Http1ConnectionProvider};
pub use http2::{Http2Config, Http2Connection, Http2ConnectionProvider};
