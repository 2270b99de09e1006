//! Connection layer of the switchyard server.
//!
//! Accepted connections are handed to a [`sniffer::ProtocolRegistry`], which picks the
//! [`provider::ConnectionProvider`] that owns the connection from the ALPN identifier a TLS
//! layer negotiated or from the first bytes the client sends. The winning provider decodes
//! requests and dispatches each one to a [`handler::Handler`], writing back whatever it answers.
//!
//! # Modules
//!
//! - [`provider`]: the provider SPI and the [`provider::Support`] answer of a sniff
//! - [`sniffer`]: provider registry, prefix sniffing and the [`sniffer::Rewind`] stream
//! - [`connection`]: built in HTTP/1.1 and HTTP/2 providers
//! - [`context`]: per-connection identity and cancellation
//! - [`handler`]: the seam towards request routing
//! - [`codec`]: HTTP/1.x request decoder and response encoder
//! - [`protocol`]: request head and error types
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use http::{Request, Response};
//! use switchyard_http::connection::{Http1ConnectionProvider, Http2ConnectionProvider};
//! use switchyard_http::context::ConnectionContext;
//! use switchyard_http::handler::{Handler, handler_fn};
//! use switchyard_http::sniffer::ProtocolRegistry;
//! use tokio::net::TcpListener;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = ProtocolRegistry::new(vec![
//!     Arc::new(Http2ConnectionProvider::default()),
//!     Arc::new(Http1ConnectionProvider::default()),
//! ])?;
//! let handler: Arc<dyn Handler> =
//!     Arc::new(handler_fn(|_req: Request<Bytes>| async { Response::new(Bytes::from_static(b"hello")) }));
//!
//! let listener = TcpListener::bind("127.0.0.1:8080").await?;
//! let (stream, peer) = listener.accept().await?;
//! let (provider, io) = registry.sniff(stream, None, Duration::from_secs(10)).await?;
//! let ctx = Arc::new(ConnectionContext::new(peer));
//! provider.connection(ctx).handle(Box::pin(io), handler).await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod connection;
pub mod context;
pub mod handler;
pub mod protocol;
pub mod provider;
pub mod sniffer;

mod utils;
pub(crate) use utils::ensure;
