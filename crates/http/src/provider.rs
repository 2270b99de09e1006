//! Connection provider SPI.
//!
//! A provider knows how to recognise one protocol from the first bytes a client sends (or from
//! the ALPN identifier a TLS layer negotiated) and how to serve a connection speaking it.
//! Providers are stateless; the per-connection state lives in the [`ServerConnection`] they
//! create.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::context::ConnectionContext;
use crate::handler::Handler;
use crate::protocol::HttpError;

/// Answer of a provider looking at a connection prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Support {
    Supported,
    Unsupported,
    /// The prefix is shorter than the provider's window but still consistent with its protocol.
    Unknown,
}

/// Byte stream handed to a [`ServerConnection`].
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

pub type BoxedIo = Pin<Box<dyn Io>>;

pub trait ConnectionProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// How many leading bytes this provider needs to make a decision.
    fn bytes_to_identify(&self) -> usize;

    /// Inspects the bytes peeked so far; `prefix` may be shorter than the window.
    fn supports(&self, prefix: &[u8]) -> Support;

    /// ALPN identifiers this provider serves.
    fn application_protocols(&self) -> &[&'static str];

    fn connection(&self, ctx: Arc<ConnectionContext>) -> Box<dyn ServerConnection>;
}

impl fmt::Debug for dyn ConnectionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionProvider").field("name", &self.name()).finish()
    }
}

/// A connection owned by the provider that recognised it.
#[async_trait]
pub trait ServerConnection: Send {
    /// Serves requests until the peer leaves or the connection must be closed.
    async fn handle(self: Box<Self>, io: BoxedIo, handler: Arc<dyn Handler>) -> Result<(), HttpError>;
}
