//! Protocol selection for freshly accepted connections.
//!
//! The [`ProtocolRegistry`] holds an ordered list of [`ConnectionProvider`]s. A connection is
//! given to the first provider that recognises it, either from the ALPN identifier negotiated
//! by a TLS layer or from the leading bytes the client sends. Bytes read while deciding are
//! replayed through [`Rewind`], so the winner parses the connection from its first byte.

mod rewind;

pub use rewind::Rewind;

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, trace};

use crate::provider::{ConnectionProvider, Support};

#[derive(Debug, Error)]
pub enum SniffError {
    #[error("no registered protocol matches the connection prefix")]
    NoMatchingProtocol,

    #[error("no registered protocol serves application protocol {0:?}")]
    UnknownAlpn(String),

    #[error("timed out identifying the connection protocol")]
    Timeout,

    #[error("io error while identifying the connection protocol: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no protocol provider named {0:?}")]
    UnknownProvider(String),

    #[error("at least one protocol provider must be enabled")]
    Empty,
}

/// Ordered, immutable set of protocol providers.
#[derive(Debug, Clone)]
pub struct ProtocolRegistry {
    providers: Vec<Arc<dyn ConnectionProvider>>,
    peek_window: usize,
}

impl ProtocolRegistry {
    pub fn new(providers: Vec<Arc<dyn ConnectionProvider>>) -> Result<Self, RegistryError> {
        if providers.is_empty() {
            return Err(RegistryError::Empty);
        }
        let peek_window = providers.iter().map(|provider| provider.bytes_to_identify()).max().unwrap_or_default();
        Ok(Self { providers, peek_window })
    }

    /// Keeps only the named providers, in the given order.
    pub fn with_order<S: AsRef<str>>(self, names: &[S]) -> Result<Self, RegistryError> {
        let providers = names
            .iter()
            .map(|name| {
                let name = name.as_ref();
                self.providers
                    .iter()
                    .find(|provider| provider.name() == name)
                    .cloned()
                    .ok_or_else(|| RegistryError::UnknownProvider(name.to_owned()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(providers)
    }

    pub fn providers(&self) -> &[Arc<dyn ConnectionProvider>] {
        &self.providers
    }

    /// Bytes needed for every provider to reach a decision.
    pub fn peek_window(&self) -> usize {
        self.peek_window
    }

    /// ALPN identifiers to advertise, in provider order without duplicates.
    pub fn application_protocols(&self) -> Vec<&'static str> {
        let mut protocols = Vec::new();
        for protocol in self.providers.iter().flat_map(|provider| provider.application_protocols()) {
            if !protocols.contains(protocol) {
                protocols.push(*protocol);
            }
        }
        protocols
    }

    pub fn select_by_alpn(&self, protocol: &str) -> Option<&Arc<dyn ConnectionProvider>> {
        self.providers.iter().find(|provider| provider.application_protocols().iter().any(|p| *p == protocol))
    }

    /// Queries providers in order with the bytes read so far.
    ///
    /// Returns `Ok(None)` while more bytes are needed. A provider answering
    /// [`Support::Unknown`] holds back later providers so the outcome never depends on how the
    /// client's bytes were split across reads. Once `complete` is set (window full or EOF),
    /// `Unknown` is treated as `Unsupported`.
    pub fn select_by_bytes(
        &self,
        prefix: &[u8],
        complete: bool,
    ) -> Result<Option<&Arc<dyn ConnectionProvider>>, SniffError> {
        for provider in &self.providers {
            let window = provider.bytes_to_identify();
            let support = provider.supports(&prefix[..prefix.len().min(window)]);
            trace!(provider = provider.name(), ?support, len = prefix.len(), "query protocol provider");
            match support {
                Support::Supported => return Ok(Some(provider)),
                Support::Unsupported => continue,
                Support::Unknown if complete || prefix.len() >= window => continue,
                Support::Unknown => return Ok(None),
            }
        }
        Err(SniffError::NoMatchingProtocol)
    }

    /// Picks the provider for a new connection.
    ///
    /// With a negotiated ALPN identifier no bytes are read. Otherwise reads until a provider
    /// is selected, the peek window is full or the client stops sending, bounded by `timeout`.
    pub async fn sniff<IO>(
        &self,
        mut io: IO,
        alpn: Option<&str>,
        timeout: Duration,
    ) -> Result<(Arc<dyn ConnectionProvider>, Rewind<IO>), SniffError>
    where
        IO: AsyncRead + Unpin,
    {
        if let Some(alpn) = alpn {
            let provider = self.select_by_alpn(alpn).ok_or_else(|| SniffError::UnknownAlpn(alpn.to_owned()))?;
            debug!(provider = provider.name(), alpn, "selected protocol by alpn");
            return Ok((Arc::clone(provider), Rewind::new(io, Default::default())));
        }

        let mut buf = BytesMut::with_capacity(self.peek_window);
        let provider = tokio::time::timeout(timeout, self.read_prefix(&mut io, &mut buf))
            .await
            .map_err(|_elapsed| SniffError::Timeout)??;
        debug!(provider = provider.name(), peeked = buf.len(), "selected protocol by prefix");
        Ok((provider, Rewind::new(io, buf.freeze())))
    }

    async fn read_prefix<IO>(&self, io: &mut IO, buf: &mut BytesMut) -> Result<Arc<dyn ConnectionProvider>, SniffError>
    where
        IO: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; 64];
        loop {
            let complete = buf.len() >= self.peek_window;
            if let Some(provider) = self.select_by_bytes(buf, complete)? {
                return Ok(Arc::clone(provider));
            }

            // never read past the window, whatever follows belongs to the provider
            let wanted = (self.peek_window - buf.len()).min(chunk.len());
            let n = io.read(&mut chunk[..wanted]).await?;
            if n == 0 {
                trace!(len = buf.len(), "peer closed while sniffing");
                return self.select_by_bytes(buf, true)?.cloned().ok_or(SniffError::NoMatchingProtocol);
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{Http1ConnectionProvider, Http2ConnectionProvider};
    use tokio::io::AsyncWriteExt;

    const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

    fn registry() -> ProtocolRegistry {
        ProtocolRegistry::new(vec![
            Arc::new(Http2ConnectionProvider::default()),
            Arc::new(Http1ConnectionProvider::default()),
        ])
        .unwrap()
    }

    #[test]
    fn window_and_alpn_set() {
        let registry = registry();
        assert_eq!(registry.peek_window(), 24);
        assert_eq!(registry.application_protocols(), vec!["h2", "http/1.1"]);
    }

    #[test]
    fn alpn_h2_wins_over_bytes() {
        let registry = registry();
        assert_eq!(registry.select_by_alpn("h2").unwrap().name(), "h2");
        assert_eq!(registry.select_by_alpn("http/1.1").unwrap().name(), "http/1.1");
        assert!(registry.select_by_alpn("spdy/3").is_none());
    }

    #[test]
    fn selection_is_deterministic() {
        let registry = registry();
        for _ in 0..3 {
            let selected = registry.select_by_bytes(PREFACE, true).unwrap().unwrap();
            assert_eq!(selected.name(), "h2");
        }
        let selected = registry.select_by_bytes(b"GET / HTTP/1.1\r\n", false).unwrap().unwrap();
        assert_eq!(selected.name(), "http/1.1");
    }

    #[test]
    fn partial_preface_waits() {
        let registry = registry();
        assert!(registry.select_by_bytes(b"PRI * H", false).unwrap().is_none());
        assert!(registry.select_by_bytes(b"G", false).unwrap().is_none());
        assert!(matches!(registry.select_by_bytes(b"\x16\x03\x01", false), Err(SniffError::NoMatchingProtocol)));
    }

    #[test]
    fn reorder_and_disable() {
        let registry = registry().with_order(&["http/1.1"]).unwrap();
        assert_eq!(registry.peek_window(), 8);
        assert!(matches!(registry.select_by_bytes(PREFACE, true), Err(SniffError::NoMatchingProtocol)));
        assert!(matches!(registry.clone().with_order(&["h3"]), Err(RegistryError::UnknownProvider(_))));
        assert!(matches!(registry.with_order::<&str>(&[]), Err(RegistryError::Empty)));
    }

    #[tokio::test]
    async fn sniff_keeps_every_byte() {
        let (mut client, server) = tokio::io::duplex(1024);
        let request = b"GET /hello HTTP/1.1\r\nHost: a\r\n\r\n";
        client.write_all(request).await.unwrap();
        drop(client);

        let (provider, mut io) = registry().sniff(server, None, Duration::from_secs(1)).await.unwrap();
        assert_eq!(provider.name(), "http/1.1");

        let mut replayed = Vec::new();
        io.read_to_end(&mut replayed).await.unwrap();
        assert_eq!(replayed, request);
    }

    #[tokio::test]
    async fn short_request_does_not_wait_for_h2_window() {
        let (mut client, server) = tokio::io::duplex(1024);
        client.write_all(b"GET / HTTP/1.0\r\n\r\n").await.unwrap();

        // client stays open, the 18 bytes must be enough
        let (provider, io) = registry().sniff(server, None, Duration::from_secs(5)).await.unwrap();
        assert_eq!(provider.name(), "http/1.1");
        assert!(io.prefix().starts_with(b"GET / HT"));
        drop(client);
    }

    #[tokio::test]
    async fn sniff_h2_preface_across_reads() {
        let (mut client, server) = tokio::io::duplex(1024);
        let registry = registry();
        let sniff = tokio::spawn(async move { registry.sniff(server, None, Duration::from_secs(5)).await });

        client.write_all(&PREFACE[..10]).await.unwrap();
        tokio::task::yield_now().await;
        client.write_all(&PREFACE[10..]).await.unwrap();

        let (provider, io) = sniff.await.unwrap().unwrap();
        assert_eq!(provider.name(), "h2");
        assert_eq!(io.prefix(), PREFACE);
    }

    #[tokio::test]
    async fn reject_unknown_prefix_and_alpn() {
        let (mut client, server) = tokio::io::duplex(1024);
        client.write_all(b"\x16\x03\x01\x02\x00").await.unwrap();
        let result = registry().sniff(server, None, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(SniffError::NoMatchingProtocol)));

        let (_client, server) = tokio::io::duplex(1024);
        let result = registry().sniff(server, Some("spdy/3"), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(SniffError::UnknownAlpn(alpn)) if alpn == "spdy/3"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_client_times_out() {
        let (mut client, server) = tokio::io::duplex(1024);
        client.write_all(b"PRI").await.unwrap();

        let result = registry().sniff(server, None, Duration::from_secs(10)).await;
        assert!(matches!(result, Err(SniffError::Timeout)));
        drop(client);
    }
}
