//! Per-connection state shared by a protocol provider and the handler it dispatches to.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Identity and lifetime of one accepted connection.
///
/// The cancellation token is cancelled when the peer goes away (or the connection is torn
/// down). Handlers race it so that work for a dead connection is abandoned.
#[derive(Debug)]
pub struct ConnectionContext {
    id: u64,
    peer_addr: SocketAddr,
    local_addr: Option<SocketAddr>,
    alpn: Option<String>,
    cancellation: CancellationToken,
    next_request_id: AtomicU64,
}

impl ConnectionContext {
    pub fn new(peer_addr: SocketAddr) -> Self {
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer_addr,
            local_addr: None,
            alpn: None,
            cancellation: CancellationToken::new(),
            next_request_id: AtomicU64::new(1),
        }
    }

    pub fn with_local_addr(mut self, local_addr: SocketAddr) -> Self {
        self.local_addr = Some(local_addr);
        self
    }

    /// Records the application protocol negotiated by a TLS layer.
    pub fn with_alpn(mut self, alpn: impl Into<String>) -> Self {
        self.alpn = Some(alpn.into());
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn alpn(&self) -> Option<&str> {
        self.alpn.as_deref()
    }

    /// Allocates the id of the next request on this connection.
    ///
    /// Safe to call from concurrently served HTTP/2 streams.
    pub fn next_request_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the connection has been cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancellation.cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }
}
