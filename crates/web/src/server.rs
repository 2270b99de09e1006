use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use switchyard_http::codec::DEFAULT_MAX_BODY_SIZE;
use switchyard_http::connection::{Http1Config, Http1ConnectionProvider, Http2Config, Http2ConnectionProvider};
use switchyard_http::context::ConnectionContext;
use switchyard_http::handler::Handler as TransportHandler;
use switchyard_http::protocol::HttpError;
use switchyard_http::provider::ConnectionProvider;
use switchyard_http::sniffer::{ProtocolRegistry, RegistryError, SniffError};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::routing::HttpRouting;

/// Server settings, usually deserialized from a config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Overrides the bound configured on the routing when set.
    pub max_reroutes: Option<u32>,
    pub idle_timeout_secs: u64,
    pub sniff_timeout_secs: u64,
    /// Enabled providers by name, in sniffing order. Empty keeps every provider.
    pub protocols: Vec<String>,
    pub read_buffer_size: usize,
    pub max_body_size: u64,
    pub max_concurrent_streams: Option<u32>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_reroutes: None,
            idle_timeout_secs: 30,
            sniff_timeout_secs: 10,
            protocols: Vec::new(),
            read_buffer_size: 8 * 1024,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            max_concurrent_streams: Some(200),
        }
    }
}

impl ServerConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sniff_timeout(&self) -> Duration {
        Duration::from_secs(self.sniff_timeout_secs)
    }

    /// HTTP/2 then HTTP/1.1. The first byte already rules one of them out, so neither waits
    /// for the other's window.
    fn default_providers(&self) -> Vec<Arc<dyn ConnectionProvider>> {
        let http2 = Http2Config { max_concurrent_streams: self.max_concurrent_streams, max_body_size: self.max_body_size };
        let http1 = Http1Config {
            idle_timeout: self.idle_timeout(),
            max_body_size: self.max_body_size,
            read_buffer_size: self.read_buffer_size,
        };
        vec![Arc::new(Http2ConnectionProvider::new(http2)), Arc::new(Http1ConnectionProvider::new(http1))]
    }
}

#[derive(Error, Debug)]
pub enum ServerBuildError {
    #[error("routing must be set")]
    MissingRouting,

    #[error("address must be set")]
    MissingAddress,

    #[error("invalid address: {source}")]
    InvalidAddress {
        #[source]
        source: io::Error,
    },

    #[error("invalid protocol configuration: {0}")]
    Registry(#[from] RegistryError),
}

/// Why a single connection ended abnormally.
#[derive(Error, Debug)]
pub enum ConnectionError {
    #[error(transparent)]
    Sniff(#[from] SniffError),

    #[error(transparent)]
    Http(#[from] HttpError),
}

pub struct ServerBuilder {
    routing: Option<HttpRouting>,
    address: Option<io::Result<Vec<SocketAddr>>>,
    providers: Option<Vec<Arc<dyn ConnectionProvider>>>,
    config: ServerConfig,
}

impl ServerBuilder {
    fn new() -> Self {
        Self { routing: None, address: None, providers: None, config: ServerConfig::default() }
    }

    /// Resolution errors are reported by [`ServerBuilder::build`].
    pub fn address<A: ToSocketAddrs>(mut self, address: A) -> Self {
        self.address = Some(address.to_socket_addrs().map(|addrs| addrs.collect()));
        self
    }

    pub fn routing(mut self, routing: HttpRouting) -> Self {
        self.routing = Some(routing);
        self
    }

    /// Replaces the built in HTTP/2 and HTTP/1.1 providers.
    pub fn providers(mut self, providers: Vec<Arc<dyn ConnectionProvider>>) -> Self {
        self.providers = Some(providers);
        self
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<Server, ServerBuildError> {
        let mut routing = self.routing.ok_or(ServerBuildError::MissingRouting)?;
        let address = match self.address {
            None => return Err(ServerBuildError::MissingAddress),
            Some(Err(source)) => return Err(ServerBuildError::InvalidAddress { source }),
            Some(Ok(address)) if address.is_empty() => return Err(ServerBuildError::MissingAddress),
            Some(Ok(address)) => address,
        };

        let providers = self.providers.unwrap_or_else(|| self.config.default_providers());
        let mut registry = ProtocolRegistry::new(providers)?;
        if !self.config.protocols.is_empty() {
            registry = registry.with_order(&self.config.protocols)?;
        }

        if let Some(max_reroutes) = self.config.max_reroutes {
            routing.set_max_reroutes(max_reroutes);
        }

        Ok(Server {
            routing: Arc::new(routing),
            registry: Arc::new(registry),
            address,
            config: Arc::new(self.config),
            shutdown: CancellationToken::new(),
        })
    }
}

#[derive(Clone)]
pub struct Server {
    routing: Arc<HttpRouting>,
    registry: Arc<ProtocolRegistry>,
    address: Vec<SocketAddr>,
    config: Arc<ServerConfig>,
    shutdown: CancellationToken,
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    pub fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    /// Stops the accept loop of this server and every clone of it.
    ///
    /// Connections already accepted are served to completion.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Binds the configured address and serves until [`Server::shutdown`].
    pub async fn start(self) {
        info!(address = ?self.address, "start listening");
        let tcp_listener = match TcpListener::bind(self.address.as_slice()).await {
            Ok(tcp_listener) => tcp_listener,
            Err(e) => {
                error!(cause = %e, "bind server error");
                return;
            }
        };

        self.serve(tcp_listener).await
    }

    /// Accept loop over an already bound listener; one task per connection.
    ///
    /// Runs the routing's start hooks first and its stop hooks once the loop ends.
    pub async fn serve(self, tcp_listener: TcpListener) {
        self.routing.before_start();

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                accepted = tcp_listener.accept() => accepted,
            };

            let (tcp_stream, peer) = match accepted {
                Ok(stream_and_addr) => stream_and_addr,
                Err(e) => {
                    warn!(cause = %e, "failed to accept");
                    continue;
                }
            };

            if let Err(e) = tcp_stream.set_nodelay(true) {
                debug!(%peer, cause = %e, "failed to set TCP_NODELAY");
            }

            let server = self.clone();
            tokio::spawn(async move {
                match server.serve_connection(tcp_stream, peer, None).await {
                    Ok(()) => info!(%peer, "finished process, connection shutdown"),
                    Err(e) => warn!(%peer, cause = %e, "connection ended with error"),
                }
            });
        }

        self.routing.after_stop();
        info!("server stopped");
    }

    /// Serves one connection: sniffs the protocol, then hands the stream to its provider.
    ///
    /// A TLS layer calls this with the decrypted stream and the ALPN identifier it negotiated,
    /// which then decides the protocol without sniffing.
    pub async fn serve_connection<IO>(&self, io: IO, peer: SocketAddr, alpn: Option<&str>) -> Result<(), ConnectionError>
    where
        IO: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (provider, io) = self.registry.sniff(io, alpn, self.config.sniff_timeout()).await?;

        let mut ctx = ConnectionContext::new(peer);
        if let Some(alpn) = alpn {
            ctx = ctx.with_alpn(alpn);
        }
        let ctx = Arc::new(ctx);
        debug!(connection = ctx.id(), %peer, protocol = provider.name(), "connection accepted");

        let handler: Arc<dyn TransportHandler> = Arc::clone(&self.routing) as Arc<dyn TransportHandler>;
        provider.connection(ctx).handle(Box::pin(io), handler).await?;
        Ok(())
    }
}
