use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CONNECTION, TRANSFER_ENCODING, UPGRADE};
use http::{HeaderName, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Incoming;
use hyper::server::conn::http2;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::DEFAULT_MAX_BODY_SIZE;
use crate::context::ConnectionContext;
use crate::handler::{Dispatch, Handler};
use crate::protocol::{HttpError, has_token};
use crate::provider::{BoxedIo, ConnectionProvider, ServerConnection, Support};

/// Client connection preface, RFC 9113 section 3.4.
const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Headers that are meaningless (and malformed) on an HTTP/2 stream.
const CONNECTION_HEADERS: [HeaderName; 3] = [CONNECTION, TRANSFER_ENCODING, UPGRADE];

#[derive(Debug, Clone)]
pub struct Http2Config {
    pub max_concurrent_streams: Option<u32>,
    pub max_body_size: u64,
}

impl Default for Http2Config {
    fn default() -> Self {
        Self { max_concurrent_streams: Some(200), max_body_size: DEFAULT_MAX_BODY_SIZE }
    }
}

/// Recognises prior-knowledge HTTP/2 by its connection preface and serves it with `hyper`.
#[derive(Debug, Clone, Default)]
pub struct Http2ConnectionProvider {
    config: Http2Config,
}

impl Http2ConnectionProvider {
    pub fn new(config: Http2Config) -> Self {
        Self { config }
    }
}

impl ConnectionProvider for Http2ConnectionProvider {
    fn name(&self) -> &'static str {
        "h2"
    }

    fn bytes_to_identify(&self) -> usize {
        PREFACE.len()
    }

    fn supports(&self, prefix: &[u8]) -> Support {
        if prefix.len() >= PREFACE.len() {
            if &prefix[..PREFACE.len()] == PREFACE { Support::Supported } else { Support::Unsupported }
        } else if PREFACE.starts_with(prefix) {
            Support::Unknown
        } else {
            Support::Unsupported
        }
    }

    fn application_protocols(&self) -> &[&'static str] {
        &["h2"]
    }

    fn connection(&self, ctx: Arc<ConnectionContext>) -> Box<dyn ServerConnection> {
        Box::new(Http2Connection { ctx, config: self.config.clone() })
    }
}

/// Marks a stream whose handler gave up because the connection went away; hyper resets it.
#[derive(Debug, Error)]
#[error("request dispatch aborted")]
struct StreamAborted;

#[derive(Debug)]
pub struct Http2Connection {
    ctx: Arc<ConnectionContext>,
    config: Http2Config,
}

#[async_trait]
impl ServerConnection for Http2Connection {
    async fn handle(self: Box<Self>, io: BoxedIo, handler: Arc<dyn Handler>) -> Result<(), HttpError> {
        let Http2Connection { ctx, config } = *self;

        // fired by a stream whose response asks for the connection to close
        let closing = CancellationToken::new();

        let service = {
            let ctx = Arc::clone(&ctx);
            let closing = closing.clone();
            let max_body_size = config.max_body_size;
            service_fn(move |req: Request<Incoming>| {
                let ctx = Arc::clone(&ctx);
                let handler = Arc::clone(&handler);
                let closing = closing.clone();
                async move { serve_stream(&ctx, handler.as_ref(), &closing, req, max_body_size).await }
            })
        };

        let mut builder = http2::Builder::new(TokioExecutor::new());
        builder.max_concurrent_streams(config.max_concurrent_streams);

        let connection = builder.serve_connection(TokioIo::new(io), service);
        tokio::pin!(connection);

        let result = tokio::select! {
            result = connection.as_mut() => result,
            _ = closing.cancelled() => {
                debug!(connection = ctx.id(), "response asked to close, sending GOAWAY");
                connection.as_mut().graceful_shutdown();
                connection.await
            }
        };
        ctx.cancel();
        match result {
            Ok(()) => {
                info!(connection = ctx.id(), "http2 connection finished");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

async fn serve_stream(
    ctx: &ConnectionContext,
    handler: &dyn Handler,
    closing: &CancellationToken,
    req: Request<Incoming>,
    max_body_size: u64,
) -> Result<Response<Full<Bytes>>, StreamAborted> {
    let (parts, body) = req.into_parts();
    let limit = usize::try_from(max_body_size).unwrap_or(usize::MAX);
    let body = match Limited::new(body, limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.downcast_ref::<LengthLimitError>().is_some() => {
            warn!(connection = ctx.id(), max_body_size, "request stream body too large");
            return Ok(status_response(StatusCode::PAYLOAD_TOO_LARGE));
        }
        Err(e) => {
            warn!(connection = ctx.id(), cause = %e, "can't read request stream body");
            return Ok(status_response(StatusCode::BAD_REQUEST));
        }
    };

    match handler.call(ctx, Request::from_parts(parts, body)).await {
        Dispatch::Response(response) => {
            let (mut parts, body) = response.into_parts();
            if parts.headers.get(CONNECTION).is_some_and(|v| has_token(v.as_bytes(), b"close")) {
                closing.cancel();
            }
            for name in &CONNECTION_HEADERS {
                parts.headers.remove(name);
            }
            parts.version = http::Version::HTTP_2;
            Ok(Response::from_parts(parts, Full::new(body)))
        }
        Dispatch::Aborted => {
            debug!(connection = ctx.id(), "stream dispatch aborted");
            Err(StreamAborted)
        }
    }
}

fn status_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use http::HeaderValue;

    #[test]
    fn identify_preface() {
        let provider = Http2ConnectionProvider::default();
        assert_eq!(provider.bytes_to_identify(), 24);
        assert_eq!(provider.supports(PREFACE), Support::Supported);
        assert_eq!(provider.supports(b"PRI * HTTP/2.0\r\n"), Support::Unknown);
        assert_eq!(provider.supports(b"GET / HTTP/1.1\r\nHost: a\r\n"), Support::Unsupported);
        assert_eq!(provider.supports(b"PRX"), Support::Unsupported);
    }

    #[tokio::test]
    async fn serve_stream_over_hyper_client() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let ctx = Arc::new(ConnectionContext::new("127.0.0.1:40001".parse().unwrap()));
        let handler: Arc<dyn Handler> = Arc::new(handler_fn(|req: Request<Bytes>| async move {
            let mut response = Response::new(Bytes::from(format!("{} {}", req.uri().path(), req.body().len())));
            response.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
            response
        }));
        let connection = Http2ConnectionProvider::default().connection(Arc::clone(&ctx));
        let server = tokio::spawn(connection.handle(Box::pin(server_io), handler));

        let (mut sender, client_connection) =
            hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(client_io)).await.unwrap();
        let client = tokio::spawn(client_connection);

        let request = Request::builder()
            .method("POST")
            .uri("http://localhost/streams")
            .body(Full::new(Bytes::from_static(b"abc")))
            .unwrap();
        let response = sender.send_request(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(CONNECTION).is_none());

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"/streams 3");

        drop(sender);
        client.abort();
        let _ = server.await.unwrap();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn close_response_shuts_connection_down() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let ctx = Arc::new(ConnectionContext::new("127.0.0.1:40002".parse().unwrap()));
        let handler: Arc<dyn Handler> = Arc::new(handler_fn(|req: Request<Bytes>| async move {
            let mut response = Response::new(Bytes::new());
            if req.uri().path() == "/bye" {
                response.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
            }
            response
        }));
        let connection = Http2ConnectionProvider::default().connection(Arc::clone(&ctx));
        let server = tokio::spawn(connection.handle(Box::pin(server_io), handler));

        let (mut sender, client_connection) =
            hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(client_io)).await.unwrap();
        let client = tokio::spawn(client_connection);

        let request = Request::get("http://localhost/stay").body(Full::new(Bytes::new())).unwrap();
        assert_eq!(sender.send_request(request).await.unwrap().status(), StatusCode::OK);
        assert!(!ctx.is_cancelled());

        let request = Request::get("http://localhost/bye").body(Full::new(Bytes::new())).unwrap();
        let response = sender.send_request(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(CONNECTION).is_none());

        // the server ends the connection while the client still holds it open
        let served = tokio::time::timeout(std::time::Duration::from_secs(5), server).await;
        assert!(served.unwrap().unwrap().is_ok());
        assert!(ctx.is_cancelled());

        drop(sender);
        client.abort();
    }

    #[tokio::test]
    async fn oversized_stream_body_is_413() {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let ctx = Arc::new(ConnectionContext::new("127.0.0.1:40003".parse().unwrap()));
        let handler: Arc<dyn Handler> = Arc::new(handler_fn(|_req: Request<Bytes>| async move { Response::new(Bytes::new()) }));
        let provider = Http2ConnectionProvider::new(Http2Config { max_body_size: 4, ..Http2Config::default() });
        let server = tokio::spawn(provider.connection(Arc::clone(&ctx)).handle(Box::pin(server_io), handler));

        let (mut sender, client_connection) =
            hyper::client::conn::http2::handshake(TokioExecutor::new(), TokioIo::new(client_io)).await.unwrap();
        let client = tokio::spawn(client_connection);

        let request = Request::post("http://localhost/upload").body(Full::new(Bytes::from_static(b"too long"))).unwrap();
        let response = sender.send_request(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

        drop(sender);
        client.abort();
        let _ = server.await.unwrap();
    }
}
