use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use http::header::CONNECTION;
use http::{HeaderValue, Response, StatusCode, Version};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::select;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error, info, trace, warn};

use crate::codec::{DEFAULT_MAX_BODY_SIZE, Message, RequestDecoder, ResponseEncoder};
use crate::context::ConnectionContext;
use crate::handler::{Dispatch, Handler};
use crate::protocol::{HttpError, ParseError, SendError, has_token};
use crate::provider::{BoxedIo, ConnectionProvider, ServerConnection, Support};

/// Method tokens, each followed by the space that ends it on a request line.
const METHODS: &[&[u8]] =
    &[b"GET ", b"POST ", b"PUT ", b"DELETE ", b"HEAD ", b"OPTIONS ", b"PATCH ", b"TRACE ", b"CONNECT "];

const WINDOW: usize = 8;

#[derive(Debug, Clone)]
pub struct Http1Config {
    /// How long to wait for the next request bytes before closing.
    pub idle_timeout: Duration,
    pub max_body_size: u64,
    pub read_buffer_size: usize,
}

impl Default for Http1Config {
    fn default() -> Self {
        Self { idle_timeout: Duration::from_secs(30), max_body_size: DEFAULT_MAX_BODY_SIZE, read_buffer_size: 8 * 1024 }
    }
}

/// Recognises HTTP/1.x by its request line and serves it with the built in codec.
#[derive(Debug, Clone, Default)]
pub struct Http1ConnectionProvider {
    config: Http1Config,
}

impl Http1ConnectionProvider {
    pub fn new(config: Http1Config) -> Self {
        Self { config }
    }
}

impl ConnectionProvider for Http1ConnectionProvider {
    fn name(&self) -> &'static str {
        "http/1.1"
    }

    fn bytes_to_identify(&self) -> usize {
        WINDOW
    }

    fn supports(&self, prefix: &[u8]) -> Support {
        if METHODS.iter().any(|method| prefix.starts_with(method)) {
            Support::Supported
        } else if prefix.len() < WINDOW && METHODS.iter().any(|method| method.starts_with(prefix)) {
            Support::Unknown
        } else {
            Support::Unsupported
        }
    }

    fn application_protocols(&self) -> &[&'static str] {
        &["http/1.1"]
    }

    fn connection(&self, ctx: Arc<ConnectionContext>) -> Box<dyn ServerConnection> {
        Box::new(Http1Connection { ctx, config: self.config.clone() })
    }
}

/// One HTTP/1.x connection: requests are read, dispatched and answered strictly in order.
#[derive(Debug)]
pub struct Http1Connection {
    ctx: Arc<ConnectionContext>,
    config: Http1Config,
}

#[async_trait]
impl ServerConnection for Http1Connection {
    async fn handle(self: Box<Self>, mut io: BoxedIo, handler: Arc<dyn Handler>) -> Result<(), HttpError> {
        let Http1Connection { ctx, config } = *self;
        let mut decoder = RequestDecoder::with_max_body_size(config.max_body_size);
        let mut read_buf = BytesMut::with_capacity(config.read_buffer_size);
        let mut write_buf = BytesMut::with_capacity(config.read_buffer_size);

        let result = loop {
            let message = match decoder.decode(&mut read_buf) {
                Ok(Some(message)) => message,
                Ok(None) => {
                    match tokio::time::timeout(config.idle_timeout, io.read_buf(&mut read_buf)).await {
                        Ok(Ok(0)) if read_buf.is_empty() && decoder.is_idle() => {
                            debug!(connection = ctx.id(), "peer closed the connection");
                            break Ok(());
                        }
                        Ok(Ok(0)) => break Err(ParseError::invalid_body("connection closed mid request").into()),
                        Ok(Ok(n)) => {
                            trace!(connection = ctx.id(), n, "read bytes");
                            continue;
                        }
                        Ok(Err(e)) => break Err(ParseError::io(e).into()),
                        Err(_elapsed) => {
                            info!(connection = ctx.id(), timeout = ?config.idle_timeout, "idle timeout, closing");
                            break Ok(());
                        }
                    }
                }
                Err(e) => {
                    error!(connection = ctx.id(), cause = %e, "can't decode request");
                    let response = error_response(&e);
                    if let Err(send_error) = send(&mut io, &mut write_buf, response).await {
                        warn!(cause = %send_error, "failed to send error response");
                    }
                    break Err(e.into());
                }
            };

            match message {
                Message::ExpectContinue => {
                    if let Err(e) = write_continue(&mut io).await {
                        break Err(e.into());
                    }
                    info!(connection = ctx.id(), "receive expect request header, sent continue response");
                }
                Message::Request { request, keep_alive } => {
                    let version = request.version();
                    let dispatch = {
                        let call = handler.call(&ctx, request);
                        tokio::pin!(call);
                        let mut peer_gone = false;
                        loop {
                            select! {
                                biased;
                                dispatch = &mut call => break dispatch,
                                read = io.read_buf(&mut read_buf), if !peer_gone && read_buf.len() < config.read_buffer_size => {
                                    match read {
                                        Ok(0) | Err(_) => {
                                            debug!(connection = ctx.id(), "peer went away during dispatch");
                                            peer_gone = true;
                                            ctx.cancel();
                                        }
                                        // pipelined bytes stay buffered for the next request
                                        Ok(_) => {}
                                    }
                                }
                            }
                        }
                    };

                    let mut response = match dispatch {
                        Dispatch::Response(response) => response,
                        Dispatch::Aborted => {
                            debug!(connection = ctx.id(), "dispatch aborted, nothing to write");
                            break Ok(());
                        }
                    };

                    let close = !keep_alive || wants_close(&response) || ctx.is_cancelled();
                    if version == Version::HTTP_10 {
                        *response.version_mut() = Version::HTTP_10;
                        if !close {
                            response.headers_mut().insert(CONNECTION, HeaderValue::from_static("keep-alive"));
                        }
                    }
                    if close {
                        response.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
                    }

                    if let Err(e) = send(&mut io, &mut write_buf, response).await {
                        break Err(e.into());
                    }
                    if close {
                        debug!(connection = ctx.id(), "closing connection after response");
                        break Ok(());
                    }
                }
            }
        };

        ctx.cancel();
        if let Err(e) = io.shutdown().await {
            trace!(cause = %e, "shutdown after connection end");
        }
        result
    }
}

fn wants_close(response: &Response<Bytes>) -> bool {
    response.headers().get(CONNECTION).is_some_and(|value| has_token(value.as_bytes(), b"close"))
}

fn error_response(e: &ParseError) -> Response<Bytes> {
    let status = match e {
        ParseError::TooLargeHeader { .. } | ParseError::TooManyHeaders { .. } => {
            StatusCode::REQUEST_HEADER_FIELDS_TOO_LARGE
        }
        ParseError::TooLargeBody { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::BAD_REQUEST,
    };
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status;
    response.headers_mut().insert(CONNECTION, HeaderValue::from_static("close"));
    response
}

async fn send(io: &mut BoxedIo, buf: &mut BytesMut, response: Response<Bytes>) -> Result<(), SendError> {
    buf.clear();
    ResponseEncoder::new().encode(response, buf)?;
    io.write_all(buf).await.map_err(SendError::io)?;
    io.flush().await.map_err(SendError::io)
}

async fn write_continue(io: &mut BoxedIo) -> Result<(), SendError> {
    io.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.map_err(SendError::io)?;
    io.flush().await.map_err(SendError::io)
}
