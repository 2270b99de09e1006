//! HTTP/1.x request decoder.
//!
//! Runs in two phases: the head is parsed by [`HeaderDecoder`], then the body is framed by
//! [`PayloadDecoder`] and buffered until complete. Handlers downstream always see a fully
//! buffered `Request<Bytes>`.

use crate::codec::body::{PayloadDecoder, PayloadItem};
use crate::codec::header::HeaderDecoder;
use crate::ensure;
use crate::protocol::{ParseError, PayloadSize, RequestHead};
use bytes::{Bytes, BytesMut};
use http::Request;
use tokio_util::codec::Decoder;
use tracing::trace;

/// Default upper bound for a buffered request body.
pub const DEFAULT_MAX_BODY_SIZE: u64 = 4 * 1024 * 1024;

/// Output of [`RequestDecoder`].
#[derive(Debug)]
pub enum Message {
    /// The client sent `Expect: 100-continue` and is waiting before it sends the body.
    ExpectContinue,
    /// A complete request.
    Request {
        request: Request<Bytes>,
        /// Whether the client allows the connection to be reused afterwards
        keep_alive: bool,
    },
}

#[derive(Debug)]
enum State {
    Head,
    Body { head: RequestHead, payload: PayloadDecoder, body: BytesMut },
}

#[derive(Debug)]
pub struct RequestDecoder {
    state: State,
    max_body_size: u64,
}

impl RequestDecoder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn with_max_body_size(max_body_size: u64) -> Self {
        Self { state: State::Head, max_body_size }
    }

    /// True when no partial request is buffered in the decoder.
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Head)
    }
}

impl Default for RequestDecoder {
    fn default() -> Self {
        Self::with_max_body_size(DEFAULT_MAX_BODY_SIZE)
    }
}

impl Decoder for RequestDecoder {
    type Item = Message;
    type Error = ParseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let State::Head = self.state {
            let Some((head, payload_size)) = HeaderDecoder.decode(src)? else {
                return Ok(None);
            };

            if let PayloadSize::Length(length) = payload_size {
                ensure!(length <= self.max_body_size, ParseError::too_large_body(length, self.max_body_size));
            }

            let expect_continue = head.expects_continue() && !payload_size.is_empty();
            let capacity = match payload_size {
                PayloadSize::Length(length) => length as usize,
                _ => 0,
            };
            self.state = State::Body { head, payload: payload_size.into(), body: BytesMut::with_capacity(capacity) };

            if expect_continue && src.is_empty() {
                trace!("client expects 100-continue");
                return Ok(Some(Message::ExpectContinue));
            }
        }

        let State::Body { payload, body, .. } = &mut self.state else {
            return Ok(None);
        };

        loop {
            match payload.decode(src)? {
                Some(PayloadItem::Chunk(bytes)) => {
                    let size = (body.len() + bytes.len()) as u64;
                    ensure!(size <= self.max_body_size, ParseError::too_large_body(size, self.max_body_size));
                    body.extend_from_slice(&bytes);
                }
                Some(PayloadItem::Eof) => break,
                None => return Ok(None),
            }
        }

        let State::Body { head, body, .. } = std::mem::replace(&mut self.state, State::Head) else {
            return Ok(None);
        };
        let keep_alive = head.keep_alive();
        trace!(body_size = body.len(), keep_alive, "decoded request");
        Ok(Some(Message::Request { request: head.body(body.freeze()), keep_alive }))
    }
}
