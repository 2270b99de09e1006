//! Response side of a routing exchange.
//!
//! A [`RoutingResponse`] is created once per request and threaded through filters, route
//! handlers and error handlers. Besides status, headers and entity it records the single
//! [`RoutingSignal`] a handler may raise and whether the response has been sent.
//!
//! Once sent, nothing about the response can change. Headers freeze earlier, at the first
//! entity byte written.

use bytes::{Bytes, BytesMut};
use http::header::{CONNECTION, CONTENT_TYPE};
use http::{HeaderMap, HeaderName, HeaderValue, Response, StatusCode};
use thiserror::Error;

/// What a handler asked the router to do after it returned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum RoutingSignal {
    #[default]
    None,
    /// Fall through to the next matching route of the same crawl.
    Next,
    /// Restart routing against a new path.
    Reroute { path: String, query: Option<String> },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResponseError {
    #[error("response headers are already committed")]
    HeadersCommitted,

    #[error("response has already been sent")]
    AlreadySent,
}

/// An entity body together with whether it is text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    bytes: Bytes,
    text: bool,
}

impl Entity {
    pub fn empty() -> Self {
        Self { bytes: Bytes::new(), text: false }
    }
}

impl From<&'static str> for Entity {
    fn from(value: &'static str) -> Self {
        Self { bytes: Bytes::from_static(value.as_bytes()), text: true }
    }
}

impl From<String> for Entity {
    fn from(value: String) -> Self {
        Self { bytes: Bytes::from(value), text: true }
    }
}

impl From<Bytes> for Entity {
    fn from(bytes: Bytes) -> Self {
        Self { bytes, text: false }
    }
}

impl From<Vec<u8>> for Entity {
    fn from(value: Vec<u8>) -> Self {
        Self { bytes: Bytes::from(value), text: false }
    }
}

impl From<&'static [u8]> for Entity {
    fn from(value: &'static [u8]) -> Self {
        Self { bytes: Bytes::from_static(value), text: false }
    }
}

#[derive(Debug)]
pub struct RoutingResponse {
    status: StatusCode,
    headers: HeaderMap,
    entity: BytesMut,
    has_entity: bool,
    text_entity: bool,
    signal: RoutingSignal,
    sent: bool,
    headers_committed: bool,
    keep_alive: bool,
    aborted: bool,
}

impl Default for RoutingResponse {
    fn default() -> Self {
        Self::new()
    }
}

impl RoutingResponse {
    pub fn new() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            entity: BytesMut::new(),
            has_entity: false,
            text_entity: false,
            signal: RoutingSignal::None,
            sent: false,
            headers_committed: false,
            keep_alive: true,
            aborted: false,
        }
    }

    pub fn status(&mut self, status: StatusCode) -> Result<&mut Self, ResponseError> {
        self.ensure_headers_open()?;
        self.status = status;
        Ok(self)
    }

    pub fn status_code(&self) -> StatusCode {
        self.status
    }

    pub fn header(&mut self, name: HeaderName, value: HeaderValue) -> Result<&mut Self, ResponseError> {
        self.ensure_headers_open()?;
        self.headers.insert(name, value);
        Ok(self)
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> Result<&mut HeaderMap, ResponseError> {
        self.ensure_headers_open()?;
        Ok(&mut self.headers)
    }

    /// Appends to the entity. The first write commits the headers.
    pub fn write(&mut self, chunk: impl AsRef<[u8]>) -> Result<(), ResponseError> {
        if self.sent {
            return Err(ResponseError::AlreadySent);
        }
        self.headers_committed = true;
        self.has_entity = true;
        self.entity.extend_from_slice(chunk.as_ref());
        Ok(())
    }

    /// Sends `entity` as the complete response. Only the first send succeeds.
    pub fn send(&mut self, entity: impl Into<Entity>) -> Result<(), ResponseError> {
        if self.sent {
            return Err(ResponseError::AlreadySent);
        }
        let Entity { bytes, text } = entity.into();
        if !self.has_entity {
            self.text_entity = text;
        }
        self.entity.extend_from_slice(&bytes);
        self.has_entity = true;
        self.commit();
        Ok(())
    }

    /// Sends the response without an entity.
    pub fn send_empty(&mut self) -> Result<(), ResponseError> {
        if self.sent {
            return Err(ResponseError::AlreadySent);
        }
        self.commit();
        Ok(())
    }

    /// Continue with the next route that matches the request.
    pub fn next(&mut self) {
        self.signal = RoutingSignal::Next;
    }

    /// Route the request again as if it had been sent to `path`.
    pub fn reroute(&mut self, path: impl Into<String>) {
        self.signal = RoutingSignal::Reroute { path: path.into(), query: None };
    }

    pub fn reroute_with_query(&mut self, path: impl Into<String>, query: impl Into<String>) {
        self.signal = RoutingSignal::Reroute { path: path.into(), query: Some(query.into()) };
    }

    pub fn signal(&self) -> &RoutingSignal {
        &self.signal
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// True once the headers can no longer change: after the first write or after send.
    pub fn is_committed(&self) -> bool {
        self.headers_committed
    }

    pub fn has_entity(&self) -> bool {
        self.has_entity
    }

    pub fn entity(&self) -> &[u8] {
        &self.entity
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Asks the protocol layer to close the connection once this response is written.
    pub fn close_connection(&mut self) {
        self.keep_alive = false;
    }

    /// True when the connection went away and nothing must be written.
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub(crate) fn take_signal(&mut self) -> RoutingSignal {
        std::mem::take(&mut self.signal)
    }

    pub(crate) fn reset_signal(&mut self) {
        self.signal = RoutingSignal::None;
    }

    /// Marks the response as sent with whatever it holds now.
    pub(crate) fn commit(&mut self) {
        self.headers_committed = true;
        self.sent = true;
    }

    pub(crate) fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    /// Replaces the entity regardless of header state.
    pub(crate) fn set_entity(&mut self, entity: impl Into<Entity>) {
        let Entity { bytes, text } = entity.into();
        self.entity.clear();
        self.entity.extend_from_slice(&bytes);
        self.has_entity = true;
        self.text_entity = text;
    }

    pub(crate) fn mark_aborted(&mut self) {
        self.aborted = true;
    }

    /// Drops everything a failed handler produced so an error handler starts clean.
    pub(crate) fn reset(&mut self) {
        debug_assert!(!self.sent);
        self.status = StatusCode::OK;
        self.headers.clear();
        self.entity.clear();
        self.has_entity = false;
        self.text_entity = false;
        self.headers_committed = false;
        self.signal = RoutingSignal::None;
    }

    pub fn into_response(self) -> Response<Bytes> {
        let mut headers = self.headers;
        if self.text_entity && !headers.contains_key(CONTENT_TYPE) {
            if let Ok(value) = mime::TEXT_PLAIN_UTF_8.as_ref().parse::<HeaderValue>() {
                headers.insert(CONTENT_TYPE, value);
            }
        }
        if !self.keep_alive {
            headers.insert(CONNECTION, HeaderValue::from_static("close"));
        }

        let mut response = Response::new(self.entity.freeze());
        *response.status_mut() = self.status;
        *response.headers_mut() = headers;
        response
    }

    fn ensure_headers_open(&self) -> Result<(), ResponseError> {
        if self.headers_committed { Err(ResponseError::HeadersCommitted) } else { Ok(()) }
    }
}
