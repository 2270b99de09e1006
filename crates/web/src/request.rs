//! Request side of a routing exchange.
//!
//! - [`RoutingRequest`]: what handlers read; its prologue is replaced on re-route and its path
//!   parameters are rebound for every candidate route
//! - [`PathParams`]: parameters captured by the path matcher of the current route

use std::net::SocketAddr;

use bytes::Bytes;
use http::{Extensions, HeaderMap, Method, Request};

use crate::prologue::Prologue;

/// A request as seen by filters and route handlers.
#[derive(Debug)]
pub struct RoutingRequest {
    prologue: Prologue,
    params: PathParams,
    headers: HeaderMap,
    entity: Bytes,
    request_id: u64,
    peer_addr: Option<SocketAddr>,
    extensions: Extensions,
}

impl RoutingRequest {
    pub fn new(prologue: Prologue, headers: HeaderMap, entity: Bytes) -> Self {
        Self {
            prologue,
            params: PathParams::empty(),
            headers,
            entity,
            request_id: 0,
            peer_addr: None,
            extensions: Extensions::new(),
        }
    }

    /// Converts a decoded transport request.
    pub fn from_http(request: Request<Bytes>, request_id: u64, peer_addr: Option<SocketAddr>) -> Self {
        let (parts, entity) = request.into_parts();
        let prologue = Prologue::from_uri(parts.method, &parts.uri, parts.version);
        Self {
            prologue,
            params: PathParams::empty(),
            headers: parts.headers,
            entity,
            request_id,
            peer_addr,
            extensions: parts.extensions,
        }
    }

    pub fn with_request_id(mut self, request_id: u64) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn prologue(&self) -> &Prologue {
        &self.prologue
    }

    pub fn method(&self) -> &Method {
        self.prologue.method()
    }

    pub fn path(&self) -> &str {
        self.prologue.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.prologue.query()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn entity(&self) -> &Bytes {
        &self.entity
    }

    pub fn path_params(&self) -> &PathParams {
        &self.params
    }

    /// Shorthand for `path_params().get(name)`.
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name)
    }

    /// Unique within the connection the request arrived on.
    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    pub(crate) fn set_prologue(&mut self, prologue: Prologue) {
        self.prologue = prologue;
        self.params = PathParams::empty();
    }

    pub(crate) fn bind_params(&mut self, params: PathParams) {
        self.params = params;
    }
}

/// Named path segments captured by a route pattern such as `/users/{id}`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams {
    params: Vec<(String, String)>,
}

impl PathParams {
    #[inline]
    pub fn empty() -> Self {
        Self { params: Vec::new() }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.params.iter().find(|(name, _)| name == key).map(|(_, value)| value.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(name, value)| (name.as_str(), value.as_str()))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.params.len()
    }
}

impl<'k, 'v> From<matchit::Params<'k, 'v>> for PathParams {
    fn from(params: matchit::Params<'k, 'v>) -> Self {
        Self { params: params.iter().map(|(name, value)| (name.to_owned(), value.to_owned())).collect() }
    }
}
