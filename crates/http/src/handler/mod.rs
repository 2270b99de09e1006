//! The seam between a protocol provider and whatever produces responses.
//!
//! Providers decode a complete request, hand it to a [`Handler`] together with the
//! [`ConnectionContext`] and write back whatever [`Dispatch`] says.

use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};

use crate::context::ConnectionContext;

/// Outcome of dispatching a single request.
#[derive(Debug)]
pub enum Dispatch {
    /// Write this response. `Connection: close` in its headers ends the connection afterwards.
    Response(Response<Bytes>),
    /// The connection is gone; write nothing.
    Aborted,
}

#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, ctx: &ConnectionContext, req: Request<Bytes>) -> Dispatch;
}

#[derive(Debug)]
pub struct HandlerFn<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> Handler for HandlerFn<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Fut: Future<Output = Response<Bytes>> + Send,
{
    async fn call(&self, _ctx: &ConnectionContext, req: Request<Bytes>) -> Dispatch {
        Dispatch::Response((self.f)(req).await)
    }
}

/// Wraps an async function over owned requests as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync,
    Fut: Future<Output = Response<Bytes>> + Send,
{
    HandlerFn { f }
}
