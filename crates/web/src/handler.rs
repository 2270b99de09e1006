use crate::request::RoutingRequest;
use crate::response::RoutingResponse;
use async_trait::async_trait;

use std::error::Error;
use std::sync::Arc;

pub type BoxError = Box<dyn Error + Send + Sync>;

/// Serves a matched route.
///
/// A handler either completes the response (`send`, `write`), raises a routing signal
/// (`next`, `reroute`) or returns an error for the error handlers to resolve. Returning
/// without doing any of these produces an empty `200 OK`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, req: &mut RoutingRequest, res: &mut RoutingResponse) -> Result<(), BoxError>;

    /// Called once before the server accepts connections.
    fn before_start(&self) {}

    /// Called once after the server stopped accepting connections.
    fn after_stop(&self) {}
}

#[async_trait]
impl<H: Handler + ?Sized> Handler for Arc<H> {
    async fn handle(&self, req: &mut RoutingRequest, res: &mut RoutingResponse) -> Result<(), BoxError> {
        (**self).handle(req, res).await
    }

    fn before_start(&self) {
        (**self).before_start()
    }

    fn after_stop(&self) {
        (**self).after_stop()
    }
}

/// A handler backed by a synchronous closure.
#[derive(Debug)]
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: Fn(&mut RoutingRequest, &mut RoutingResponse) -> Result<(), BoxError> + Send + Sync,
{
    async fn handle(&self, req: &mut RoutingRequest, res: &mut RoutingResponse) -> Result<(), BoxError> {
        (self.f)(req, res)
    }
}

pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&mut RoutingRequest, &mut RoutingResponse) -> Result<(), BoxError> + Send + Sync,
{
    FnHandler { f }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prologue::Prologue;
    use bytes::Bytes;
    use http::{HeaderMap, Method, Version};

    #[tokio::test]
    async fn closure_handler_sees_request() {
        let handler = handler_fn(|req, res| {
            res.send(format!("{} {}", req.method(), req.path()))?;
            Ok(())
        });

        let mut req = RoutingRequest::new(
            Prologue::new(Method::DELETE, "/items/1", None, Version::HTTP_11),
            HeaderMap::new(),
            Bytes::new(),
        );
        let mut res = RoutingResponse::new();
        handler.handle(&mut req, &mut res).await.unwrap();

        assert!(res.is_sent());
        assert_eq!(res.entity(), b"DELETE /items/1");
    }
}
