//! The routing state machine.
//!
//! One [`RoutingExecutor`] drives one request. An attempt crawls the route table for the
//! current prologue and ends in one of three [`RoutingResult`]s; `Route` means a handler asked
//! for a re-route and the prologue was replaced, so another attempt is needed.
//!
//! The first attempt runs on its own since almost every request finishes there. Further
//! attempts are counted, and once the count reaches the configured bound the request fails
//! with [`RoutingError::TooManyReroutes`].

use http::{Method, StatusCode};
use switchyard_http::context::ConnectionContext;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::handler::{BoxError, Handler};
use crate::request::RoutingRequest;
use crate::response::{RoutingResponse, RoutingSignal};
use crate::router::RouteTable;

pub const DEFAULT_MAX_REROUTES: u32 = 10;

/// Outcome of a single routing attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingResult {
    /// The prologue changed; crawl again.
    Route,
    /// The response is sent.
    Finish,
    /// No route served the request.
    None,
}

#[derive(Debug, Error)]
pub enum RoutingError {
    #[error("no route for {method} {path}")]
    NotFound { method: Method, path: String },

    #[error("request re-routed too many times (limit {max})")]
    TooManyReroutes { max: u32 },

    #[error("connection closed while the request was being handled")]
    ConnectionAborted,
}

impl RoutingError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::TooManyReroutes { .. } | Self::ConnectionAborted => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the connection may serve further requests after this error.
    pub fn keep_alive(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

pub struct RoutingExecutor<'a> {
    ctx: &'a ConnectionContext,
    table: &'a RouteTable,
    max_reroutes: u32,
}

impl<'a> RoutingExecutor<'a> {
    pub fn new(ctx: &'a ConnectionContext, table: &'a RouteTable, max_reroutes: u32) -> Self {
        Self { ctx, table, max_reroutes }
    }

    /// Routes the request until a handler finishes it.
    ///
    /// Handler errors are returned as they are; `NotFound` and `TooManyReroutes` are raised
    /// here. On success the response is sent.
    pub async fn execute(&self, req: &mut RoutingRequest, res: &mut RoutingResponse) -> Result<(), BoxError> {
        match self.attempt(req, res).await? {
            RoutingResult::Finish => return Ok(()),
            RoutingResult::None => return Err(not_found(req)),
            RoutingResult::Route => {}
        }

        let mut counter: u32 = 1;
        loop {
            counter += 1;
            if counter >= self.max_reroutes {
                warn!(path = req.path(), max = self.max_reroutes, "too many re-routes");
                return Err(RoutingError::TooManyReroutes { max: self.max_reroutes }.into());
            }

            match self.attempt(req, res).await? {
                RoutingResult::Finish => return Ok(()),
                RoutingResult::None => return Err(not_found(req)),
                RoutingResult::Route => {}
            }
        }
    }

    /// One crawl over the route table for the current prologue.
    pub async fn attempt(
        &self,
        req: &mut RoutingRequest,
        res: &mut RoutingResponse,
    ) -> Result<RoutingResult, BoxError> {
        res.reset_signal();

        for candidate in self.table.crawler(req.prologue()) {
            res.reset_signal();
            req.bind_params(candidate.params);

            self.invoke(candidate.handler, req, res).await?;

            match res.take_signal() {
                RoutingSignal::Reroute { path, query } => {
                    if res.is_committed() {
                        warn!(from = req.path(), to = %path, "re-route requested after the response was committed, ignoring");
                        return Ok(finish(res));
                    }
                    debug!(from = req.path(), to = %path, "re-routing");
                    let prologue = req.prologue().reroute(path, query);
                    req.set_prologue(prologue);
                    return Ok(RoutingResult::Route);
                }
                RoutingSignal::Next => {
                    if res.is_committed() {
                        warn!(path = req.path(), "next requested after the response was committed, ignoring");
                        return Ok(finish(res));
                    }
                    trace!(path = req.path(), "falling through to the next route");
                }
                RoutingSignal::None => return Ok(finish(res)),
            }
        }

        Ok(RoutingResult::None)
    }

    /// Runs a handler unless the connection goes away first.
    async fn invoke(
        &self,
        handler: &dyn Handler,
        req: &mut RoutingRequest,
        res: &mut RoutingResponse,
    ) -> Result<(), BoxError> {
        tokio::select! {
            biased;
            _ = self.ctx.cancelled() => Err(RoutingError::ConnectionAborted.into()),
            result = handler.handle(req, res) => result,
        }
    }
}

/// Sends whatever the response holds, if it is not sent yet.
fn finish(res: &mut RoutingResponse) -> RoutingResult {
    if !res.is_sent() {
        res.commit();
    }
    RoutingResult::Finish
}

fn not_found(req: &RoutingRequest) -> BoxError {
    RoutingError::NotFound { method: req.method().clone(), path: req.path().to_owned() }.into()
}
