//! Filters wrap routing.
//!
//! Filters run in registration order around the routing executor. Each one decides whether to
//! [`FilterChain::proceed`] or to answer on its own. Errors from inside the chain are resolved
//! by the error handlers before `proceed` returns, so code after `proceed` sees the final
//! response:
//!
//! ```
//! use async_trait::async_trait;
//! use switchyard_web::{BoxError, Filter, FilterChain, RoutingRequest, RoutingResponse};
//! use tracing::info;
//!
//! struct AccessLog;
//!
//! #[async_trait]
//! impl Filter for AccessLog {
//!     async fn filter(
//!         &self,
//!         chain: FilterChain<'_>,
//!         req: &mut RoutingRequest,
//!         res: &mut RoutingResponse,
//!     ) -> Result<(), BoxError> {
//!         chain.proceed(req, res).await;
//!         info!(path = req.path(), status = %res.status_code(), "served");
//!         Ok(())
//!     }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error_handler::ErrorHandlers;
use crate::executor::RoutingExecutor;
use crate::handler::BoxError;
use crate::request::RoutingRequest;
use crate::response::RoutingResponse;

#[async_trait]
pub trait Filter: Send + Sync {
    async fn filter(
        &self,
        chain: FilterChain<'_>,
        req: &mut RoutingRequest,
        res: &mut RoutingResponse,
    ) -> Result<(), BoxError>;

    fn before_start(&self) {}

    fn after_stop(&self) {}
}

/// The rest of the chain after the current filter, ending in the executor.
pub struct FilterChain<'a> {
    filters: &'a [Arc<dyn Filter>],
    executor: &'a RoutingExecutor<'a>,
    error_handlers: &'a ErrorHandlers,
}

impl<'a> FilterChain<'a> {
    pub(crate) fn new(
        filters: &'a [Arc<dyn Filter>],
        executor: &'a RoutingExecutor<'a>,
        error_handlers: &'a ErrorHandlers,
    ) -> Self {
        Self { filters, executor, error_handlers }
    }

    /// Runs the next filter, or routing once no filters are left.
    ///
    /// Whatever that step fails with goes through the error handlers here, exactly once.
    pub async fn proceed(self, req: &mut RoutingRequest, res: &mut RoutingResponse) {
        let Self { filters, executor, error_handlers } = self;

        let result = match filters.split_first() {
            Some((filter, rest)) => {
                let chain = FilterChain { filters: rest, executor, error_handlers };
                filter.filter(chain, req, res).await
            }
            None => executor.execute(req, res).await,
        };

        if let Err(e) = result {
            error_handlers.handle(e, req, res);
        }
    }

    /// Filters not yet run.
    pub fn remaining(&self) -> usize {
        self.filters.len()
    }
}

/// A filter that runs a closure first and proceeds unless the closure sent a response.
pub struct FnFilter<F> {
    f: F,
}

#[async_trait]
impl<F> Filter for FnFilter<F>
where
    F: Fn(&mut RoutingRequest, &mut RoutingResponse) -> Result<(), BoxError> + Send + Sync,
{
    async fn filter(
        &self,
        chain: FilterChain<'_>,
        req: &mut RoutingRequest,
        res: &mut RoutingResponse,
    ) -> Result<(), BoxError> {
        (self.f)(req, res)?;
        if !res.is_sent() {
            chain.proceed(req, res).await;
        }
        Ok(())
    }
}

pub fn filter_fn<F>(f: F) -> FnFilter<F>
where
    F: Fn(&mut RoutingRequest, &mut RoutingResponse) -> Result<(), BoxError> + Send + Sync,
{
    FnFilter { f }
}
