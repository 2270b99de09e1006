//! Request routing for the switchyard server.
//!
//! A request travels through the [`Filter`]s in registration order and then reaches the
//! [`RoutingExecutor`], which crawls the route table lazily. Handlers steer routing through
//! the response: [`RoutingResponse::next`] falls through to the next matching route and
//! [`RoutingResponse::reroute`] starts over with a new path. Errors from handlers or filters
//! are turned into responses by the [`ErrorHandlers`].
//!
//! ```no_run
//! use switchyard_web::{HttpRouting, Server, handler_fn};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let routing = HttpRouting::builder()
//!     .get("/", handler_fn(|_req, res| {
//!         res.reroute("/hello");
//!         Ok(())
//!     }))
//!     .get("/hello", handler_fn(|_req, res| {
//!         res.send("hello world")?;
//!         Ok(())
//!     }))
//!     .build()?;
//!
//! Server::builder().address("127.0.0.1:8080").routing(routing).build()?.start().await;
//! # Ok(())
//! # }
//! ```

mod date;
mod error_handler;
mod executor;
mod filter;
mod handler;
mod prologue;
mod request;
mod response;
mod routing;
mod server;

pub mod router;

pub use error_handler::{ErrorHandlers, HttpException};
pub use executor::{DEFAULT_MAX_REROUTES, RoutingError, RoutingExecutor, RoutingResult};
pub use filter::{Filter, FilterChain, FnFilter, filter_fn};
pub use handler::{BoxError, FnHandler, Handler, handler_fn};
pub use prologue::Prologue;
pub use request::{PathParams, RoutingRequest};
pub use response::{Entity, ResponseError, RoutingResponse, RoutingSignal};
pub use routing::{HttpRouting, HttpRoutingBuilder};
pub use server::{ConnectionError, Server, ServerBuildError, ServerBuilder, ServerConfig};
