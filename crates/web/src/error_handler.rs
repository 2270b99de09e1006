//! Turning errors raised by routes and filters into responses.
//!
//! Handlers are registered per error type. Since a Rust error has no supertypes, lookup walks
//! the error and then its [`Error::source`] chain, outermost first, and the first registered
//! type found wins. Errors nobody registered for get the default mapping:
//!
//! - [`RoutingError`]: its own status and keep-alive
//! - [`HttpException`]: its status, message and keep-alive
//! - anything else: `500 Internal Server Error`

use std::any::TypeId;
use std::error::Error;
use std::sync::Arc;

use http::StatusCode;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::executor::RoutingError;
use crate::handler::BoxError;
use crate::request::RoutingRequest;
use crate::response::{RoutingResponse, RoutingSignal};

type ErasedHandler = Arc<
    dyn Fn(&(dyn Error + 'static), &RoutingRequest, &mut RoutingResponse) -> Option<Result<(), BoxError>>
        + Send
        + Sync,
>;

/// An error that carries the response it should produce.
#[derive(Debug, Error)]
#[error("{status}: {message}")]
pub struct HttpException {
    status: StatusCode,
    message: String,
    keep_alive: bool,
    #[source]
    source: Option<BoxError>,
}

impl HttpException {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into(), keep_alive: true, source: None }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// The connection is closed after this error's response.
    pub fn close_connection(mut self) -> Self {
        self.keep_alive = false;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }
}

/// Error handlers by error type, immutable once routing is built.
#[derive(Clone, Default)]
pub struct ErrorHandlers {
    handlers: Vec<(TypeId, ErasedHandler)>,
}

impl ErrorHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for errors of type `E`, replacing any earlier handler for `E`.
    pub fn register<E, F>(&mut self, handler: F)
    where
        E: Error + 'static,
        F: Fn(&RoutingRequest, &mut RoutingResponse, &E) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        let erased: ErasedHandler = Arc::new(
            move |error: &(dyn Error + 'static), req: &RoutingRequest, res: &mut RoutingResponse| {
                error.downcast_ref::<E>().map(|error| handler(req, res, error))
            },
        );

        let type_id = TypeId::of::<E>();
        match self.handlers.iter_mut().find(|(id, _)| *id == type_id) {
            Some(slot) => slot.1 = erased,
            None => self.handlers.push((type_id, erased)),
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Resolves `error` into the final state of `res`.
    ///
    /// A response that is already sent stands; the connection is only marked non-reusable.
    /// A cancelled connection marks the response aborted and nothing else happens.
    pub fn handle(&self, error: BoxError, req: &RoutingRequest, res: &mut RoutingResponse) {
        let error: &(dyn Error + 'static) = &*error;

        if let Some(RoutingError::ConnectionAborted) = find_cause::<RoutingError>(error) {
            debug!(path = req.path(), "connection aborted while routing");
            res.mark_aborted();
            return;
        }

        if res.is_sent() {
            warn!(path = req.path(), error = %error, "error raised after the response was sent");
            res.close_connection();
            return;
        }

        res.reset();
        match self.lookup(error, req, res) {
            Some(Ok(())) => {}
            Some(Err(handler_error)) => {
                error!(path = req.path(), error = %error, handler_error = %handler_error, "error handler failed");
                if !res.is_sent() {
                    res.reset();
                    internal_server_error(res);
                }
            }
            None => default_response(error, req, res),
        }

        if res.take_signal() != RoutingSignal::None {
            warn!(path = req.path(), "error handlers cannot next or re-route, signal ignored");
        }
        if matches!(find_cause::<RoutingError>(error), Some(RoutingError::TooManyReroutes { .. })) {
            res.close_connection();
        }
        if !res.is_sent() {
            res.commit();
        }
    }

    fn lookup(
        &self,
        error: &(dyn Error + 'static),
        req: &RoutingRequest,
        res: &mut RoutingResponse,
    ) -> Option<Result<(), BoxError>> {
        let mut current = Some(error);
        while let Some(cause) = current {
            for (_, handler) in &self.handlers {
                if let Some(result) = handler(cause, req, res) {
                    return Some(result);
                }
            }
            current = cause.source();
        }
        None
    }
}

fn find_cause<'e, E: Error + 'static>(error: &'e (dyn Error + 'static)) -> Option<&'e E> {
    let mut current = Some(error);
    while let Some(cause) = current {
        if let Some(found) = cause.downcast_ref::<E>() {
            return Some(found);
        }
        current = cause.source();
    }
    None
}

fn default_response(error: &(dyn Error + 'static), req: &RoutingRequest, res: &mut RoutingResponse) {
    if let Some(routing) = find_cause::<RoutingError>(error) {
        debug!(path = req.path(), error = %routing, "routing failed");
        res.set_status(routing.status());
        if !routing.keep_alive() {
            res.close_connection();
        }
    } else if let Some(exception) = find_cause::<HttpException>(error) {
        debug!(path = req.path(), error = %exception, "http exception");
        res.set_status(exception.status());
        if !exception.keep_alive() {
            res.close_connection();
        }
        if !exception.message().is_empty() {
            res.set_entity(exception.message().to_owned());
        }
    } else {
        error!(path = req.path(), error = %error, "unhandled error");
        internal_server_error(res);
    }
}

fn internal_server_error(res: &mut RoutingResponse) {
    res.set_status(StatusCode::INTERNAL_SERVER_ERROR);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prologue::Prologue;
    use bytes::Bytes;
    use http::{HeaderMap, Method, Version};
    use std::fmt;

    fn request() -> RoutingRequest {
        RoutingRequest::new(Prologue::new(Method::GET, "/", None, Version::HTTP_11), HeaderMap::new(), Bytes::new())
    }

    #[derive(Debug)]
    struct Db;

    impl fmt::Display for Db {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("db unavailable")
        }
    }

    impl Error for Db {}

    #[derive(Debug, Error)]
    #[error("lookup failed")]
    struct Lookup(#[source] Db);

    #[test]
    fn registered_handler_produces_response() {
        let mut handlers = ErrorHandlers::new();
        handlers.register(|_req: &RoutingRequest, res: &mut RoutingResponse, _err: &Db| {
            res.status(StatusCode::SERVICE_UNAVAILABLE)?;
            res.send("try later")?;
            Ok(())
        });

        let mut res = RoutingResponse::new();
        res.write("partial").unwrap();
        handlers.handle(Box::new(Db), &request(), &mut res);

        assert!(res.is_sent());
        assert_eq!(res.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(res.entity(), b"try later");
    }

    #[test]
    fn outermost_registered_type_wins() {
        let mut handlers = ErrorHandlers::new();
        handlers.register(|_req: &RoutingRequest, res: &mut RoutingResponse, _err: &Db| {
            res.send("db")?;
            Ok(())
        });
        handlers.register(|_req: &RoutingRequest, res: &mut RoutingResponse, _err: &Lookup| {
            res.send("lookup")?;
            Ok(())
        });

        let mut res = RoutingResponse::new();
        handlers.handle(Box::new(Lookup(Db)), &request(), &mut res);
        assert_eq!(res.entity(), b"lookup");
    }

    #[test]
    fn source_chain_reaches_registered_cause() {
        let mut handlers = ErrorHandlers::new();
        handlers.register(|_req: &RoutingRequest, res: &mut RoutingResponse, _err: &Db| {
            res.send("db")?;
            Ok(())
        });

        let mut res = RoutingResponse::new();
        handlers.handle(Box::new(Lookup(Db)), &request(), &mut res);
        assert_eq!(res.entity(), b"db");
    }

    #[test]
    fn re_registering_replaces() {
        let mut handlers = ErrorHandlers::new();
        handlers.register(|_req: &RoutingRequest, _res: &mut RoutingResponse, _err: &Db| Ok(()));
        handlers.register(|_req: &RoutingRequest, res: &mut RoutingResponse, _err: &Db| {
            res.status(StatusCode::BAD_GATEWAY)?;
            Ok(())
        });
        assert_eq!(handlers.len(), 1);

        let mut res = RoutingResponse::new();
        handlers.handle(Box::new(Db), &request(), &mut res);
        assert_eq!(res.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn default_mappings() {
        let handlers = ErrorHandlers::new();

        let mut res = RoutingResponse::new();
        handlers.handle(Box::new(Db), &request(), &mut res);
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(res.keep_alive());

        let mut res = RoutingResponse::new();
        let not_found = RoutingError::NotFound { method: Method::GET, path: "/x".into() };
        handlers.handle(Box::new(not_found), &request(), &mut res);
        assert_eq!(res.status_code(), StatusCode::NOT_FOUND);
        assert!(res.keep_alive());

        let mut res = RoutingResponse::new();
        let exception = HttpException::bad_request("missing id").close_connection();
        handlers.handle(Box::new(exception), &request(), &mut res);
        assert_eq!(res.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(res.entity(), b"missing id");
        assert!(!res.keep_alive());
    }

    #[test]
    fn too_many_reroutes_always_closes() {
        let mut handlers = ErrorHandlers::new();
        handlers.register(|_req: &RoutingRequest, res: &mut RoutingResponse, _err: &RoutingError| {
            res.status(StatusCode::LOOP_DETECTED)?;
            Ok(())
        });

        let mut res = RoutingResponse::new();
        handlers.handle(Box::new(RoutingError::TooManyReroutes { max: 10 }), &request(), &mut res);
        assert_eq!(res.status_code(), StatusCode::LOOP_DETECTED);
        assert!(!res.keep_alive());
        assert!(res.is_sent());
    }

    #[test]
    fn handler_signals_are_discarded() {
        let mut handlers = ErrorHandlers::new();
        handlers.register(|_req: &RoutingRequest, res: &mut RoutingResponse, _err: &Db| {
            res.reroute("/error-page");
            Ok(())
        });

        let mut res = RoutingResponse::new();
        handlers.handle(Box::new(Db), &request(), &mut res);
        assert_eq!(res.signal(), &RoutingSignal::None);
        assert!(res.is_sent());
    }

    #[test]
    fn sent_response_stands() {
        let handlers = ErrorHandlers::new();
        let mut res = RoutingResponse::new();
        res.send("done").unwrap();

        handlers.handle(Box::new(Db), &request(), &mut res);
        assert_eq!(res.status_code(), StatusCode::OK);
        assert_eq!(res.entity(), b"done");
        assert!(!res.keep_alive());
    }

    #[test]
    fn aborted_bypasses_handlers() {
        let mut handlers = ErrorHandlers::new();
        handlers.register(|_req: &RoutingRequest, res: &mut RoutingResponse, _err: &RoutingError| {
            res.send("should not happen")?;
            Ok(())
        });

        let mut res = RoutingResponse::new();
        handlers.handle(Box::new(RoutingError::ConnectionAborted), &request(), &mut res);
        assert!(res.is_aborted());
        assert!(!res.is_sent());
    }

    #[test]
    fn failing_handler_falls_back_to_500() {
        let mut handlers = ErrorHandlers::new();
        handlers.register(|_req: &RoutingRequest, res: &mut RoutingResponse, _err: &Db| {
            res.status(StatusCode::IM_A_TEAPOT)?;
            Err("handler broke".into())
        });

        let mut res = RoutingResponse::new();
        handlers.handle(Box::new(Db), &request(), &mut res);
        assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(res.is_sent());
    }
}
