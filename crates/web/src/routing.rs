//! [`HttpRouting`]: routes, filters and error handlers assembled into the request handler a
//! protocol provider dispatches to.

use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::DATE;
use http::{Method, Request};
use switchyard_http::context::ConnectionContext;
use switchyard_http::handler::{Dispatch, Handler as TransportHandler};
use tracing::{Instrument, debug_span};

use crate::date::DateService;
use crate::error_handler::ErrorHandlers;
use crate::executor::{DEFAULT_MAX_REROUTES, RoutingExecutor};
use crate::filter::{Filter, FilterChain};
use crate::handler::{BoxError, Handler};
use crate::request::RoutingRequest;
use crate::response::RoutingResponse;
use crate::router::{HttpRules, HttpService, MethodPredicate, PathMatcher, RouteError, RouteTable};

/// Immutable routing configuration shared by every connection.
pub struct HttpRouting {
    table: RouteTable,
    filters: Vec<Arc<dyn Filter>>,
    error_handlers: ErrorHandlers,
    max_reroutes: u32,
}

impl HttpRouting {
    pub fn builder() -> HttpRoutingBuilder {
        HttpRoutingBuilder::new()
    }

    /// Routing without routes: every request is answered `404 Not Found`.
    pub fn empty() -> Self {
        Self {
            table: RouteTable::default(),
            filters: Vec::new(),
            error_handlers: ErrorHandlers::new(),
            max_reroutes: DEFAULT_MAX_REROUTES,
        }
    }

    pub fn max_reroutes(&self) -> u32 {
        self.max_reroutes
    }

    pub(crate) fn set_max_reroutes(&mut self, max_reroutes: u32) {
        self.max_reroutes = max_reroutes;
    }

    /// Filters first, then the route table.
    pub fn before_start(&self) {
        self.filters.iter().for_each(|filter| filter.before_start());
        self.table.before_start();
    }

    pub fn after_stop(&self) {
        self.filters.iter().for_each(|filter| filter.after_stop());
        self.table.after_stop();
    }

    /// Runs filters and routing for one request.
    ///
    /// On return the response is either sent or marked aborted.
    pub async fn route(&self, ctx: &ConnectionContext, req: &mut RoutingRequest, res: &mut RoutingResponse) {
        let executor = RoutingExecutor::new(ctx, &self.table, self.max_reroutes);
        FilterChain::new(&self.filters, &executor, &self.error_handlers).proceed(req, res).await;

        if !res.is_sent() && !res.is_aborted() {
            res.commit();
        }
    }
}

#[async_trait]
impl TransportHandler for HttpRouting {
    async fn call(&self, ctx: &ConnectionContext, request: Request<Bytes>) -> Dispatch {
        let request_id = ctx.next_request_id();
        let span = debug_span!("request", connection = ctx.id(), request = request_id);

        async move {
            let mut req = RoutingRequest::from_http(request, request_id, Some(ctx.peer_addr()));
            let mut res = RoutingResponse::new();
            self.route(ctx, &mut req, &mut res).await;

            if res.is_aborted() {
                return Dispatch::Aborted;
            }

            let mut response = res.into_response();
            if let Some(date) = DateService::get_global_instance().http_date() {
                response.headers_mut().insert(DATE, date);
            }
            Dispatch::Response(response)
        }
        .instrument(span)
        .await
    }
}

macro_rules! builder_method_route {
    ($($method:ident),* $(,)?) => {
        $(
            pub fn $method<H: Handler + 'static>(mut self, pattern: &str, handler: H) -> Self {
                self.rules.$method(pattern, handler);
                self
            }
        )*
    };
}

pub struct HttpRoutingBuilder {
    rules: HttpRules,
    filters: Vec<Arc<dyn Filter>>,
    error_handlers: ErrorHandlers,
    max_reroutes: u32,
}

impl HttpRoutingBuilder {
    fn new() -> Self {
        Self {
            rules: HttpRules::new(),
            filters: Vec::new(),
            error_handlers: ErrorHandlers::new(),
            max_reroutes: DEFAULT_MAX_REROUTES,
        }
    }

    pub fn route<H: Handler + 'static>(mut self, method: Method, pattern: &str, handler: H) -> Self {
        self.rules.route(method, pattern, handler);
        self
    }

    builder_method_route!(get, post, put, delete, head, options, connect, patch, trace, any_path);

    pub fn any<H: Handler + 'static>(mut self, handler: H) -> Self {
        self.rules.any(handler);
        self
    }

    pub fn route_with<H: Handler + 'static>(mut self, methods: MethodPredicate, path: PathMatcher, handler: H) -> Self {
        self.rules.route_with(methods, path, handler);
        self
    }

    pub fn register<S: HttpService + 'static>(mut self, prefix: &str, service: S) -> Self {
        self.rules.register(prefix, service);
        self
    }

    /// Adds a filter; filters run in the order they are added.
    pub fn filter<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Handles errors of type `E` raised anywhere in routing, or found in an error's source chain.
    pub fn error<E, F>(mut self, handler: F) -> Self
    where
        E: Error + 'static,
        F: Fn(&RoutingRequest, &mut RoutingResponse, &E) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.error_handlers.register(handler);
        self
    }

    /// Bound on routing attempts per request; the default is 10.
    pub fn max_reroutes(mut self, max_reroutes: u32) -> Self {
        self.max_reroutes = max_reroutes;
        self
    }

    pub fn build(self) -> Result<HttpRouting, RouteError> {
        Ok(HttpRouting {
            table: self.rules.into_table()?,
            filters: self.filters,
            error_handlers: self.error_handlers,
            max_reroutes: self.max_reroutes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handler::HttpException;
    use crate::filter::filter_fn;
    use crate::handler::handler_fn;
    use http::header::{CONNECTION, CONTENT_TYPE};
    use http::{Response, StatusCode};
    use std::sync::Mutex;

    fn ctx() -> ConnectionContext {
        ConnectionContext::new("127.0.0.1:40001".parse().unwrap())
    }

    async fn call(routing: &HttpRouting, method: Method, uri: &str) -> Response<Bytes> {
        let request = Request::builder().method(method).uri(uri).body(Bytes::new()).unwrap();
        match routing.call(&ctx(), request).await {
            Dispatch::Response(response) => response,
            Dispatch::Aborted => panic!("request unexpectedly aborted"),
        }
    }

    #[tokio::test]
    async fn next_then_send() {
        let routing = HttpRouting::builder()
            .get("/a", handler_fn(|_req, res| {
                res.next();
                Ok(())
            }))
            .get("/a", handler_fn(|_req, res| {
                res.send("ok")?;
                Ok(())
            }))
            .build()
            .unwrap();

        let response = call(&routing, Method::GET, "/a").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(&response.body()[..], b"ok");
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
        assert!(response.headers().contains_key(DATE));
    }

    #[tokio::test]
    async fn reroute_to_new_path() {
        let routing = HttpRouting::builder()
            .get("/old", handler_fn(|_req, res| {
                res.reroute("/new");
                Ok(())
            }))
            .get("/new", handler_fn(|_req, res| {
                res.send("moved")?;
                Ok(())
            }))
            .build()
            .unwrap();

        let response = call(&routing, Method::GET, "/old").await;
        assert_eq!(&response.body()[..], b"moved");
    }

    #[tokio::test]
    async fn empty_routing_answers_404() {
        let response = call(&HttpRouting::empty(), Method::GET, "/missing").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(CONNECTION).is_none());
    }

    #[tokio::test]
    async fn reroute_loop_closes_connection() {
        let routing = HttpRouting::builder()
            .get("/loop", handler_fn(|_req, res| {
                res.reroute("/loop");
                Ok(())
            }))
            .build()
            .unwrap();

        let response = call(&routing, Method::GET, "/loop").await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[CONNECTION], "close");
    }

    struct Record {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl Filter for Record {
        async fn filter(
            &self,
            chain: FilterChain<'_>,
            req: &mut RoutingRequest,
            res: &mut RoutingResponse,
        ) -> Result<(), BoxError> {
            self.log.lock().unwrap().push(format!("{} before", self.name));
            chain.proceed(req, res).await;
            self.log.lock().unwrap().push(format!("{} after {}", self.name, res.status_code().as_u16()));
            Ok(())
        }

        fn before_start(&self) {
            self.log.lock().unwrap().push(format!("{} start", self.name));
        }

        fn after_stop(&self) {
            self.log.lock().unwrap().push(format!("{} stop", self.name));
        }
    }

    #[test]
    fn lifecycle_runs_filters_before_services() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let service_log = Arc::clone(&log);
        let routing = HttpRouting::builder()
            .register("/api", move |rules: &mut HttpRules| {
                service_log.lock().unwrap().push("routing".to_owned());
                rules.get("/ping", handler_fn(|_req, _res| Ok(())));
            })
            .filter(Record { name: "first", log: Arc::clone(&log) })
            .filter(Record { name: "second", log: Arc::clone(&log) })
            .build()
            .unwrap();

        routing.before_start();
        routing.after_stop();
        assert_eq!(*log.lock().unwrap(), ["routing", "first start", "second start", "first stop", "second stop"]);
    }

    #[tokio::test]
    async fn filters_wrap_in_order_and_see_final_status() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let routing = HttpRouting::builder()
            .filter(Record { name: "outer", log: Arc::clone(&log) })
            .filter(Record { name: "inner", log: Arc::clone(&log) })
            .get("/fail", handler_fn(|_req, _res| Err(HttpException::forbidden("no").into())))
            .build()
            .unwrap();

        let response = call(&routing, Method::GET, "/fail").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(&response.body()[..], b"no");
        assert_eq!(*log.lock().unwrap(), ["outer before", "inner before", "inner after 403", "outer after 403"]);
    }

    #[tokio::test]
    async fn filter_short_circuits() {
        let routing = HttpRouting::builder()
            .filter(filter_fn(|req, res| {
                if !req.headers().contains_key("x-token") {
                    res.status(StatusCode::UNAUTHORIZED)?;
                    res.send_empty()?;
                }
                Ok(())
            }))
            .get("/secret", handler_fn(|_req, res| {
                res.send("secret")?;
                Ok(())
            }))
            .build()
            .unwrap();

        let response = call(&routing, Method::GET, "/secret").await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.body().is_empty());

        let request = Request::get("/secret").header("x-token", "1").body(Bytes::new()).unwrap();
        let Dispatch::Response(response) = routing.call(&ctx(), request).await else {
            panic!("request unexpectedly aborted");
        };
        assert_eq!(&response.body()[..], b"secret");
    }

    #[tokio::test]
    async fn filter_errors_go_to_error_handlers() {
        #[derive(Debug, thiserror::Error)]
        #[error("rate limited")]
        struct RateLimited;

        let routing = HttpRouting::builder()
            .filter(filter_fn(|_req, _res| Err(RateLimited.into())))
            .error(|_req: &RoutingRequest, res: &mut RoutingResponse, _err: &RateLimited| {
                res.status(StatusCode::TOO_MANY_REQUESTS)?;
                Ok(())
            })
            .any(handler_fn(|_req, res| {
                res.send("unreachable")?;
                Ok(())
            }))
            .build()
            .unwrap();

        let response = call(&routing, Method::POST, "/anything").await;
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.body().is_empty());
    }

    #[tokio::test]
    async fn filter_without_proceed_leaves_empty_response() {
        struct Swallow;

        #[async_trait]
        impl Filter for Swallow {
            async fn filter(
                &self,
                _chain: FilterChain<'_>,
                _req: &mut RoutingRequest,
                _res: &mut RoutingResponse,
            ) -> Result<(), BoxError> {
                Ok(())
            }
        }

        let routing = HttpRouting::builder().filter(Swallow).build().unwrap();
        let response = call(&routing, Method::GET, "/").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.body().is_empty());
    }

    #[tokio::test]
    async fn cancelled_connection_is_aborted() {
        let routing = HttpRouting::builder()
            .get("/", handler_fn(|_req, res| {
                res.send("late")?;
                Ok(())
            }))
            .build()
            .unwrap();

        let ctx = ctx();
        ctx.cancel();
        let request = Request::get("/").body(Bytes::new()).unwrap();
        assert!(matches!(routing.call(&ctx, request).await, Dispatch::Aborted));
    }

    #[test]
    fn invalid_route_fails_build() {
        let result = HttpRouting::builder().get("no-slash", handler_fn(|_req, _res| Ok(()))).build();
        assert!(matches!(result, Err(RouteError::InvalidPath(_))));
    }
}
