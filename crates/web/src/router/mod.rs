//! Route table, registration rules and the lazy crawler.
//!
//! Routes are kept in registration order. A route is a [`MethodPredicate`] plus a
//! [`PathMatcher`]; a service groups further routes under a path prefix:
//!
//! ```
//! use switchyard_web::router::{HttpRules, HttpService};
//! use switchyard_web::handler_fn;
//!
//! struct Users;
//!
//! impl HttpService for Users {
//!     fn routing(&self, rules: &mut HttpRules) {
//!         rules.get("/{id}", handler_fn(|req, res| {
//!             let id = req.param("id").unwrap_or_default().to_owned();
//!             res.send(id)?;
//!             Ok(())
//!         }));
//!     }
//! }
//!
//! let mut rules = HttpRules::new();
//! rules.register("/users", Users);
//! assert!(rules.into_table().is_ok());
//! ```

mod crawler;
mod matcher;
pub mod predicate;

use std::sync::Arc;

use http::Method;
use thiserror::Error;

use crate::handler::Handler;
use crate::prologue::Prologue;

pub use crawler::{CrawlerItem, RouteCrawler};
pub use matcher::PathMatcher;
pub use predicate::MethodPredicate;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("route path must start with '/': {0:?}")]
    InvalidPath(String),

    #[error("invalid route pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: matchit::InsertError,
    },
}

pub struct HttpRoute {
    pub(crate) methods: MethodPredicate,
    pub(crate) path: PathMatcher,
    pub(crate) handler: Arc<dyn Handler>,
}

pub struct ServiceRoute {
    pub(crate) prefix: String,
    pub(crate) service: Arc<dyn HttpService>,
    pub(crate) entries: Vec<RouteEntry>,
}

pub enum RouteEntry {
    Http(HttpRoute),
    Service(ServiceRoute),
}

/// A group of routes that can be mounted under a prefix.
///
/// The service stays alive with the routing it registered, so it can hold shared state and
/// react to the server's lifecycle.
pub trait HttpService: Send + Sync {
    fn routing(&self, rules: &mut HttpRules);

    fn before_start(&self) {}

    fn after_stop(&self) {}
}

impl<F> HttpService for F
where
    F: Fn(&mut HttpRules) + Send + Sync,
{
    fn routing(&self, rules: &mut HttpRules) {
        self(rules)
    }
}

/// The immutable, shareable result of route registration.
#[derive(Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    /// Starts a fresh crawl for `prologue`.
    pub fn crawler(&self, prologue: &Prologue) -> RouteCrawler<'_> {
        RouteCrawler::new(&self.entries, prologue)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Notifies handlers and services in registration order, services before their routes.
    pub fn before_start(&self) {
        walk(&self.entries, &|handler: &dyn Handler| handler.before_start(), &|service: &dyn HttpService| {
            service.before_start()
        });
    }

    pub fn after_stop(&self) {
        walk(&self.entries, &|handler: &dyn Handler| handler.after_stop(), &|service: &dyn HttpService| {
            service.after_stop()
        });
    }
}

fn walk(entries: &[RouteEntry], on_handler: &dyn Fn(&dyn Handler), on_service: &dyn Fn(&dyn HttpService)) {
    for entry in entries {
        match entry {
            RouteEntry::Http(route) => on_handler(route.handler.as_ref()),
            RouteEntry::Service(service) => {
                on_service(service.service.as_ref());
                walk(&service.entries, on_handler, on_service);
            }
        }
    }
}

/// Collects routes in registration order.
///
/// Registration never fails on the spot: bad paths are remembered and reported by
/// [`HttpRules::into_table`], which keeps the chained style usable.
#[derive(Default)]
pub struct HttpRules {
    entries: Vec<RouteEntry>,
    errors: Vec<RouteError>,
}

macro_rules! method_route {
    ($method:ident, $upper_case_method:ident) => {
        #[doc = concat!("Routes HTTP ", stringify!($upper_case_method), " requests matching `pattern`.")]
        pub fn $method<H: Handler + 'static>(&mut self, pattern: &str, handler: H) -> &mut Self {
            self.route(Method::$upper_case_method, pattern, handler)
        }
    };
}

impl HttpRules {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route<H: Handler + 'static>(&mut self, method: Method, pattern: &str, handler: H) -> &mut Self {
        match PathMatcher::parse(pattern) {
            Ok(path) => self.route_with(MethodPredicate::from(method), path, handler),
            Err(e) => self.reject(e),
        }
    }

    method_route!(get, GET);
    method_route!(post, POST);
    method_route!(put, PUT);
    method_route!(delete, DELETE);
    method_route!(head, HEAD);
    method_route!(options, OPTIONS);
    method_route!(connect, CONNECT);
    method_route!(patch, PATCH);
    method_route!(trace, TRACE);

    /// Matches every method and every path.
    pub fn any<H: Handler + 'static>(&mut self, handler: H) -> &mut Self {
        self.route_with(MethodPredicate::Any, PathMatcher::Any, handler)
    }

    /// Matches every method on `pattern`.
    pub fn any_path<H: Handler + 'static>(&mut self, pattern: &str, handler: H) -> &mut Self {
        match PathMatcher::parse(pattern) {
            Ok(path) => self.route_with(MethodPredicate::Any, path, handler),
            Err(e) => self.reject(e),
        }
    }

    pub fn route_with<H: Handler + 'static>(
        &mut self,
        methods: MethodPredicate,
        path: PathMatcher,
        handler: H,
    ) -> &mut Self {
        self.entries.push(RouteEntry::Http(HttpRoute { methods, path, handler: Arc::new(handler) }));
        self
    }

    /// Mounts `service` under `prefix`. Its routes match the path with the prefix removed.
    pub fn register<S: HttpService + 'static>(&mut self, prefix: &str, service: S) -> &mut Self {
        let prefix = match matcher::normalize_prefix(prefix) {
            Ok(prefix) => prefix,
            Err(e) => return self.reject(e),
        };

        let mut nested = HttpRules::new();
        service.routing(&mut nested);
        self.errors.append(&mut nested.errors);
        let service: Arc<dyn HttpService> = Arc::new(service);
        self.entries.push(RouteEntry::Service(ServiceRoute { prefix, service, entries: nested.entries }));
        self
    }

    /// Fails with the first registration error, if any.
    pub fn into_table(self) -> Result<RouteTable, RouteError> {
        match self.errors.into_iter().next() {
            Some(e) => Err(e),
            None => Ok(RouteTable { entries: self.entries }),
        }
    }

    fn reject(&mut self, error: RouteError) -> &mut Self {
        self.errors.push(error);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use http::Version;

    fn ok() -> impl Handler {
        handler_fn(|_req, res| {
            res.send_empty()?;
            Ok(())
        })
    }

    #[test]
    fn first_registration_error_is_reported() {
        let mut rules = HttpRules::new();
        rules.get("/fine", ok()).get("broken", ok()).post("/{}", ok());
        assert!(matches!(rules.into_table(), Err(RouteError::InvalidPath(path)) if path == "broken"));
    }

    #[test]
    fn errors_inside_services_surface() {
        let mut rules = HttpRules::new();
        rules.register("/api", |rules: &mut HttpRules| {
            rules.get("/{}", ok());
        });
        assert!(matches!(rules.into_table(), Err(RouteError::InvalidPattern { .. })));
    }

    struct Recorded {
        name: &'static str,
        log: Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl Recorded {
        fn push(&self, event: &str) {
            self.log.lock().unwrap().push(format!("{} {event}", self.name));
        }
    }

    #[async_trait::async_trait]
    impl Handler for Recorded {
        async fn handle(
            &self,
            _req: &mut crate::request::RoutingRequest,
            _res: &mut crate::response::RoutingResponse,
        ) -> Result<(), crate::handler::BoxError> {
            Ok(())
        }

        fn before_start(&self) {
            self.push("start");
        }

        fn after_stop(&self) {
            self.push("stop");
        }
    }

    struct Nested {
        log: Arc<std::sync::Mutex<Vec<String>>>,
    }

    impl HttpService for Nested {
        fn routing(&self, rules: &mut HttpRules) {
            rules.get("/inner", Recorded { name: "inner", log: Arc::clone(&self.log) });
        }

        fn before_start(&self) {
            self.log.lock().unwrap().push("service start".to_owned());
        }

        fn after_stop(&self) {
            self.log.lock().unwrap().push("service stop".to_owned());
        }
    }

    #[test]
    fn lifecycle_reaches_handlers_and_services_in_order() {
        let log = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut rules = HttpRules::new();
        rules
            .get("/outer", Recorded { name: "outer", log: Arc::clone(&log) })
            .register("/nested", Nested { log: Arc::clone(&log) });
        let table = rules.into_table().unwrap();

        table.before_start();
        table.after_stop();
        assert_eq!(
            *log.lock().unwrap(),
            ["outer start", "service start", "inner start", "outer stop", "service stop", "inner stop"]
        );
    }

    #[test]
    fn closure_service_and_custom_predicate() {
        let mut rules = HttpRules::new();
        rules.register("/api/", |rules: &mut HttpRules| {
            rules.route_with(MethodPredicate::from_fn(Method::is_safe), PathMatcher::prefix("/v1").unwrap(), ok());
        });
        let table = rules.into_table().unwrap();

        let hit = Prologue::new(Method::HEAD, "/api/v1/things", None, Version::HTTP_11);
        let miss = Prologue::new(Method::POST, "/api/v1/things", None, Version::HTTP_11);
        assert_eq!(table.crawler(&hit).count(), 1);
        assert_eq!(table.crawler(&miss).count(), 0);
    }
}
