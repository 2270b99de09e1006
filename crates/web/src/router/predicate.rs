//! Method predicates, the first stage of route matching.
//!
//! ```
//! use http::Method;
//! use switchyard_web::router::predicate::{MethodPredicate, get_method};
//!
//! assert!(get_method().test(&Method::GET));
//! assert!(MethodPredicate::one_of([Method::PUT, Method::PATCH]).test(&Method::PATCH));
//! assert!(MethodPredicate::from_fn(|method| method.is_safe()).test(&Method::HEAD));
//! ```

use std::fmt;
use std::sync::Arc;

use http::Method;

/// Decides whether a route accepts a request method.
#[derive(Clone)]
pub enum MethodPredicate {
    Any,
    OneOf(Vec<Method>),
    Fn(Arc<dyn Fn(&Method) -> bool + Send + Sync>),
}

impl MethodPredicate {
    pub fn any() -> Self {
        Self::Any
    }

    pub fn one_of(methods: impl IntoIterator<Item = Method>) -> Self {
        Self::OneOf(methods.into_iter().collect())
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Method) -> bool + Send + Sync + 'static,
    {
        Self::Fn(Arc::new(f))
    }

    #[inline]
    pub fn test(&self, method: &Method) -> bool {
        match self {
            Self::Any => true,
            Self::OneOf(methods) => methods.contains(method),
            Self::Fn(f) => f(method),
        }
    }
}

impl From<Method> for MethodPredicate {
    fn from(method: Method) -> Self {
        Self::OneOf(vec![method])
    }
}

impl fmt::Debug for MethodPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("Any"),
            Self::OneOf(methods) => f.debug_tuple("OneOf").field(methods).finish(),
            Self::Fn(_) => f.write_str("Fn(..)"),
        }
    }
}

macro_rules! method_predicate {
    ($method:ident, $upper_case_method:ident) => {
        #[doc = concat!("Accepts HTTP ", stringify!($upper_case_method), " requests only.")]
        #[inline]
        pub fn $method() -> MethodPredicate {
            MethodPredicate::from(Method::$upper_case_method)
        }
    };
}

method_predicate!(get_method, GET);
method_predicate!(post_method, POST);
method_predicate!(put_method, PUT);
method_predicate!(delete_method, DELETE);
method_predicate!(head_method, HEAD);
method_predicate!(options_method, OPTIONS);
method_predicate!(connect_method, CONNECT);
method_predicate!(patch_method, PATCH);
method_predicate!(trace_method, TRACE);
