//! HTTP response head.

use http::Response;

/// The header portion of a response, with an empty body placeholder.
pub type ResponseHead = Response<()>;
