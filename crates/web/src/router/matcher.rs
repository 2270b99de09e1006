use std::fmt;

use crate::request::PathParams;
use crate::router::RouteError;

/// The second matching stage: tests a path and extracts its parameters.
pub enum PathMatcher {
    /// Matches every path.
    Any,
    Exact(String),
    /// A `matchit` pattern such as `/users/{id}` or `/static/{*rest}`.
    Pattern { pattern: String, router: matchit::Router<()> },
    /// Matches the prefix itself and anything below it.
    Prefix(String),
}

impl PathMatcher {
    /// Parses a route pattern. Patterns containing `{` capture parameters, others match exactly.
    pub fn parse(pattern: &str) -> Result<Self, RouteError> {
        if !pattern.starts_with('/') {
            return Err(RouteError::InvalidPath(pattern.to_owned()));
        }

        if !pattern.contains('{') {
            return Ok(Self::Exact(pattern.to_owned()));
        }

        let mut router = matchit::Router::new();
        router
            .insert(pattern, ())
            .map_err(|source| RouteError::InvalidPattern { pattern: pattern.to_owned(), source })?;
        Ok(Self::Pattern { pattern: pattern.to_owned(), router })
    }

    pub fn prefix(prefix: &str) -> Result<Self, RouteError> {
        normalize_prefix(prefix).map(Self::Prefix)
    }

    pub fn matches(&self, path: &str) -> Option<PathParams> {
        match self {
            Self::Any => Some(PathParams::empty()),
            Self::Exact(exact) => (exact == path).then(PathParams::empty),
            Self::Pattern { router, .. } => router.at(path).ok().map(|matched| matched.params.into()),
            Self::Prefix(prefix) => strip_prefix(prefix, path).map(|_| PathParams::empty()),
        }
    }
}

impl fmt::Debug for PathMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("Any"),
            Self::Exact(path) => f.debug_tuple("Exact").field(path).finish(),
            Self::Pattern { pattern, .. } => f.debug_tuple("Pattern").field(pattern).finish(),
            Self::Prefix(prefix) => f.debug_tuple("Prefix").field(prefix).finish(),
        }
    }
}

/// Drops the trailing slash so `/api/` and `/api` register the same prefix.
pub(crate) fn normalize_prefix(prefix: &str) -> Result<String, RouteError> {
    if !prefix.starts_with('/') {
        return Err(RouteError::InvalidPath(prefix.to_owned()));
    }
    Ok(prefix.trim_end_matches('/').to_owned())
}

/// Returns what a nested route sees of `path` under `prefix`, always starting with `/`.
///
/// `prefix` must be normalized. `/api` owns `/api` and `/api/..` but not `/apix`.
pub(crate) fn strip_prefix<'p>(prefix: &str, path: &'p str) -> Option<&'p str> {
    let rest = path.strip_prefix(prefix)?;
    if rest.is_empty() {
        Some("/")
    } else if rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}
